use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tollgate_cli::cli::{Command, DataArgs};
use tollgate_cli::commands;
use tollgate_cli::config::AppConfig;
use tollgate_cli::error::AppError;
use tollgate_cli::fixtures;
use tollgate_cli::service::AuthzService;
use tollgate_core::engine::{
    CheckError, CheckPermissionInput, CheckResult, EngineConfig, RequestMetadata,
    SubjectPermissionInput,
};
use tollgate_core::schema::SchemaLimits;
use tollgate_core::tuple::{EntityRef, SubjectRef, TenantId, Tuple, TupleWrite};
use tollgate_storage::InMemoryStoreFactory;

const DRIVE_SCHEMA: &str = include_str!("fixtures/drive.perm");
const DRIVE_TUPLES: &str = include_str!("fixtures/drive.tuples");

fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(name)
}

async fn drive_service() -> (AuthzService<InMemoryStoreFactory>, TenantId) {
    let service = AuthzService::new(
        Arc::new(InMemoryStoreFactory::new()),
        EngineConfig::default(),
        SchemaLimits::default(),
    );
    let tenant = TenantId::new("drive");
    service.write_schema(&tenant, DRIVE_SCHEMA).await.unwrap();
    let writes = fixtures::parse_relationships(DRIVE_TUPLES).unwrap();
    service
        .write_relationships(&tenant, &writes, &[])
        .await
        .unwrap();
    (service, tenant)
}

fn subject_permission_input(
    tenant: &TenantId,
    subject: &str,
    only_permission: bool,
) -> SubjectPermissionInput {
    SubjectPermissionInput {
        tenant: tenant.clone(),
        entity: EntityRef::new("doc", "1"),
        subject: subject.parse().unwrap(),
        only_permission,
        metadata: RequestMetadata::default(),
    }
}

#[tokio::test]
async fn subject_permission_over_drive_fixture() {
    let (service, tenant) = drive_service().await;

    let all = service
        .subject_permission(
            &subject_permission_input(&tenant, "user:1", false),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    let only = service
        .subject_permission(
            &subject_permission_input(&tenant, "user:1", true),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    use CheckResult::{Allowed, Denied};
    assert_eq!(
        all.results.iter().collect::<Vec<_>>(),
        vec![
            ("org", Denied),
            ("parent", Denied),
            ("owner", Allowed),
            ("member", Allowed),
            ("read", Allowed),
            ("update", Denied),
            ("delete", Allowed),
            ("share", Denied),
        ]
    );
    assert_eq!(
        only.results.iter().collect::<Vec<_>>(),
        vec![
            ("read", Allowed),
            ("update", Denied),
            ("delete", Allowed),
            ("share", Denied),
        ]
    );
    assert_eq!(all.snapshot, only.snapshot);
}

#[tokio::test]
async fn repeated_subject_permission_calls_agree() {
    let (service, tenant) = drive_service().await;
    let input = subject_permission_input(&tenant, "user:2", false);

    let first = service
        .subject_permission(&input, CancellationToken::new())
        .await
        .unwrap();
    for _ in 0..10 {
        let next = service
            .subject_permission(&input, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(next.results, first.results);
    }
}

#[tokio::test]
async fn pinned_snapshot_ignores_concurrent_write() {
    let (service, tenant) = drive_service().await;
    let pinned = service
        .check(
            &CheckPermissionInput {
                tenant: tenant.clone(),
                entity: EntityRef::new("doc", "1"),
                permission: "read".to_string(),
                subject: SubjectRef::direct("user", "3"),
                metadata: RequestMetadata::default(),
            },
            CancellationToken::new(),
        )
        .await
        .unwrap()
        .snapshot;

    let mut input = subject_permission_input(&tenant, "user:3", true);
    input.metadata.snapshot = Some(pinned);
    let grant: Tuple = "doc:1#member@user:3".parse().unwrap();
    let writes: Vec<TupleWrite> = vec![grant.into()];

    let (before, written) = tokio::join!(
        service.subject_permission(&input, CancellationToken::new()),
        service.write_relationships(&tenant, &writes, &[]),
    );
    let before = before.unwrap();
    assert!(written.unwrap() > pinned);
    assert_eq!(before.snapshot, pinned);
    assert_eq!(before.results.get("read"), Some(CheckResult::Denied));

    // Once the write landed, the pinned token still answers with the old state.
    let again = service
        .subject_permission(&input, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(again.results, before.results);

    input.metadata.snapshot = None;
    let latest = service
        .subject_permission(&input, CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(latest.results.get("read"), Some(CheckResult::Allowed));
}

#[tokio::test]
async fn organization_admin_userset_grants_ownership() {
    let (service, tenant) = drive_service().await;
    let writes = fixtures::parse_relationships(
        "doc:2#owner@organization:1#admin\n\
         doc:2#org@organization:1\n\
         organization:1#admin@user:5\n",
    )
    .unwrap();
    service
        .write_relationships(&tenant, &writes, &[])
        .await
        .unwrap();

    let input = SubjectPermissionInput {
        entity: EntityRef::new("doc", "2"),
        ..subject_permission_input(&tenant, "user:5", true)
    };
    let output = service
        .subject_permission(&input, CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(output.results.allowed().collect::<Vec<_>>(), ["read", "update", "delete"]);
}

#[tokio::test]
async fn cyclic_parent_chain_exhausts_depth() {
    let service = AuthzService::new(
        Arc::new(InMemoryStoreFactory::new()),
        EngineConfig::default(),
        SchemaLimits::default(),
    );
    let tenant = TenantId::new("cycle");
    service
        .write_schema(
            &tenant,
            r#"
            entity user {}
            entity folder {
                relation parent @folder
                relation viewer @user
                permission view = viewer or parent.view
            }
            "#,
        )
        .await
        .unwrap();
    let writes = fixtures::parse_relationships(
        "folder:1#parent@folder:2\nfolder:2#parent@folder:3\nfolder:3#parent@folder:1\n",
    )
    .unwrap();
    service
        .write_relationships(&tenant, &writes, &[])
        .await
        .unwrap();

    let err = service
        .check(
            &CheckPermissionInput {
                tenant: tenant.clone(),
                entity: EntityRef::new("folder", "1"),
                permission: "view".to_string(),
                subject: SubjectRef::direct("user", "9"),
                metadata: RequestMetadata {
                    depth: Some(2),
                    ..Default::default()
                },
            },
            CancellationToken::new(),
        )
        .await
        .unwrap_err();

    assert!(
        matches!(err, AppError::Check(CheckError::DepthExceeded)),
        "got: {err}"
    );
}

#[tokio::test]
async fn check_command_reads_fixture_files() {
    let output = commands::run(
        Command::Check {
            data: DataArgs {
                schema: fixture_path("drive.perm"),
                relationships: Some(fixture_path("drive.tuples")),
                tenant: "default".to_string(),
            },
            entity: EntityRef::new("doc", "1"),
            permission: "delete".to_string(),
            subject: SubjectRef::direct("user", "2"),
            depth: None,
        },
        &AppConfig::default(),
        CancellationToken::new(),
    )
    .await
    .unwrap();

    let json: serde_json::Value = serde_json::from_str(&output).unwrap();
    assert_eq!(json["result"], "ALLOWED");
    assert_eq!(json["permission"], "delete");
}
