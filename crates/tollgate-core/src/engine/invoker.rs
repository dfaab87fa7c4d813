use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::tuple::{EntityRef, SnapshotToken, SubjectRef, TenantId};

use super::context::guarded;
use super::{
    CheckDispatcher, CheckEngine, CheckError, CheckFuture, CheckRequest, CheckResult,
    EngineConfig, InvocationContext, RelationshipReader, SchemaReader, SubjectPermissionEngine,
    SubjectPermissionRequest, SubjectPermissionResults,
};

/// Per-request knobs. Unset fields fall back to the latest snapshot, the
/// latest schema version and the engine defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestMetadata {
    pub snapshot: Option<SnapshotToken>,
    pub schema_version: Option<String>,
    pub depth: Option<u32>,
    pub timeout: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPermissionInput {
    pub tenant: TenantId,
    pub entity: EntityRef,
    pub permission: String,
    pub subject: SubjectRef,
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckPermissionOutput {
    pub result: CheckResult,
    pub snapshot: SnapshotToken,
    pub schema_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPermissionInput {
    pub tenant: TenantId,
    pub entity: EntityRef,
    pub subject: SubjectRef,
    pub only_permission: bool,
    pub metadata: RequestMetadata,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubjectPermissionOutput {
    pub results: SubjectPermissionResults,
    pub snapshot: SnapshotToken,
    pub schema_version: String,
}

/// Front door for both engines. Resolves request metadata into an
/// [`InvocationContext`] and sits between the check engine and its nested
/// checks.
pub struct DirectInvoker<R, S> {
    reader: Arc<R>,
    schemas: Arc<S>,
    check: Arc<CheckEngine<R, S>>,
    subject_permission: SubjectPermissionEngine<S>,
    config: EngineConfig,
}

impl<R, S> DirectInvoker<R, S>
where
    R: RelationshipReader + 'static,
    S: SchemaReader + 'static,
{
    pub fn new(reader: Arc<R>, schemas: Arc<S>, config: EngineConfig) -> Arc<Self> {
        let check = Arc::new(CheckEngine::new(
            Arc::clone(&reader),
            Arc::clone(&schemas),
            config.clone(),
        ));
        let checker: Arc<dyn CheckDispatcher> = check.clone();
        let subject_permission =
            SubjectPermissionEngine::new(Arc::clone(&schemas), checker, config.clone());

        let invoker = Arc::new(Self {
            reader,
            schemas,
            check,
            subject_permission,
            config,
        });
        let dispatcher: Weak<dyn CheckDispatcher> = Arc::downgrade(&invoker) as Weak<_>;
        invoker.check.set_dispatcher(dispatcher);
        invoker
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub async fn check(
        &self,
        input: &CheckPermissionInput,
        cancel: CancellationToken,
    ) -> Result<CheckPermissionOutput, CheckError> {
        let span = tracing::info_span!(
            "check",
            tenant = %input.tenant,
            entity = %input.entity,
            permission = %input.permission,
            subject = %input.subject,
        );
        async {
            let ctx = self.context(&input.tenant, &input.metadata, cancel).await?;
            let request = CheckRequest::new(
                input.entity.clone(),
                &input.permission,
                input.subject.clone(),
            );

            let result = self.check.check(&ctx, &request).await;
            match &result {
                Ok(result) => {
                    tracing::debug!(%result, snapshot = %ctx.snapshot(), "check resolved")
                }
                Err(e) => tracing::warn!(error = %e, "check failed"),
            }

            Ok::<_, CheckError>(CheckPermissionOutput {
                result: result?,
                snapshot: ctx.snapshot(),
                schema_version: ctx.schema_version().to_string(),
            })
        }
        .instrument(span)
        .await
    }

    pub async fn subject_permission(
        &self,
        input: &SubjectPermissionInput,
        cancel: CancellationToken,
    ) -> Result<SubjectPermissionOutput, CheckError> {
        let span = tracing::info_span!(
            "subject_permission",
            tenant = %input.tenant,
            entity = %input.entity,
            subject = %input.subject,
            only_permission = input.only_permission,
        );
        async {
            let ctx = self.context(&input.tenant, &input.metadata, cancel).await?;
            let request = SubjectPermissionRequest {
                entity: input.entity.clone(),
                subject: input.subject.clone(),
                only_permission: input.only_permission,
            };

            let results = self
                .subject_permission
                .subject_permission(&ctx, &request)
                .await;
            match &results {
                Ok(results) => tracing::debug!(
                    evaluated = results.len(),
                    allowed = results.allowed().count(),
                    "subject permissions resolved"
                ),
                Err(e) => tracing::warn!(error = %e, "subject permission failed"),
            }

            Ok::<_, CheckError>(SubjectPermissionOutput {
                results: results?,
                snapshot: ctx.snapshot(),
                schema_version: ctx.schema_version().to_string(),
            })
        }
        .instrument(span)
        .await
    }

    async fn context(
        &self,
        tenant: &TenantId,
        metadata: &RequestMetadata,
        cancel: CancellationToken,
    ) -> Result<InvocationContext, CheckError> {
        if cancel.is_cancelled() {
            return Err(CheckError::Canceled);
        }

        let depth = metadata.depth.unwrap_or(self.config.default_depth);
        if depth == 0 {
            return Err(CheckError::DepthExceeded);
        }

        // Fixed up front so the head lookups below already count against it.
        let deadline = metadata
            .timeout
            .or(self.config.timeout)
            .map(|timeout| Instant::now() + timeout);

        let snapshot = match metadata.snapshot {
            Some(snapshot) => snapshot,
            None => guarded(&cancel, deadline, self.reader.head_snapshot(tenant)).await?,
        };
        let schema_version = match metadata.schema_version.as_deref() {
            Some(version) if !version.is_empty() => version.to_string(),
            _ => guarded(&cancel, deadline, self.schemas.head_version(tenant))
                .await?
                .ok_or_else(|| CheckError::SchemaNotFound {
                    tenant: tenant.clone(),
                    version: "latest".to_string(),
                })?,
        };

        let ctx = InvocationContext::new(tenant.clone(), snapshot, schema_version, depth)
            .with_cancellation(cancel);
        Ok(match deadline {
            Some(deadline) => ctx.with_deadline(deadline),
            None => ctx,
        })
    }
}

impl<R, S> CheckDispatcher for DirectInvoker<R, S>
where
    R: RelationshipReader + 'static,
    S: SchemaReader + 'static,
{
    fn dispatch_check<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        request: &'a CheckRequest,
    ) -> CheckFuture<'a> {
        Box::pin(async move {
            tracing::trace!(
                entity = %request.entity,
                permission = %request.permission,
                depth = ctx.depth(),
                "dispatching nested check"
            );
            self.check.check(ctx, request).await
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::{DRIVE_SCHEMA, TestStore, VERSION};

    fn drive_invoker() -> (Arc<TestStore>, Arc<DirectInvoker<TestStore, TestStore>>) {
        let store = Arc::new(TestStore::new(
            DRIVE_SCHEMA,
            &[
                "doc:1#owner@user:2",
                "doc:1#member@user:1",
                "doc:1#org@organization:1",
                "doc:1#parent@folder:1",
                "organization:1#admin@user:1",
            ],
        ));
        let invoker = DirectInvoker::new(
            Arc::clone(&store),
            Arc::clone(&store),
            EngineConfig::default(),
        );
        (store, invoker)
    }

    fn check_input(entity: &str, permission: &str, subject: &str) -> CheckPermissionInput {
        CheckPermissionInput {
            tenant: TenantId::new("t1"),
            entity: entity.parse().unwrap(),
            permission: permission.to_string(),
            subject: subject.parse().unwrap(),
            metadata: RequestMetadata::default(),
        }
    }

    #[tokio::test]
    async fn check_resolves_latest_snapshot_and_schema() {
        let (_store, invoker) = drive_invoker();

        let output = invoker
            .check(&check_input("doc:1", "delete", "user:1"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(output.result, CheckResult::Allowed);
        assert_eq!(output.snapshot, SnapshotToken::new(1));
        assert_eq!(output.schema_version, VERSION);
    }

    #[tokio::test]
    async fn explicit_snapshot_pins_reads() {
        let (store, invoker) = drive_invoker();
        store.write(&["doc:1#member@user:5"]);

        let mut pinned = check_input("doc:1", "read", "user:5");
        pinned.metadata.snapshot = Some(SnapshotToken::new(1));
        let latest = check_input("doc:1", "read", "user:5");

        let pinned = invoker.check(&pinned, CancellationToken::new()).await.unwrap();
        let latest = invoker.check(&latest, CancellationToken::new()).await.unwrap();

        assert_eq!(pinned.result, CheckResult::Denied);
        assert_eq!(latest.result, CheckResult::Allowed);
        assert_eq!(latest.snapshot, SnapshotToken::new(2));
    }

    #[tokio::test]
    async fn unknown_schema_version_is_reported() {
        let (_store, invoker) = drive_invoker();
        let mut input = check_input("doc:1", "read", "user:1");
        input.metadata.schema_version = Some("v2".to_string());

        let err = invoker
            .check(&input, CancellationToken::new())
            .await
            .unwrap_err();

        assert!(matches!(err, CheckError::SchemaNotFound { .. }), "got: {err}");
    }

    #[tokio::test]
    async fn zero_depth_is_rejected_up_front() {
        let (_store, invoker) = drive_invoker();
        let mut input = check_input("doc:1", "read", "user:1");
        input.metadata.depth = Some(0);

        let err = invoker
            .check(&input, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::DepthExceeded);
    }

    #[tokio::test]
    async fn canceled_token_stops_the_request() {
        let (_store, invoker) = drive_invoker();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = invoker
            .check(&check_input("doc:1", "read", "user:1"), cancel)
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::Canceled);
    }

    #[tokio::test]
    async fn subject_permission_runs_through_the_invoker() {
        let (_store, invoker) = drive_invoker();
        let input = SubjectPermissionInput {
            tenant: TenantId::new("t1"),
            entity: "doc:1".parse().unwrap(),
            subject: "user:1".parse().unwrap(),
            only_permission: true,
            metadata: RequestMetadata {
                depth: Some(100),
                ..RequestMetadata::default()
            },
        };

        let output = invoker
            .subject_permission(&input, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(
            output.results.iter().collect::<Vec<_>>(),
            vec![
                ("read", CheckResult::Allowed),
                ("update", CheckResult::Denied),
                ("delete", CheckResult::Allowed),
                ("share", CheckResult::Denied),
            ]
        );
    }

    #[tokio::test]
    async fn nested_checks_route_through_the_invoker_while_alive() {
        let (store, invoker) = drive_invoker();
        let check = Arc::clone(&invoker.check);
        let ctx = InvocationContext::new(TenantId::new("t1"), SnapshotToken::new(1), VERSION, 10);
        let request = CheckRequest::new(
            "doc:1".parse().unwrap(),
            "delete",
            "user:1".parse().unwrap(),
        );

        assert_eq!(check.check(&ctx, &request).await, Ok(CheckResult::Allowed));

        drop(invoker);
        assert_eq!(check.check(&ctx, &request).await, Ok(CheckResult::Allowed));
        assert!(store.reads_of("admin") >= 2);
    }

    fn stalled_invoker() -> Arc<DirectInvoker<TestStore, TestStore>> {
        let store =
            Arc::new(TestStore::new(DRIVE_SCHEMA, &["doc:1#member@user:1"]).stalling_head());
        DirectInvoker::new(Arc::clone(&store), store, EngineConfig::default())
    }

    #[tokio::test]
    async fn cancellation_reaches_the_head_snapshot_lookup() {
        let invoker = stalled_invoker();
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let err = invoker
            .check(&check_input("doc:1", "read", "user:1"), cancel)
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::Canceled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_covers_the_head_snapshot_lookup() {
        let invoker = stalled_invoker();
        let mut input = check_input("doc:1", "read", "user:1");
        input.metadata.timeout = Some(Duration::from_millis(50));

        let err = invoker
            .check(&input, CancellationToken::new())
            .await
            .unwrap_err();

        assert_eq!(err, CheckError::DeadlineExceeded);
    }

    #[tokio::test]
    async fn pinned_snapshot_skips_the_head_lookup() {
        let invoker = stalled_invoker();
        let mut input = check_input("doc:1", "read", "user:1");
        input.metadata.snapshot = Some(SnapshotToken::new(1));

        let output = invoker.check(&input, CancellationToken::new()).await.unwrap();

        assert_eq!(output.result, CheckResult::Allowed);
    }
}
