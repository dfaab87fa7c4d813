use std::path::Path;
use std::sync::Arc;

use serde::Serialize;
use serde::ser::Serializer;
use tokio_util::sync::CancellationToken;
use tollgate_core::engine::{
    CheckPermissionInput, RequestMetadata, SubjectPermissionInput, SubjectPermissionResults,
};
use tollgate_core::schema::{parse_schema, validate_schema, validate_schema_limits};
use tollgate_core::tuple::TenantId;
use tollgate_storage::InMemoryStoreFactory;

use crate::cli::{Command, DataArgs};
use crate::config::AppConfig;
use crate::error::AppError;
use crate::fixtures;
use crate::service::AuthzService;

#[derive(Debug, Serialize)]
pub struct CheckReport {
    pub entity: String,
    pub permission: String,
    pub subject: String,
    pub result: String,
    pub snapshot: String,
    pub schema_version: String,
}

#[derive(Debug, Serialize)]
pub struct SubjectPermissionReport {
    pub entity: String,
    pub subject: String,
    #[serde(serialize_with = "serialize_results")]
    pub results: SubjectPermissionResults,
    pub snapshot: String,
    pub schema_version: String,
}

#[derive(Debug, Serialize)]
pub struct SchemaReport {
    pub valid: bool,
    pub entities: Vec<EntitySummary>,
}

#[derive(Debug, Serialize)]
pub struct EntitySummary {
    pub name: String,
    pub relations: Vec<String>,
    pub permissions: Vec<String>,
}

/// Keeps declaration order, which a map type would lose.
fn serialize_results<S: Serializer>(
    results: &SubjectPermissionResults,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_map(results.iter().map(|(name, result)| (name, result.to_string())))
}

/// Executes one command against a fresh in-memory store and returns its JSON
/// report.
pub async fn run(
    command: Command,
    config: &AppConfig,
    cancel: CancellationToken,
) -> Result<String, AppError> {
    match command {
        Command::Check {
            data,
            entity,
            permission,
            subject,
            depth,
        } => {
            let (service, tenant) = load(&data, config).await?;
            let input = CheckPermissionInput {
                tenant,
                entity,
                permission,
                subject,
                metadata: RequestMetadata {
                    depth,
                    ..Default::default()
                },
            };
            let output = service.check(&input, cancel).await?;
            let report = CheckReport {
                entity: input.entity.to_string(),
                permission: input.permission,
                subject: input.subject.to_string(),
                result: output.result.to_string(),
                snapshot: output.snapshot.to_string(),
                schema_version: output.schema_version,
            };
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::SubjectPermission {
            data,
            entity,
            subject,
            only_permission,
            depth,
        } => {
            let (service, tenant) = load(&data, config).await?;
            let input = SubjectPermissionInput {
                tenant,
                entity,
                subject,
                only_permission,
                metadata: RequestMetadata {
                    depth,
                    ..Default::default()
                },
            };
            let output = service.subject_permission(&input, cancel).await?;
            let report = SubjectPermissionReport {
                entity: input.entity.to_string(),
                subject: input.subject.to_string(),
                results: output.results,
                snapshot: output.snapshot.to_string(),
                schema_version: output.schema_version,
            };
            Ok(serde_json::to_string_pretty(&report)?)
        }
        Command::ValidateSchema { schema } => {
            let report = validate(&schema, config)?;
            Ok(serde_json::to_string_pretty(&report)?)
        }
    }
}

async fn load(
    data: &DataArgs,
    config: &AppConfig,
) -> Result<(AuthzService<InMemoryStoreFactory>, TenantId), AppError> {
    let service = AuthzService::new(
        Arc::new(InMemoryStoreFactory::new()),
        config.to_engine_config(),
        config.to_schema_limits(),
    );
    let tenant = TenantId::new(data.tenant.as_str());

    let definition = fixtures::read_schema_text(&data.schema)?;
    service.write_schema(&tenant, &definition).await?;

    if let Some(path) = &data.relationships {
        let writes = fixtures::read_relationships(path)?;
        if !writes.is_empty() {
            service.write_relationships(&tenant, &writes, &[]).await?;
        }
        tracing::info!(count = writes.len(), path = %path.display(), "relationships loaded");
    }

    Ok((service, tenant))
}

fn validate(path: &Path, config: &AppConfig) -> Result<SchemaReport, AppError> {
    let definition = fixtures::read_schema_text(path)?;
    let schema = parse_schema(&definition)?;
    validate_schema(&schema).map_err(AppError::Validation)?;
    validate_schema_limits(&schema, &config.to_schema_limits()).map_err(AppError::Validation)?;

    let entities = schema
        .entities
        .iter()
        .map(|entity| EntitySummary {
            name: entity.name.clone(),
            relations: entity.relations.iter().map(|r| r.name.clone()).collect(),
            permissions: entity.permissions.iter().map(|p| p.name.clone()).collect(),
        })
        .collect();
    Ok(SchemaReport {
        valid: true,
        entities,
    })
}
