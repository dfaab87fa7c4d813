use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tollgate_core::engine::{
    CheckPermissionInput, CheckPermissionOutput, DirectInvoker, EngineConfig,
    SubjectPermissionInput, SubjectPermissionOutput,
};
use tollgate_core::schema::{SchemaLimits, parse_schema, validate_schema, validate_schema_limits};
use tollgate_core::tuple::{SnapshotToken, TenantId, TupleFilter, TupleWrite};
use tollgate_storage::{RelationshipStore, SchemaStore, StoreFactory};

use crate::adapter::StoreReader;
use crate::error::AppError;

type Invoker<F> = DirectInvoker<StoreReader<F>, StoreReader<F>>;

pub struct AuthzService<F: StoreFactory + 'static> {
    factory: Arc<F>,
    invoker: Arc<Invoker<F>>,
    schema_limits: SchemaLimits,
}

impl<F: StoreFactory + 'static> AuthzService<F> {
    pub fn new(factory: Arc<F>, engine_config: EngineConfig, schema_limits: SchemaLimits) -> Self {
        let reader = Arc::new(StoreReader::new(Arc::clone(&factory)));
        let invoker = DirectInvoker::new(Arc::clone(&reader), reader, engine_config);
        Self {
            factory,
            invoker,
            schema_limits,
        }
    }

    /// Compiles and validates `definition`, then stores it as the tenant's
    /// new head schema version.
    pub async fn write_schema(
        &self,
        tenant_id: &TenantId,
        definition: &str,
    ) -> Result<String, AppError> {
        let schema = parse_schema(definition)?;
        validate_schema(&schema).map_err(AppError::Validation)?;
        validate_schema_limits(&schema, &self.schema_limits).map_err(AppError::Validation)?;

        let store = self.factory.for_tenant(tenant_id);
        let version = store.write_schema(Arc::new(schema)).await?;
        tracing::info!(tenant = %tenant_id, %version, "schema written");
        Ok(version)
    }

    pub async fn write_relationships(
        &self,
        tenant_id: &TenantId,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> Result<SnapshotToken, AppError> {
        let store = self.factory.for_tenant(tenant_id);
        let token = store.write(writes, deletes).await?;
        tracing::debug!(
            tenant = %tenant_id,
            writes = writes.len(),
            deletes = deletes.len(),
            snapshot = %token,
            "relationships written"
        );
        Ok(token)
    }

    pub async fn check(
        &self,
        input: &CheckPermissionInput,
        cancel: CancellationToken,
    ) -> Result<CheckPermissionOutput, AppError> {
        Ok(self.invoker.check(input, cancel).await?)
    }

    pub async fn subject_permission(
        &self,
        input: &SubjectPermissionInput,
        cancel: CancellationToken,
    ) -> Result<SubjectPermissionOutput, AppError> {
        Ok(self.invoker.subject_permission(input, cancel).await?)
    }
}
