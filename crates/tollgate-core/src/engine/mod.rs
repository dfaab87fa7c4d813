mod check;
mod context;
mod invoker;
mod subject_permission;

pub use check::CheckEngine;
pub use context::InvocationContext;
pub use invoker::{
    CheckPermissionInput, CheckPermissionOutput, DirectInvoker, RequestMetadata,
    SubjectPermissionInput, SubjectPermissionOutput,
};
pub use subject_permission::{
    SubjectPermissionEngine, SubjectPermissionRequest, SubjectPermissionResults,
};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use crate::schema::Schema;
use crate::tuple::{EntityRef, SnapshotToken, SubjectRef, TenantId, Tuple, TupleFilter};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckError {
    #[error("schema not found for tenant '{tenant}' (version '{version}')")]
    SchemaNotFound { tenant: TenantId, version: String },

    #[error("entity type not found: {0}")]
    UndefinedEntityType(String),

    #[error("'{reference}' is not a relation or permission of '{entity_type}'")]
    UndefinedReference {
        entity_type: String,
        reference: String,
    },

    #[error("depth budget exhausted before a verdict was reached")]
    DepthExceeded,

    #[error("request canceled")]
    Canceled,

    #[error("request deadline exceeded")]
    DeadlineExceeded,

    #[error("relationship lookup failed: {0}")]
    Lookup(String),

    #[error("evaluation worker failed: {0}")]
    Worker(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CheckResult {
    Allowed,
    Denied,
}

impl CheckResult {
    pub fn is_allowed(self) -> bool {
        self == Self::Allowed
    }
}

impl From<bool> for CheckResult {
    fn from(allowed: bool) -> Self {
        if allowed { Self::Allowed } else { Self::Denied }
    }
}

impl fmt::Display for CheckResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Allowed => f.write_str("ALLOWED"),
            Self::Denied => f.write_str("DENIED"),
        }
    }
}

/// One membership question: does `subject` satisfy `permission` (a relation
/// or permission name) on `entity`?
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckRequest {
    pub entity: EntityRef,
    pub permission: String,
    pub subject: SubjectRef,
}

impl CheckRequest {
    pub fn new(entity: EntityRef, permission: impl Into<String>, subject: SubjectRef) -> Self {
        Self {
            entity,
            permission: permission.into(),
            subject,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Depth granted to requests that do not carry their own.
    pub default_depth: u32,
    /// Upper bound on sibling evaluations in flight per combinator or fan-out.
    pub max_concurrent_branches: usize,
    pub timeout: Option<Duration>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_depth: 20,
            max_concurrent_branches: 10,
            timeout: None,
        }
    }
}

pub type CheckFuture<'a> =
    Pin<Box<dyn Future<Output = Result<CheckResult, CheckError>> + Send + 'a>>;

/// The narrow capability nested evaluations are routed through. The check
/// engine implements it and also consumes it, so an orchestrator can sit
/// between a check and its recursive sub-checks.
pub trait CheckDispatcher: Send + Sync {
    fn dispatch_check<'a>(
        &'a self,
        ctx: &'a InvocationContext,
        request: &'a CheckRequest,
    ) -> CheckFuture<'a>;
}

pub trait RelationshipReader: Send + Sync {
    fn query_tuples(
        &self,
        tenant: &TenantId,
        filter: &TupleFilter,
        snapshot: SnapshotToken,
    ) -> impl Future<Output = Result<Vec<Tuple>, CheckError>> + Send;

    fn head_snapshot(
        &self,
        tenant: &TenantId,
    ) -> impl Future<Output = Result<SnapshotToken, CheckError>> + Send;
}

pub trait SchemaReader: Send + Sync {
    fn read_schema(
        &self,
        tenant: &TenantId,
        version: &str,
    ) -> impl Future<Output = Result<Option<Arc<Schema>>, CheckError>> + Send;

    fn head_version(
        &self,
        tenant: &TenantId,
    ) -> impl Future<Output = Result<Option<String>, CheckError>> + Send;
}

async fn load_schema<S: SchemaReader>(
    schemas: &S,
    ctx: &InvocationContext,
) -> Result<Arc<Schema>, CheckError> {
    schemas
        .read_schema(ctx.tenant(), ctx.schema_version())
        .await?
        .ok_or_else(|| CheckError::SchemaNotFound {
            tenant: ctx.tenant().clone(),
            version: ctx.schema_version().to_string(),
        })
}
