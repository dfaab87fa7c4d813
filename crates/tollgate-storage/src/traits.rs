use std::future::Future;
use std::sync::Arc;

use tollgate_core::schema::Schema;
use tollgate_core::tuple::{SnapshotToken, TenantId, Tuple, TupleFilter, TupleWrite};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StorageError {
    #[error("delete filter must have at least one field set")]
    EmptyDeleteFilter,
    #[error("tuple already exists: {0}")]
    DuplicateTuple(String),
    #[error("snapshot {requested} is ahead of current {current}")]
    SnapshotAhead { requested: u64, current: u64 },
    #[error("internal storage error: {0}")]
    Internal(String),
}

pub trait RelationshipStore: Send + Sync {
    /// Applies deletes then writes as one transaction and returns the token
    /// of the resulting revision.
    fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;

    fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<SnapshotToken>,
        limit: Option<usize>,
    ) -> impl Future<Output = Result<Vec<Tuple>, StorageError>> + Send;

    fn snapshot(&self) -> impl Future<Output = Result<SnapshotToken, StorageError>> + Send;
}

pub trait SchemaStore: Send + Sync {
    /// Stores a compiled schema as a new version, which becomes the head.
    fn write_schema(
        &self,
        schema: Arc<Schema>,
    ) -> impl Future<Output = Result<String, StorageError>> + Send;

    fn read_schema(
        &self,
        version: &str,
    ) -> impl Future<Output = Result<Option<Arc<Schema>>, StorageError>> + Send;

    fn head_version(&self) -> impl Future<Output = Result<Option<String>, StorageError>> + Send;
}

pub trait StoreFactory: Send + Sync {
    type Store: RelationshipStore + SchemaStore;

    fn for_tenant(&self, tenant_id: &TenantId) -> Self::Store;
}
