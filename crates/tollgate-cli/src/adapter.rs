use std::sync::Arc;

use tollgate_core::engine::{CheckError, RelationshipReader, SchemaReader};
use tollgate_core::schema::Schema;
use tollgate_core::tuple::{SnapshotToken, TenantId, Tuple, TupleFilter};
use tollgate_storage::{RelationshipStore, SchemaStore, StorageError, StoreFactory};

/// Exposes a tenant-partitioned store factory as the engines' read-side
/// collaborators.
pub struct StoreReader<F: StoreFactory> {
    factory: Arc<F>,
}

impl<F: StoreFactory> StoreReader<F> {
    pub fn new(factory: Arc<F>) -> Self {
        Self { factory }
    }
}

fn lookup_error(e: StorageError) -> CheckError {
    CheckError::Lookup(e.to_string())
}

impl<F: StoreFactory> RelationshipReader for StoreReader<F> {
    async fn query_tuples(
        &self,
        tenant: &TenantId,
        filter: &TupleFilter,
        snapshot: SnapshotToken,
    ) -> Result<Vec<Tuple>, CheckError> {
        let store = self.factory.for_tenant(tenant);
        store
            .read(filter, Some(snapshot), None)
            .await
            .map_err(lookup_error)
    }

    async fn head_snapshot(&self, tenant: &TenantId) -> Result<SnapshotToken, CheckError> {
        let store = self.factory.for_tenant(tenant);
        store.snapshot().await.map_err(lookup_error)
    }
}

impl<F: StoreFactory> SchemaReader for StoreReader<F> {
    async fn read_schema(
        &self,
        tenant: &TenantId,
        version: &str,
    ) -> Result<Option<Arc<Schema>>, CheckError> {
        let store = self.factory.for_tenant(tenant);
        store.read_schema(version).await.map_err(lookup_error)
    }

    async fn head_version(&self, tenant: &TenantId) -> Result<Option<String>, CheckError> {
        let store = self.factory.for_tenant(tenant);
        store.head_version().await.map_err(lookup_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tollgate_core::schema::parse_schema;
    use tollgate_core::tuple::TupleWrite;
    use tollgate_storage::InMemoryStoreFactory;

    fn write(tuple: &str) -> TupleWrite {
        tuple.parse::<Tuple>().unwrap().into()
    }

    #[tokio::test]
    async fn adapter_reads_tuples_for_the_requested_tenant() {
        let factory = Arc::new(InMemoryStoreFactory::new());
        let tenant = TenantId::new("acme");
        let token = factory
            .for_tenant(&tenant)
            .write(&[write("doc:readme#member@user:alice")], &[])
            .await
            .unwrap();

        let adapter = StoreReader::new(Arc::clone(&factory));
        let filter = TupleFilter {
            entity_type: Some("doc".to_string()),
            ..Default::default()
        };

        let tuples = adapter.query_tuples(&tenant, &filter, token).await.unwrap();
        assert_eq!(tuples.len(), 1);
        assert_eq!(tuples[0].subject.subject_id, "alice");

        let other = adapter
            .query_tuples(&TenantId::new("other"), &filter, SnapshotToken::new(0))
            .await
            .unwrap();
        assert!(other.is_empty());
    }

    #[tokio::test]
    async fn adapter_maps_storage_error_to_lookup_error() {
        let factory = Arc::new(InMemoryStoreFactory::new());
        let adapter = StoreReader::new(factory);

        let err = adapter
            .query_tuples(
                &TenantId::new("acme"),
                &TupleFilter::default(),
                SnapshotToken::new(999),
            )
            .await
            .unwrap_err();

        assert!(
            matches!(err, CheckError::Lookup(ref msg) if msg.contains("ahead")),
            "expected Lookup with 'ahead', got: {err}"
        );
    }

    #[tokio::test]
    async fn adapter_passes_snapshot_token() {
        let factory = Arc::new(InMemoryStoreFactory::new());
        let tenant = TenantId::new("acme");
        let store = factory.for_tenant(&tenant);
        let token = store
            .write(&[write("doc:readme#member@user:alice")], &[])
            .await
            .unwrap();
        store
            .write(&[write("doc:readme#owner@user:bob")], &[])
            .await
            .unwrap();

        let adapter = StoreReader::new(Arc::clone(&factory));
        let tuples = adapter
            .query_tuples(&tenant, &TupleFilter::default(), token)
            .await
            .unwrap();

        assert_eq!(tuples.len(), 1, "should only see tuples at snapshot");
        assert_eq!(adapter.head_snapshot(&tenant).await.unwrap().value(), 2);
    }

    #[tokio::test]
    async fn adapter_resolves_schema_versions() {
        let factory = Arc::new(InMemoryStoreFactory::new());
        let tenant = TenantId::new("acme");
        let schema = Arc::new(parse_schema("entity user {}").unwrap());
        let version = factory
            .for_tenant(&tenant)
            .write_schema(Arc::clone(&schema))
            .await
            .unwrap();

        let adapter = StoreReader::new(factory);

        assert_eq!(adapter.head_version(&tenant).await.unwrap(), Some(version.clone()));
        assert_eq!(adapter.read_schema(&tenant, &version).await.unwrap(), Some(schema));
        assert_eq!(adapter.head_version(&TenantId::new("other")).await.unwrap(), None);
    }
}
