use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tollgate_core::schema::Schema;
use tollgate_core::tuple::{SnapshotToken, TenantId, Tuple, TupleFilter, TupleWrite};

use crate::traits::{RelationshipStore, SchemaStore, StorageError, StoreFactory};

const ACTIVE_TX_ID: u64 = u64::MAX;

#[derive(Debug, Clone)]
struct StoredTuple {
    tuple: Tuple,
    created_tx_id: u64,
    deleted_tx_id: u64,
}

impl StoredTuple {
    fn is_active(&self) -> bool {
        self.deleted_tx_id == ACTIVE_TX_ID
    }

    fn visible_at(&self, snapshot: u64) -> bool {
        self.created_tx_id <= snapshot && self.deleted_tx_id > snapshot
    }
}

#[derive(Debug, Default)]
struct InnerState {
    current_tx: u64,
    tuples: Vec<StoredTuple>,
    schemas: Vec<(String, Arc<Schema>)>,
}

/// One tenant's relationships and schema versions. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<InnerState>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, InnerState>, StorageError> {
        self.state
            .lock()
            .map_err(|_| StorageError::Internal("store lock poisoned".to_string()))
    }
}

impl RelationshipStore for InMemoryStore {
    async fn write(
        &self,
        writes: &[TupleWrite],
        deletes: &[TupleFilter],
    ) -> Result<SnapshotToken, StorageError> {
        if deletes.iter().any(TupleFilter::is_empty) {
            return Err(StorageError::EmptyDeleteFilter);
        }

        let incoming: Vec<Tuple> = writes.iter().cloned().map(Tuple::from).collect();
        for (i, tuple) in incoming.iter().enumerate() {
            if incoming[i + 1..].contains(tuple) {
                return Err(StorageError::DuplicateTuple(tuple.to_string()));
            }
        }

        let mut state = self.lock()?;
        let tx_id = state.current_tx + 1;

        let deleted = |stored: &StoredTuple| {
            stored.is_active() && deletes.iter().any(|f| f.matches(&stored.tuple))
        };
        for tuple in &incoming {
            let live_duplicate = state
                .tuples
                .iter()
                .any(|t| t.is_active() && !deleted(t) && &t.tuple == tuple);
            if live_duplicate {
                return Err(StorageError::DuplicateTuple(tuple.to_string()));
            }
        }

        for stored in &mut state.tuples {
            if deleted(&*stored) {
                stored.deleted_tx_id = tx_id;
            }
        }
        state
            .tuples
            .extend(incoming.into_iter().map(|tuple| StoredTuple {
                tuple,
                created_tx_id: tx_id,
                deleted_tx_id: ACTIVE_TX_ID,
            }));
        state.current_tx = tx_id;

        Ok(SnapshotToken::new(tx_id))
    }

    async fn read(
        &self,
        filter: &TupleFilter,
        snapshot: Option<SnapshotToken>,
        limit: Option<usize>,
    ) -> Result<Vec<Tuple>, StorageError> {
        let state = self.lock()?;

        let snap = match snapshot {
            Some(token) => {
                let val = token.value();
                if val > state.current_tx {
                    return Err(StorageError::SnapshotAhead {
                        requested: val,
                        current: state.current_tx,
                    });
                }
                val
            }
            None => state.current_tx,
        };

        Ok(state
            .tuples
            .iter()
            .filter(|t| t.visible_at(snap) && filter.matches(&t.tuple))
            .take(limit.unwrap_or(usize::MAX))
            .map(|t| t.tuple.clone())
            .collect())
    }

    async fn snapshot(&self) -> Result<SnapshotToken, StorageError> {
        let state = self.lock()?;
        Ok(SnapshotToken::new(state.current_tx))
    }
}

impl SchemaStore for InMemoryStore {
    async fn write_schema(&self, schema: Arc<Schema>) -> Result<String, StorageError> {
        let version = uuid::Uuid::new_v4().to_string();
        let mut state = self.lock()?;
        state.schemas.push((version.clone(), schema));
        Ok(version)
    }

    async fn read_schema(&self, version: &str) -> Result<Option<Arc<Schema>>, StorageError> {
        let state = self.lock()?;
        Ok(state
            .schemas
            .iter()
            .find(|(v, _)| v == version)
            .map(|(_, schema)| Arc::clone(schema)))
    }

    async fn head_version(&self) -> Result<Option<String>, StorageError> {
        let state = self.lock()?;
        Ok(state.schemas.last().map(|(v, _)| v.clone()))
    }
}

#[derive(Debug, Default)]
pub struct InMemoryStoreFactory {
    stores: Mutex<HashMap<TenantId, InMemoryStore>>,
}

impl InMemoryStoreFactory {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StoreFactory for InMemoryStoreFactory {
    type Store = InMemoryStore;

    fn for_tenant(&self, tenant_id: &TenantId) -> InMemoryStore {
        let mut stores = self.stores.lock().unwrap_or_else(PoisonError::into_inner);
        stores.entry(tenant_id.clone()).or_default().clone()
    }
}
