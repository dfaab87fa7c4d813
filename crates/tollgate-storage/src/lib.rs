pub mod memory;
pub mod traits;

pub use memory::{InMemoryStore, InMemoryStoreFactory};
pub use traits::{RelationshipStore, SchemaStore, StorageError, StoreFactory};
