//! Database layer
//!
//! MongoDB holds datasets (with their aggregate counters), published versions
//! and schema documents. Each store has an in-memory twin for dev mode and tests.

pub mod mongo;
pub mod stores;

pub use mongo::{IntoIndexes, MongoClient};
pub use stores::{
    DatasetStore, InMemoryDatasetStore, InMemorySchemaStore, InMemoryVersionStore,
    MongoDatasetStore, MongoSchemaStore, MongoVersionStore, SchemaStore, VersionStore,
};
