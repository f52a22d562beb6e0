//! MongoDB client wrapper

use bson::{doc, Document};
use mongodb::{options::IndexOptions, Client, Collection, IndexModel};
use serde::{de::DeserializeOwned, Serialize};
use tracing::info;

use crate::models::{Dataset, SchemaDocument, Version};
use crate::types::DatasetError;

/// Trait for records that provide index definitions
pub trait IntoIndexes {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)>;
}

fn unique() -> Option<IndexOptions> {
    Some(IndexOptions::builder().unique(true).build())
}

impl IntoIndexes for Dataset {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "id": 1 }, unique()), (doc! { "code": 1 }, unique())]
    }
}

impl IntoIndexes for Version {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "dataset_id": 1, "version": 1 }, unique())]
    }
}

impl IntoIndexes for SchemaDocument {
    fn into_indices() -> Vec<(Document, Option<IndexOptions>)> {
        vec![(doc! { "dataset_id": 1, "standard": 1 }, None)]
    }
}

/// MongoDB client wrapper
#[derive(Clone)]
pub struct MongoClient {
    client: Client,
    db_name: String,
}

impl MongoClient {
    /// Create a new MongoDB client
    pub async fn new(uri: &str, db_name: &str) -> Result<Self, DatasetError> {
        info!("Connecting to MongoDB at {}", uri);

        // Use serverSelectionTimeoutMS to avoid hanging on unreachable MongoDB
        let timeout_uri = if uri.contains('?') {
            format!("{}&serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        } else {
            format!("{}?serverSelectionTimeoutMS=3000&connectTimeoutMS=3000", uri)
        };

        let client = Client::with_uri_str(&timeout_uri)
            .await
            .map_err(|e| DatasetError::Database(format!("Failed to connect to MongoDB: {}", e)))?;

        client
            .database(db_name)
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|e| DatasetError::Database(format!("MongoDB ping failed: {}", e)))?;

        info!("Connected to MongoDB database '{}'", db_name);

        Ok(Self {
            client,
            db_name: db_name.to_string(),
        })
    }

    /// Typed collection with its indexes applied
    pub async fn collection<T>(&self, name: &str) -> Result<Collection<T>, DatasetError>
    where
        T: Serialize + DeserializeOwned + Unpin + Send + Sync + IntoIndexes,
    {
        let collection = self.client.database(&self.db_name).collection::<T>(name);

        let indices: Vec<IndexModel> = T::into_indices()
            .into_iter()
            .map(|(keys, opts)| IndexModel::builder().keys(keys).options(opts).build())
            .collect();
        if !indices.is_empty() {
            collection
                .create_indexes(indices)
                .await
                .map_err(|e| DatasetError::Database(format!("Failed to create indexes: {}", e)))?;
        }

        Ok(collection)
    }
}
