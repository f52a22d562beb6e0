//! Dataset, version and schema stores

use bson::doc;
use futures::TryStreamExt;
use mongodb::options::ReturnDocument;
use mongodb::Collection;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use tracing::info;

use super::mongo::MongoClient;
use crate::models::{Dataset, SchemaDocument, SortOrder, Version, VersionPage, VersionQuery};
use crate::types::{DatasetError, Result};

const EXPORTED_STANDARDS: [&str; 2] = ["default", "open_minds"];

#[async_trait::async_trait]
pub trait DatasetStore: Send + Sync {
    async fn get(&self, dataset_id: &str) -> Result<Dataset>;

    /// Apply counter deltas atomically, clamping both counters at zero.
    /// `project_id` is recorded when given.
    async fn adjust_counters(
        &self,
        dataset_id: &str,
        files_delta: i64,
        size_delta: i64,
        project_id: Option<&str>,
    ) -> Result<Dataset>;
}

#[async_trait::async_trait]
pub trait VersionStore: Send + Sync {
    async fn exists(&self, dataset_id: &str, version: &str) -> Result<bool>;

    async fn create(&self, version: &Version) -> Result<()>;

    /// Versions matching `query`, newest first unless asked otherwise
    async fn list(&self, query: &VersionQuery) -> Result<VersionPage>;

    /// A given version of a dataset, or its latest when `version` is `None`
    async fn get(&self, dataset_id: &str, version: Option<&str>) -> Result<Version>;
}

#[async_trait::async_trait]
pub trait SchemaStore: Send + Sync {
    /// Non-draft schemas of an exported standard
    async fn published_schemas(&self, dataset_id: &str) -> Result<Vec<SchemaDocument>>;
}

fn dataset_not_found(dataset_id: &str) -> DatasetError {
    DatasetError::NotFound(format!("Dataset {} not found", dataset_id))
}

fn version_not_found(dataset_id: &str, version: Option<&str>) -> DatasetError {
    match version {
        Some(v) => DatasetError::NotFound(format!("Version {} of dataset {} not found", v, dataset_id)),
        None => DatasetError::NotFound(format!("Dataset {} has no version", dataset_id)),
    }
}

fn clamp_add(current: i64, delta: i64) -> i64 {
    current.saturating_add(delta).max(0)
}

// ============================================================================
// MongoDB stores
// ============================================================================

pub struct MongoDatasetStore {
    collection: Collection<Dataset>,
}

impl MongoDatasetStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection("datasets").await?,
        })
    }
}

#[async_trait::async_trait]
impl DatasetStore for MongoDatasetStore {
    async fn get(&self, dataset_id: &str) -> Result<Dataset> {
        self.collection
            .find_one(doc! { "id": dataset_id })
            .await?
            .ok_or_else(|| dataset_not_found(dataset_id))
    }

    async fn adjust_counters(
        &self,
        dataset_id: &str,
        files_delta: i64,
        size_delta: i64,
        project_id: Option<&str>,
    ) -> Result<Dataset> {
        let mut set = doc! {
            "total_files": { "$max": [0, { "$add": [{ "$ifNull": ["$total_files", 0] }, files_delta] }] },
            "size": { "$max": [0, { "$add": [{ "$ifNull": ["$size", 0] }, size_delta] }] },
        };
        if let Some(project_id) = project_id {
            set.insert("project_id", doc! { "$literal": project_id });
        }

        let updated = self
            .collection
            .find_one_and_update(doc! { "id": dataset_id }, vec![doc! { "$set": set }])
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| dataset_not_found(dataset_id))?;

        info!(
            dataset_code = %updated.code,
            files_delta,
            size_delta,
            total_files = updated.total_files,
            size = updated.size,
            "Dataset counters updated"
        );
        Ok(updated)
    }
}

pub struct MongoVersionStore {
    collection: Collection<Version>,
}

impl MongoVersionStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection("versions").await?,
        })
    }
}

#[async_trait::async_trait]
impl VersionStore for MongoVersionStore {
    async fn exists(&self, dataset_id: &str, version: &str) -> Result<bool> {
        let count = self
            .collection
            .count_documents(doc! { "dataset_id": dataset_id, "version": version })
            .await?;
        Ok(count > 0)
    }

    async fn create(&self, version: &Version) -> Result<()> {
        self.collection.insert_one(version).await?;
        Ok(())
    }

    async fn list(&self, query: &VersionQuery) -> Result<VersionPage> {
        let filter = match query.dataset_id.as_deref() {
            Some(dataset_id) => doc! { "dataset_id": dataset_id },
            None => doc! {},
        };
        let direction = match query.sort_order {
            SortOrder::Asc => 1,
            SortOrder::Desc => -1,
        };

        let total = self.collection.count_documents(filter.clone()).await?;
        let cursor = self
            .collection
            .find(filter)
            .sort(doc! { "created_at": direction })
            .skip(query.page.saturating_mul(query.page_size))
            .limit(i64::try_from(query.page_size).unwrap_or(i64::MAX))
            .await?;
        let result: Vec<Version> = cursor.try_collect().await?;
        Ok(VersionPage::new(query, total, result))
    }

    async fn get(&self, dataset_id: &str, version: Option<&str>) -> Result<Version> {
        let found = match version {
            Some(v) => {
                self.collection
                    .find_one(doc! { "dataset_id": dataset_id, "version": v })
                    .await?
            }
            None => {
                self.collection
                    .find_one(doc! { "dataset_id": dataset_id })
                    .sort(doc! { "created_at": -1 })
                    .await?
            }
        };
        found.ok_or_else(|| version_not_found(dataset_id, version))
    }
}

pub struct MongoSchemaStore {
    collection: Collection<SchemaDocument>,
}

impl MongoSchemaStore {
    pub async fn new(client: &MongoClient) -> Result<Self> {
        Ok(Self {
            collection: client.collection("schemas").await?,
        })
    }
}

#[async_trait::async_trait]
impl SchemaStore for MongoSchemaStore {
    async fn published_schemas(&self, dataset_id: &str) -> Result<Vec<SchemaDocument>> {
        let cursor = self
            .collection
            .find(doc! {
                "dataset_id": dataset_id,
                "is_draft": false,
                "standard": { "$in": EXPORTED_STANDARDS.to_vec() },
            })
            .await?;
        let schemas: Vec<SchemaDocument> = cursor.try_collect().await?;
        Ok(schemas)
    }
}

// ============================================================================
// In-memory stores
// ============================================================================

#[derive(Default)]
pub struct InMemoryDatasetStore {
    datasets: RwLock<HashMap<String, Dataset>>,
    fail_counters: AtomicBool,
}

impl InMemoryDatasetStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later counter update fail with a database error
    pub fn fail_counter_updates(&self) {
        self.fail_counters.store(true, Ordering::SeqCst);
    }

    pub async fn insert(&self, dataset: Dataset) {
        self.datasets.write().await.insert(dataset.id.clone(), dataset);
    }
}

#[async_trait::async_trait]
impl DatasetStore for InMemoryDatasetStore {
    async fn get(&self, dataset_id: &str) -> Result<Dataset> {
        self.datasets
            .read()
            .await
            .get(dataset_id)
            .cloned()
            .ok_or_else(|| dataset_not_found(dataset_id))
    }

    async fn adjust_counters(
        &self,
        dataset_id: &str,
        files_delta: i64,
        size_delta: i64,
        project_id: Option<&str>,
    ) -> Result<Dataset> {
        if self.fail_counters.load(Ordering::SeqCst) {
            return Err(DatasetError::Database(format!(
                "counter update on {} refused",
                dataset_id
            )));
        }
        let mut datasets = self.datasets.write().await;
        let dataset = datasets
            .get_mut(dataset_id)
            .ok_or_else(|| dataset_not_found(dataset_id))?;
        dataset.total_files = clamp_add(dataset.total_files, files_delta);
        dataset.size = clamp_add(dataset.size, size_delta);
        if let Some(project_id) = project_id {
            dataset.project_id = Some(project_id.to_string());
        }
        Ok(dataset.clone())
    }
}

#[derive(Default)]
pub struct InMemoryVersionStore {
    versions: RwLock<Vec<Version>>,
}

impl InMemoryVersionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Version> {
        self.versions.read().await.clone()
    }
}

#[async_trait::async_trait]
impl VersionStore for InMemoryVersionStore {
    async fn exists(&self, dataset_id: &str, version: &str) -> Result<bool> {
        Ok(self
            .versions
            .read()
            .await
            .iter()
            .any(|v| v.dataset_id == dataset_id && v.version == version))
    }

    async fn create(&self, version: &Version) -> Result<()> {
        let mut versions = self.versions.write().await;
        if versions
            .iter()
            .any(|v| v.dataset_id == version.dataset_id && v.version == version.version)
        {
            return Err(DatasetError::DuplicateVersion {
                dataset_id: version.dataset_id.clone(),
                version: version.version.clone(),
            });
        }
        versions.push(version.clone());
        Ok(())
    }

    async fn list(&self, query: &VersionQuery) -> Result<VersionPage> {
        let mut matching: Vec<Version> = self
            .versions
            .read()
            .await
            .iter()
            .filter(|v| query.dataset_id.as_deref().map_or(true, |id| v.dataset_id == id))
            .cloned()
            .collect();
        matching.sort_by_key(|v| v.created_at);
        if query.sort_order == SortOrder::Desc {
            matching.reverse();
        }

        let total = matching.len() as u64;
        let skip = usize::try_from(query.page.saturating_mul(query.page_size)).unwrap_or(usize::MAX);
        let take = usize::try_from(query.page_size).unwrap_or(usize::MAX);
        let result = matching.into_iter().skip(skip).take(take).collect();
        Ok(VersionPage::new(query, total, result))
    }

    async fn get(&self, dataset_id: &str, version: Option<&str>) -> Result<Version> {
        self.versions
            .read()
            .await
            .iter()
            .filter(|v| v.dataset_id == dataset_id && version.map_or(true, |n| v.version == n))
            .max_by_key(|v| v.created_at)
            .cloned()
            .ok_or_else(|| version_not_found(dataset_id, version))
    }
}

#[derive(Default)]
pub struct InMemorySchemaStore {
    schemas: RwLock<Vec<SchemaDocument>>,
}

impl InMemorySchemaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, schema: SchemaDocument) {
        self.schemas.write().await.push(schema);
    }
}

#[async_trait::async_trait]
impl SchemaStore for InMemorySchemaStore {
    async fn published_schemas(&self, dataset_id: &str) -> Result<Vec<SchemaDocument>> {
        Ok(self
            .schemas
            .read()
            .await
            .iter()
            .filter(|s| {
                s.dataset_id == dataset_id
                    && !s.is_draft
                    && EXPORTED_STANDARDS.contains(&s.standard.as_str())
            })
            .cloned()
            .collect())
    }
}
