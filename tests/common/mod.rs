//! Shared harness: the full service over in-memory collaborators

#![allow(dead_code)]

use std::sync::Arc;

use dataset_ops::config::Settings;
use dataset_ops::db::{InMemoryDatasetStore, InMemorySchemaStore, InMemoryVersionStore};
use dataset_ops::models::{ContainerType, Dataset, Node, NodeType, Storage};
use dataset_ops::services::{
    InMemoryBroker, InMemoryLockService, InMemoryPublishStore, InMemoryRegistry,
    InMemoryTaskStream, ObjectStorage, ObjectStoreBackend,
};
use dataset_ops::{Backends, FileOperations};

pub const PROJECT: &str = "proj";
pub const DATASET: &str = "ds1";
pub const DATASET_ID: &str = "dataset-1";
pub const OWNER: &str = "admin";

pub struct Harness {
    pub ops: FileOperations,
    pub registry: Arc<InMemoryRegistry>,
    pub storage: Arc<ObjectStoreBackend>,
    pub locks: Arc<InMemoryLockService>,
    pub stream: Arc<InMemoryTaskStream>,
    pub broker: Arc<InMemoryBroker>,
    pub datasets: Arc<InMemoryDatasetStore>,
    pub versions: Arc<InMemoryVersionStore>,
    pub schemas: Arc<InMemorySchemaStore>,
    _scratch: tempfile::TempDir,
}

impl Harness {
    pub async fn new() -> Self {
        let scratch = tempfile::tempdir().expect("scratch dir");
        let registry = Arc::new(InMemoryRegistry::new());
        let storage = Arc::new(ObjectStoreBackend::in_memory());
        let locks = Arc::new(InMemoryLockService::new());
        let stream = Arc::new(InMemoryTaskStream::new());
        let broker = Arc::new(InMemoryBroker::new());
        let datasets = Arc::new(InMemoryDatasetStore::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let schemas = Arc::new(InMemorySchemaStore::new());

        datasets
            .insert(Dataset {
                id: DATASET_ID.to_string(),
                code: DATASET.to_string(),
                creator: OWNER.to_string(),
                ..Dataset::default()
            })
            .await;

        let backends = Backends {
            locks: locks.clone(),
            registry: registry.clone(),
            storage: storage.clone(),
            task_stream: stream.clone(),
            publish_states: Arc::new(InMemoryPublishStore::new()),
            broker: broker.clone(),
            datasets: datasets.clone(),
            versions: versions.clone(),
            schemas: schemas.clone(),
        };
        let settings = Settings {
            scratch_dir: scratch.path().to_path_buf(),
            ..Settings::default()
        };

        Self {
            ops: FileOperations::new(backends, settings),
            registry,
            storage,
            locks,
            stream,
            broker,
            datasets,
            versions,
            schemas,
            _scratch: scratch,
        }
    }

    /// Register a node, uploading `size` bytes for files
    pub async fn add(&self, node: &Node) {
        if node.is_file() {
            let location = node.object_location().expect("file location");
            self.storage
                .put_bytes(&location, vec![b'x'; node.size as usize])
                .await
                .expect("seed object");
        }
        self.registry.insert(node.clone()).await;
    }

    /// Wait for every enqueued worker and publish
    pub async fn settle(&self) {
        self.ops.background().wait_idle().await;
    }

    pub async fn dataset(&self) -> Dataset {
        use dataset_ops::db::DatasetStore;
        self.datasets.get(DATASET_ID).await.expect("dataset")
    }

    /// Paths below `prefix` in registry order, relative to it
    pub async fn descendants(&self, prefix: &str) -> Vec<String> {
        let below = format!("{}/", prefix);
        self.registry
            .all()
            .await
            .into_iter()
            .filter(|n| n.container_code == DATASET)
            .filter_map(|n| n.full_path().strip_prefix(&below).map(str::to_string))
            .collect()
    }

    pub async fn object_bytes(&self, node: &Node) -> Option<usize> {
        let location = node.object_location().ok()?;
        self.storage
            .get_object(&location, u64::MAX)
            .await
            .ok()
            .map(|b| b.len())
    }
}

fn node(
    id: &str,
    name: &str,
    node_type: NodeType,
    parent: Option<&Node>,
    code: &str,
    container_type: ContainerType,
    size: u64,
) -> Node {
    Node {
        id: id.to_string(),
        node_type,
        name: name.to_string(),
        parent: parent.map(|p| p.id.clone()),
        parent_path: parent.map(|p| p.full_path()),
        container_code: code.to_string(),
        container_type,
        size,
        owner: OWNER.to_string(),
        ..Node::default()
    }
}

fn located(mut n: Node, bucket: &str, key: String) -> Node {
    n.storage = Some(Storage {
        location_uri: format!("minio://http://minio.minio:9000/{}/{}", bucket, key),
    });
    n
}

pub fn project_folder(id: &str, name: &str, parent: Option<&Node>) -> Node {
    node(id, name, NodeType::Folder, parent, PROJECT, ContainerType::Project, 0)
}

pub fn project_file(id: &str, name: &str, parent: Option<&Node>, size: u64) -> Node {
    let n = node(id, name, NodeType::File, parent, PROJECT, ContainerType::Project, size);
    let key = n.full_path();
    located(n, &format!("core-{}", PROJECT), key)
}

pub fn dataset_folder(id: &str, name: &str, parent: Option<&Node>) -> Node {
    node(id, name, NodeType::Folder, parent, DATASET, ContainerType::Dataset, 0)
}

pub fn dataset_file(id: &str, name: &str, parent: Option<&Node>, size: u64) -> Node {
    let n = node(id, name, NodeType::File, parent, DATASET, ContainerType::Dataset, size);
    let key = format!("data/{}", n.full_path());
    located(n, DATASET, key)
}
