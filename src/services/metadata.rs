//! Metadata registry client
//!
//! Items are searched per container (paginated, 100 per page, remaining pages
//! fetched concurrently and concatenated), fetched by id, created, updated and
//! deleted. Children of a folder are found by filtering the container listing
//! on `parent`.

use futures::future::try_join_all;
use reqwest::StatusCode;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::{ContainerType, Node, NodeStatus, NodeType, Storage};
use crate::services::error_body;
use crate::types::{DatasetError, Result};

const PAGE_SIZE: u32 = 100;
const ZONE: u8 = 1;

/// Container listing filter
#[derive(Debug, Clone, PartialEq)]
pub struct ItemQuery {
    pub container_code: String,
    pub container_type: ContainerType,
    pub node_type: Option<NodeType>,
}

impl ItemQuery {
    pub fn container(container_code: &str, container_type: ContainerType) -> Self {
        Self {
            container_code: container_code.to_string(),
            container_type,
            node_type: None,
        }
    }

    pub fn of_type(mut self, node_type: NodeType) -> Self {
        self.node_type = Some(node_type);
        self
    }

    fn matches(&self, node: &Node) -> bool {
        node.container_code == self.container_code
            && node.container_type == self.container_type
            && self.node_type.map_or(true, |t| node.node_type == t)
    }
}

/// Payload of a new registry entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewItem {
    pub parent: Option<String>,
    pub parent_path: Option<String>,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    pub owner: String,
    pub container_code: String,
    pub container_type: ContainerType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location_uri: Option<String>,
    pub size: u64,
    pub zone: u8,
}

impl NewItem {
    /// New folder entry in a dataset
    pub fn folder(
        parent: Option<String>,
        parent_path: Option<String>,
        name: &str,
        owner: &str,
        container_code: &str,
    ) -> Self {
        Self {
            parent,
            parent_path,
            node_type: NodeType::Folder,
            name: name.to_string(),
            owner: owner.to_string(),
            container_code: container_code.to_string(),
            container_type: ContainerType::Dataset,
            location_uri: None,
            size: 0,
            zone: ZONE,
        }
    }

    /// New file entry in a dataset
    pub fn file(
        parent: Option<String>,
        parent_path: Option<String>,
        name: &str,
        owner: &str,
        container_code: &str,
        location_uri: String,
        size: u64,
    ) -> Self {
        Self {
            node_type: NodeType::File,
            location_uri: Some(location_uri),
            size,
            ..Self::folder(parent, parent_path, name, owner, container_code)
        }
    }

    /// The registry drops `parent_path` for entries without a parent
    fn normalized(&self) -> Self {
        let mut item = self.clone();
        if item.parent.is_none() {
            item.parent_path = None;
        }
        item
    }
}

/// Partial update of a registry entry
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ItemUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<NodeStatus>,
}

impl ItemUpdate {
    pub fn status(status: NodeStatus) -> Self {
        Self {
            status: Some(status),
        }
    }
}

#[async_trait::async_trait]
pub trait MetadataRegistry: Send + Sync {
    /// Every item matching `query`, all pages concatenated
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Node>>;

    /// One item, `NotFound` when the registry has no such id
    async fn get_by_id(&self, id: &str) -> Result<Node>;

    async fn create_item(&self, item: &NewItem) -> Result<Node>;

    async fn update_item(&self, id: &str, update: &ItemUpdate) -> Result<()>;

    async fn delete_item(&self, id: &str) -> Result<()>;

    /// Items of a container whose parent is `parent_id` (`None` for the root)
    async fn get_children(
        &self,
        container_code: &str,
        container_type: ContainerType,
        parent_id: Option<&str>,
    ) -> Result<Vec<Node>> {
        let items = self
            .search(&ItemQuery::container(container_code, container_type))
            .await?;
        Ok(items
            .into_iter()
            .filter(|item| item.parent.as_deref() == parent_id)
            .collect())
    }

    /// Every non-archived file of a dataset
    async fn get_files(&self, dataset_code: &str) -> Result<Vec<Node>> {
        let items = self
            .search(&ItemQuery::container(dataset_code, ContainerType::Dataset).of_type(NodeType::File))
            .await?;
        Ok(items.into_iter().filter(|item| !item.is_archived()).collect())
    }
}

// ============================================================================
// HTTP client
// ============================================================================

#[derive(Deserialize)]
struct SearchPage {
    result: Vec<Node>,
    #[serde(default)]
    num_of_pages: u32,
}

#[derive(Deserialize)]
struct ItemEnvelope<T> {
    result: T,
}

/// HTTP client of the metadata service
#[derive(Clone)]
pub struct HttpMetadataClient {
    client: reqwest::Client,
    item_url: String,
    search_url: String,
}

impl HttpMetadataClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let base = base_url.trim_end_matches('/');
        Ok(Self {
            client,
            item_url: format!("{}/v1/item/", base),
            search_url: format!("{}/v1/items/search/", base),
        })
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
        let status = response.status();
        if !status.is_success() {
            return Err(DatasetError::Registry {
                status: status.as_u16(),
                body: error_body(response).await,
            });
        }
        Ok(response.json::<T>().await?)
    }

    async fn check(response: reqwest::Response) -> Result<()> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        Err(DatasetError::Registry {
            status: status.as_u16(),
            body: error_body(response).await,
        })
    }

    async fn search_page(&self, query: &ItemQuery, page: u32) -> Result<SearchPage> {
        let mut params: Vec<(&str, String)> = vec![
            ("recursive", "true".to_string()),
            ("zone", ZONE.to_string()),
            ("container_type", query.container_type.as_str().to_string()),
            ("page_size", PAGE_SIZE.to_string()),
            ("page", page.to_string()),
            ("container_code", query.container_code.clone()),
        ];
        if let Some(node_type) = query.node_type {
            params.push(("type", node_type.as_str().to_string()));
        }

        let response = self.client.get(&self.search_url).query(&params).send().await?;
        Self::read(response).await
    }
}

#[async_trait::async_trait]
impl MetadataRegistry for HttpMetadataClient {
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Node>> {
        let first = self.search_page(query, 0).await?;
        let mut items = first.result;

        if first.num_of_pages > 1 {
            let pages = try_join_all((1..first.num_of_pages).map(|p| self.search_page(query, p))).await?;
            for page in pages {
                items.extend(page.result);
            }
        }

        debug!(
            container_code = %query.container_code,
            count = items.len(),
            "Registry search"
        );
        Ok(items)
    }

    async fn get_by_id(&self, id: &str) -> Result<Node> {
        let response = self
            .client
            .get(format!("{}{}/", self.item_url, id))
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(DatasetError::NotFound(format!("Item {} not found", id)));
        }
        let envelope: ItemEnvelope<Node> = Self::read(response).await?;
        Ok(envelope.result)
    }

    async fn create_item(&self, item: &NewItem) -> Result<Node> {
        let item = item.normalized();
        info!(
            name = %item.name,
            parent_path = ?item.parent_path,
            container_code = %item.container_code,
            "Registry create"
        );
        let response = self.client.post(&self.item_url).json(&item).send().await?;
        let envelope: ItemEnvelope<Node> = Self::read(response).await?;
        Ok(envelope.result)
    }

    async fn update_item(&self, id: &str, update: &ItemUpdate) -> Result<()> {
        debug!(id, ?update, "Registry update");
        let response = self
            .client
            .put(&self.item_url)
            .query(&[("id", id)])
            .json(update)
            .send()
            .await?;
        Self::check(response).await
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        info!(id, "Registry delete");
        let response = self
            .client
            .delete(&self.item_url)
            .query(&[("id", id)])
            .send()
            .await?;
        Self::check(response).await
    }
}

// ============================================================================
// In-memory registry
// ============================================================================

/// In-memory registry keyed by item id, preserving insertion order
#[derive(Default)]
pub struct InMemoryRegistry {
    items: RwLock<HashMap<String, (u64, Node)>>,
    next: RwLock<u64>,
}

impl InMemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an existing item
    pub async fn insert(&self, node: Node) {
        let seq = self.bump().await;
        self.items.write().await.insert(node.id.clone(), (seq, node));
    }

    /// All items in insertion order
    pub async fn all(&self) -> Vec<Node> {
        let items = self.items.read().await;
        let mut entries: Vec<&(u64, Node)> = items.values().collect();
        entries.sort_by_key(|(seq, _)| *seq);
        entries.into_iter().map(|(_, n)| n.clone()).collect()
    }

    /// Find an item of a container by its full path
    pub async fn find_by_path(&self, container_code: &str, full_path: &str) -> Option<Node> {
        self.all()
            .await
            .into_iter()
            .find(|n| n.container_code == container_code && n.full_path() == full_path)
    }

    async fn bump(&self) -> u64 {
        let mut next = self.next.write().await;
        *next += 1;
        *next
    }
}

#[async_trait::async_trait]
impl MetadataRegistry for InMemoryRegistry {
    async fn search(&self, query: &ItemQuery) -> Result<Vec<Node>> {
        Ok(self.all().await.into_iter().filter(|n| query.matches(n)).collect())
    }

    async fn get_by_id(&self, id: &str) -> Result<Node> {
        self.items
            .read()
            .await
            .get(id)
            .map(|(_, n)| n.clone())
            .ok_or_else(|| DatasetError::NotFound(format!("Item {} not found", id)))
    }

    async fn create_item(&self, item: &NewItem) -> Result<Node> {
        let item = item.normalized();
        let node = Node {
            id: uuid::Uuid::new_v4().to_string(),
            node_type: item.node_type,
            name: item.name,
            parent: item.parent,
            parent_path: item.parent_path,
            status: match item.node_type {
                NodeType::File => NodeStatus::Registered,
                NodeType::Folder => NodeStatus::Active,
            },
            container_code: item.container_code,
            container_type: item.container_type,
            size: item.size,
            owner: item.owner,
            storage: item.location_uri.map(|location_uri| Storage { location_uri }),
            feedback: None,
        };
        self.insert(node.clone()).await;
        Ok(node)
    }

    async fn update_item(&self, id: &str, update: &ItemUpdate) -> Result<()> {
        let mut items = self.items.write().await;
        let (_, node) = items
            .get_mut(id)
            .ok_or_else(|| DatasetError::NotFound(format!("Item {} not found", id)))?;
        if let Some(status) = update.status {
            node.status = status;
        }
        Ok(())
    }

    async fn delete_item(&self, id: &str) -> Result<()> {
        self.items
            .write()
            .await
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| DatasetError::NotFound(format!("Item {} not found", id)))
    }
}
