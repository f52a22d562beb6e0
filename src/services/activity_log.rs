//! Activity log
//!
//! Item events (import, delete, move, rename) go to `metadata.items.activity`,
//! dataset events (version release) to `dataset.activity`. Each event is
//! validated, MessagePack-encoded and published on the broker. Send failures
//! propagate to the caller.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::info;

use crate::models::{Node, NodeType, Version};
use crate::nats::NatsClient;
use crate::types::{DatasetError, Result};

pub const ITEM_ACTIVITY_TOPIC: &str = "metadata.items.activity";
pub const DATASET_ACTIVITY_TOPIC: &str = "dataset.activity";

const ITEM_ACTIVITY_TYPES: &[&str] = &["create", "import", "delete", "update"];
const DATASET_ACTIVITY_TYPES: &[&str] = &["create", "update", "release"];

#[async_trait::async_trait]
pub trait EventBroker: Send + Sync {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()>;
}

/// Broker publishing on NATS subjects
pub struct NatsBroker {
    client: NatsClient,
}

impl NatsBroker {
    pub fn new(client: NatsClient) -> Self {
        Self { client }
    }
}

#[async_trait::async_trait]
impl EventBroker for NatsBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        self.client.publish(topic, payload).await
    }
}

/// Broker keeping published messages in memory
#[derive(Default)]
pub struct InMemoryBroker {
    messages: RwLock<Vec<(String, Bytes)>>,
    fail_all: AtomicBool,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later publish fail with a broker error
    pub fn fail_publishes(&self) {
        self.fail_all.store(true, Ordering::SeqCst);
    }

    /// Decoded item events, in publish order
    pub async fn item_events(&self) -> Vec<ItemActivity> {
        self.decode(ITEM_ACTIVITY_TOPIC).await
    }

    /// Decoded dataset events, in publish order
    pub async fn dataset_events(&self) -> Vec<DatasetActivity> {
        self.decode(DATASET_ACTIVITY_TOPIC).await
    }

    async fn decode<T: for<'de> Deserialize<'de>>(&self, topic: &str) -> Vec<T> {
        self.messages
            .read()
            .await
            .iter()
            .filter(|(t, _)| t == topic)
            .filter_map(|(_, payload)| rmp_serde::from_slice(payload).ok())
            .collect()
    }
}

#[async_trait::async_trait]
impl EventBroker for InMemoryBroker {
    async fn publish(&self, topic: &str, payload: Bytes) -> Result<()> {
        if self.fail_all.load(Ordering::SeqCst) {
            return Err(DatasetError::Broker(format!("publish to {} refused", topic)));
        }
        self.messages.write().await.push((topic.to_string(), payload));
        Ok(())
    }
}

/// One changed property of an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PropertyChange {
    pub item_property: String,
    pub old_value: String,
    pub new_value: String,
}

/// File/folder activity event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemActivity {
    pub activity_time: DateTime<Utc>,
    pub activity_type: String,
    pub user: String,
    pub container_code: String,
    pub container_type: String,
    pub zone: u8,
    pub item_id: String,
    pub item_type: NodeType,
    pub item_name: String,
    pub item_parent_path: String,
    pub imported_from: Option<String>,
    pub changes: Vec<PropertyChange>,
}

impl ItemActivity {
    fn new(activity_type: &str, dataset_code: &str, item: &Node, user: &str) -> Self {
        Self {
            activity_time: Utc::now(),
            activity_type: activity_type.to_string(),
            user: user.to_string(),
            container_code: dataset_code.to_string(),
            container_type: "dataset".to_string(),
            zone: 1,
            item_id: item.id.clone(),
            item_type: item.node_type,
            item_name: item.name.clone(),
            item_parent_path: item.parent_path.clone().unwrap_or_default(),
            imported_from: None,
            changes: Vec::new(),
        }
    }

    fn validate(&self) -> Result<()> {
        if !ITEM_ACTIVITY_TYPES.contains(&self.activity_type.as_str()) {
            return Err(invalid(format!("unknown activity type '{}'", self.activity_type)));
        }
        require("user", &self.user)?;
        require("container_code", &self.container_code)?;
        require("item_id", &self.item_id)?;
        require("item_name", &self.item_name)?;
        validate_changes(&self.changes)
    }
}

/// Dataset-level activity event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetActivity {
    pub activity_time: DateTime<Utc>,
    pub activity_type: String,
    pub user: String,
    pub container_code: String,
    pub version: Option<String>,
    pub target_name: Option<String>,
    pub changes: Vec<PropertyChange>,
}

impl DatasetActivity {
    fn validate(&self) -> Result<()> {
        if !DATASET_ACTIVITY_TYPES.contains(&self.activity_type.as_str()) {
            return Err(invalid(format!("unknown activity type '{}'", self.activity_type)));
        }
        require("user", &self.user)?;
        require("container_code", &self.container_code)?;
        if self.activity_type == "release" && self.version.as_deref().map_or(true, str::is_empty) {
            return Err(invalid("release event without version".to_string()));
        }
        validate_changes(&self.changes)
    }
}

fn invalid(msg: String) -> DatasetError {
    DatasetError::BadRequest(format!("Invalid activity event: {}", msg))
}

fn require(field: &str, value: &str) -> Result<()> {
    if value.is_empty() {
        return Err(invalid(format!("{} is empty", field)));
    }
    Ok(())
}

fn validate_changes(changes: &[PropertyChange]) -> Result<()> {
    for change in changes {
        require("item_property", &change.item_property)?;
    }
    Ok(())
}

/// Validates and sends activity events
#[derive(Clone)]
pub struct ActivityLog {
    broker: Arc<dyn EventBroker>,
}

impl ActivityLog {
    pub fn new(broker: Arc<dyn EventBroker>) -> Self {
        Self { broker }
    }

    async fn send_item(&self, event: ItemActivity) -> Result<()> {
        event.validate()?;
        let payload = rmp_serde::to_vec_named(&event)?;
        self.broker.publish(ITEM_ACTIVITY_TOPIC, Bytes::from(payload)).await?;
        info!(
            activity_type = %event.activity_type,
            item_id = %event.item_id,
            container_code = %event.container_code,
            "Activity event sent"
        );
        Ok(())
    }

    /// One `import` event per imported item
    pub async fn send_import_events(
        &self,
        dataset_code: &str,
        project_code: &str,
        items: &[Node],
        user: &str,
    ) -> Result<()> {
        for item in items {
            let mut event = ItemActivity::new("import", dataset_code, item, user);
            event.item_parent_path = String::new();
            event.imported_from = Some(project_code.to_string());
            self.send_item(event).await?;
        }
        Ok(())
    }

    /// One `delete` event per deleted item
    pub async fn send_create_folder_event(&self, folder: &Node, user: &str) -> Result<()> {
        self.send_item(ItemActivity::new("create", &folder.container_code, folder, user))
            .await
    }

    pub async fn send_delete_events(&self, dataset_code: &str, items: &[Node], user: &str) -> Result<()> {
        for item in items {
            self.send_item(ItemActivity::new("delete", dataset_code, item, user))
                .await?;
        }
        Ok(())
    }

    /// `update` event carrying the old and new parent path of a moved item
    pub async fn send_move_event(
        &self,
        dataset_code: &str,
        item: &Node,
        user: &str,
        old_path: &str,
        new_path: &str,
    ) -> Result<()> {
        let mut event = ItemActivity::new("update", dataset_code, item, user);
        event.changes.push(PropertyChange {
            item_property: "parent_path".to_string(),
            old_value: old_path.to_string(),
            new_value: new_path.to_string(),
        });
        self.send_item(event).await
    }

    /// `update` event carrying the old and new name of a renamed item
    pub async fn send_rename_event(
        &self,
        dataset_code: &str,
        item: &Node,
        user: &str,
        new_name: &str,
    ) -> Result<()> {
        let mut event = ItemActivity::new("update", dataset_code, item, user);
        event.changes.push(PropertyChange {
            item_property: "name".to_string(),
            old_value: item.name.clone(),
            new_value: new_name.to_string(),
        });
        self.send_item(event).await
    }

    /// `release` event for a newly published version
    pub async fn send_release_event(&self, version: &Version) -> Result<()> {
        let event = DatasetActivity {
            activity_time: Utc::now(),
            activity_type: "release".to_string(),
            user: version.created_by.clone(),
            container_code: version.dataset_code.clone(),
            version: Some(version.version.clone()),
            target_name: None,
            changes: Vec::new(),
        };
        event.validate()?;
        let payload = rmp_serde::to_vec_named(&event)?;
        self.broker
            .publish(DATASET_ACTIVITY_TOPIC, Bytes::from(payload))
            .await?;
        info!(
            container_code = %event.container_code,
            version = %version.version,
            "Release event sent"
        );
        Ok(())
    }
}
