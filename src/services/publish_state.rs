//! Per-dataset publish status key
//!
//! One JSON value `{status, error_msg}` per dataset id, written with a TTL.

use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::collections::HashMap;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::models::PublishState;
use crate::types::{DatasetError, Result};

#[async_trait::async_trait]
pub trait PublishStateStore: Send + Sync {
    async fn get(&self, dataset_id: &str) -> Result<Option<PublishState>>;

    async fn set(&self, dataset_id: &str, state: &PublishState, ttl: Duration) -> Result<()>;
}

/// Redis-backed publish status
#[derive(Clone)]
pub struct RedisPublishStore {
    conn: MultiplexedConnection,
}

impl RedisPublishStore {
    pub async fn connect(url: &str) -> Result<Self> {
        info!("Connecting to Redis at {}", url);
        let client = Client::open(url)?;
        let conn = client.get_multiplexed_async_connection().await?;
        Ok(Self { conn })
    }
}

#[async_trait::async_trait]
impl PublishStateStore for RedisPublishStore {
    async fn get(&self, dataset_id: &str) -> Result<Option<PublishState>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(dataset_id).await?;
        raw.map(|value| {
            serde_json::from_str(&value).map_err(|e| {
                DatasetError::StatusStore(format!("Corrupt publish status for {}: {}", dataset_id, e))
            })
        })
        .transpose()
    }

    async fn set(&self, dataset_id: &str, state: &PublishState, ttl: Duration) -> Result<()> {
        let mut conn = self.conn.clone();
        let value = serde_json::to_string(state)?;
        conn.set_ex::<_, _, ()>(dataset_id, value, ttl.as_secs()).await?;
        debug!(dataset_id, status = ?state.status, "Publish status written");
        Ok(())
    }
}

/// In-memory publish status, TTL ignored
#[derive(Default)]
pub struct InMemoryPublishStore {
    states: RwLock<HashMap<String, PublishState>>,
}

impl InMemoryPublishStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl PublishStateStore for InMemoryPublishStore {
    async fn get(&self, dataset_id: &str) -> Result<Option<PublishState>> {
        Ok(self.states.read().await.get(dataset_id).cloned())
    }

    async fn set(&self, dataset_id: &str, state: &PublishState, _ttl: Duration) -> Result<()> {
        self.states
            .write()
            .await
            .insert(dataset_id.to_string(), state.clone());
        Ok(())
    }
}
