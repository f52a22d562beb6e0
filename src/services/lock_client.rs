//! Resource lock client
//!
//! Thin caller of the data-ops lock service. `POST` acquires and `DELETE`
//! releases `{resource_key, operation}`. No retries happen here.

use reqwest::{Method, StatusCode};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::models::{LockEntry, LockMode};
use crate::services::error_body;
use crate::types::{DatasetError, Result};

#[async_trait::async_trait]
pub trait LockService: Send + Sync {
    /// Acquire `resource_key` under `mode`
    async fn lock(&self, resource_key: &str, mode: LockMode) -> Result<()>;

    /// Release `resource_key` held under `mode`
    async fn unlock(&self, resource_key: &str, mode: LockMode) -> Result<()>;
}

#[derive(Serialize)]
struct LockRequest<'a> {
    resource_key: &'a str,
    operation: &'a str,
}

/// HTTP client of the lock service
#[derive(Clone)]
pub struct HttpLockClient {
    client: reqwest::Client,
    url: String,
}

impl HttpLockClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/v2/resource/lock/", base_url.trim_end_matches('/')),
        })
    }

    async fn send(&self, method: Method, resource_key: &str, mode: LockMode) -> Result<()> {
        let response = self
            .client
            .request(method, &self.url)
            .json(&LockRequest {
                resource_key,
                operation: mode.as_str(),
            })
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = error_body(response).await;
        match status {
            StatusCode::CONFLICT | StatusCode::LOCKED => Err(DatasetError::LockConflict {
                resource_key: resource_key.to_string(),
                status: status.as_u16(),
                body,
            }),
            _ => Err(DatasetError::LockService {
                status: status.as_u16(),
                body,
            }),
        }
    }
}

#[async_trait::async_trait]
impl LockService for HttpLockClient {
    async fn lock(&self, resource_key: &str, mode: LockMode) -> Result<()> {
        debug!(resource_key, mode = %mode, "Lock resource");
        self.send(Method::POST, resource_key, mode).await.inspect_err(|e| {
            warn!(resource_key, mode = %mode, error = %e, "Resource lock refused");
        })
    }

    async fn unlock(&self, resource_key: &str, mode: LockMode) -> Result<()> {
        debug!(resource_key, mode = %mode, "Unlock resource");
        self.send(Method::DELETE, resource_key, mode).await
    }
}

// ============================================================================
// In-memory lock service
// ============================================================================

/// A call observed by [`InMemoryLockService`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockCall {
    Lock(LockEntry),
    Unlock(LockEntry),
}

#[derive(Debug, Default)]
struct HeldLock {
    readers: usize,
    writer: bool,
}

#[derive(Default)]
struct LockTable {
    held: HashMap<String, HeldLock>,
    refuse: HashSet<String>,
    calls: Vec<LockCall>,
}

/// In-memory lock service: shared read locks, exclusive write locks
#[derive(Default)]
pub struct InMemoryLockService {
    table: Mutex<LockTable>,
}

impl InMemoryLockService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every future lock of `resource_key` fail with a conflict
    pub async fn refuse(&self, resource_key: &str) {
        self.table.lock().await.refuse.insert(resource_key.to_string());
    }

    /// Every lock and unlock call, in order
    pub async fn calls(&self) -> Vec<LockCall> {
        self.table.lock().await.calls.clone()
    }

    /// Resource keys currently held in any mode
    pub async fn held_keys(&self) -> Vec<String> {
        let table = self.table.lock().await;
        let mut keys: Vec<String> = table
            .held
            .iter()
            .filter(|(_, h)| h.writer || h.readers > 0)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    fn conflict(resource_key: &str) -> DatasetError {
        DatasetError::LockConflict {
            resource_key: resource_key.to_string(),
            status: 409,
            body: serde_json::json!({
                "error_msg": format!("resource {} already in used", resource_key)
            }),
        }
    }
}

#[async_trait::async_trait]
impl LockService for InMemoryLockService {
    async fn lock(&self, resource_key: &str, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock().await;
        table.calls.push(LockCall::Lock(LockEntry::new(resource_key, mode)));

        if table.refuse.contains(resource_key) {
            return Err(Self::conflict(resource_key));
        }

        let held = table.held.entry(resource_key.to_string()).or_default();
        match mode {
            LockMode::Read if !held.writer => held.readers += 1,
            LockMode::Write if !held.writer && held.readers == 0 => held.writer = true,
            _ => return Err(Self::conflict(resource_key)),
        }
        Ok(())
    }

    async fn unlock(&self, resource_key: &str, mode: LockMode) -> Result<()> {
        let mut table = self.table.lock().await;
        table.calls.push(LockCall::Unlock(LockEntry::new(resource_key, mode)));

        let held = table.held.entry(resource_key.to_string()).or_default();
        match mode {
            LockMode::Read if held.readers > 0 => held.readers -= 1,
            LockMode::Write if held.writer => held.writer = false,
            _ => {
                return Err(DatasetError::LockService {
                    status: 400,
                    body: serde_json::json!({
                        "error_msg": format!("resource {} is not locked for {}", resource_key, mode)
                    }),
                })
            }
        }
        Ok(())
    }
}
