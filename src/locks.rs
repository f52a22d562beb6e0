//! Lock coordinator
//!
//! Walks a batch of registry nodes depth-first, pre-order, and locks the
//! resources each operation touches:
//!
//! | operation   | source key          | destination key |
//! |-------------|---------------------|-----------------|
//! | import      | read                | -               |
//! | delete      | write               | -               |
//! | move/rename | write               | write           |
//! | publish     | read                | -               |
//!
//! Archived nodes are skipped with their subtree. The walk stops at the first
//! failed lock (or failed child listing) and hands back every lock acquired so
//! far together with the error; the caller releases exactly those.

use futures::future::BoxFuture;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::models::{join_path, LockEntry, LockMode, Node, Renames};
use crate::services::{LockService, MetadataRegistry};
use crate::types::{DatasetError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockOperation {
    Import,
    Delete,
    MoveRename,
    Publish,
}

impl LockOperation {
    fn source_mode(self) -> LockMode {
        match self {
            Self::Import | Self::Publish => LockMode::Read,
            Self::Delete | Self::MoveRename => LockMode::Write,
        }
    }
}

/// Locks acquired by one walk plus the error that stopped it, if any
#[derive(Debug, Default)]
pub struct LockOutcome {
    pub locked: Vec<LockEntry>,
    pub error: Option<DatasetError>,
}

impl LockOutcome {
    pub fn is_complete(&self) -> bool {
        self.error.is_none()
    }
}

/// Drives the lock service over node trees
#[derive(Clone)]
pub struct LockCoordinator {
    locks: Arc<dyn LockService>,
    registry: Arc<dyn MetadataRegistry>,
    settings: Settings,
}

impl LockCoordinator {
    pub fn new(
        locks: Arc<dyn LockService>,
        registry: Arc<dyn MetadataRegistry>,
        settings: Settings,
    ) -> Self {
        Self {
            locks,
            registry,
            settings,
        }
    }

    /// Read-lock the project side of an import
    pub async fn lock_import(&self, nodes: &[Node]) -> LockOutcome {
        self.run(nodes, LockOperation::Import, None, None).await
    }

    /// Write-lock everything about to be deleted
    pub async fn lock_delete(&self, nodes: &[Node]) -> LockOutcome {
        self.run(nodes, LockOperation::Delete, None, None).await
    }

    /// Write-lock both the current and the destination key of every node.
    ///
    /// `target_root` is the relative path of the destination folder, `None`
    /// for the dataset root. `renames` gives top-level nodes a new leaf name
    /// on the destination side.
    pub async fn lock_move_rename(
        &self,
        nodes: &[Node],
        target_root: Option<&str>,
        renames: &Renames,
    ) -> LockOutcome {
        self.run(nodes, LockOperation::MoveRename, target_root, Some(renames))
            .await
    }

    /// Read-lock a dataset tree for publishing
    pub async fn lock_publish(&self, nodes: &[Node]) -> LockOutcome {
        self.run(nodes, LockOperation::Publish, None, None).await
    }

    /// Unlock every entry once, continuing past failures
    pub async fn release(&self, locked: &[LockEntry]) {
        for entry in locked {
            if let Err(e) = self.locks.unlock(&entry.resource_key, entry.mode).await {
                warn!(
                    resource_key = %entry.resource_key,
                    mode = %entry.mode,
                    error = %e,
                    "Failed to release lock"
                );
            }
        }
        debug!(count = locked.len(), "Locks released");
    }

    async fn run(
        &self,
        nodes: &[Node],
        op: LockOperation,
        target_root: Option<&str>,
        renames: Option<&Renames>,
    ) -> LockOutcome {
        let mut outcome = LockOutcome::default();
        if let Err(e) = self
            .walk(nodes, op, target_root, renames, &mut outcome.locked)
            .await
        {
            warn!(
                operation = ?op,
                acquired = outcome.locked.len(),
                error = %e,
                "Lock walk aborted"
            );
            outcome.error = Some(e);
        }
        outcome
    }

    fn walk<'a>(
        &'a self,
        nodes: &'a [Node],
        op: LockOperation,
        target_root: Option<&'a str>,
        renames: Option<&'a Renames>,
        acc: &'a mut Vec<LockEntry>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            for node in nodes {
                if node.is_archived() {
                    continue;
                }

                let leaf = renames
                    .and_then(|r| r.get(&node.id))
                    .map_or(node.name.as_str(), String::as_str);

                if !node.is_name_folder() {
                    let source = self.source_key(node, op)?;
                    self.acquire(acc, source, op.source_mode()).await?;

                    if op == LockOperation::MoveRename {
                        let target = self.dataset_key(&node.container_code, target_root, leaf);
                        self.acquire(acc, target, LockMode::Write).await?;
                    }
                }

                if node.is_folder() {
                    let children = self
                        .registry
                        .get_children(&node.container_code, node.container_type, Some(&node.id))
                        .await?;
                    let next_root = join_path(target_root, leaf);
                    self.walk(&children, op, Some(&next_root), None, acc).await?;
                }
            }
            Ok(())
        })
    }

    async fn acquire(&self, acc: &mut Vec<LockEntry>, resource_key: String, mode: LockMode) -> Result<()> {
        self.locks.lock(&resource_key, mode).await?;
        debug!(resource_key = %resource_key, mode = %mode, "Resource locked");
        acc.push(LockEntry::new(resource_key, mode));
        Ok(())
    }

    fn source_key(&self, node: &Node, op: LockOperation) -> Result<String> {
        if node.is_file() {
            return Ok(node.object_location()?.resource_key());
        }
        Ok(match op {
            LockOperation::Import => format!(
                "{}/{}",
                self.settings.project_bucket(&node.container_code),
                node.full_path()
            ),
            _ => self.dataset_key(&node.container_code, node.parent_path.as_deref(), &node.name),
        })
    }

    fn dataset_key(&self, dataset_code: &str, parent_path: Option<&str>, name: &str) -> String {
        format!(
            "{}/{}/{}",
            dataset_code,
            self.settings.file_folder,
            join_path(parent_path, name)
        )
    }
}
