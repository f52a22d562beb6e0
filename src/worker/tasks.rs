//! Tree mutation workers
//!
//! Each worker runs detached after the request that enqueued it has
//! returned its manifest. The shape is always the same:
//!
//! 1. post WAITING jobs for the top-level items
//! 2. lock the trees the operation touches
//! 3. process each top-level item, RUNNING then SUCCEED or FAILED
//! 4. adjust dataset counters once and send activity events
//! 5. release every lock acquired in step 2, even when the worker panics
//!
//! A failing item does not stop its siblings. A failure in step 4 marks
//! every item FAILED.

use futures::future::{BoxFuture, FutureExt};
use std::future::Future;
use std::ops::AddAssign;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Settings;
use crate::db::DatasetStore;
use crate::jobs::JobTracker;
use crate::locks::LockCoordinator;
use crate::models::{
    join_path, ActionType, Dataset, JobBatch, JobStatus, LockEntry, Node, NodeStatus,
    ObjectLocation, Renames,
};
use crate::services::{ActivityLog, ItemUpdate, MetadataRegistry, NewItem, ObjectStorage};
use crate::types::Result;

/// Files and bytes touched by a walk
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Tally {
    pub files: i64,
    pub size: i64,
}

impl AddAssign for Tally {
    fn add_assign(&mut self, other: Self) {
        self.files += other.files;
        self.size += other.size;
    }
}

/// Copy project items into a dataset
#[derive(Debug, Clone)]
pub struct ImportJob {
    pub dataset: Dataset,
    pub items: Vec<Node>,
    pub operator: String,
    pub project_id: String,
    pub project_code: String,
    /// New names of batch duplicates, by source id
    pub renames: Renames,
    pub session_id: Option<String>,
}

/// Remove dataset items
#[derive(Debug, Clone)]
pub struct DeleteJob {
    pub dataset: Dataset,
    pub items: Vec<Node>,
    pub operator: String,
    pub session_id: Option<String>,
}

/// Relocate dataset items under `target` (`None` is the dataset root)
#[derive(Debug, Clone)]
pub struct MoveJob {
    pub dataset: Dataset,
    pub items: Vec<Node>,
    pub operator: String,
    pub target: Option<Node>,
    pub renames: Renames,
    pub session_id: Option<String>,
}

/// Give one dataset item a new name in place
#[derive(Debug, Clone)]
pub struct RenameJob {
    pub dataset: Dataset,
    pub item: Node,
    pub new_name: String,
    pub operator: String,
    pub session_id: Option<String>,
}

/// Workers over registry trees and their objects
#[derive(Clone)]
pub struct FileOperationTasks {
    registry: Arc<dyn MetadataRegistry>,
    storage: Arc<dyn ObjectStorage>,
    datasets: Arc<dyn DatasetStore>,
    locks: LockCoordinator,
    tracker: JobTracker,
    activity: ActivityLog,
    settings: Settings,
}

impl FileOperationTasks {
    pub fn new(
        registry: Arc<dyn MetadataRegistry>,
        storage: Arc<dyn ObjectStorage>,
        datasets: Arc<dyn DatasetStore>,
        locks: LockCoordinator,
        tracker: JobTracker,
        activity: ActivityLog,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            storage,
            datasets,
            locks,
            tracker,
            activity,
            settings,
        }
    }

    // ========================================================================
    // Workers
    // ========================================================================

    pub async fn import(&self, job: ImportJob) {
        let code = job.dataset.code.as_str();
        let Some(batch) = self
            .start(job.session_id.as_deref(), ActionType::DataImport, &job.items, code)
            .await
        else {
            return;
        };

        let outcome = self.locks.lock_import(&job.items).await;
        if let Some(e) = outcome.error {
            warn!(dataset_code = code, error = %e, "Import aborted, sources are locked");
            self.abort(&batch, &job.items, code, &outcome.locked).await;
            return;
        }

        self.guarded(&batch, &job.items, code, &outcome.locked, async {
            let mut total = Tally::default();
            let mut imported = Vec::new();
            for item in job.items.iter().filter(|i| !i.is_archived()) {
                let name = job.renames.get(&item.id).map(String::as_str);
                let copy = self.copy_tree(
                    std::slice::from_ref(item),
                    &job.dataset,
                    &job.operator,
                    None,
                    name,
                );
                if let Some(tally) = self.tracked(&batch, item, code, copy).await {
                    total += tally;
                    imported.push(item.clone());
                }
            }

            let finished: Result<()> = async {
                self.datasets
                    .adjust_counters(&job.dataset.id, total.files, total.size, Some(&job.project_id))
                    .await?;
                self.activity
                    .send_import_events(code, &job.project_code, &imported, &job.operator)
                    .await
            }
            .await;
            self.finish(&batch, &job.items, code, finished).await;

            info!(
                dataset_code = code,
                imported = imported.len(),
                files = total.files,
                size = total.size,
                "Import finished"
            );
        })
        .await;
    }

    pub async fn delete(&self, job: DeleteJob) {
        let code = job.dataset.code.as_str();
        let Some(batch) = self
            .start(job.session_id.as_deref(), ActionType::DataDelete, &job.items, code)
            .await
        else {
            return;
        };

        let outcome = self.locks.lock_delete(&job.items).await;
        if let Some(e) = outcome.error {
            warn!(dataset_code = code, error = %e, "Delete aborted, items are locked");
            self.abort(&batch, &job.items, code, &outcome.locked).await;
            return;
        }

        self.guarded(&batch, &job.items, code, &outcome.locked, async {
            let mut total = Tally::default();
            let mut deleted = Vec::new();
            for item in job.items.iter().filter(|i| !i.is_archived()) {
                let result = self
                    .tracked(&batch, item, code, self.delete_tree(std::slice::from_ref(item)))
                    .await;
                if let Some(tally) = result {
                    total += tally;
                    deleted.push(item.clone());
                }
            }

            let finished: Result<()> = async {
                self.datasets
                    .adjust_counters(&job.dataset.id, -total.files, -total.size, None)
                    .await?;
                self.activity
                    .send_delete_events(code, &deleted, &job.operator)
                    .await
            }
            .await;
            self.finish(&batch, &job.items, code, finished).await;

            info!(
                dataset_code = code,
                deleted = deleted.len(),
                files = total.files,
                size = total.size,
                "Delete finished"
            );
        })
        .await;
    }

    /// Copy under the target, then delete the originals
    pub async fn relocate(&self, job: MoveJob) {
        let code = job.dataset.code.as_str();
        let Some(batch) = self
            .start(job.session_id.as_deref(), ActionType::DataTransfer, &job.items, code)
            .await
        else {
            return;
        };

        let target_root = job.target.as_ref().map(Node::full_path);
        let outcome = self
            .locks
            .lock_move_rename(&job.items, target_root.as_deref(), &job.renames)
            .await;
        if let Some(e) = outcome.error {
            warn!(dataset_code = code, error = %e, "Move aborted, items are locked");
            self.abort(&batch, &job.items, code, &outcome.locked).await;
            return;
        }

        self.guarded(&batch, &job.items, code, &outcome.locked, async {
            let mut moved = Vec::new();
            for item in job.items.iter().filter(|i| !i.is_archived()) {
                let one = std::slice::from_ref(item);
                let name = job.renames.get(&item.id).map(String::as_str);
                let work = async {
                    self.copy_tree(one, &job.dataset, &job.operator, job.target.as_ref(), name)
                        .await?;
                    self.delete_tree(one).await
                };
                if self.tracked(&batch, item, code, work).await.is_some() {
                    moved.push(item);
                }
            }

            let finished: Result<()> = async {
                for item in &moved {
                    let leaf = job.renames.get(&item.id).unwrap_or(&item.name);
                    let old_path = format!("/{}", item.full_path());
                    let new_path = format!("/{}", join_path(target_root.as_deref(), leaf));
                    self.activity
                        .send_move_event(code, item, &job.operator, &old_path, &new_path)
                        .await?;
                }
                Ok(())
            }
            .await;
            self.finish(&batch, &job.items, code, finished).await;

            info!(
                dataset_code = code,
                moved = moved.len(),
                target = target_root.as_deref().unwrap_or("/"),
                "Move finished"
            );
        })
        .await;
    }

    pub async fn rename(&self, job: RenameJob) {
        let code = job.dataset.code.as_str();
        let items = std::slice::from_ref(&job.item);
        let Some(batch) = self
            .start(job.session_id.as_deref(), ActionType::DataRename, items, code)
            .await
        else {
            return;
        };

        let prepared: Result<Option<Node>> = async {
            self.tracker
                .transition(&batch, &job.item, JobStatus::Running, code)
                .await?;
            match job.item.parent.as_deref() {
                Some(parent_id) => Ok(Some(self.registry.get_by_id(parent_id).await?)),
                None => Ok(None),
            }
        }
        .await;
        let parent = match prepared {
            Ok(parent) => parent,
            Err(e) => {
                error!(dataset_code = code, item_id = %job.item.id, error = %e, "Rename failed");
                self.tracker.fail_all(&batch, items, code).await;
                return;
            }
        };

        let renames = Renames::from([(job.item.id.clone(), job.new_name.clone())]);
        let outcome = self
            .locks
            .lock_move_rename(items, job.item.parent_path.as_deref(), &renames)
            .await;
        if let Some(e) = outcome.error {
            warn!(dataset_code = code, error = %e, "Rename aborted, item is locked");
            self.abort(&batch, items, code, &outcome.locked).await;
            return;
        }

        self.guarded(&batch, items, code, &outcome.locked, async {
            let result: Result<()> = async {
                self.copy_tree(items, &job.dataset, &job.operator, parent.as_ref(), Some(&job.new_name))
                    .await?;
                self.delete_tree(items).await?;
                self.tracker
                    .transition(&batch, &job.item, JobStatus::Succeed, code)
                    .await?;
                self.activity
                    .send_rename_event(code, &job.item, &job.operator, &job.new_name)
                    .await
            }
            .await;

            match result {
                Ok(()) => info!(
                    dataset_code = code,
                    item_id = %job.item.id,
                    new_name = %job.new_name,
                    "Rename finished"
                ),
                Err(e) => {
                    error!(dataset_code = code, item_id = %job.item.id, error = %e, "Rename failed");
                    self.tracker.fail_all(&batch, items, code).await;
                }
            }
        })
        .await;
    }

    // ========================================================================
    // Job bookkeeping
    // ========================================================================

    async fn start(
        &self,
        session_id: Option<&str>,
        action: ActionType,
        items: &[Node],
        code: &str,
    ) -> Option<JobBatch> {
        match self
            .tracker
            .initialize_file_jobs(session_id, action, items, code)
            .await
        {
            Ok(batch) => Some(batch),
            Err(e) => {
                error!(dataset_code = code, action = %action, error = %e, "Failed to initialize jobs");
                None
            }
        }
    }

    async fn abort(&self, batch: &JobBatch, items: &[Node], code: &str, locked: &[LockEntry]) {
        self.tracker.fail_all(batch, items, code).await;
        self.locks.release(locked).await;
    }

    /// Run the locked phase of a worker, then release `locked`.
    ///
    /// A panic inside `work` still releases the locks and marks every item
    /// FAILED before it is resumed.
    async fn guarded<F>(&self, batch: &JobBatch, items: &[Node], code: &str, locked: &[LockEntry], work: F)
    where
        F: Future<Output = ()>,
    {
        let result = AssertUnwindSafe(work).catch_unwind().await;
        if result.is_err() {
            error!(dataset_code = code, action = %batch.action, "Worker panicked, releasing locks");
            self.tracker.fail_all(batch, items, code).await;
        }
        self.locks.release(locked).await;
        if let Err(panic) = result {
            std::panic::resume_unwind(panic);
        }
    }

    /// Run `work` for one top-level item between RUNNING and SUCCEED/FAILED
    async fn tracked<T, F>(&self, batch: &JobBatch, item: &Node, code: &str, work: F) -> Option<T>
    where
        F: Future<Output = Result<T>>,
    {
        let result: Result<T> = async {
            self.tracker
                .transition(batch, item, JobStatus::Running, code)
                .await?;
            let value = work.await?;
            self.tracker
                .transition(batch, item, JobStatus::Succeed, code)
                .await?;
            Ok(value)
        }
        .await;

        match result {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(item_id = %item.id, item_name = %item.name, error = %e, "Item failed");
                if let Err(e) = self
                    .tracker
                    .transition(batch, item, JobStatus::Failed, code)
                    .await
                {
                    error!(item_id = %item.id, error = %e, "Failed to record FAILED status");
                }
                None
            }
        }
    }

    async fn finish(&self, batch: &JobBatch, items: &[Node], code: &str, result: Result<()>) {
        if let Err(e) = result {
            error!(dataset_code = code, action = %batch.action, error = %e, "Post-processing failed");
            self.tracker.fail_all(batch, items, code).await;
        }
    }

    // ========================================================================
    // Tree walks
    // ========================================================================

    /// Recreate `nodes` inside `dataset` under `parent`.
    ///
    /// Files get a registry entry, their object copied, then status ACTIVE.
    /// Folders get a registry entry and their children copied beneath it.
    /// `new_name` renames the nodes of this level only.
    pub fn copy_tree<'a>(
        &'a self,
        nodes: &'a [Node],
        dataset: &'a Dataset,
        owner: &'a str,
        parent: Option<&'a Node>,
        new_name: Option<&'a str>,
    ) -> BoxFuture<'a, Result<Tally>> {
        async move {
            let mut tally = Tally::default();
            let parent_id = parent.map(|p| p.id.clone());
            let parent_path = parent.map(Node::full_path);

            for node in nodes.iter().filter(|n| !n.is_archived()) {
                let name = new_name.unwrap_or(node.name.as_str());
                if node.is_file() {
                    self.copy_file(node, dataset, owner, parent_id.clone(), parent_path.clone(), name)
                        .await?;
                    tally.files += 1;
                    tally.size += node.size as i64;
                } else {
                    let folder = self
                        .registry
                        .create_item(&NewItem::folder(
                            parent_id.clone(),
                            parent_path.clone(),
                            name,
                            owner,
                            &dataset.code,
                        ))
                        .await?;
                    let children = self
                        .registry
                        .get_children(&node.container_code, node.container_type, Some(&node.id))
                        .await?;
                    tally += self
                        .copy_tree(&children, dataset, owner, Some(&folder), None)
                        .await?;
                }
            }
            Ok(tally)
        }
        .boxed()
    }

    async fn copy_file(
        &self,
        node: &Node,
        dataset: &Dataset,
        owner: &str,
        parent_id: Option<String>,
        parent_path: Option<String>,
        name: &str,
    ) -> Result<Node> {
        let source = node.object_location()?;
        let target = ObjectLocation::new(
            dataset.code.clone(),
            format!(
                "{}/{}",
                self.settings.file_folder,
                join_path(parent_path.as_deref(), name)
            ),
        );

        let created = self
            .registry
            .create_item(&NewItem::file(
                parent_id,
                parent_path,
                name,
                owner,
                &dataset.code,
                target.to_uri(&self.settings),
                node.size,
            ))
            .await?;
        self.storage.copy_object(&source, &target).await?;
        self.registry
            .update_item(&created.id, &ItemUpdate::status(NodeStatus::Active))
            .await?;
        Ok(created)
    }

    /// Remove `nodes` post-order: children before their folder, the
    /// registry entry of a file before its object.
    pub fn delete_tree<'a>(&'a self, nodes: &'a [Node]) -> BoxFuture<'a, Result<Tally>> {
        async move {
            let mut tally = Tally::default();
            for node in nodes.iter().filter(|n| !n.is_archived()) {
                if node.is_file() {
                    let location = node.object_location()?;
                    self.registry.delete_item(&node.id).await?;
                    self.storage.delete_object(&location).await?;
                    tally.files += 1;
                    tally.size += node.size as i64;
                } else {
                    let children = self
                        .registry
                        .get_children(&node.container_code, node.container_type, Some(&node.id))
                        .await?;
                    tally += self.delete_tree(&children).await?;
                    self.registry.delete_item(&node.id).await?;
                }
            }
            Ok(tally)
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryDatasetStore;
    use crate::models::{ContainerType, NodeType};
    use crate::services::{
        InMemoryBroker, InMemoryLockService, InMemoryRegistry, InMemoryTaskStream, LockCall,
        ObjectStoreBackend,
    };
    use bytes::Bytes;
    use crate::testing::*;

    struct Fixture {
        tasks: FileOperationTasks,
        registry: Arc<InMemoryRegistry>,
        storage: Arc<ObjectStoreBackend>,
        datasets: Arc<InMemoryDatasetStore>,
        locks: Arc<InMemoryLockService>,
        stream: Arc<InMemoryTaskStream>,
        broker: Arc<InMemoryBroker>,
        dataset: Dataset,
    }

    async fn fixture(nodes: &[Node]) -> Fixture {
        let settings = Settings::default();
        let registry = Arc::new(InMemoryRegistry::new());
        for n in nodes {
            registry.insert(n.clone()).await;
        }
        let storage = Arc::new(ObjectStoreBackend::in_memory());
        for n in nodes.iter().filter(|n| n.is_file()) {
            let loc = n.object_location().unwrap();
            storage.put_bytes(&loc, vec![0u8; n.size as usize]).await.unwrap();
        }
        let dataset = Dataset {
            id: "dataset-1".to_string(),
            code: DATASET.to_string(),
            creator: OWNER.to_string(),
            ..Dataset::default()
        };
        let datasets = Arc::new(InMemoryDatasetStore::new());
        datasets.insert(dataset.clone()).await;
        let locks = Arc::new(InMemoryLockService::new());
        let stream = Arc::new(InMemoryTaskStream::new());
        let broker = Arc::new(InMemoryBroker::new());

        let tasks = FileOperationTasks::new(
            registry.clone(),
            storage.clone(),
            datasets.clone(),
            LockCoordinator::new(locks.clone(), registry.clone(), settings.clone()),
            JobTracker::new(stream.clone()),
            ActivityLog::new(broker.clone()),
            settings,
        );
        Fixture {
            tasks,
            registry,
            storage,
            datasets,
            locks,
            stream,
            broker,
            dataset,
        }
    }

    #[tokio::test]
    async fn test_import_copies_tree_and_counts_files() {
        let folder = project_folder("pf", "raw", None);
        let a = project_file("pa", "a.txt", Some(&folder), 10);
        let b = project_file("pb", "b.txt", Some(&folder), 5);
        let f = fixture(&[folder.clone(), a, b]).await;

        f.tasks
            .import(ImportJob {
                dataset: f.dataset.clone(),
                items: vec![folder],
                operator: OWNER.to_string(),
                project_id: "project-1".to_string(),
                project_code: PROJECT.to_string(),
                renames: Renames::new(),
                session_id: None,
            })
            .await;

        let copied = f.registry.find_by_path(DATASET, "raw/a.txt").await.unwrap();
        assert_eq!(copied.status, NodeStatus::Active);
        assert_eq!(copied.container_type, ContainerType::Dataset);
        assert!(f
            .storage
            .exists(&ObjectLocation::new(DATASET, "data/raw/b.txt"))
            .await
            .unwrap());

        let dataset = f.datasets.get("dataset-1").await.unwrap();
        assert_eq!(dataset.total_files, 2);
        assert_eq!(dataset.size, 15);
        assert_eq!(dataset.project_id.as_deref(), Some("project-1"));

        assert_eq!(
            f.stream.history("pf").await,
            vec![JobStatus::Waiting, JobStatus::Running, JobStatus::Succeed]
        );
        let events = f.broker.item_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].imported_from.as_deref(), Some(PROJECT));
        assert!(f.locks.held_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_import_lock_conflict_fails_every_item() {
        let a = project_file("pa", "a.txt", None, 1);
        let b = project_file("pb", "b.txt", None, 1);
        let f = fixture(&[a.clone(), b.clone()]).await;
        f.locks.refuse("core-proj/b.txt").await;

        f.tasks
            .import(ImportJob {
                dataset: f.dataset.clone(),
                items: vec![a, b],
                operator: OWNER.to_string(),
                project_id: "project-1".to_string(),
                project_code: PROJECT.to_string(),
                renames: Renames::new(),
                session_id: Some("s1".to_string()),
            })
            .await;

        assert_eq!(f.stream.history("pa").await, vec![JobStatus::Waiting, JobStatus::Failed]);
        assert_eq!(f.stream.history("pb").await, vec![JobStatus::Waiting, JobStatus::Failed]);
        assert!(f.registry.find_by_path(DATASET, "a.txt").await.is_none());
        assert!(f.locks.held_keys().await.is_empty());
        let unlocked = f
            .locks
            .calls()
            .await
            .into_iter()
            .filter(|c| matches!(c, LockCall::Unlock(_)))
            .count();
        assert_eq!(unlocked, 1);
    }

    #[tokio::test]
    async fn test_failing_item_does_not_stop_siblings() {
        let good = project_file("pa", "a.txt", None, 3);
        let broken = project_file("pb", "b.txt", None, 4);
        let f = fixture(&[good.clone()]).await;
        // registered but never uploaded
        f.registry.insert(broken.clone()).await;

        f.tasks
            .import(ImportJob {
                dataset: f.dataset.clone(),
                items: vec![broken, good],
                operator: OWNER.to_string(),
                project_id: "project-1".to_string(),
                project_code: PROJECT.to_string(),
                renames: Renames::new(),
                session_id: None,
            })
            .await;

        assert_eq!(f.stream.history("pb").await.last(), Some(&JobStatus::Failed));
        assert_eq!(f.stream.history("pa").await.last(), Some(&JobStatus::Succeed));
        assert_eq!(f.datasets.get("dataset-1").await.unwrap().total_files, 1);
    }

    #[tokio::test]
    async fn test_delete_is_post_order_and_clamps_counters() {
        let folder = dataset_folder("df", "raw", None);
        let a = dataset_file("da", "a.txt", Some(&folder), 7);
        let f = fixture(&[folder.clone(), a]).await;

        f.tasks
            .delete(DeleteJob {
                dataset: f.dataset.clone(),
                items: vec![folder],
                operator: OWNER.to_string(),
                session_id: None,
            })
            .await;

        assert!(f.registry.all().await.is_empty());
        assert!(!f
            .storage
            .exists(&ObjectLocation::new(DATASET, "data/raw/a.txt"))
            .await
            .unwrap());
        let dataset = f.datasets.get("dataset-1").await.unwrap();
        assert_eq!(dataset.total_files, 0);
        assert_eq!(dataset.size, 0);
        assert_eq!(f.broker.item_events().await[0].activity_type, "delete");
    }

    #[tokio::test]
    async fn test_move_into_folder_sends_path_change() {
        let target = dataset_folder("dt", "target", None);
        let a = dataset_file("da", "a.txt", None, 2);
        let f = fixture(&[target.clone(), a.clone()]).await;

        f.tasks
            .relocate(MoveJob {
                dataset: f.dataset.clone(),
                items: vec![a],
                operator: OWNER.to_string(),
                target: Some(target),
                renames: Renames::new(),
                session_id: None,
            })
            .await;

        let moved = f.registry.find_by_path(DATASET, "target/a.txt").await.unwrap();
        assert_eq!(moved.parent.as_deref(), Some("dt"));
        assert!(f.registry.find_by_path(DATASET, "a.txt").await.is_none());
        assert!(f
            .storage
            .exists(&ObjectLocation::new(DATASET, "data/target/a.txt"))
            .await
            .unwrap());

        let events = f.broker.item_events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].changes[0].old_value, "/a.txt");
        assert_eq!(events[0].changes[0].new_value, "/target/a.txt");
        assert_eq!(f.datasets.get("dataset-1").await.unwrap().total_files, 0);
    }

    #[tokio::test]
    async fn test_rename_nested_folder_keeps_parent() {
        let top = dataset_folder("d1", "top", None);
        let mid = dataset_folder("d2", "mid", Some(&top));
        let leaf = dataset_file("d3", "leaf.txt", Some(&mid), 1);
        let f = fixture(&[top.clone(), mid.clone(), leaf]).await;

        f.tasks
            .rename(RenameJob {
                dataset: f.dataset.clone(),
                item: mid,
                new_name: "renamed".to_string(),
                operator: OWNER.to_string(),
                session_id: None,
            })
            .await;

        let renamed = f.registry.find_by_path(DATASET, "top/renamed").await.unwrap();
        assert_eq!(renamed.node_type, NodeType::Folder);
        assert_eq!(renamed.parent.as_deref(), Some("d1"));
        assert!(f.registry.find_by_path(DATASET, "top/renamed/leaf.txt").await.is_some());
        assert!(f.registry.find_by_path(DATASET, "top/mid").await.is_none());
        assert_eq!(
            f.stream.history("d2").await,
            vec![JobStatus::Waiting, JobStatus::Running, JobStatus::Succeed]
        );
        let change = &f.broker.item_events().await[0].changes[0];
        assert_eq!((change.old_value.as_str(), change.new_value.as_str()), ("mid", "renamed"));
        assert!(f.locks.held_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_rename_with_missing_parent_fails_without_locking() {
        let mut orphan = dataset_file("d3", "leaf.txt", None, 1);
        orphan.parent = Some("gone".to_string());
        orphan.parent_path = Some("gone".to_string());
        let f = fixture(&[orphan.clone()]).await;

        f.tasks
            .rename(RenameJob {
                dataset: f.dataset.clone(),
                item: orphan,
                new_name: "x.txt".to_string(),
                operator: OWNER.to_string(),
                session_id: None,
            })
            .await;

        assert_eq!(
            f.stream.history("d3").await,
            vec![JobStatus::Waiting, JobStatus::Running, JobStatus::Failed]
        );
        assert!(f.locks.calls().await.is_empty());
    }

    fn import_job(f: &Fixture, items: Vec<Node>) -> ImportJob {
        ImportJob {
            dataset: f.dataset.clone(),
            items,
            operator: OWNER.to_string(),
            project_id: "project-1".to_string(),
            project_code: PROJECT.to_string(),
            renames: Renames::new(),
            session_id: None,
        }
    }

    #[tokio::test]
    async fn test_counter_failure_after_copy_fails_every_item() {
        let a = project_file("pa", "a.txt", None, 1);
        let b = project_file("pb", "b.txt", None, 2);
        let f = fixture(&[a.clone(), b.clone()]).await;
        f.datasets.fail_counter_updates();

        f.tasks.import(import_job(&f, vec![a, b])).await;

        // the copies happened, but the batch is reported failed
        assert!(f.registry.find_by_path(DATASET, "a.txt").await.is_some());
        for id in ["pa", "pb"] {
            assert_eq!(
                f.stream.history(id).await,
                vec![JobStatus::Waiting, JobStatus::Running, JobStatus::Succeed, JobStatus::Failed]
            );
        }
        assert!(f.broker.item_events().await.is_empty());
        assert!(f.locks.held_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_event_failure_after_delete_fails_every_item() {
        let a = dataset_file("da", "a.txt", None, 1);
        let b = dataset_file("db", "b.txt", None, 1);
        let f = fixture(&[a.clone(), b.clone()]).await;
        f.broker.fail_publishes();

        f.tasks
            .delete(DeleteJob {
                dataset: f.dataset.clone(),
                items: vec![a, b],
                operator: OWNER.to_string(),
                session_id: None,
            })
            .await;

        assert!(f.registry.all().await.is_empty());
        assert_eq!(f.stream.history("da").await.last(), Some(&JobStatus::Failed));
        assert_eq!(f.stream.history("db").await.last(), Some(&JobStatus::Failed));
        assert!(f.locks.held_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_archived_descendants_are_not_copied() {
        let folder = project_folder("pf", "raw", None);
        let live = project_file("pa", "live.txt", Some(&folder), 4);
        let mut gone = project_file("pb", "gone.txt", Some(&folder), 9);
        gone.status = NodeStatus::Archived;
        let mut gone_dir = project_folder("pg", "old", Some(&folder));
        gone_dir.status = NodeStatus::Archived;
        let f = fixture(&[folder.clone(), live, gone, gone_dir]).await;

        f.tasks.import(import_job(&f, vec![folder])).await;

        assert!(f.registry.find_by_path(DATASET, "raw/live.txt").await.is_some());
        assert!(f.registry.find_by_path(DATASET, "raw/gone.txt").await.is_none());
        assert!(f.registry.find_by_path(DATASET, "raw/old").await.is_none());
        let dataset = f.datasets.get("dataset-1").await.unwrap();
        assert_eq!((dataset.total_files, dataset.size), (1, 4));
    }

    #[tokio::test]
    async fn test_archived_descendants_are_not_deleted() {
        let folder = dataset_folder("df", "raw", None);
        let live = dataset_file("da", "live.txt", Some(&folder), 4);
        let mut gone = dataset_file("db", "gone.txt", Some(&folder), 9);
        gone.status = NodeStatus::Archived;
        let f = fixture(&[folder.clone(), live, gone.clone()]).await;

        f.tasks
            .delete(DeleteJob {
                dataset: f.dataset.clone(),
                items: vec![folder],
                operator: OWNER.to_string(),
                session_id: None,
            })
            .await;

        let left: Vec<String> = f.registry.all().await.into_iter().map(|n| n.id).collect();
        assert_eq!(left, vec!["db".to_string()]);
        assert!(f.storage.exists(&gone.object_location().unwrap()).await.unwrap());
        assert!(f.locks.held_keys().await.is_empty());
    }

    #[tokio::test]
    async fn test_batch_duplicate_is_imported_under_new_name() {
        let a = project_folder("pa", "a", None);
        let b = project_folder("pb", "b", None);
        let first = project_file("p1", "x.txt", Some(&a), 1);
        let second = project_file("p2", "x.txt", Some(&b), 2);
        let f = fixture(&[a, b, first.clone(), second.clone()]).await;

        let mut job = import_job(&f, vec![first, second]);
        job.renames.insert("p2".to_string(), "b_x.txt".to_string());
        f.tasks.import(job).await;

        assert!(f.registry.find_by_path(DATASET, "x.txt").await.is_some());
        let renamed = f.registry.find_by_path(DATASET, "b_x.txt").await.unwrap();
        assert_eq!(renamed.size, 2);
        assert!(f
            .storage
            .exists(&ObjectLocation::new(DATASET, "data/b_x.txt"))
            .await
            .unwrap());
        assert_eq!(f.datasets.get("dataset-1").await.unwrap().total_files, 2);
        assert!(f.locks.held_keys().await.is_empty());
    }

    /// Storage whose copies panic
    struct PanickingStorage(ObjectStoreBackend);

    #[async_trait::async_trait]
    impl ObjectStorage for PanickingStorage {
        async fn copy_object(&self, _: &ObjectLocation, _: &ObjectLocation) -> Result<()> {
            panic!("copy exploded");
        }

        async fn delete_object(&self, location: &ObjectLocation) -> Result<()> {
            self.0.delete_object(location).await
        }

        async fn get_object(&self, location: &ObjectLocation, limit: u64) -> Result<Bytes> {
            self.0.get_object(location, limit).await
        }

        async fn download(&self, location: &ObjectLocation, dest: &std::path::Path) -> Result<()> {
            self.0.download(location, dest).await
        }

        async fn upload(&self, src: &std::path::Path, location: &ObjectLocation) -> Result<()> {
            self.0.upload(src, location).await
        }

        async fn read_stream(
            &self,
            location: &ObjectLocation,
        ) -> Result<futures::stream::BoxStream<'static, Result<Bytes>>> {
            self.0.read_stream(location).await
        }

        async fn presigned_url(
            &self,
            location: &ObjectLocation,
            expires_in: std::time::Duration,
        ) -> Result<String> {
            self.0.presigned_url(location, expires_in).await
        }
    }

    #[tokio::test]
    async fn test_panicking_worker_still_releases_locks() {
        let a = dataset_file("da", "a.txt", None, 1);
        let target = dataset_folder("dt", "target", None);
        let f = fixture(&[a.clone(), target.clone()]).await;
        let settings = Settings::default();
        let tasks = FileOperationTasks::new(
            f.registry.clone(),
            Arc::new(PanickingStorage(ObjectStoreBackend::in_memory())),
            f.datasets.clone(),
            LockCoordinator::new(f.locks.clone(), f.registry.clone(), settings.clone()),
            JobTracker::new(f.stream.clone()),
            ActivityLog::new(f.broker.clone()),
            settings,
        );
        let job = MoveJob {
            dataset: f.dataset.clone(),
            items: vec![a],
            operator: OWNER.to_string(),
            target: Some(target),
            renames: Renames::new(),
            session_id: None,
        };

        let joined = tokio::spawn(async move { tasks.relocate(job).await }).await;
        assert!(joined.unwrap_err().is_panic());
        assert!(f.locks.held_keys().await.is_empty());
        assert!(f.locks.calls().await.iter().any(|c| matches!(c, LockCall::Unlock(_))));
        assert_eq!(f.stream.history("da").await.last(), Some(&JobStatus::Failed));
    }
}
