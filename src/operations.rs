//! Request-facing operations
//!
//! Each mutation pre-checks its items, enqueues a detached worker for the
//! accepted ones and returns the `{processing, ignored}` manifest right away.
//! Outcomes are observed through job status records and the publish state.

use bytes::Bytes;
use futures::stream::BoxStream;
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::Settings;
use crate::db::{DatasetStore, SchemaStore, VersionStore};
use crate::jobs::JobTracker;
use crate::locks::LockCoordinator;
use crate::models::{
    ContainerType, Dataset, DeleteRequest, DownloadUrl, FileListing, FolderCreate, ImportRequest,
    Manifest, MoveRequest, Node, ObjectLocation, PreviewResponse, PublishResponse, PublishState,
    RenameRequest, VersionCreate, VersionPage, VersionQuery, FEEDBACK_DUPLICATE,
};
use crate::preview;
use crate::publisher::VersionPublisher;
use crate::services::{
    ActivityLog, EventBroker, LockService, MetadataRegistry, NewItem, ObjectStorage,
    PublishStateStore, TaskStream,
};
use crate::types::{DatasetError, Result};
use crate::validation::{
    flag_batch_duplicates, remove_existing, split_renames, validate_items, Checked,
};
use crate::worker::{BackgroundTasks, DeleteJob, FileOperationTasks, ImportJob, MoveJob, RenameJob};

/// Every external collaborator the service talks to
#[derive(Clone)]
pub struct Backends {
    pub locks: Arc<dyn LockService>,
    pub registry: Arc<dyn MetadataRegistry>,
    pub storage: Arc<dyn ObjectStorage>,
    pub task_stream: Arc<dyn TaskStream>,
    pub publish_states: Arc<dyn PublishStateStore>,
    pub broker: Arc<dyn EventBroker>,
    pub datasets: Arc<dyn DatasetStore>,
    pub versions: Arc<dyn VersionStore>,
    pub schemas: Arc<dyn SchemaStore>,
}

#[derive(Clone)]
pub struct FileOperations {
    registry: Arc<dyn MetadataRegistry>,
    storage: Arc<dyn ObjectStorage>,
    datasets: Arc<dyn DatasetStore>,
    versions: Arc<dyn VersionStore>,
    activity: ActivityLog,
    tasks: FileOperationTasks,
    publisher: VersionPublisher,
    background: BackgroundTasks,
    settings: Settings,
}

impl FileOperations {
    pub fn new(backends: Backends, settings: Settings) -> Self {
        let coordinator = LockCoordinator::new(
            backends.locks.clone(),
            backends.registry.clone(),
            settings.clone(),
        );
        let activity = ActivityLog::new(backends.broker.clone());

        let tasks = FileOperationTasks::new(
            backends.registry.clone(),
            backends.storage.clone(),
            backends.datasets.clone(),
            coordinator.clone(),
            JobTracker::new(backends.task_stream.clone()),
            activity.clone(),
            settings.clone(),
        );
        let publisher = VersionPublisher::new(
            backends.registry.clone(),
            backends.storage.clone(),
            backends.publish_states.clone(),
            backends.versions.clone(),
            backends.schemas.clone(),
            coordinator,
            activity.clone(),
            settings.clone(),
        );

        Self {
            registry: backends.registry,
            storage: backends.storage,
            datasets: backends.datasets,
            versions: backends.versions,
            activity,
            tasks,
            publisher,
            background: BackgroundTasks::new(),
            settings,
        }
    }

    /// Detached work started by this service
    pub fn background(&self) -> &BackgroundTasks {
        &self.background
    }

    // ========================================================================
    // File operations
    // ========================================================================

    /// Copy project items into the dataset root
    pub async fn import(
        &self,
        dataset_id: &str,
        request: ImportRequest,
        session_id: Option<String>,
    ) -> Result<Manifest> {
        let dataset = self.datasets.get(dataset_id).await?;
        if let Some(project_id) = dataset.project_id.as_deref() {
            if project_id != request.project_geid {
                return Err(DatasetError::Forbidden(format!(
                    "Dataset {} is bound to another project",
                    dataset.code
                )));
            }
        }

        let validated = validate_items(
            self.registry.as_ref(),
            &request.source_list,
            &request.project_code,
            ContainerType::Project,
        )
        .await?;
        let originals = validated.accepted.clone();
        let manifest = self.check_destination(validated, None, &dataset.code).await?;

        if !manifest.processing.is_empty() {
            let (items, renames) = split_renames(&manifest.processing, &originals);
            let job = ImportJob {
                dataset: dataset.clone(),
                items,
                operator: request.operator,
                project_id: request.project_geid,
                project_code: request.project_code,
                renames,
                session_id,
            };
            let tasks = self.tasks.clone();
            self.background
                .spawn("import", async move { tasks.import(job).await })
                .await;
        }
        log_manifest("import", &dataset, &manifest);
        Ok(manifest)
    }

    pub async fn delete(
        &self,
        dataset_id: &str,
        request: DeleteRequest,
        session_id: Option<String>,
    ) -> Result<Manifest> {
        let dataset = self.datasets.get(dataset_id).await?;
        let validated = validate_items(
            self.registry.as_ref(),
            &request.source_list,
            &dataset.code,
            ContainerType::Dataset,
        )
        .await?;
        let manifest = Manifest {
            processing: validated.accepted,
            ignored: validated.ignored,
        };

        if !manifest.processing.is_empty() {
            let job = DeleteJob {
                dataset: dataset.clone(),
                items: manifest.processing.clone(),
                operator: request.operator,
                session_id,
            };
            let tasks = self.tasks.clone();
            self.background
                .spawn("delete", async move { tasks.delete(job).await })
                .await;
        }
        log_manifest("delete", &dataset, &manifest);
        Ok(manifest)
    }

    /// Move dataset items under `target_geid`, the dataset id standing for the root
    pub async fn relocate(
        &self,
        dataset_id: &str,
        request: MoveRequest,
        session_id: Option<String>,
    ) -> Result<Manifest> {
        let dataset = self.datasets.get(dataset_id).await?;
        let target = if request.target_geid == dataset.id {
            None
        } else {
            Some(self.target_folder(&dataset, &request.target_geid).await?)
        };
        let destination = target.as_ref().map(Node::full_path);

        let mut validated = validate_items(
            self.registry.as_ref(),
            &request.source_list,
            &dataset.code,
            ContainerType::Dataset,
        )
        .await?;

        // a folder cannot move into itself or below itself
        if let Some(dest) = destination.as_deref() {
            let (inside, rest): (Vec<Node>, Vec<Node>) =
                validated.accepted.into_iter().partition(|item| {
                    let path = item.full_path();
                    item.is_folder() && (dest == path || dest.starts_with(&format!("{}/", path)))
                });
            validated.accepted = rest;
            validated.ignored.extend(inside.into_iter().map(|mut n| {
                n.feedback = Some(FEEDBACK_DUPLICATE.to_string());
                n
            }));
        }

        let originals = validated.accepted.clone();
        let manifest = self
            .check_destination(validated, destination.as_deref(), &dataset.code)
            .await?;

        if !manifest.processing.is_empty() {
            let (items, renames) = split_renames(&manifest.processing, &originals);
            let job = MoveJob {
                dataset: dataset.clone(),
                items,
                operator: request.operator,
                target,
                renames,
                session_id,
            };
            let tasks = self.tasks.clone();
            self.background
                .spawn("move", async move { tasks.relocate(job).await })
                .await;
        }
        log_manifest("move", &dataset, &manifest);
        Ok(manifest)
    }

    pub async fn rename(
        &self,
        dataset_id: &str,
        file_id: &str,
        request: RenameRequest,
        session_id: Option<String>,
    ) -> Result<Manifest> {
        let new_name = request.new_name.trim();
        if new_name.is_empty() || new_name.contains('/') {
            return Err(DatasetError::BadRequest(format!(
                "Invalid name '{}'",
                request.new_name
            )));
        }

        let dataset = self.datasets.get(dataset_id).await?;
        let validated = validate_items(
            self.registry.as_ref(),
            &[file_id.to_string()],
            &dataset.code,
            ContainerType::Dataset,
        )
        .await?;

        let mut manifest = Manifest {
            processing: Vec::new(),
            ignored: validated.ignored,
        };
        for item in validated.accepted {
            let mut candidate = item.clone();
            candidate.name = new_name.to_string();
            let checked = remove_existing(
                self.registry.as_ref(),
                vec![candidate],
                item.parent_path.as_deref(),
                &dataset.code,
            )
            .await?;
            if checked.accepted.is_empty() {
                let mut ignored = item;
                ignored.feedback = Some(FEEDBACK_DUPLICATE.to_string());
                manifest.ignored.push(ignored);
            } else {
                manifest.processing.push(item);
            }
        }

        if let Some(item) = manifest.processing.first().cloned() {
            let job = RenameJob {
                dataset: dataset.clone(),
                item,
                new_name: new_name.to_string(),
                operator: request.operator,
                session_id,
            };
            let tasks = self.tasks.clone();
            self.background
                .spawn("rename", async move { tasks.rename(job).await })
                .await;
        }
        log_manifest("rename", &dataset, &manifest);
        Ok(manifest)
    }

    /// Children of `folder_id`, or of the dataset root, with the route to them
    pub async fn list_files(&self, dataset_id: &str, folder_id: Option<&str>) -> Result<FileListing> {
        let dataset = self.datasets.get(dataset_id).await?;
        let folder = match folder_id.filter(|id| !id.is_empty() && *id != dataset.id) {
            Some(id) => Some(self.target_folder(&dataset, id).await?),
            None => None,
        };

        let data: Vec<Node> = self
            .registry
            .get_children(
                &dataset.code,
                ContainerType::Dataset,
                folder.as_ref().map(|f| f.id.as_str()),
            )
            .await?
            .into_iter()
            .filter(|n| !n.is_archived())
            .collect();
        let route = folder
            .as_ref()
            .map(|f| f.full_path().split('/').map(str::to_string).collect())
            .unwrap_or_default();

        Ok(FileListing {
            total: data.len(),
            data,
            route,
        })
    }

    /// Create an empty folder, refusing a name already used at that level
    pub async fn create_folder(&self, dataset_id: &str, request: FolderCreate) -> Result<Node> {
        let name = request.validated_name()?;
        let dataset = self.datasets.get(dataset_id).await?;
        let parent_id = request.parent_folder_geid.as_str();
        let parent = if parent_id.is_empty() || parent_id == dataset.id {
            None
        } else {
            Some(self.target_folder(&dataset, parent_id).await?)
        };

        let taken = self
            .registry
            .get_children(
                &dataset.code,
                ContainerType::Dataset,
                parent.as_ref().map(|p| p.id.as_str()),
            )
            .await?
            .iter()
            .any(|n| !n.is_archived() && n.name == name);
        if taken {
            return Err(DatasetError::AlreadyExists(format!(
                "'{}' already exists in dataset {}",
                name, dataset.code
            )));
        }

        let folder = self
            .registry
            .create_item(&NewItem::folder(
                parent.as_ref().map(|p| p.id.clone()),
                parent.as_ref().map(Node::full_path),
                name,
                &request.username,
                &dataset.code,
            ))
            .await?;
        self.activity
            .send_create_folder_event(&folder, &request.username)
            .await?;
        info!(dataset_code = %dataset.code, folder = %folder.full_path(), "Folder created");
        Ok(folder)
    }

    /// Leading bytes of a dataset file, normalized for its type
    pub async fn preview(&self, dataset_id: &str, file_id: &str) -> Result<PreviewResponse> {
        let node = self.dataset_file(dataset_id, file_id).await?;
        let data = self
            .storage
            .get_object(&node.object_location()?, self.settings.max_preview_size)
            .await?;

        let file_type = preview::file_type(&node.name);
        let is_concatenated = node.size > self.settings.max_preview_size;
        let content = preview::normalize(&file_type, &String::from_utf8_lossy(&data), is_concatenated);
        Ok(PreviewResponse {
            content,
            file_type,
            is_concatenated,
        })
    }

    /// Whole body of a dataset file as a stream, with its media type
    pub async fn preview_stream(
        &self,
        dataset_id: &str,
        file_id: &str,
    ) -> Result<(&'static str, BoxStream<'static, Result<Bytes>>)> {
        let node = self.dataset_file(dataset_id, file_id).await?;
        let stream = self.storage.read_stream(&node.object_location()?).await?;
        Ok((preview::media_type(&preview::file_type(&node.name)), stream))
    }

    // ========================================================================
    // Versions
    // ========================================================================

    /// Start publishing a new version in the background
    pub async fn publish_version(
        &self,
        dataset_id: &str,
        request: VersionCreate,
    ) -> Result<PublishResponse> {
        let dataset = self.datasets.get(dataset_id).await?;
        self.publisher.check_version(&dataset.id, &request).await?;
        let status_id = self.publisher.create_job(&dataset.id).await?;

        info!(dataset_code = %dataset.code, version = %request.version, "Publish accepted");
        let publisher = self.publisher.clone();
        self.background
            .spawn("publish", async move {
                // the outcome is recorded in the publish state
                let _ = publisher.publish(&dataset, &request).await;
            })
            .await;
        Ok(PublishResponse { status_id })
    }

    pub async fn publish_status(&self, dataset_id: &str) -> Result<PublishState> {
        self.publisher.status(dataset_id).await
    }

    pub async fn list_versions(&self, query: &VersionQuery) -> Result<VersionPage> {
        query.validate()?;
        self.versions.list(query).await
    }

    /// Presigned url of a version archive, the latest one when `version` is `None`
    pub async fn download_url(&self, dataset_id: &str, version: Option<&str>) -> Result<DownloadUrl> {
        let version = self.versions.get(dataset_id, version).await?;
        let location = ObjectLocation::parse(&version.location)?;
        let source = self
            .storage
            .presigned_url(&location, self.settings.download_url_expiry)
            .await?;
        info!(dataset_id, version = %version.version, "Download url issued");
        Ok(DownloadUrl { source })
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    /// Live file `file_id` of the dataset
    async fn dataset_file(&self, dataset_id: &str, file_id: &str) -> Result<Node> {
        let dataset = self.datasets.get(dataset_id).await?;
        let not_found = || {
            DatasetError::NotFound(format!(
                "File {} not found in dataset {}",
                file_id, dataset.code
            ))
        };
        let node = match self.registry.get_by_id(file_id).await {
            Ok(node) => node,
            Err(DatasetError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e),
        };
        if node.container_code != dataset.code || !node.is_file() || node.is_archived() {
            return Err(not_found());
        }
        Ok(node)
    }

    async fn target_folder(&self, dataset: &Dataset, target_id: &str) -> Result<Node> {
        let not_found = || {
            DatasetError::NotFound(format!(
                "Folder {} not found in dataset {}",
                target_id, dataset.code
            ))
        };
        let node = match self.registry.get_by_id(target_id).await {
            Ok(node) => node,
            Err(DatasetError::NotFound(_)) => return Err(not_found()),
            Err(e) => return Err(e),
        };
        if node.container_code != dataset.code || !node.is_folder() || node.is_archived() {
            return Err(not_found());
        }
        Ok(node)
    }

    /// Batch and destination duplicate checks on validated items
    async fn check_destination(
        &self,
        validated: Checked,
        destination: Option<&str>,
        dataset_code: &str,
    ) -> Result<Manifest> {
        let batch = flag_batch_duplicates(validated.accepted, destination);
        let existing = remove_existing(
            self.registry.as_ref(),
            batch.accepted,
            destination,
            dataset_code,
        )
        .await?;

        let mut ignored = validated.ignored;
        ignored.extend(batch.ignored);
        ignored.extend(existing.ignored);
        Ok(Manifest {
            processing: existing.accepted,
            ignored,
        })
    }
}

fn log_manifest(operation: &str, dataset: &Dataset, manifest: &Manifest) {
    if manifest.processing.is_empty() {
        warn!(
            operation,
            dataset_code = %dataset.code,
            ignored = manifest.ignored.len(),
            "Nothing to process"
        );
    } else {
        info!(
            operation,
            dataset_code = %dataset.code,
            processing = manifest.processing.len(),
            ignored = manifest.ignored.len(),
            "Worker enqueued"
        );
    }
}
