//! Archive publisher
//!
//! Snapshots a dataset tree into a zip archive stored under the dataset's
//! `versions/` prefix and records it as an immutable [`Version`]. Progress is
//! kept in the publish state store keyed by dataset id:
//!
//! ```text
//! idle -> inprogress -> success
//!                    -> failed
//! ```
//!
//! At most one publish runs per dataset; a request arriving while the state
//! is `inprogress` is rejected with [`DatasetError::AlreadyPublishing`].

use chrono::Utc;
use futures::FutureExt;
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::panic::AssertUnwindSafe;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::config::Settings;
use crate::db::{SchemaStore, VersionStore};
use crate::locks::{LockCoordinator, LockOutcome};
use crate::models::{
    ContainerType, Dataset, LockEntry, ObjectLocation, PublishState, PublishStatus, Version,
    VersionCreate,
};
use crate::services::{ActivityLog, MetadataRegistry, ObjectStorage, PublishStateStore};
use crate::types::{DatasetError, Result};

const VERSIONS_PREFIX: &str = "versions";
const CONTENT_DIR: &str = "content";

#[derive(Clone)]
pub struct VersionPublisher {
    registry: Arc<dyn MetadataRegistry>,
    storage: Arc<dyn ObjectStorage>,
    states: Arc<dyn PublishStateStore>,
    versions: Arc<dyn VersionStore>,
    schemas: Arc<dyn SchemaStore>,
    locks: LockCoordinator,
    activity: ActivityLog,
    settings: Settings,
}

impl VersionPublisher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<dyn MetadataRegistry>,
        storage: Arc<dyn ObjectStorage>,
        states: Arc<dyn PublishStateStore>,
        versions: Arc<dyn VersionStore>,
        schemas: Arc<dyn SchemaStore>,
        locks: LockCoordinator,
        activity: ActivityLog,
        settings: Settings,
    ) -> Self {
        Self {
            registry,
            storage,
            states,
            versions,
            schemas,
            locks,
            activity,
            settings,
        }
    }

    /// Reject malformed requests and versions that already exist
    pub async fn check_version(&self, dataset_id: &str, request: &VersionCreate) -> Result<()> {
        request.validate()?;
        if self.versions.exists(dataset_id, &request.version).await? {
            return Err(DatasetError::DuplicateVersion {
                dataset_id: dataset_id.to_string(),
                version: request.version.clone(),
            });
        }
        Ok(())
    }

    /// Claim the dataset for publishing and return the status id to poll
    pub async fn create_job(&self, dataset_id: &str) -> Result<String> {
        if let Some(state) = self.states.get(dataset_id).await? {
            if state.status == PublishStatus::Inprogress {
                return Err(DatasetError::AlreadyPublishing(dataset_id.to_string()));
            }
        }
        self.states
            .set(dataset_id, &PublishState::in_progress(), self.settings.publish_status_ttl)
            .await?;
        Ok(dataset_id.to_string())
    }

    /// Current publish state of a dataset
    pub async fn status(&self, dataset_id: &str) -> Result<PublishState> {
        self.states.get(dataset_id).await?.ok_or_else(|| {
            DatasetError::NotFound(format!("No publish status for dataset {}", dataset_id))
        })
    }

    /// Build, upload and record a new version.
    ///
    /// The outcome is also written to the state store; locks taken on the
    /// dataset tree are released on every path, panics included.
    pub async fn publish(&self, dataset: &Dataset, request: &VersionCreate) -> Result<Version> {
        self.set_state(&dataset.id, PublishState::in_progress()).await;

        let mut locked = Vec::new();
        let built = AssertUnwindSafe(self.build_version(dataset, request, &mut locked))
            .catch_unwind()
            .await;
        let result = match built {
            Ok(result) => result,
            Err(panic) => {
                error!(dataset_code = %dataset.code, "Publish panicked, releasing locks");
                self.set_state(
                    &dataset.id,
                    PublishState::failed(format!("Error publishing {}: worker panicked", dataset.id)),
                )
                .await;
                self.locks.release(&locked).await;
                std::panic::resume_unwind(panic);
            }
        };

        match &result {
            Ok(version) => {
                info!(
                    dataset_code = %dataset.code,
                    version = %version.version,
                    location = %version.location,
                    "Version published"
                );
                self.set_state(&dataset.id, PublishState::success()).await;
            }
            Err(e) => {
                error!(dataset_code = %dataset.code, error = %e, "Publish failed");
                self.set_state(
                    &dataset.id,
                    PublishState::failed(format!("Error publishing {}: {}", dataset.id, e)),
                )
                .await;
            }
        }

        self.locks.release(&locked).await;
        result
    }

    async fn set_state(&self, dataset_id: &str, state: PublishState) {
        if let Err(e) = self
            .states
            .set(dataset_id, &state, self.settings.publish_status_ttl)
            .await
        {
            error!(dataset_id, status = ?state.status, error = %e, "Failed to store publish state");
        }
    }

    async fn build_version(
        &self,
        dataset: &Dataset,
        request: &VersionCreate,
        locked: &mut Vec<LockEntry>,
    ) -> Result<Version> {
        let roots = self
            .registry
            .get_children(&dataset.code, ContainerType::Dataset, None)
            .await?;
        let LockOutcome { locked: acquired, error } = self.locks.lock_publish(&roots).await;
        *locked = acquired;
        if let Some(e) = error {
            return Err(e);
        }

        tokio::fs::create_dir_all(&self.settings.scratch_dir).await?;
        let scratch = tempfile::Builder::new()
            .prefix(&format!("publish_{}_", dataset.code))
            .tempdir_in(&self.settings.scratch_dir)?;
        let content = scratch.path().join(CONTENT_DIR);
        tokio::fs::create_dir_all(&content).await?;

        let files = self.registry.get_files(&dataset.code).await?;
        for file in &files {
            let location = file.object_location()?;
            self.storage
                .download(&location, &scratch_path(&content, &location.key)?)
                .await?;
        }
        debug!(dataset_code = %dataset.code, count = files.len(), "Files downloaded");

        let schemas = self.schemas.published_schemas(&dataset.id).await?;
        for schema in schemas.iter().filter(|s| !s.is_draft) {
            if let Some(name) = schema.export_file_name() {
                let dest = scratch_path(&content, &name)?;
                tokio::fs::write(dest, to_json_pretty(&schema.content)?).await?;
            }
        }

        let now = Utc::now();
        let zip_name = format!("{}_{}.zip", dataset.code, now.format("%Y-%m-%dT%H-%M-%S"));
        let zip_path = scratch.path().join(&zip_name);
        let source = content.clone();
        let target = zip_path.clone();
        let entries = tokio::task::spawn_blocking(move || zip_directory(&source, &target)).await??;
        debug!(dataset_code = %dataset.code, entries, archive = %zip_name, "Archive built");

        let location = ObjectLocation::new(
            dataset.code.clone(),
            format!("{}/{}", VERSIONS_PREFIX, zip_name),
        );
        self.storage.upload(&zip_path, &location).await?;

        let version = Version {
            id: uuid::Uuid::new_v4().to_string(),
            dataset_id: dataset.id.clone(),
            dataset_code: dataset.code.clone(),
            version: request.version.clone(),
            created_by: request.operator.clone(),
            location: location.to_uri(&self.settings),
            notes: request.notes.clone(),
            created_at: now,
        };
        self.versions.create(&version).await?;
        self.activity.send_release_event(&version).await?;
        Ok(version)
    }
}

/// `relative` joined below `root`, refusing anything that would leave it
fn scratch_path(root: &Path, relative: &str) -> Result<PathBuf> {
    let path = Path::new(relative);
    let inside = path.components().next().is_some()
        && path.components().all(|c| matches!(c, Component::Normal(_)));
    if !inside {
        return Err(DatasetError::BadRequest(format!(
            "Path '{}' leaves the publish directory",
            relative
        )));
    }
    Ok(root.join(path))
}

/// JSON with 4-space indentation
fn to_json_pretty<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    value.serialize(&mut ser)?;
    Ok(buf)
}

/// Deflate every file below `root` into `dest`, returning the entry count
fn zip_directory(root: &Path, dest: &Path) -> Result<usize> {
    let mut files = Vec::new();
    collect_files(root, &mut files)?;
    files.sort();

    let mut zip = ZipWriter::new(BufWriter::new(File::create(dest)?));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    for path in &files {
        let name = path
            .strip_prefix(root)
            .map_err(|e| DatasetError::Internal(e.to_string()))?
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        zip.start_file(name, options)?;
        let mut input = File::open(path)?;
        std::io::copy(&mut input, &mut zip)?;
    }
    zip.finish()?.flush()?;
    Ok(files.len())
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{InMemorySchemaStore, InMemoryVersionStore};
    use crate::models::{SchemaDocument, Storage};
    use crate::services::{
        InMemoryBroker, InMemoryLockService, InMemoryPublishStore, InMemoryRegistry,
        ObjectStoreBackend,
    };
    use crate::testing::*;
    use std::io::{Cursor, Read};

    struct Fixture {
        publisher: VersionPublisher,
        registry: Arc<InMemoryRegistry>,
        storage: Arc<ObjectStoreBackend>,
        schemas: Arc<InMemorySchemaStore>,
        versions: Arc<InMemoryVersionStore>,
        locks: Arc<InMemoryLockService>,
        broker: Arc<InMemoryBroker>,
        dataset: Dataset,
        _scratch: tempfile::TempDir,
    }

    async fn fixture() -> Fixture {
        let scratch = tempfile::tempdir().unwrap();
        let settings = Settings {
            scratch_dir: scratch.path().to_path_buf(),
            ..Settings::default()
        };

        let folder = dataset_folder("d1", "raw", None);
        let file = dataset_file("d2", "a.txt", Some(&folder), 5);
        let registry = Arc::new(InMemoryRegistry::new());
        registry.insert(folder).await;
        registry.insert(file.clone()).await;

        let storage = Arc::new(ObjectStoreBackend::in_memory());
        storage
            .put_bytes(&file.object_location().unwrap(), &b"hello"[..])
            .await
            .unwrap();

        let schemas = Arc::new(InMemorySchemaStore::new());
        for (name, standard, is_draft) in [
            ("essential.schema.json", "default", false),
            ("dataset.schema.json", "open_minds", false),
            ("draft.schema.json", "default", true),
        ] {
            schemas
                .insert(SchemaDocument {
                    name: name.to_string(),
                    dataset_id: "dataset-1".to_string(),
                    standard: standard.to_string(),
                    is_draft,
                    content: serde_json::json!({ "title": name }),
                })
                .await;
        }

        let locks = Arc::new(InMemoryLockService::new());
        let versions = Arc::new(InMemoryVersionStore::new());
        let broker = Arc::new(InMemoryBroker::new());
        let publisher = VersionPublisher::new(
            registry.clone(),
            storage.clone(),
            Arc::new(InMemoryPublishStore::new()),
            versions.clone(),
            schemas.clone(),
            LockCoordinator::new(locks.clone(), registry.clone(), settings.clone()),
            ActivityLog::new(broker.clone()),
            settings,
        );
        Fixture {
            publisher,
            registry,
            storage,
            schemas,
            versions,
            locks,
            broker,
            dataset: Dataset {
                id: "dataset-1".to_string(),
                code: DATASET.to_string(),
                creator: OWNER.to_string(),
                ..Dataset::default()
            },
            _scratch: scratch,
        }
    }

    fn request(version: &str) -> VersionCreate {
        VersionCreate {
            operator: OWNER.to_string(),
            notes: "first release".to_string(),
            version: version.to_string(),
        }
    }

    #[tokio::test]
    async fn test_publish_uploads_archive_and_records_version() {
        let f = fixture().await;
        f.publisher.create_job("dataset-1").await.unwrap();
        let version = f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap();

        assert!(version.location.starts_with("minio://http://minio.minio:9000/ds1/versions/ds1_"));
        assert_eq!(f.versions.all().await, vec![version.clone()]);
        assert_eq!(
            f.publisher.status("dataset-1").await.unwrap().status,
            PublishStatus::Success
        );
        assert!(f.locks.held_keys().await.is_empty());
        assert_eq!(f.broker.dataset_events().await[0].version.as_deref(), Some("1.0"));

        let location = ObjectLocation::parse(&version.location).unwrap();
        let bytes = f.storage.get_object(&location, u64::MAX).await.unwrap();
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes.to_vec())).unwrap();
        let mut names: Vec<String> = archive.file_names().map(String::from).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "data/raw/a.txt",
                "default_essential.schema.json",
                "openMINDS_dataset.schema.json"
            ]
        );

        let mut body = String::new();
        archive
            .by_name("default_essential.schema.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert!(body.contains("\n    \"title\""));
    }

    #[tokio::test]
    async fn test_second_request_rejected_while_in_progress() {
        let f = fixture().await;
        f.publisher.create_job("dataset-1").await.unwrap();
        let err = f.publisher.create_job("dataset-1").await.unwrap_err();
        assert!(matches!(err, DatasetError::AlreadyPublishing(_)));

        f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap();
        assert!(f.publisher.create_job("dataset-1").await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_conflict_sets_failed_state() {
        let f = fixture().await;
        f.locks.refuse("ds1/data/raw/a.txt").await;
        f.publisher.create_job("dataset-1").await.unwrap();

        let err = f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap_err();
        assert!(matches!(err, DatasetError::LockConflict { .. }));

        let state = f.publisher.status("dataset-1").await.unwrap();
        assert_eq!(state.status, PublishStatus::Failed);
        assert!(state.error_msg.starts_with("Error publishing dataset-1:"));
        assert!(f.locks.held_keys().await.is_empty());
        assert!(f.versions.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_version_and_bad_input() {
        let f = fixture().await;
        f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap();

        let err = f
            .publisher
            .check_version("dataset-1", &request("1.0"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasetError::DuplicateVersion { .. }));

        let err = f
            .publisher
            .check_version("dataset-1", &request("v2"))
            .await
            .unwrap_err();
        assert!(matches!(err, DatasetError::BadRequest(_)));
        assert!(f.publisher.check_version("dataset-1", &request("1.1")).await.is_ok());
    }

    #[tokio::test]
    async fn test_status_unknown_dataset_is_not_found() {
        let f = fixture().await;
        let err = f.publisher.status("nope").await.unwrap_err();
        assert!(matches!(err, DatasetError::NotFound(_)));
    }

    #[test]
    fn test_scratch_path_stays_below_root() {
        let root = Path::new("/tmp/publish/content");
        assert_eq!(
            scratch_path(root, "data/raw/a.txt").unwrap(),
            root.join("data/raw/a.txt")
        );
        for bad in ["", "../a.txt", "data/../../a.txt", "/etc/passwd", "./a.txt"] {
            assert!(
                matches!(scratch_path(root, bad), Err(DatasetError::BadRequest(_))),
                "{bad:?} accepted"
            );
        }
    }

    #[tokio::test]
    async fn test_object_key_leaving_scratch_fails_publish() {
        let f = fixture().await;
        let mut escaping = dataset_file("d3", "escape.txt", None, 1);
        escaping.storage = Some(Storage {
            location_uri: "minio://http://minio.minio:9000/ds1/data/../../../escape.txt".to_string(),
        });
        f.registry.insert(escaping).await;
        f.publisher.create_job("dataset-1").await.unwrap();

        let err = f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap_err();
        assert!(matches!(err, DatasetError::BadRequest(_)));

        let state = f.publisher.status("dataset-1").await.unwrap();
        assert_eq!(state.status, PublishStatus::Failed);
        assert!(f.locks.held_keys().await.is_empty());
        assert!(f.versions.all().await.is_empty());
    }

    #[tokio::test]
    async fn test_schema_name_leaving_scratch_fails_publish() {
        let f = fixture().await;
        f.schemas
            .insert(SchemaDocument {
                name: "../../escape.schema.json".to_string(),
                dataset_id: "dataset-1".to_string(),
                standard: "default".to_string(),
                is_draft: false,
                content: serde_json::json!({}),
            })
            .await;

        let err = f.publisher.publish(&f.dataset, &request("1.0")).await.unwrap_err();
        assert!(matches!(err, DatasetError::BadRequest(_)));
        assert_eq!(
            f.publisher.status("dataset-1").await.unwrap().status,
            PublishStatus::Failed
        );
    }
}
