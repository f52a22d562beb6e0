//! Typed records shared by every component
//!
//! - [`Node`]: a file or folder entry of the metadata registry
//! - [`ObjectLocation`]: bucket and key parsed out of a storage URI
//! - [`LockEntry`]: one acquired resource lock
//! - [`JobStatusRecord`]: progress side-channel record
//! - [`Dataset`], [`Version`], [`SchemaDocument`], [`PublishState`]

pub mod dataset;
pub mod job;
pub mod manifest;
pub mod node;

pub use dataset::{
    Dataset, PublishState, PublishStatus, SchemaDocument, SortOrder, Version, VersionCreate,
    VersionPage, VersionQuery,
};
pub use job::{ActionType, JobBatch, JobStatus, JobStatusRecord, DEFAULT_SESSION_ID};
pub use manifest::{
    DeleteRequest, DownloadQuery, DownloadUrl, FileListQuery, FileListing, FolderCreate,
    ImportRequest, Manifest, MoveRequest, PreviewResponse, PublishResponse, RenameRequest,
    Renames, FEEDBACK_BATCH_DUPLICATE, FEEDBACK_DUPLICATE, FEEDBACK_EXIST, FEEDBACK_UNAUTHORIZED,
};
pub use node::{
    join_path, ContainerType, LockEntry, LockMode, Node, NodeStatus, NodeType, ObjectLocation,
    Storage,
};
