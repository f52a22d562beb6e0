//! External collaborators
//!
//! Each collaborator sits behind an `async_trait` seam with a network
//! implementation and an in-memory one for dev mode and tests:
//!
//! - **LockService**: distributed resource locks (read/write)
//! - **MetadataRegistry**: file/folder entries of datasets and projects
//! - **ObjectStorage**: object bytes (copy, delete, range reads, transfer)
//! - **TaskStream**: per-item job status records
//! - **PublishStateStore**: per-dataset publish status with TTL
//! - **EventBroker** + **ActivityLog**: validated, encoded activity events

pub mod activity_log;
pub mod lock_client;
pub mod metadata;
pub mod object_storage;
pub mod publish_state;
pub mod task_stream;

pub use activity_log::{
    ActivityLog, DatasetActivity, EventBroker, InMemoryBroker, ItemActivity, NatsBroker,
    PropertyChange, DATASET_ACTIVITY_TOPIC, ITEM_ACTIVITY_TOPIC,
};
pub use lock_client::{HttpLockClient, InMemoryLockService, LockCall, LockService};
pub use metadata::{
    HttpMetadataClient, InMemoryRegistry, ItemQuery, ItemUpdate, MetadataRegistry, NewItem,
};
pub use object_storage::{ObjectStorage, ObjectStoreBackend};
pub use publish_state::{InMemoryPublishStore, PublishStateStore, RedisPublishStore};
pub use task_stream::{HttpTaskStream, InMemoryTaskStream, TaskStream};

use serde_json::Value;

/// Read an upstream error body, keeping it as JSON when possible
pub(crate) async fn error_body(response: reqwest::Response) -> Value {
    let text = response.text().await.unwrap_or_default();
    serde_json::from_str(&text).unwrap_or(Value::String(text))
}
