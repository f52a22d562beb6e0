//! Registry nodes, storage locations and lock entries

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::Settings;
use crate::types::{DatasetError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeType {
    #[default]
    File,
    Folder,
}

impl NodeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::File => "file",
            Self::Folder => "folder",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum NodeStatus {
    Registered,
    #[default]
    Active,
    Archived,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerType {
    #[default]
    Dataset,
    Project,
}

impl ContainerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dataset => "dataset",
            Self::Project => "project",
        }
    }
}

/// Storage block of a file node
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Storage {
    pub location_uri: String,
}

/// A file or folder entry as held by the metadata registry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Node {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: NodeType,
    pub name: String,
    #[serde(default)]
    pub parent: Option<String>,
    #[serde(default)]
    pub parent_path: Option<String>,
    #[serde(default)]
    pub status: NodeStatus,
    pub container_code: String,
    #[serde(default)]
    pub container_type: ContainerType,
    #[serde(default)]
    pub size: u64,
    #[serde(default)]
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub storage: Option<Storage>,
    /// Pre-check verdict, only set on manifest entries
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
}

impl Node {
    pub fn is_file(&self) -> bool {
        self.node_type == NodeType::File
    }

    pub fn is_folder(&self) -> bool {
        self.node_type == NodeType::Folder
    }

    pub fn is_archived(&self) -> bool {
        self.status == NodeStatus::Archived
    }

    /// A user's top-level name folder inside a project tree
    pub fn is_name_folder(&self) -> bool {
        self.is_folder()
            && self.container_type == ContainerType::Project
            && self.parent.is_none()
            && self.name == self.owner
    }

    pub fn storage_location(&self) -> Option<&str> {
        self.storage.as_ref().map(|s| s.location_uri.as_str())
    }

    /// Parsed storage location of a file node
    pub fn object_location(&self) -> Result<ObjectLocation> {
        let uri = self.storage_location().ok_or_else(|| {
            DatasetError::BadRequest(format!("File {} has no storage location", self.id))
        })?;
        ObjectLocation::parse(uri)
    }

    /// Path of this node relative to its container root
    pub fn full_path(&self) -> String {
        join_path(self.parent_path.as_deref(), &self.name)
    }
}

/// Join an optional parent path with a leaf name
pub fn join_path(parent: Option<&str>, name: &str) -> String {
    match parent.filter(|p| !p.is_empty()) {
        Some(p) => format!("{}/{}", p, name),
        None => name.to_string(),
    }
}

/// Bucket and object key of a stored object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ObjectLocation {
    pub bucket: String,
    pub key: String,
}

impl ObjectLocation {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    /// Parse `minio://http://host:port/bucket/key/...`
    ///
    /// Only the part after the last `//` matters: its first segment is the
    /// host, the second the bucket and the remainder the object key.
    pub fn parse(uri: &str) -> Result<Self> {
        let tail = uri.rsplit("//").next().unwrap_or_default();
        let mut parts = tail.splitn(3, '/');
        let _host = parts.next();
        match (parts.next(), parts.next()) {
            (Some(bucket), Some(key)) if !bucket.is_empty() && !key.is_empty() => {
                Ok(Self::new(bucket, key))
            }
            _ => Err(DatasetError::BadRequest(format!(
                "Invalid storage location: {}",
                uri
            ))),
        }
    }

    /// Lockable resource key, `bucket/key`
    pub fn resource_key(&self) -> String {
        format!("{}/{}", self.bucket, self.key)
    }

    pub fn to_uri(&self, settings: &Settings) -> String {
        format!(
            "minio://{}/{}/{}",
            settings.internal_endpoint(),
            self.bucket,
            self.key
        )
    }
}

impl fmt::Display for ObjectLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LockMode {
    Read,
    Write,
}

impl LockMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One lock held by a worker for the duration of an operation
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockEntry {
    pub resource_key: String,
    pub mode: LockMode,
}

impl LockEntry {
    pub fn new(resource_key: impl Into<String>, mode: LockMode) -> Self {
        Self {
            resource_key: resource_key.into(),
            mode,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_location() {
        let loc = ObjectLocation::parse("minio://http://minio.minio:9000/core-proj/admin/a/b.txt")
            .unwrap();
        assert_eq!(loc.bucket, "core-proj");
        assert_eq!(loc.key, "admin/a/b.txt");
        assert_eq!(loc.resource_key(), "core-proj/admin/a/b.txt");
    }

    #[test]
    fn test_parse_location_rejects_short_uri() {
        assert!(ObjectLocation::parse("minio://http://host/bucket").is_err());
        assert!(ObjectLocation::parse("").is_err());
    }

    #[test]
    fn test_location_uri_round() {
        let settings = Settings {
            s3_internal_https: true,
            ..Settings::default()
        };
        let loc = ObjectLocation::new("ds1", "data/x.csv");
        assert_eq!(loc.to_uri(&settings), "minio://https://minio.minio:9000/ds1/data/x.csv");
        assert_eq!(ObjectLocation::parse(&loc.to_uri(&settings)).unwrap(), loc);
    }

    #[test]
    fn test_node_from_registry_json() {
        let node: Node = serde_json::from_value(json!({
            "id": "f1",
            "type": "file",
            "name": "a.txt",
            "parent": null,
            "parent_path": "admin",
            "status": "ACTIVE",
            "container_code": "proj",
            "container_type": "project",
            "size": 12,
            "owner": "admin",
            "storage": {"location_uri": "minio://http://h/core-proj/admin/a.txt"},
            "extended": {"extra": {}}
        }))
        .unwrap();
        assert!(node.is_file());
        assert!(!node.is_name_folder());
        assert_eq!(node.container_type, ContainerType::Project);
        assert_eq!(node.full_path(), "admin/a.txt");
        assert_eq!(node.object_location().unwrap().key, "admin/a.txt");
    }

    #[test]
    fn test_name_folder_is_project_root_named_after_owner() {
        let mut node = Node {
            id: "n".into(),
            node_type: NodeType::Folder,
            name: "admin".into(),
            owner: "admin".into(),
            container_code: "proj".into(),
            container_type: ContainerType::Project,
            ..Node::default()
        };
        assert!(node.is_name_folder());

        node.container_type = ContainerType::Dataset;
        assert!(!node.is_name_folder());
    }

    #[test]
    fn test_join_path() {
        assert_eq!(join_path(None, "a"), "a");
        assert_eq!(join_path(Some(""), "a"), "a");
        assert_eq!(join_path(Some("x/y"), "a"), "x/y/a");
    }
}
