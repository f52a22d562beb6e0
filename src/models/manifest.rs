//! Request bodies and the processing/ignored manifest

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use super::node::Node;
use crate::types::{DatasetError, Result};

const MAX_FOLDER_NAME_LEN: usize = 20;

fn folder_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r#"^[^\\/:?*<>|"]+$"#).expect("static regex"))
}

pub const FEEDBACK_EXIST: &str = "exist";
pub const FEEDBACK_UNAUTHORIZED: &str = "unauthorized";
pub const FEEDBACK_BATCH_DUPLICATE: &str = "duplicate in same batch, update the name";
pub const FEEDBACK_DUPLICATE: &str = "duplicate or unauthorized";

/// New leaf names keyed by node id, for items the pre-check renamed
pub type Renames = HashMap<String, String>;

/// Result of the pre-check returned to the caller before the worker runs
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Manifest {
    pub processing: Vec<Node>,
    pub ignored: Vec<Node>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImportRequest {
    pub source_list: Vec<String>,
    pub operator: String,
    pub project_geid: String,
    pub project_code: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub source_list: Vec<String>,
    pub operator: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MoveRequest {
    pub source_list: Vec<String>,
    pub operator: String,
    pub target_geid: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RenameRequest {
    pub new_name: String,
    pub operator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishResponse {
    pub status_id: String,
}

/// Leading bytes of a dataset file, normalized for its type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PreviewResponse {
    pub content: String,
    /// File extension the content was normalized for
    #[serde(rename = "type")]
    pub file_type: String,
    /// The file is longer than `content`
    pub is_concatenated: bool,
}

/// Empty folder creation body
#[derive(Debug, Clone, Deserialize)]
pub struct FolderCreate {
    pub folder_name: String,
    pub username: String,
    /// Parent folder id, empty for the dataset root
    #[serde(default)]
    pub parent_folder_geid: String,
}

impl FolderCreate {
    /// Trimmed folder name, refusing path separators and reserved characters
    pub fn validated_name(&self) -> Result<&str> {
        let name = self.folder_name.trim();
        if !folder_name_pattern().is_match(name) || name.chars().count() > MAX_FOLDER_NAME_LEN {
            return Err(DatasetError::BadRequest(format!(
                "Invalid folder name '{}'",
                self.folder_name
            )));
        }
        Ok(name)
    }
}

/// Children of a dataset folder
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileListing {
    pub data: Vec<Node>,
    /// Names of the ancestors of the listed level, root first
    pub route: Vec<String>,
    pub total: usize,
}

/// Query string of `GET /v1/dataset/{id}/files`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FileListQuery {
    #[serde(default)]
    pub folder_id: Option<String>,
}

/// Query string of `GET /v1/dataset/{id}/download/pre`
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DownloadQuery {
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadUrl {
    pub source: String,
}
