//! Dataset, version and schema records

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use crate::types::{DatasetError, Result};

/// Maximum length of version notes
const MAX_NOTES_LEN: usize = 250;

fn version_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^\d+\.\d+$").expect("static regex"))
}

/// Dataset with its aggregate counters
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: String,
    pub code: String,
    #[serde(default)]
    pub creator: String,
    #[serde(default)]
    pub total_files: i64,
    #[serde(default)]
    pub size: i64,
    /// Project the dataset imports from, fixed on first import
    #[serde(default)]
    pub project_id: Option<String>,
}

/// Immutable published snapshot of a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Version {
    pub id: String,
    pub dataset_id: String,
    pub dataset_code: String,
    pub version: String,
    pub created_by: String,
    pub location: String,
    pub notes: String,
    pub created_at: DateTime<Utc>,
}

/// Order of a version listing by creation time
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

fn default_page_size() -> u64 {
    20
}

/// Query string of `GET /v1/dataset/versions`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionQuery {
    #[serde(default)]
    pub dataset_id: Option<String>,
    /// Zero-based page number
    #[serde(default)]
    pub page: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u64,
    #[serde(default)]
    pub sort_order: SortOrder,
}

impl Default for VersionQuery {
    fn default() -> Self {
        Self {
            dataset_id: None,
            page: 0,
            page_size: default_page_size(),
            sort_order: SortOrder::default(),
        }
    }
}

impl VersionQuery {
    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(DatasetError::BadRequest("page_size must be greater than zero".into()));
        }
        Ok(())
    }
}

/// One page of versions
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionPage {
    pub num_of_pages: u64,
    pub page: u64,
    pub total: u64,
    pub result: Vec<Version>,
}

impl VersionPage {
    pub fn new(query: &VersionQuery, total: u64, result: Vec<Version>) -> Self {
        Self {
            num_of_pages: total.div_ceil(query.page_size),
            page: query.page,
            total,
            result,
        }
    }
}

/// Publish request body
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionCreate {
    pub operator: String,
    #[serde(default)]
    pub notes: String,
    pub version: String,
}

impl VersionCreate {
    pub fn validate(&self) -> Result<()> {
        if self.operator.trim().is_empty() {
            return Err(DatasetError::BadRequest("operator is required".into()));
        }
        if self.notes.chars().count() > MAX_NOTES_LEN {
            return Err(DatasetError::BadRequest(format!(
                "notes must be at most {} characters",
                MAX_NOTES_LEN
            )));
        }
        if !version_pattern().is_match(&self.version) {
            return Err(DatasetError::BadRequest(format!(
                "Invalid version number '{}', expected <major>.<minor>",
                self.version
            )));
        }
        Ok(())
    }
}

/// Schema document attached to a dataset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaDocument {
    pub name: String,
    pub dataset_id: String,
    /// `default` or `open_minds`
    pub standard: String,
    #[serde(default)]
    pub is_draft: bool,
    #[serde(default)]
    pub content: serde_json::Value,
}

impl SchemaDocument {
    /// File name inside a version archive, `None` for unexported standards
    pub fn export_file_name(&self) -> Option<String> {
        match self.standard.as_str() {
            "default" => Some(format!("default_{}", self.name)),
            "open_minds" => Some(format!("openMINDS_{}", self.name)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishStatus {
    Inprogress,
    Success,
    Failed,
}

/// Value of the per-dataset publish status key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PublishState {
    pub status: PublishStatus,
    #[serde(default)]
    pub error_msg: String,
}

impl PublishState {
    pub fn in_progress() -> Self {
        Self {
            status: PublishStatus::Inprogress,
            error_msg: String::new(),
        }
    }

    pub fn success() -> Self {
        Self {
            status: PublishStatus::Success,
            error_msg: String::new(),
        }
    }

    pub fn failed(error_msg: impl Into<String>) -> Self {
        Self {
            status: PublishStatus::Failed,
            error_msg: error_msg.into(),
        }
    }
}
