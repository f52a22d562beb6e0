//! Job status records reported to the task stream

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

use super::node::NodeType;

/// Session used when the caller supplies none
pub const DEFAULT_SESSION_ID: &str = "local_test";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    Waiting,
    Running,
    Succeed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::Running => "RUNNING",
            Self::Succeed => "SUCCEED",
            Self::Failed => "FAILED",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    DataUpload,
    DataDownload,
    DataTransfer,
    DataDelete,
    DataImport,
    DataRename,
    DataValidate,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DataUpload => "data_upload",
            Self::DataDownload => "data_download",
            Self::DataTransfer => "data_transfer",
            Self::DataDelete => "data_delete",
            Self::DataImport => "data_import",
            Self::DataRename => "data_rename",
            Self::DataValidate => "data_validate",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One status transition of one item, as posted to the task stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub session_id: String,
    pub target_names: Vec<String>,
    pub target_type: NodeType,
    pub container_code: String,
    pub container_type: String,
    pub action_type: ActionType,
    pub status: JobStatus,
    /// Source id recovered from the synthesized job id
    pub job_id: String,
}

/// Job ids created for one batch, keyed by item id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobBatch {
    pub session_id: String,
    pub action: ActionType,
    #[serde(rename = "job_id")]
    pub job_ids: HashMap<String, String>,
}

impl JobBatch {
    pub fn job_id(&self, item_id: &str) -> Option<&str> {
        self.job_ids.get(item_id).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_names_match_display() {
        for status in [
            JobStatus::Waiting,
            JobStatus::Running,
            JobStatus::Succeed,
            JobStatus::Failed,
        ] {
            let json = serde_json::to_value(status).unwrap();
            assert_eq!(json, status.as_str());
            assert_eq!(serde_json::from_value::<JobStatus>(json).unwrap(), status);
        }
        assert!(serde_json::from_str::<JobStatus>("\"CHUNK_UPLOADED\"").is_err());
    }
}
