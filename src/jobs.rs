//! Job status tracker
//!
//! Every input item of a batch gets a job id `<action>-<source_id>-<unix_ts>`
//! and a WAITING record; workers then post RUNNING and SUCCEED or FAILED.
//! Records carry the source id recovered from the job id, so the task stream
//! can be queried by item.

use chrono::Utc;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tracing::{debug, error};

use crate::models::{
    ActionType, JobBatch, JobStatus, JobStatusRecord, Node, DEFAULT_SESSION_ID,
};
use crate::services::TaskStream;
use crate::types::Result;

const ALL_ACTIONS: [ActionType; 7] = [
    ActionType::DataUpload,
    ActionType::DataDownload,
    ActionType::DataTransfer,
    ActionType::DataDelete,
    ActionType::DataImport,
    ActionType::DataRename,
    ActionType::DataValidate,
];

fn timestamp_suffix() -> &'static Regex {
    static SUFFIX: OnceLock<Regex> = OnceLock::new();
    SUFFIX.get_or_init(|| Regex::new(r"-\d{10}$").expect("static regex"))
}

/// Job id of one item, `<action>-<source_id>-<unix_ts>`
pub fn make_job_id(action: ActionType, source_id: &str, unix_ts: i64) -> String {
    format!("{}-{}-{}", action, source_id, unix_ts)
}

/// Recover the source id from a job id.
///
/// Strips one leading `<action>-` and exactly one trailing ten-digit
/// timestamp group.
pub fn extract_source_id(job_id: &str) -> String {
    let without_action = ALL_ACTIONS
        .iter()
        .find_map(|a| job_id.strip_prefix(a.as_str()).and_then(|s| s.strip_prefix('-')))
        .unwrap_or(job_id);
    timestamp_suffix().replace(without_action, "").into_owned()
}

/// Reports per-item progress to the task stream
#[derive(Clone)]
pub struct JobTracker {
    stream: Arc<dyn TaskStream>,
}

impl JobTracker {
    pub fn new(stream: Arc<dyn TaskStream>) -> Self {
        Self { stream }
    }

    /// Create one job per item and post its WAITING record
    pub async fn initialize_file_jobs(
        &self,
        session_id: Option<&str>,
        action: ActionType,
        items: &[Node],
        container_code: &str,
    ) -> Result<JobBatch> {
        let session_id = session_id
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_SESSION_ID)
            .to_string();
        let now = Utc::now().timestamp();

        let mut job_ids = HashMap::with_capacity(items.len());
        for item in items {
            let job_id = make_job_id(action, &item.id, now);
            self.stream
                .write_status(&record(&session_id, item, action, JobStatus::Waiting, container_code, &item.id))
                .await?;
            job_ids.insert(item.id.clone(), job_id);
        }

        debug!(session_id = %session_id, action = %action, count = items.len(), "Jobs initialized");
        Ok(JobBatch {
            session_id,
            action,
            job_ids,
        })
    }

    /// Post a status transition for one item
    pub async fn update_job_status(
        &self,
        session_id: &str,
        item: &Node,
        action: ActionType,
        status: JobStatus,
        container_code: &str,
        job_id: &str,
    ) -> Result<()> {
        let source_id = extract_source_id(job_id);
        debug!(job_id, status = %status, "Job status update");
        self.stream
            .write_status(&record(session_id, item, action, status, container_code, &source_id))
            .await
    }

    /// Transition an item of `batch`, if it belongs to it
    pub async fn transition(&self, batch: &JobBatch, item: &Node, status: JobStatus, container_code: &str) -> Result<()> {
        match batch.job_id(&item.id) {
            Some(job_id) => {
                self.update_job_status(&batch.session_id, item, batch.action, status, container_code, job_id)
                    .await
            }
            None => Ok(()),
        }
    }

    /// Mark every item FAILED, logging write failures instead of returning them
    pub async fn fail_all(&self, batch: &JobBatch, items: &[Node], container_code: &str) {
        for item in items {
            if let Err(e) = self.transition(batch, item, JobStatus::Failed, container_code).await {
                error!(item_id = %item.id, error = %e, "Failed to record FAILED status");
            }
        }
    }
}

fn record(
    session_id: &str,
    item: &Node,
    action: ActionType,
    status: JobStatus,
    container_code: &str,
    source_id: &str,
) -> JobStatusRecord {
    JobStatusRecord {
        session_id: session_id.to_string(),
        target_names: vec![item.full_path()],
        target_type: item.node_type,
        container_code: container_code.to_string(),
        container_type: "dataset".to_string(),
        action_type: action,
        status,
        job_id: source_id.to_string(),
    }
}
