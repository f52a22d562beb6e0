//! Task stream client
//!
//! Job status records are posted to the data-ops task stream. Anything other
//! than `200 OK` is an error.

use reqwest::StatusCode;
use std::time::Duration;
use tokio::sync::RwLock;

use crate::models::{JobStatus, JobStatusRecord};
use crate::services::error_body;
use crate::types::{DatasetError, Result};

#[async_trait::async_trait]
pub trait TaskStream: Send + Sync {
    async fn write_status(&self, record: &JobStatusRecord) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpTaskStream {
    client: reqwest::Client,
    url: String,
}

impl HttpTaskStream {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: format!("{}/v1/task-stream/", base_url.trim_end_matches('/')),
        })
    }
}

#[async_trait::async_trait]
impl TaskStream for HttpTaskStream {
    async fn write_status(&self, record: &JobStatusRecord) -> Result<()> {
        let response = self.client.post(&self.url).json(record).send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = error_body(response).await;
            return Err(DatasetError::StatusStore(format!(
                "task stream returned {}: {}",
                status.as_u16(),
                body
            )));
        }
        Ok(())
    }
}

/// Task stream that keeps every record in memory
#[derive(Default)]
pub struct InMemoryTaskStream {
    records: RwLock<Vec<JobStatusRecord>>,
}

impl InMemoryTaskStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<JobStatusRecord> {
        self.records.read().await.clone()
    }

    /// Status transitions recorded for one source item, in order
    pub async fn history(&self, source_id: &str) -> Vec<JobStatus> {
        self.records
            .read()
            .await
            .iter()
            .filter(|r| r.job_id == source_id)
            .map(|r| r.status)
            .collect()
    }
}

#[async_trait::async_trait]
impl TaskStream for InMemoryTaskStream {
    async fn write_status(&self, record: &JobStatusRecord) -> Result<()> {
        self.records.write().await.push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ActionType, NodeType};
    use crate::types::ErrorKind;
    use serde_json::json;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn record() -> JobStatusRecord {
        JobStatusRecord {
            session_id: "s1".into(),
            target_names: vec!["f/a.txt".into()],
            target_type: NodeType::File,
            container_code: "ds1".into(),
            container_type: "dataset".into(),
            action_type: ActionType::DataImport,
            status: JobStatus::Waiting,
            job_id: "f1".into(),
        }
    }

    #[tokio::test]
    async fn test_posts_record_shape() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/task-stream/"))
            .and(body_json(json!({
                "session_id": "s1",
                "target_names": ["f/a.txt"],
                "target_type": "file",
                "container_code": "ds1",
                "container_type": "dataset",
                "action_type": "data_import",
                "status": "WAITING",
                "job_id": "f1"
            })))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let stream = HttpTaskStream::new(&server.uri(), Duration::from_secs(5)).unwrap();
        stream.write_status(&record()).await.unwrap();
    }

    #[tokio::test]
    async fn test_non_ok_is_status_store_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/task-stream/"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;

        let stream = HttpTaskStream::new(&server.uri(), Duration::from_secs(5)).unwrap();
        let err = stream.write_status(&record()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::StatusStore);
    }
}
