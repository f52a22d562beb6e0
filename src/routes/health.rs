//! Liveness check

use bytes::Bytes;
use http_body_util::Full;
use hyper::{Response, StatusCode};
use serde::Serialize;
use std::sync::Arc;

use super::json_response;
use crate::server::AppState;

#[derive(Serialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: &'static str,
    /// Seconds since the server started
    pub uptime: u64,
    pub timestamp: String,
    /// `development` or `production`
    pub mode: &'static str,
    /// Workers and publishes still running
    pub background_tasks: usize,
}

pub async fn health_check(state: Arc<AppState>) -> Response<Full<Bytes>> {
    let response = HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION"),
        uptime: state.started.elapsed().as_secs(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        mode: if state.dev_mode {
            "development"
        } else {
            "production"
        },
        background_tasks: state.operations.background().len().await,
    };
    json_response(StatusCode::OK, &response)
}
