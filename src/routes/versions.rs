//! Version publishing endpoints

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::{Request, Response};
use std::sync::Arc;

use super::{read_json, read_query, respond};
use crate::models::{DownloadQuery, VersionCreate, VersionQuery};
use crate::server::AppState;

/// POST /v1/dataset/{id}/publish
pub async fn handle_publish(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    respond(
        async {
            let body: VersionCreate = read_json(req).await?;
            state.operations.publish_version(dataset_id, body).await
        }
        .await,
    )
}

/// GET /v1/dataset/{id}/publish/status
pub async fn handle_publish_status(state: Arc<AppState>, dataset_id: &str) -> Response<Full<Bytes>> {
    respond(state.operations.publish_status(dataset_id).await)
}

/// GET /v1/dataset/versions?dataset_id=&page=&page_size=&sort_order=
pub async fn handle_list_versions<B>(req: Request<B>, state: Arc<AppState>) -> Response<Full<Bytes>> {
    respond(
        async {
            let query: VersionQuery = read_query(&req)?;
            state.operations.list_versions(&query).await
        }
        .await,
    )
}

/// GET /v1/dataset/{id}/download/pre?version=
pub async fn handle_download_url<B>(
    req: Request<B>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    respond(
        async {
            let query: DownloadQuery = read_query(&req)?;
            state
                .operations
                .download_url(dataset_id, query.version.as_deref())
                .await
        }
        .await,
    )
}
