//! HTTP routes for the dataset operations service

pub mod files;
pub mod health;
pub mod versions;

pub use files::{
    handle_create_folder, handle_delete_files, handle_import_files, handle_list_files,
    handle_move_files, handle_preview_file, handle_preview_stream, handle_rename_file,
};
pub use health::health_check;
pub use versions::{
    handle_download_url, handle_list_versions, handle_publish, handle_publish_status,
};

use bytes::Bytes;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::{DatasetError, ErrorKind};

/// Request header carrying the caller's job session
pub const SESSION_HEADER: &str = "Session-ID";

/// Response body shared by buffered and streamed responses
pub type BoxBody = UnsyncBoxBody<Bytes, DatasetError>;

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    kind: ErrorKind,
}

// =============================================================================
// Response Helpers
// =============================================================================

pub fn json_response<T: Serialize>(status: StatusCode, body: &T) -> Response<Full<Bytes>> {
    let json = serde_json::to_string(body).unwrap_or_else(|_| "{}".to_string());
    let mut response = Response::new(Full::new(Bytes::from(json)));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    response
}

pub fn error_response(err: DatasetError) -> Response<Full<Bytes>> {
    let kind = err.kind();
    let (status, error) = err.into_status_code_and_body();
    json_response(status, &ErrorBody { error, kind })
}

/// Box a buffered response so it can be returned next to streamed ones
pub fn to_boxed(response: Response<Full<Bytes>>) -> Response<BoxBody> {
    response.map(|body| body.map_err(|never| match never {}).boxed_unsync())
}

/// JSON response for a handler result
pub fn respond<T: Serialize>(result: crate::types::Result<T>) -> Response<Full<Bytes>> {
    match result {
        Ok(body) => json_response(StatusCode::OK, &body),
        Err(e) => error_response(e),
    }
}

// =============================================================================
// Request Helpers
// =============================================================================

/// Read and parse a JSON request body
pub async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> Result<T, DatasetError> {
    let body = req
        .into_body()
        .collect()
        .await
        .map_err(|e| DatasetError::BadRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes();
    serde_json::from_slice(&body)
        .map_err(|e| DatasetError::BadRequest(format!("Invalid JSON: {}", e)))
}

/// Parse the query string, an absent one meaning every field defaulted
pub fn read_query<T: DeserializeOwned, B>(req: &Request<B>) -> Result<T, DatasetError> {
    serde_urlencoded::from_str(req.uri().query().unwrap_or(""))
        .map_err(|e| DatasetError::BadRequest(format!("Invalid query string: {}", e)))
}

pub fn session_id<B>(req: &Request<B>) -> Option<String> {
    req.headers()
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}
