//! HTTP server implementation
//!
//! Uses hyper http1 with TokioIo, one task per connection. Routing matches on
//! method and path segments.

use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

use crate::operations::FileOperations;
use crate::routes::{self, to_boxed, BoxBody};
use crate::types::Result;

/// Shared application state
pub struct AppState {
    pub operations: FileOperations,
    pub dev_mode: bool,
    pub started: Instant,
}

impl AppState {
    pub fn new(operations: FileOperations, dev_mode: bool) -> Self {
        Self {
            operations,
            dev_mode,
            started: Instant::now(),
        }
    }
}

/// Bind `listen` and serve until `shutdown` resolves
pub async fn run<F>(listen: SocketAddr, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(listen).await?;
    info!("dataset-ops listening on {}", listener.local_addr()?);
    serve(listener, state, shutdown).await
}

/// Accept connections on `listener` until `shutdown` resolves
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, no longer accepting connections");
                return Ok(());
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let state = Arc::clone(&state);
                    tokio::spawn(async move {
                        let io = TokioIo::new(stream);
                        let service = service_fn(move |req| {
                            let state = Arc::clone(&state);
                            async move { handle_request(state, addr, req).await }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            error!("Error serving connection from {}: {:?}", addr, err);
                        }
                    });
                }
                Err(e) => {
                    error!("Error accepting connection: {:?}", e);
                }
            }
        }
    }
}

/// Route incoming HTTP requests
async fn handle_request(
    state: Arc<AppState>,
    addr: SocketAddr,
    req: Request<Incoming>,
) -> std::result::Result<Response<BoxBody>, Infallible> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    debug!("[{}] {} {}", addr, method, path);

    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    let response = match (&method, segments.as_slice()) {
        (&Method::GET, ["v1", "dataset", id, "files", file_id, "preview", "stream"]) => {
            routes::handle_preview_stream(state, id, file_id).await
        }
        _ => to_boxed(route_buffered(req, state, &method, &segments, &path).await),
    };

    info!(
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    Ok(response)
}

/// Routes answered with a buffered JSON body
async fn route_buffered(
    req: Request<Incoming>,
    state: Arc<AppState>,
    method: &Method,
    segments: &[&str],
    path: &str,
) -> Response<Full<Bytes>> {
    match (method, segments) {
        (&Method::GET, ["health"]) | (&Method::GET, ["healthz"]) => {
            routes::health_check(state).await
        }

        // ====================================================================
        // File operations
        // ====================================================================
        (&Method::PUT, ["v1", "dataset", id, "files"]) => {
            routes::handle_import_files(req, state, id).await
        }
        (&Method::DELETE, ["v1", "dataset", id, "files"]) => {
            routes::handle_delete_files(req, state, id).await
        }
        (&Method::POST, ["v1", "dataset", id, "files"]) => {
            routes::handle_move_files(req, state, id).await
        }
        (&Method::POST, ["v1", "dataset", id, "files", file_id]) => {
            routes::handle_rename_file(req, state, id, file_id).await
        }
        (&Method::GET, ["v1", "dataset", id, "files"]) => {
            routes::handle_list_files(req, state, id).await
        }
        (&Method::POST, ["v1", "dataset", id, "folder"]) => {
            routes::handle_create_folder(req, state, id).await
        }
        (&Method::GET, ["v1", "dataset", id, "files", file_id, "preview"]) => {
            routes::handle_preview_file(state, id, file_id).await
        }

        // ====================================================================
        // Versions
        // ====================================================================
        (&Method::GET, ["v1", "dataset", "versions"]) => {
            routes::handle_list_versions(req, state).await
        }
        (&Method::GET, ["v1", "dataset", id, "download", "pre"]) => {
            routes::handle_download_url(req, state, id).await
        }
        (&Method::POST, ["v1", "dataset", id, "publish"]) => {
            routes::handle_publish(req, state, id).await
        }
        (&Method::GET, ["v1", "dataset", id, "publish", "status"]) => {
            routes::handle_publish_status(state, id).await
        }

        _ => routes::json_response(
            StatusCode::NOT_FOUND,
            &serde_json::json!({ "error": "Not Found", "path": path }),
        ),
    }
}
