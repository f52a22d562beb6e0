//! File operation endpoints
//!
//! Each mutation answers with the `{processing, ignored}` manifest while the
//! worker carries on in the background.

use bytes::Bytes;
use futures::TryStreamExt;
use http_body_util::{BodyExt, Full, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{HeaderValue, CONTENT_TYPE};
use hyper::{Request, Response};
use std::sync::Arc;

use super::{error_response, read_json, read_query, respond, session_id, to_boxed, BoxBody};
use crate::models::{
    DeleteRequest, FileListQuery, FolderCreate, ImportRequest, MoveRequest, RenameRequest,
};
use crate::server::AppState;

/// PUT /v1/dataset/{id}/files
pub async fn handle_import_files(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    let session = session_id(&req);
    respond(
        async {
            let body: ImportRequest = read_json(req).await?;
            state.operations.import(dataset_id, body, session).await
        }
        .await,
    )
}

/// DELETE /v1/dataset/{id}/files
pub async fn handle_delete_files(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    let session = session_id(&req);
    respond(
        async {
            let body: DeleteRequest = read_json(req).await?;
            state.operations.delete(dataset_id, body, session).await
        }
        .await,
    )
}

/// POST /v1/dataset/{id}/files
pub async fn handle_move_files(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    let session = session_id(&req);
    respond(
        async {
            let body: MoveRequest = read_json(req).await?;
            state.operations.relocate(dataset_id, body, session).await
        }
        .await,
    )
}

/// POST /v1/dataset/{id}/files/{file_id}
pub async fn handle_rename_file(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
    file_id: &str,
) -> Response<Full<Bytes>> {
    let session = session_id(&req);
    respond(
        async {
            let body: RenameRequest = read_json(req).await?;
            state
                .operations
                .rename(dataset_id, file_id, body, session)
                .await
        }
        .await,
    )
}

/// GET /v1/dataset/{id}/files?folder_id=
pub async fn handle_list_files<B>(
    req: Request<B>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    respond(
        async {
            let query: FileListQuery = read_query(&req)?;
            state
                .operations
                .list_files(dataset_id, query.folder_id.as_deref())
                .await
        }
        .await,
    )
}

/// POST /v1/dataset/{id}/folder
pub async fn handle_create_folder(
    req: Request<Incoming>,
    state: Arc<AppState>,
    dataset_id: &str,
) -> Response<Full<Bytes>> {
    respond(
        async {
            let body: FolderCreate = read_json(req).await?;
            state.operations.create_folder(dataset_id, body).await
        }
        .await,
    )
}

/// GET /v1/dataset/{id}/files/{file_id}/preview
pub async fn handle_preview_file(
    state: Arc<AppState>,
    dataset_id: &str,
    file_id: &str,
) -> Response<Full<Bytes>> {
    respond(state.operations.preview(dataset_id, file_id).await)
}

/// GET /v1/dataset/{id}/files/{file_id}/preview/stream
pub async fn handle_preview_stream(
    state: Arc<AppState>,
    dataset_id: &str,
    file_id: &str,
) -> Response<BoxBody> {
    match state.operations.preview_stream(dataset_id, file_id).await {
        Ok((media_type, stream)) => {
            let body = StreamBody::new(stream.map_ok(Frame::data));
            let mut response = Response::new(body.boxed_unsync());
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(media_type));
            response
        }
        Err(e) => to_boxed(error_response(e)),
    }
}
