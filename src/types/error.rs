//! Error types for dataset operations
//!
//! Every failure surfaced by the lock coordinator, the mutation workers and the
//! publisher is one of these variants. Upstream HTTP failures keep the status
//! and body returned by the collaborator so a caller can tell a held lock apart
//! from a broken lock service.

use hyper::StatusCode;
use serde::Serialize;
use serde_json::Value;

/// Discriminant of a [`DatasetError`], stable across message changes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    LockConflict,
    LockService,
    Registry,
    ObjectStore,
    AlreadyPublishing,
    DuplicateVersion,
    AlreadyExists,
    NotFound,
    BadRequest,
    Forbidden,
    Transport,
    StatusStore,
    Broker,
    Database,
    Config,
    Internal,
}

/// Main error type for dataset operations
#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("Resource {resource_key} already in use ({status}): {body}")]
    LockConflict {
        resource_key: String,
        status: u16,
        body: Value,
    },

    #[error("Lock service error ({status}): {body}")]
    LockService { status: u16, body: Value },

    #[error("Metadata registry error ({status}): {body}")]
    Registry { status: u16, body: Value },

    #[error("Object store error: {0}")]
    ObjectStore(String),

    #[error("Dataset {0} is already being published")]
    AlreadyPublishing(String),

    #[error("Version {version} already exists for dataset {dataset_id}")]
    DuplicateVersion { dataset_id: String, version: String },

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Status store error: {0}")]
    StatusStore(String),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl DatasetError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::LockConflict { .. } => ErrorKind::LockConflict,
            Self::LockService { .. } => ErrorKind::LockService,
            Self::Registry { .. } => ErrorKind::Registry,
            Self::ObjectStore(_) => ErrorKind::ObjectStore,
            Self::AlreadyPublishing(_) => ErrorKind::AlreadyPublishing,
            Self::DuplicateVersion { .. } => ErrorKind::DuplicateVersion,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::BadRequest(_) => ErrorKind::BadRequest,
            Self::Forbidden(_) => ErrorKind::Forbidden,
            Self::Transport(_) => ErrorKind::Transport,
            Self::StatusStore(_) => ErrorKind::StatusStore,
            Self::Broker(_) => ErrorKind::Broker,
            Self::Database(_) => ErrorKind::Database,
            Self::Config(_) => ErrorKind::Config,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Convert error to HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self.kind() {
            ErrorKind::LockConflict
            | ErrorKind::AlreadyPublishing
            | ErrorKind::DuplicateVersion
            | ErrorKind::AlreadyExists => StatusCode::CONFLICT,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ErrorKind::Forbidden => StatusCode::FORBIDDEN,
            ErrorKind::LockService
            | ErrorKind::Registry
            | ErrorKind::ObjectStore
            | ErrorKind::Transport => StatusCode::BAD_GATEWAY,
            ErrorKind::StatusStore | ErrorKind::Broker | ErrorKind::Database => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ErrorKind::Config | ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Convert to status code and body tuple for HTTP response
    pub fn into_status_code_and_body(self) -> (StatusCode, String) {
        let status = self.status_code();
        let body = self.to_string();
        (status, body)
    }

    /// Upstream status carried by lock and registry failures
    pub fn upstream_status(&self) -> Option<u16> {
        match self {
            Self::LockConflict { status, .. }
            | Self::LockService { status, .. }
            | Self::Registry { status, .. } => Some(*status),
            _ => None,
        }
    }
}

// Implement From conversions for common error types

impl From<std::io::Error> for DatasetError {
    fn from(err: std::io::Error) -> Self {
        Self::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for DatasetError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", err))
    }
}

impl From<hyper::Error> for DatasetError {
    fn from(err: hyper::Error) -> Self {
        Self::Internal(format!("HTTP error: {}", err))
    }
}

impl From<reqwest::Error> for DatasetError {
    fn from(err: reqwest::Error) -> Self {
        Self::Transport(err.to_string())
    }
}

impl From<rmp_serde::encode::Error> for DatasetError {
    fn from(err: rmp_serde::encode::Error) -> Self {
        Self::Broker(format!("Event encoding failed: {}", err))
    }
}

impl From<mongodb::error::Error> for DatasetError {
    fn from(err: mongodb::error::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<bson::ser::Error> for DatasetError {
    fn from(err: bson::ser::Error) -> Self {
        Self::Database(format!("BSON encoding failed: {}", err))
    }
}

impl From<redis::RedisError> for DatasetError {
    fn from(err: redis::RedisError) -> Self {
        Self::StatusStore(err.to_string())
    }
}

impl From<object_store::Error> for DatasetError {
    fn from(err: object_store::Error) -> Self {
        Self::ObjectStore(err.to_string())
    }
}

impl From<zip::result::ZipError> for DatasetError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Internal(format!("Archive error: {}", err))
    }
}

impl From<tokio::task::JoinError> for DatasetError {
    fn from(err: tokio::task::JoinError) -> Self {
        Self::Internal(format!("Background task failed: {}", err))
    }
}

/// Result type alias for dataset operations
pub type Result<T> = std::result::Result<T, DatasetError>;
