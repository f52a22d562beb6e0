//! Configuration for the dataset operations service
//!
//! CLI arguments and environment variable handling using clap. The parsed
//! [`Args`] are reduced to an immutable [`Settings`] value that is handed to
//! every component constructor.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Dataset operations - locking, tree mutation and version publishing
#[derive(Parser, Debug, Clone)]
#[command(name = "dataset-ops")]
#[command(about = "Dataset file operations and version publishing service")]
pub struct Args {
    /// Address to listen on
    #[arg(long, env = "LISTEN", default_value = "0.0.0.0:5081")]
    pub listen: SocketAddr,

    /// Enable development mode (in-memory backends when a service is unreachable)
    #[arg(long, env = "DEV_MODE", default_value = "false")]
    pub dev_mode: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Log output format (pretty, json)
    #[arg(long, env = "LOG_FORMAT", default_value = "pretty")]
    pub log_format: String,

    /// Data-ops utility base URL (resource locks, task stream)
    #[arg(long, env = "DATA_OPS_UTIL", default_value = "http://localhost:5063")]
    pub data_ops_util: String,

    /// Metadata service base URL
    #[arg(long, env = "METADATA_SERVICE", default_value = "http://localhost:5066")]
    pub metadata_service: String,

    /// Request timeout in milliseconds for outbound HTTP calls
    #[arg(long, env = "REQUEST_TIMEOUT_MS", default_value = "30000")]
    pub request_timeout_ms: u64,

    /// Object storage configuration
    #[command(flatten)]
    pub s3: S3Args,

    /// Redis URL for publish status
    #[arg(long, env = "REDIS_URL", default_value = "redis://127.0.0.1:6379/0")]
    pub redis_url: String,

    /// NATS configuration
    #[command(flatten)]
    pub nats: NatsArgs,

    /// MongoDB connection URI
    #[arg(long, env = "MONGODB_URI", default_value = "mongodb://localhost:27017")]
    pub mongodb_uri: String,

    /// MongoDB database name
    #[arg(long, env = "MONGODB_DB", default_value = "dataset")]
    pub mongodb_db: String,

    /// Object prefix for dataset files inside the dataset bucket
    #[arg(long, env = "DATASET_FILE_FOLDER", default_value = "data")]
    pub dataset_file_folder: String,

    /// Bucket prefix of project containers (import sources)
    #[arg(long, env = "PROJECT_BUCKET_PREFIX", default_value = "core-")]
    pub project_bucket_prefix: String,

    /// Scratch directory for version archives (defaults to the system temp dir)
    #[arg(long, env = "SCRATCH_DIR")]
    pub scratch_dir: Option<PathBuf>,

    /// Maximum bytes returned by a file preview
    #[arg(long, env = "MAX_PREVIEW_SIZE", default_value = "500000")]
    pub max_preview_size: u64,

    /// TTL of the publish status key in seconds
    #[arg(long, env = "PUBLISH_STATUS_TTL_SECS", default_value = "3600")]
    pub publish_status_ttl_secs: u64,

    /// Lifetime of version download urls in seconds
    #[arg(long, env = "DOWNLOAD_URL_EXPIRY_SECS", default_value = "3600")]
    pub download_url_expiry_secs: u64,
}

/// Object storage arguments
#[derive(Parser, Debug, Clone)]
pub struct S3Args {
    /// Object store host
    #[arg(long, env = "S3_HOST", default_value = "127.0.0.1")]
    pub s3_host: String,

    /// Object store port
    #[arg(long, env = "S3_PORT", default_value = "9100")]
    pub s3_port: u16,

    /// Use https for the object store endpoint
    #[arg(long, env = "S3_HTTPS_ENABLED", default_value = "false")]
    pub s3_https_enabled: bool,

    /// Access key
    #[arg(long, env = "S3_ACCESS_KEY")]
    pub s3_access_key: Option<String>,

    /// Secret key
    #[arg(long, env = "S3_SECRET_KEY")]
    pub s3_secret_key: Option<String>,

    /// Region
    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    /// Host embedded into minio:// location URIs
    #[arg(long, env = "S3_INTERNAL", default_value = "minio.minio:9000")]
    pub s3_internal: String,

    /// Whether location URIs use https
    #[arg(long, env = "S3_INTERNAL_HTTPS", default_value = "false")]
    pub s3_internal_https: bool,
}

/// NATS connection arguments
#[derive(Parser, Debug, Clone)]
pub struct NatsArgs {
    /// NATS server URL
    #[arg(long, env = "NATS_URL", default_value = "nats://127.0.0.1:4222")]
    pub nats_url: String,

    /// NATS username (optional)
    #[arg(long, env = "NATS_USER")]
    pub nats_user: Option<String>,

    /// NATS password (optional)
    #[arg(long, env = "NATS_PASSWORD")]
    pub nats_password: Option<String>,
}

impl S3Args {
    /// Endpoint URL used by the object store client
    pub fn endpoint(&self) -> String {
        let scheme = if self.s3_https_enabled { "https" } else { "http" };
        format!("{}://{}:{}", scheme, self.s3_host, self.s3_port)
    }
}

impl Args {
    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.dataset_file_folder.trim_matches('/').is_empty() {
            return Err("DATASET_FILE_FOLDER must not be empty".to_string());
        }

        if self.request_timeout_ms == 0 {
            return Err("REQUEST_TIMEOUT_MS must be greater than zero".to_string());
        }

        if self.publish_status_ttl_secs == 0 {
            return Err("PUBLISH_STATUS_TTL_SECS must be greater than zero".to_string());
        }

        if self.download_url_expiry_secs == 0 {
            return Err("DOWNLOAD_URL_EXPIRY_SECS must be greater than zero".to_string());
        }

        if !matches!(self.log_format.as_str(), "pretty" | "json") {
            return Err(format!("Unknown LOG_FORMAT '{}'", self.log_format));
        }

        if !self.dev_mode && (self.s3.s3_access_key.is_none() || self.s3.s3_secret_key.is_none()) {
            return Err("S3_ACCESS_KEY and S3_SECRET_KEY are required in production mode".to_string());
        }

        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Derive the settings value shared by all components
    pub fn settings(&self) -> Settings {
        Settings {
            file_folder: self.dataset_file_folder.trim_matches('/').to_string(),
            project_bucket_prefix: self.project_bucket_prefix.clone(),
            s3_internal: self.s3.s3_internal.clone(),
            s3_internal_https: self.s3.s3_internal_https,
            scratch_dir: self.scratch_dir.clone().unwrap_or_else(std::env::temp_dir),
            max_preview_size: self.max_preview_size,
            publish_status_ttl: Duration::from_secs(self.publish_status_ttl_secs),
            download_url_expiry: Duration::from_secs(self.download_url_expiry_secs),
        }
    }
}

/// Naming conventions and limits injected into each component
#[derive(Debug, Clone)]
pub struct Settings {
    /// Object prefix of dataset files (`data`)
    pub file_folder: String,
    /// Bucket prefix of project containers (`core-`)
    pub project_bucket_prefix: String,
    /// Host written into location URIs
    pub s3_internal: String,
    pub s3_internal_https: bool,
    /// Root for publish scratch directories
    pub scratch_dir: PathBuf,
    pub max_preview_size: u64,
    pub publish_status_ttl: Duration,
    pub download_url_expiry: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            file_folder: "data".to_string(),
            project_bucket_prefix: "core-".to_string(),
            s3_internal: "minio.minio:9000".to_string(),
            s3_internal_https: false,
            scratch_dir: std::env::temp_dir(),
            max_preview_size: 500_000,
            publish_status_ttl: Duration::from_secs(3600),
            download_url_expiry: Duration::from_secs(3600),
        }
    }
}

impl Settings {
    /// `http://host` or `https://host` prefix of location URIs
    pub fn internal_endpoint(&self) -> String {
        let scheme = if self.s3_internal_https { "https" } else { "http" };
        format!("{}://{}", scheme, self.s3_internal)
    }

    /// Bucket holding a project's files
    pub fn project_bucket(&self, project_code: &str) -> String {
        format!("{}{}", self.project_bucket_prefix, project_code)
    }
}
