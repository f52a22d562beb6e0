//! NATS client wrapper
//!
//! Connection management with credentials, keep-alive pings and fast failure
//! when the server is unreachable at startup.

use async_nats::{Client, ConnectOptions};
use bytes::Bytes;
use std::time::Duration;
use tracing::info;

use crate::config::NatsArgs;
use crate::types::DatasetError;

/// Default ping interval for keep-alive
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(120);

/// NATS client wrapper
#[derive(Clone)]
pub struct NatsClient {
    client: Client,
}

impl NatsClient {
    /// Create a new NATS client
    pub async fn new(args: &NatsArgs, name: &str) -> Result<Self, DatasetError> {
        info!("Connecting to NATS at {}", args.nats_url);

        // No retry_on_initial_connect: dev mode falls back to the in-memory broker
        let mut options = ConnectOptions::new()
            .name(name)
            .ping_interval(DEFAULT_PING_INTERVAL)
            .connection_timeout(Duration::from_secs(5));

        if let (Some(user), Some(pass)) = (&args.nats_user, &args.nats_password) {
            options = options.user_and_password(user.clone(), pass.clone());
        }

        let client = options
            .connect(&args.nats_url)
            .await
            .map_err(|e| DatasetError::Broker(format!("Failed to connect: {}", e)))?;

        info!("Connected to NATS at {}", args.nats_url);

        Ok(Self { client })
    }

    /// Publish a message to a subject and flush it
    pub async fn publish(&self, subject: &str, payload: Bytes) -> Result<(), DatasetError> {
        self.client
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| DatasetError::Broker(format!("Publish failed: {}", e)))?;
        self.client
            .flush()
            .await
            .map_err(|e| DatasetError::Broker(format!("Flush failed: {}", e)))
    }
}
