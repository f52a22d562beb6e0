//! dataset-ops - dataset file operations and version publishing

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use dataset_ops::{
    config::Args,
    db::{
        DatasetStore, InMemoryDatasetStore, InMemorySchemaStore, InMemoryVersionStore,
        MongoClient, MongoDatasetStore, MongoSchemaStore, MongoVersionStore, SchemaStore,
        VersionStore,
    },
    nats::NatsClient,
    server,
    services::{
        EventBroker, HttpLockClient, HttpMetadataClient, HttpTaskStream, InMemoryBroker,
        InMemoryPublishStore, NatsBroker, ObjectStoreBackend, PublishStateStore,
        RedisPublishStore,
    },
    AppState, Backends, FileOperations,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    // Initialize tracing/logging
    let json_logs = args.log_format == "json";
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("dataset_ops={},info", args.log_level).into()),
        )
        .with(json_logs.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!json_logs).then(|| tracing_subscriber::fmt::layer()))
        .init();

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    info!("======================================");
    info!("  dataset-ops");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Mode: {}", if args.dev_mode { "DEVELOPMENT" } else { "PRODUCTION" });
    info!("Data-ops utility: {}", args.data_ops_util);
    info!("Metadata service: {}", args.metadata_service);
    info!("Object store: {}", args.s3.endpoint());
    info!("Redis: {}", args.redis_url);
    info!("NATS: {}", args.nats.nats_url);
    info!("MongoDB: {}", args.mongodb_uri);
    info!("======================================");

    let timeout = args.request_timeout();
    let locks = Arc::new(HttpLockClient::new(&args.data_ops_util, timeout)?);
    let registry = Arc::new(HttpMetadataClient::new(&args.metadata_service, timeout)?);
    let task_stream = Arc::new(HttpTaskStream::new(&args.data_ops_util, timeout)?);

    let storage = if args.dev_mode && args.s3.s3_access_key.is_none() {
        warn!("No object store credentials (dev mode, using in-memory object store)");
        Arc::new(ObjectStoreBackend::in_memory())
    } else {
        Arc::new(ObjectStoreBackend::s3(&args.s3))
    };

    // Publish status KV (optional in dev mode)
    let publish_states: Arc<dyn PublishStateStore> =
        match RedisPublishStore::connect(&args.redis_url).await {
            Ok(store) => {
                info!("Redis connected successfully");
                Arc::new(store)
            }
            Err(e) => {
                if args.dev_mode {
                    warn!("Redis connection failed (dev mode, using in-memory status): {}", e);
                    Arc::new(InMemoryPublishStore::new())
                } else {
                    error!("Redis connection failed: {}", e);
                    std::process::exit(1);
                }
            }
        };

    // Activity broker (optional in dev mode)
    let broker: Arc<dyn EventBroker> = match NatsClient::new(&args.nats, "dataset-ops").await {
        Ok(client) => {
            info!("NATS connected successfully");
            Arc::new(NatsBroker::new(client))
        }
        Err(e) => {
            if args.dev_mode {
                warn!("NATS connection failed (dev mode, events stay in memory): {}", e);
                Arc::new(InMemoryBroker::new())
            } else {
                error!("NATS connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    // Dataset, version and schema stores (optional in dev mode)
    let (datasets, versions, schemas): (
        Arc<dyn DatasetStore>,
        Arc<dyn VersionStore>,
        Arc<dyn SchemaStore>,
    ) = match MongoClient::new(&args.mongodb_uri, &args.mongodb_db).await {
        Ok(client) => {
            info!("MongoDB connected successfully");
            (
                Arc::new(MongoDatasetStore::new(&client).await?),
                Arc::new(MongoVersionStore::new(&client).await?),
                Arc::new(MongoSchemaStore::new(&client).await?),
            )
        }
        Err(e) => {
            if args.dev_mode {
                warn!("MongoDB connection failed (dev mode, using in-memory stores): {}", e);
                (
                    Arc::new(InMemoryDatasetStore::new()),
                    Arc::new(InMemoryVersionStore::new()),
                    Arc::new(InMemorySchemaStore::new()),
                )
            } else {
                error!("MongoDB connection failed: {}", e);
                std::process::exit(1);
            }
        }
    };

    let operations = FileOperations::new(
        Backends {
            locks,
            registry,
            storage,
            task_stream,
            publish_states,
            broker,
            datasets,
            versions,
            schemas,
        },
        args.settings(),
    );
    let state = Arc::new(AppState::new(operations, args.dev_mode));

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };
    server::run(args.listen, Arc::clone(&state), shutdown).await?;

    info!(
        "Waiting for {} background task(s) to finish",
        state.operations.background().len().await
    );
    state.operations.background().wait_idle().await;
    info!("Shutdown complete");
    Ok(())
}
