//! Object storage adapter
//!
//! Backed by `object_store`: one store per bucket, built lazily and cached.
//! Production uses S3-compatible stores (MinIO, path-style requests); dev mode
//! and tests use `InMemory` stores.

use bytes::Bytes;
use dashmap::DashMap;
use futures::stream::BoxStream;
use futures::StreamExt;
use object_store::aws::{AmazonS3, AmazonS3Builder};
use object_store::buffered::BufWriter;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::signer::Signer;
use object_store::{ObjectStore, PutPayload};
use reqwest::Method;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::config::S3Args;
use crate::models::ObjectLocation;
use crate::types::{DatasetError, Result};

#[async_trait::async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<()>;

    async fn delete_object(&self, location: &ObjectLocation) -> Result<()>;

    /// Object body truncated to at most `limit` bytes
    async fn get_object(&self, location: &ObjectLocation, limit: u64) -> Result<Bytes>;

    /// Stream an object into a local file, creating parent directories
    async fn download(&self, location: &ObjectLocation, dest: &Path) -> Result<()>;

    async fn upload(&self, src: &Path, location: &ObjectLocation) -> Result<()>;

    /// Whole object body as a chunk stream
    async fn read_stream(&self, location: &ObjectLocation) -> Result<BoxStream<'static, Result<Bytes>>>;

    /// Time-limited GET url for a location
    async fn presigned_url(&self, location: &ObjectLocation, expires_in: Duration) -> Result<String>;
}

/// Parse an object key without re-encoding it.
///
/// Keys are taken as stored, so `#`, `%` and brackets keep their meaning;
/// empty, `.` and `..` segments are refused.
fn object_path(location: &ObjectLocation) -> Result<ObjectPath> {
    ObjectPath::parse(&location.key).map_err(|e| {
        DatasetError::ObjectStore(format!("Invalid object key {}: {}", location, e))
    })
}

enum StoreFactory {
    S3 {
        endpoint: String,
        region: String,
        access_key: Option<String>,
        secret_key: Option<String>,
        allow_http: bool,
    },
    InMemory,
}

/// [`ObjectStorage`] over per-bucket `object_store` instances
pub struct ObjectStoreBackend {
    factory: StoreFactory,
    stores: DashMap<String, Arc<dyn ObjectStore>>,
}

impl ObjectStoreBackend {
    /// S3-compatible backend
    pub fn s3(args: &S3Args) -> Self {
        info!("Object storage endpoint {}", args.endpoint());
        Self {
            factory: StoreFactory::S3 {
                endpoint: args.endpoint(),
                region: args.s3_region.clone(),
                access_key: args.s3_access_key.clone(),
                secret_key: args.s3_secret_key.clone(),
                allow_http: !args.s3_https_enabled,
            },
            stores: DashMap::new(),
        }
    }

    /// Backend keeping every bucket in memory
    pub fn in_memory() -> Self {
        Self {
            factory: StoreFactory::InMemory,
            stores: DashMap::new(),
        }
    }

    fn store(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        if let Some(store) = self.stores.get(bucket) {
            return Ok(Arc::clone(store.value()));
        }

        let store: Arc<dyn ObjectStore> = match self.amazon(bucket)? {
            Some(s3) => Arc::new(s3),
            None => Arc::new(InMemory::new()),
        };

        let entry = self.stores.entry(bucket.to_string()).or_insert(store);
        Ok(Arc::clone(entry.value()))
    }

    /// Concrete S3 client for `bucket`, `None` for in-memory backends
    fn amazon(&self, bucket: &str) -> Result<Option<AmazonS3>> {
        let StoreFactory::S3 {
            endpoint,
            region,
            access_key,
            secret_key,
            allow_http,
        } = &self.factory
        else {
            return Ok(None);
        };

        let mut builder = AmazonS3Builder::new()
            .with_endpoint(endpoint)
            .with_region(region)
            .with_bucket_name(bucket)
            .with_allow_http(*allow_http)
            .with_virtual_hosted_style_request(false);
        if let (Some(key), Some(secret)) = (access_key, secret_key) {
            builder = builder
                .with_access_key_id(key)
                .with_secret_access_key(secret);
        }
        Ok(Some(builder.build()?))
    }

    /// Write bytes directly to a location
    pub async fn put_bytes(&self, location: &ObjectLocation, data: impl Into<Bytes>) -> Result<()> {
        let store = self.store(&location.bucket)?;
        store
            .put(&object_path(location)?, PutPayload::from(data.into()))
            .await?;
        Ok(())
    }

    pub async fn exists(&self, location: &ObjectLocation) -> Result<bool> {
        let store = self.store(&location.bucket)?;
        match store.head(&object_path(location)?).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

fn not_found_or(err: object_store::Error, location: &ObjectLocation) -> DatasetError {
    match err {
        object_store::Error::NotFound { .. } => {
            DatasetError::ObjectStore(format!("Object {} does not exist", location))
        }
        other => other.into(),
    }
}

#[async_trait::async_trait]
impl ObjectStorage for ObjectStoreBackend {
    async fn copy_object(&self, from: &ObjectLocation, to: &ObjectLocation) -> Result<()> {
        let source = self.store(&from.bucket)?;
        let from_path = object_path(from)?;
        let to_path = object_path(to)?;

        if from.bucket == to.bucket {
            source
                .copy(&from_path, &to_path)
                .await
                .map_err(|e| not_found_or(e, from))?;
        } else {
            let data = source
                .get(&from_path)
                .await
                .map_err(|e| not_found_or(e, from))?
                .bytes()
                .await?;
            self.store(&to.bucket)?
                .put(&to_path, PutPayload::from(data))
                .await?;
        }

        debug!(from = %from, to = %to, "Object copied");
        Ok(())
    }

    async fn delete_object(&self, location: &ObjectLocation) -> Result<()> {
        self.store(&location.bucket)?
            .delete(&object_path(location)?)
            .await
            .map_err(|e| not_found_or(e, location))?;
        debug!(location = %location, "Object deleted");
        Ok(())
    }

    async fn get_object(&self, location: &ObjectLocation, limit: u64) -> Result<Bytes> {
        let store = self.store(&location.bucket)?;
        let path = object_path(location)?;
        let meta = store.head(&path).await.map_err(|e| not_found_or(e, location))?;

        let end = meta.size.min(usize::try_from(limit).unwrap_or(usize::MAX));
        if end == 0 {
            return Ok(Bytes::new());
        }
        Ok(store.get_range(&path, 0..end).await?)
    }

    async fn download(&self, location: &ObjectLocation, dest: &Path) -> Result<()> {
        let store = self.store(&location.bucket)?;
        let mut stream = store
            .get(&object_path(location)?)
            .await
            .map_err(|e| not_found_or(e, location))?
            .into_stream();

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;
        while let Some(chunk) = stream.next().await {
            file.write_all(&chunk?).await?;
        }
        file.flush().await?;
        Ok(())
    }

    async fn upload(&self, src: &Path, location: &ObjectLocation) -> Result<()> {
        let store = self.store(&location.bucket)?;
        let mut file = tokio::fs::File::open(src).await?;
        let mut writer = BufWriter::new(store, object_path(location)?);
        tokio::io::copy(&mut file, &mut writer).await?;
        writer.shutdown().await?;
        info!(location = %location, "Object uploaded");
        Ok(())
    }

    async fn read_stream(&self, location: &ObjectLocation) -> Result<BoxStream<'static, Result<Bytes>>> {
        let stream = self
            .store(&location.bucket)?
            .get(&object_path(location)?)
            .await
            .map_err(|e| not_found_or(e, location))?
            .into_stream();
        Ok(stream.map(|chunk| chunk.map_err(DatasetError::from)).boxed())
    }

    async fn presigned_url(&self, location: &ObjectLocation, expires_in: Duration) -> Result<String> {
        let path = object_path(location)?;
        let url = match self.amazon(&location.bucket)? {
            Some(s3) => s3
                .signed_url(Method::GET, &path, expires_in)
                .await?
                .to_string(),
            None => {
                // the in-memory store cannot sign, hand out a recognisable stand-in
                self.store(&location.bucket)?
                    .head(&path)
                    .await
                    .map_err(|e| not_found_or(e, location))?;
                format!(
                    "memory://localhost/{}/{}?expires={}&signature=mock",
                    location.bucket,
                    path,
                    expires_in.as_secs()
                )
            }
        };
        debug!(location = %location, "Presigned url issued");
        Ok(url)
    }
}
