use super::StorageConfig;
use crate::error::{Result, StashError};
use crate::storage::etcd::DEFAULT_MAX_SIZE;
use crate::storage::redis::DEFAULT_NAMESPACE;
use crate::storage::{
    EtcdStorage, FileStorage, HttpStorage, InMemoryStorage, ObjectStorage, RedisStorage, Storage,
};
use async_trait::async_trait;
use object_store::aws::AmazonS3Builder;
use std::collections::HashMap;
use std::sync::Arc;

/// Builds a storage backend from its configuration record.
#[async_trait]
pub trait StorageFactory: Send + Sync {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>>;
}

/// Table of factories keyed by storage type.
#[derive(Clone, Default)]
pub struct StorageRegistry {
    factories: HashMap<String, Arc<dyn StorageFactory>>,
}

impl StorageRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry knowing every built-in backend.
    pub fn with_defaults() -> Self {
        Self::new()
            .register("in-memory", InMemoryFactory)
            .register("fs", FileFactory)
            .register("s3", S3Factory)
            .register("redis", RedisFactory)
            .register("etcd", EtcdFactory)
            .register("http", HttpFactory)
    }

    pub fn register(mut self, backend: &str, factory: impl StorageFactory + 'static) -> Self {
        self.factories
            .insert(backend.trim().to_ascii_lowercase(), Arc::new(factory));
        self
    }

    pub fn supports(&self, backend: &str) -> bool {
        self.factories
            .contains_key(&backend.trim().to_ascii_lowercase())
    }

    fn factory(&self, config: &StorageConfig) -> Result<&Arc<dyn StorageFactory>> {
        let backend = config.resolve_backend()?;
        self.factories.get(&backend).ok_or_else(|| {
            StashError::Config(format!("unsupported storage type: {}", backend))
        })
    }

    /// Fails fast on an empty or unknown storage type.
    pub fn validate(&self, config: &StorageConfig) -> Result<()> {
        self.factory(config).map(|_| ())
    }

    pub async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let storage = self.factory(config)?.create(config).await?;
        tracing::info!("Created storage {}", storage.identifier());
        Ok(storage)
    }
}

struct InMemoryFactory;

#[async_trait]
impl StorageFactory for InMemoryFactory {
    async fn create(&self, _config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(InMemoryStorage::new()))
    }
}

struct FileFactory;

#[async_trait]
impl StorageFactory for FileFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let path = config.string("path")?;
        Ok(Arc::new(FileStorage::new(path)?))
    }
}

struct S3Factory;

#[async_trait]
impl StorageFactory for S3Factory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(config.string("bucket")?)
            .with_region(
                config
                    .optional_string("region")?
                    .unwrap_or_else(|| "us-east-1".to_string()),
            );
        if let Some(endpoint) = config.optional_string("endpoint")? {
            builder = builder
                .with_endpoint(endpoint)
                .with_virtual_hosted_style_request(false);
        }
        if let Some(access_key_id) = config.optional_string("access_key_id")? {
            builder = builder.with_access_key_id(access_key_id);
        }
        if let Some(secret) = config.optional_string("secret_access_key")? {
            builder = builder.with_secret_access_key(secret);
        }
        if config.bool_or("allow_http", false)? {
            builder = builder.with_allow_http(true);
        }

        let store = builder
            .build()
            .map_err(|e| StashError::Config(format!("invalid s3 storage: {}", e)))?;
        Ok(Arc::new(ObjectStorage::new(Arc::new(store))))
    }
}

struct RedisFactory;

#[async_trait]
impl StorageFactory for RedisFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let url = config.string("url")?;
        let namespace = config
            .optional_string("namespace")?
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Ok(Arc::new(RedisStorage::new(&url, &namespace).await?))
    }
}

struct EtcdFactory;

#[async_trait]
impl StorageFactory for EtcdFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        let endpoints = config.string_list("endpoints")?;
        if endpoints.is_empty() {
            return Err(StashError::Config(
                "etcd endpoints are required for etcd storage".to_string(),
            ));
        }
        let max_size = config.usize_or("max_size", DEFAULT_MAX_SIZE)?;
        Ok(Arc::new(EtcdStorage::new(&endpoints, max_size).await?))
    }
}

struct HttpFactory;

#[async_trait]
impl StorageFactory for HttpFactory {
    async fn create(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        Ok(Arc::new(HttpStorage::new(&config.string("url")?)?))
    }
}
