use super::{Metadata, Storage};
use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use async_trait::async_trait;
use std::sync::Arc;

/// Emits one `tracing` event per storage call.
#[derive(Clone)]
pub struct LoggingStorage {
    origin: Arc<dyn Storage>,
}

impl LoggingStorage {
    pub fn new(origin: Arc<dyn Storage>) -> Self {
        Self { origin }
    }
}

fn outcome<T>(result: &Result<T>) -> String {
    match result {
        Ok(_) => "ok".to_string(),
        Err(e) => format!("failed: {}", e),
    }
}

#[async_trait]
impl Storage for LoggingStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        let result = self.origin.exists(key).await;
        tracing::debug!(storage = %self.origin.identifier(), "exists '{}': {:?}", key, result);
        result
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let result = self.origin.list(prefix).await;
        match &result {
            Ok(keys) => tracing::debug!(
                storage = %self.origin.identifier(),
                "list '{}': {} keys",
                prefix,
                keys.len()
            ),
            Err(e) => tracing::debug!(
                storage = %self.origin.identifier(),
                "list '{}' failed: {}",
                prefix,
                e
            ),
        }
        result
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        let size = content.size();
        let result = self.origin.save(key, content).await;
        tracing::debug!(
            storage = %self.origin.identifier(),
            "save '{}' ({:?} bytes): {}",
            key,
            size,
            outcome(&result)
        );
        result
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        let result = self.origin.move_key(source, destination).await;
        tracing::debug!(
            storage = %self.origin.identifier(),
            "move '{}' -> '{}': {}",
            source,
            destination,
            outcome(&result)
        );
        result
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        let result = self.origin.value(key).await;
        match &result {
            Ok(content) => tracing::debug!(
                storage = %self.origin.identifier(),
                "value '{}': {:?} bytes",
                key,
                content.size()
            ),
            Err(e) => tracing::debug!(
                storage = %self.origin.identifier(),
                "value '{}' failed: {}",
                key,
                e
            ),
        }
        result
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let result = self.origin.delete(key).await;
        tracing::debug!(
            storage = %self.origin.identifier(),
            "delete '{}': {}",
            key,
            outcome(&result)
        );
        result
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let result = self.origin.metadata(key).await;
        tracing::debug!(
            storage = %self.origin.identifier(),
            "metadata '{}': {}",
            key,
            outcome(&result)
        );
        result
    }

    fn identifier(&self) -> String {
        self.origin.identifier()
    }
}
