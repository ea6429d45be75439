use super::{Metadata, Storage, ensure_not_root};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Storage keeping every value in an ordered in-process map.
///
/// Clones share the same map, which lets tests model several clients of one
/// backend.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStorage {
    data: Arc<RwLock<BTreeMap<String, Bytes>>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Storage for InMemoryStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        Ok(self.data.read().await.contains_key(&key.to_string()))
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let prefix = prefix.to_string();
        let data = self.data.read().await;
        data.range(prefix.clone()..)
            .take_while(|(key, _)| key.starts_with(&prefix))
            .map(|(key, _)| Key::parse(key))
            .collect()
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        let bytes = content.bytes().await?;
        self.data.write().await.insert(key.to_string(), bytes);
        Ok(())
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        let mut data = self.data.write().await;
        let value = data
            .remove(&source.to_string())
            .ok_or_else(|| StashError::NotFound(source.clone()))?;
        data.insert(destination.to_string(), value);
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        let data = self.data.read().await;
        data.get(&key.to_string())
            .cloned()
            .map(Content::from_bytes)
            .ok_or_else(|| StashError::NotFound(key.clone()))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.data
            .write()
            .await
            .remove(&key.to_string())
            .map(|_| ())
            .ok_or_else(|| StashError::NotFound(key.clone()))
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let data = self.data.read().await;
        data.get(&key.to_string())
            .map(|value| Metadata::with_size(value.len() as u64))
            .ok_or_else(|| StashError::NotFound(key.clone()))
    }

    fn identifier(&self) -> String {
        "InMemory".to_string()
    }
}
