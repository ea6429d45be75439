use super::{Metadata, Storage, ensure_not_root, retain_prefixed};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::{ObjectStore, PutPayload};
use std::sync::Arc;

/// Storage over any [`ObjectStore`] (S3, in-memory, ...).
///
/// Object stores list by path segment, so `list` asks for the parent of the
/// prefix and narrows the result down to the string prefix locally.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: Arc<dyn ObjectStore>,
}

impl ObjectStorage {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self { store }
    }

    fn path(key: &Key) -> Result<Path> {
        Path::parse(key.to_string())
            .map_err(|e| StashError::InvalidKey(format!("'{}' is not an object path: {}", key, e)))
    }

    async fn head(&self, key: &Key) -> Result<object_store::ObjectMeta> {
        self.store
            .head(&Self::path(key)?)
            .await
            .map_err(|e| not_found_or(e, key))
    }
}

fn not_found_or(error: object_store::Error, key: &Key) -> StashError {
    match error {
        object_store::Error::NotFound { .. } => StashError::NotFound(key.clone()),
        other => other.into(),
    }
}

#[async_trait]
impl Storage for ObjectStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        match self.head(key).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let scope = match prefix.parent() {
            Some(parent) if !parent.is_root() => Some(Self::path(&parent)?),
            _ => None,
        };

        let mut listing = self.store.list(scope.as_ref());
        let mut keys = Vec::new();
        while let Some(meta) = listing.next().await {
            keys.push(Key::parse(meta?.location.as_ref())?);
        }
        Ok(retain_prefixed(keys, prefix))
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        let path = Self::path(key)?;
        let bytes = content.bytes().await?;
        self.store.put(&path, PutPayload::from(bytes)).await?;
        Ok(())
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        let from = Self::path(source)?;
        let to = Self::path(destination)?;
        self.store
            .rename(&from, &to)
            .await
            .map_err(|e| not_found_or(e, source))
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        let result = self
            .store
            .get(&Self::path(key)?)
            .await
            .map_err(|e| not_found_or(e, key))?;
        let size = result.meta.size as u64;
        let stream = result.into_stream().map_err(StashError::from);
        Ok(Content::from_stream(stream, Some(size)))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        // deleting a missing object succeeds on most stores
        self.head(key).await?;
        self.store.delete(&Self::path(key)?).await?;
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let meta = self.head(key).await?;
        Ok(Metadata {
            size: meta.size as u64,
            last_modified: Some(meta.last_modified),
        })
    }

    fn identifier(&self) -> String {
        format!("ObjectStore: {}", self.store)
    }
}
