use super::{Metadata, Storage};
use crate::content::Content;
use crate::error::Result;
use crate::key::Key;
use async_trait::async_trait;
use std::sync::Arc;

/// View of another storage rooted at a prefix.
///
/// Keys passed in are resolved below the prefix and listed keys come back
/// relative to it, so a repository can be handed its own slice of a shared
/// backend.
#[derive(Clone)]
pub struct SubStorage {
    prefix: Key,
    origin: Arc<dyn Storage>,
}

impl SubStorage {
    pub fn new(prefix: Key, origin: Arc<dyn Storage>) -> Self {
        Self { prefix, origin }
    }

    pub fn prefix(&self) -> &Key {
        &self.prefix
    }

    fn resolve(&self, key: &Key) -> Key {
        self.prefix.join(key)
    }
}

#[async_trait]
impl Storage for SubStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        self.origin.exists(&self.resolve(key)).await
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let listed = self.origin.list(&self.resolve(prefix)).await?;
        // a bare prefix also matches siblings such as "repo-2" for "repo"
        let mut keys: Vec<Key> = listed
            .iter()
            .filter_map(|key| key.strip_prefix(&self.prefix))
            .filter(|key| !key.is_root())
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        super::ensure_not_root(key, "save to")?;
        self.origin.save(&self.resolve(key), content).await
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        super::ensure_not_root(destination, "move to")?;
        self.origin
            .move_key(&self.resolve(source), &self.resolve(destination))
            .await
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        super::ensure_not_root(key, "load from")?;
        self.origin.value(&self.resolve(key)).await
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        self.origin.delete(&self.resolve(key)).await
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        self.origin.metadata(&self.resolve(key)).await
    }

    fn identifier(&self) -> String {
        format!("{} under '{}'", self.origin.identifier(), self.prefix)
    }
}
