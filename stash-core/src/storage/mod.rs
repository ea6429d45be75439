//! Storage abstraction and its backends.
//!
//! Every backend implements the same [`Storage`] contract, so the storage
//! lock and everything built on it behaves identically over all of them.

pub mod etcd;
pub mod fs;
pub mod http;
pub mod logging;
pub mod memory;
pub mod object;
pub mod redis;
pub mod sub;

pub use etcd::EtcdStorage;
pub use fs::FileStorage;
pub use http::HttpStorage;
pub use logging::LoggingStorage;
pub use memory::InMemoryStorage;
pub use object::ObjectStorage;
pub use redis::RedisStorage;
pub use sub::SubStorage;

use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use crate::lock::{RetryLock, StorageLock, UnderLockOperation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Metadata {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Metadata {
    pub fn with_size(size: u64) -> Self {
        Self {
            size,
            last_modified: None,
        }
    }
}

#[async_trait]
pub trait Storage: Send + Sync + 'static {
    /// Returns false for missing keys and for the root key.
    async fn exists(&self, key: &Key) -> Result<bool>;

    /// Lists every key whose rendered form starts with the rendered `prefix`,
    /// sorted by rendered form.
    async fn list(&self, prefix: &Key) -> Result<Vec<Key>>;

    /// Stores `content` under `key`, replacing any previous value.
    async fn save(&self, key: &Key, content: Content) -> Result<()>;

    /// Moves a value, overwriting `destination`.
    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()>;

    async fn value(&self, key: &Key) -> Result<Content>;

    /// Removes a value. Fails with [`StashError::NotFound`] when it is missing.
    async fn delete(&self, key: &Key) -> Result<()>;

    async fn metadata(&self, key: &Key) -> Result<Metadata>;

    /// Deletes every key under `prefix`, one after another.
    async fn delete_all(&self, prefix: &Key) -> Result<()> {
        for key in self.list(prefix).await? {
            self.delete(&key).await?;
        }
        Ok(())
    }

    fn identifier(&self) -> String;
}

/// Scoped exclusive execution over a shared storage handle.
pub trait Exclusive {
    /// Runs `operation` while holding the storage lock for `key`.
    ///
    /// The lock is a [`StorageLock`] over this very storage wrapped in a
    /// [`RetryLock`]; it is released on every exit path.
    fn exclusively<T, F, Fut>(
        &self,
        key: &Key,
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send
    where
        T: Send,
        F: FnOnce(Arc<dyn Storage>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send;
}

impl Exclusive for Arc<dyn Storage> {
    fn exclusively<T, F, Fut>(
        &self,
        key: &Key,
        operation: F,
    ) -> impl Future<Output = Result<T>> + Send
    where
        T: Send,
        F: FnOnce(Arc<dyn Storage>) -> Fut + Send,
        Fut: Future<Output = Result<T>> + Send,
    {
        let storage = Arc::clone(self);
        let lock = RetryLock::new(StorageLock::new(Arc::clone(&storage), key.clone()));
        UnderLockOperation::new(Arc::new(lock), operation).perform(storage)
    }
}

pub(crate) fn ensure_not_root(key: &Key, action: &str) -> Result<()> {
    if key.is_root() {
        return Err(StashError::InvalidOperation(format!(
            "unable to {} root",
            action
        )));
    }
    Ok(())
}

/// Parses keys read back from a backend listing, skipping entries that are
/// not valid non-root keys.
pub(crate) fn parse_listed<'a>(
    rendered: impl IntoIterator<Item = &'a str>,
    storage: &str,
) -> Vec<Key> {
    rendered
        .into_iter()
        .filter_map(|value| match Key::parse(value) {
            Ok(key) if !key.is_root() => Some(key),
            Ok(_) => {
                tracing::warn!(storage = %storage, "Skipping empty listed entry");
                None
            }
            Err(e) => {
                tracing::warn!(storage = %storage, "Skipping listed entry '{}': {}", value, e);
                None
            }
        })
        .collect()
}

/// Keeps only keys whose rendered form starts with the rendered `prefix` and
/// returns them sorted and deduplicated.
pub(crate) fn retain_prefixed(mut keys: Vec<Key>, prefix: &Key) -> Vec<Key> {
    keys.retain(|key| key.starts_with_str(prefix));
    keys.sort();
    keys.dedup();
    keys
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> Key {
        Key::parse(value).unwrap()
    }

    #[test]
    fn test_parse_listed_skips_invalid_entries() {
        let listed = parse_listed(["a/b", "a//b", "", "/c", "c"], "test");
        assert_eq!(listed, vec![key("a/b"), key("c")]);
    }

    #[test]
    fn test_retain_prefixed_by_rendered_form() {
        let keys = vec![key("a/b"), key("ab"), key("b"), key("a/b")];
        assert_eq!(
            retain_prefixed(keys, &key("a")),
            vec![key("a/b"), key("ab")]
        );
    }
}
