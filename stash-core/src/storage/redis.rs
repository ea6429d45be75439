use super::{Metadata, Storage, ensure_not_root, parse_listed, retain_prefixed};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

pub const DEFAULT_NAMESPACE: &str = "stash";

/// Storage keeping every value as a field of a single redis hash.
#[derive(Clone)]
pub struct RedisStorage {
    conn: ConnectionManager,
    namespace: String,
}

impl RedisStorage {
    pub async fn new(url: &str, namespace: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StashError::Config(format!("invalid redis url '{}': {}", url, e)))?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("Connected to redis hash '{}'", namespace);
        Ok(Self {
            conn,
            namespace: namespace.to_string(),
        })
    }
}

#[async_trait]
impl Storage for RedisStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        let mut conn = self.conn.clone();
        let exists: bool = conn.hexists(&self.namespace, key.to_string()).await?;
        Ok(exists)
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let mut conn = self.conn.clone();
        let fields: Vec<String> = conn.hkeys(&self.namespace).await?;
        let keys = parse_listed(fields.iter().map(String::as_str), &self.identifier());
        Ok(retain_prefixed(keys, prefix))
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        let bytes = content.bytes().await?;
        let mut conn = self.conn.clone();
        let _: () = conn
            .hset(&self.namespace, key.to_string(), bytes.to_vec())
            .await?;
        Ok(())
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.hget(&self.namespace, source.to_string()).await?;
        let value = value.ok_or_else(|| StashError::NotFound(source.clone()))?;

        let _: () = redis::pipe()
            .atomic()
            .hset(&self.namespace, destination.to_string(), value)
            .ignore()
            .hdel(&self.namespace, source.to_string())
            .ignore()
            .query_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.hget(&self.namespace, key.to_string()).await?;
        value
            .map(Content::from_bytes)
            .ok_or_else(|| StashError::NotFound(key.clone()))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.hdel(&self.namespace, key.to_string()).await?;
        if removed == 0 {
            return Err(StashError::NotFound(key.clone()));
        }
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let mut conn = self.conn.clone();
        let size: u64 = redis::cmd("HSTRLEN")
            .arg(&self.namespace)
            .arg(key.to_string())
            .query_async(&mut conn)
            .await?;
        // HSTRLEN answers 0 for both missing and empty fields
        if size == 0 && !self.exists(key).await? {
            return Err(StashError::NotFound(key.clone()));
        }
        Ok(Metadata::with_size(size))
    }

    fn identifier(&self) -> String {
        format!("Redis: {}", self.namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(value: &str) -> Key {
        Key::parse(value).unwrap()
    }

    #[tokio::test]
    async fn test_invalid_url_is_config_error() {
        let result = RedisStorage::new("not a url", DEFAULT_NAMESPACE).await;
        assert!(matches!(result, Err(StashError::Config(_))));
    }

    #[tokio::test]
    #[ignore = "requires STASH_TEST_REDIS_URL"]
    async fn test_live_round_trip() {
        let url = std::env::var("STASH_TEST_REDIS_URL").unwrap();
        let namespace = format!("stash-test-{}", ulid::Ulid::new());
        let storage = RedisStorage::new(&url, &namespace).await.unwrap();

        storage.save(&key("a/b"), Content::from("one")).await.unwrap();
        storage.save(&key("a-b"), Content::empty()).await.unwrap();

        assert_eq!(
            storage.list(&key("a")).await.unwrap(),
            vec![key("a-b"), key("a/b")]
        );
        assert_eq!(storage.metadata(&key("a/b")).await.unwrap().size, 3);
        assert_eq!(storage.metadata(&key("a-b")).await.unwrap().size, 0);
        assert!(storage.metadata(&key("zz")).await.unwrap_err().is_not_found());

        storage.move_key(&key("a/b"), &key("c")).await.unwrap();
        assert!(!storage.exists(&key("a/b")).await.unwrap());
        let moved = storage.value(&key("c")).await.unwrap();
        assert_eq!(moved.text().await.unwrap(), "one");

        storage.delete_all(&Key::root()).await.unwrap();
        assert!(storage.delete(&key("c")).await.unwrap_err().is_not_found());
    }
}
