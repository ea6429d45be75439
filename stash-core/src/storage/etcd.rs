use super::{Metadata, Storage, ensure_not_root, parse_listed, retain_prefixed};
use crate::content::Content;
use crate::error::{Result, StashError};
use crate::key::Key;
use async_trait::async_trait;
use etcd_client::{Client, GetOptions, KvClient, Txn, TxnOp};

/// Largest value accepted by default; etcd itself refuses bigger requests.
pub const DEFAULT_MAX_SIZE: usize = 10 * 1024 * 1024;

/// Storage mapping every key onto an etcd key of the same rendered form.
#[derive(Clone)]
pub struct EtcdStorage {
    kv: KvClient,
    endpoints: Vec<String>,
    max_size: usize,
}

impl EtcdStorage {
    pub async fn new(endpoints: &[String], max_size: usize) -> Result<Self> {
        if endpoints.is_empty() {
            return Err(StashError::Config(
                "etcd endpoints cannot be empty".to_string(),
            ));
        }
        let client = Client::connect(endpoints, None).await?;
        tracing::info!("Connected to etcd at {}", endpoints.join(","));
        Ok(Self {
            kv: client.kv_client(),
            endpoints: endpoints.to_vec(),
            max_size,
        })
    }

    async fn get(&self, key: &Key) -> Result<Vec<u8>> {
        let mut kv = self.kv.clone();
        let response = kv.get(key.to_string(), None).await?;
        response
            .kvs()
            .first()
            .map(|entry| entry.value().to_vec())
            .ok_or_else(|| StashError::NotFound(key.clone()))
    }
}

fn check_size(key: &Key, size: usize, max_size: usize) -> Result<()> {
    if size > max_size {
        return Err(StashError::InvalidOperation(format!(
            "value for '{}' is {} bytes, etcd storage accepts at most {}",
            key, size, max_size
        )));
    }
    Ok(())
}

#[async_trait]
impl Storage for EtcdStorage {
    async fn exists(&self, key: &Key) -> Result<bool> {
        if key.is_root() {
            return Ok(false);
        }
        let mut kv = self.kv.clone();
        let response = kv
            .get(key.to_string(), Some(GetOptions::new().with_count_only()))
            .await?;
        Ok(response.count() > 0)
    }

    async fn list(&self, prefix: &Key) -> Result<Vec<Key>> {
        let options = if prefix.is_root() {
            GetOptions::new().with_all_keys().with_keys_only()
        } else {
            GetOptions::new().with_prefix().with_keys_only()
        };
        let mut kv = self.kv.clone();
        let response = kv.get(prefix.to_string(), Some(options)).await?;

        let rendered = response
            .kvs()
            .iter()
            .map(|entry| entry.key_str())
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let keys = parse_listed(rendered, &self.identifier());
        Ok(retain_prefixed(keys, prefix))
    }

    async fn save(&self, key: &Key, content: Content) -> Result<()> {
        ensure_not_root(key, "save to")?;
        if let Some(size) = content.size() {
            check_size(key, size as usize, self.max_size)?;
        }
        let bytes = content.bytes().await?;
        check_size(key, bytes.len(), self.max_size)?;

        let mut kv = self.kv.clone();
        kv.put(key.to_string(), bytes.to_vec(), None).await?;
        Ok(())
    }

    async fn move_key(&self, source: &Key, destination: &Key) -> Result<()> {
        ensure_not_root(destination, "move to")?;
        let value = self.get(source).await?;
        let txn = Txn::new().and_then(vec![
            TxnOp::put(destination.to_string(), value, None),
            TxnOp::delete(source.to_string(), None),
        ]);
        let mut kv = self.kv.clone();
        kv.txn(txn).await?;
        Ok(())
    }

    async fn value(&self, key: &Key) -> Result<Content> {
        ensure_not_root(key, "load from")?;
        Ok(Content::from_bytes(self.get(key).await?))
    }

    async fn delete(&self, key: &Key) -> Result<()> {
        let mut kv = self.kv.clone();
        let response = kv.delete(key.to_string(), None).await?;
        if response.deleted() == 0 {
            return Err(StashError::NotFound(key.clone()));
        }
        Ok(())
    }

    async fn metadata(&self, key: &Key) -> Result<Metadata> {
        let value = self.get(key).await?;
        Ok(Metadata::with_size(value.len() as u64))
    }

    fn identifier(&self) -> String {
        format!("Etcd: {}", self.endpoints.join(","))
    }
}
