use crate::key::Key;
use std::sync::Arc;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StashError>;

/// Errors surfaced by storages, locks and the storage cache.
///
/// The type is `Clone` so a single failed backend construction can be handed
/// to every caller waiting on it.
#[derive(Debug, Clone, Error)]
pub enum StashError {
    #[error("value not found for key '{0}'")]
    NotFound(Key),

    #[error("invalid operation: {0}")]
    InvalidOperation(String),

    #[error("failed to acquire lock on '{0}'")]
    LockBusy(Key),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("unsupported operation: {0}")]
    Unsupported(String),

    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("backend error: {0}")]
    Backend(String),
}

impl StashError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StashError::NotFound(_))
    }
}

impl From<std::io::Error> for StashError {
    fn from(error: std::io::Error) -> Self {
        StashError::Io(Arc::new(error))
    }
}

impl From<redis::RedisError> for StashError {
    fn from(error: redis::RedisError) -> Self {
        StashError::Backend(format!("redis: {}", error))
    }
}

impl From<etcd_client::Error> for StashError {
    fn from(error: etcd_client::Error) -> Self {
        StashError::Backend(format!("etcd: {}", error))
    }
}

impl From<object_store::Error> for StashError {
    fn from(error: object_store::Error) -> Self {
        StashError::Backend(format!("object store: {}", error))
    }
}

impl From<reqwest::Error> for StashError {
    fn from(error: reqwest::Error) -> Self {
        StashError::Backend(format!("http: {}", error))
    }
}

impl From<serde_json::Error> for StashError {
    fn from(error: serde_json::Error) -> Self {
        StashError::Backend(format!("json: {}", error))
    }
}
