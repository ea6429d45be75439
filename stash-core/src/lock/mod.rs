//! Asynchronous mutual exclusion built on storage primitives.
//!
//! - [`StorageLock`] implements the proposal protocol using only
//!   save/list/value/delete of a [`crate::Storage`].
//! - [`RetryLock`] retries any [`Lock`] with exponential backoff.
//! - [`UnderLockOperation`] runs an operation between acquire and release.

pub mod retry;
pub mod storage_lock;
pub mod under_lock;

pub use retry::{RetryLock, RetryPolicy};
pub use storage_lock::{LOCKS_ROOT, StorageLock};
pub use under_lock::UnderLockOperation;

use crate::error::Result;
use async_trait::async_trait;

#[async_trait]
pub trait Lock: Send + Sync {
    async fn acquire(&self) -> Result<()>;

    async fn release(&self) -> Result<()>;
}
