//! Stash Core - pluggable key-value storage for artifact repositories
//!
//! - `Storage`: one asynchronous contract over memory, filesystem, object
//!   stores, redis, etcd and remote stash servers
//! - `StorageLock`: mutual exclusion built only from the storage's own
//!   save/list/value/delete, wrapped in `RetryLock` backoff
//! - `StoragesCache`: single-flight, time-limited memoization of backends

pub mod cache;
pub mod content;
pub mod error;
pub mod key;
pub mod lock;
pub mod registry;
pub mod storage;

// Make test_utils available for testing in dependent crates
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use cache::{CacheSettings, StoragesCache};
pub use content::Content;
pub use error::{Result, StashError};
pub use key::Key;
pub use lock::{LOCKS_ROOT, Lock, RetryLock, RetryPolicy, StorageLock, UnderLockOperation};
pub use registry::{StorageConfig, StorageFactory, StorageRegistry};
pub use storage::{
    EtcdStorage, Exclusive, FileStorage, HttpStorage, InMemoryStorage, LoggingStorage, Metadata,
    ObjectStorage, RedisStorage, Storage, SubStorage,
};
