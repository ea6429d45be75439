use super::Lock;
use crate::error::Result;
use crate::storage::Storage;
use std::future::Future;
use std::sync::Arc;

/// Runs an operation against a storage while holding a lock.
///
/// The operation is never invoked if the lock cannot be acquired. Once
/// acquisition has started the lock is released on every exit path; if the
/// future is dropped midway, release is spawned onto the current runtime.
pub struct UnderLockOperation<F> {
    lock: Arc<dyn Lock>,
    operation: F,
}

impl<F> UnderLockOperation<F> {
    pub fn new(lock: Arc<dyn Lock>, operation: F) -> Self {
        Self { lock, operation }
    }

    pub async fn perform<T, Fut>(self, storage: Arc<dyn Storage>) -> Result<T>
    where
        F: FnOnce(Arc<dyn Storage>) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let UnderLockOperation { lock, operation } = self;
        let mut guard = ReleaseOnDrop::new(Arc::clone(&lock));

        if let Err(e) = lock.acquire().await {
            // a failed acquire has already removed its own proposal
            guard.disarm();
            return Err(e);
        }

        let result = operation(storage).await;
        let released = lock.release().await;
        guard.disarm();

        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release)) => {
                tracing::warn!("Failed to release lock after failed operation: {}", release);
                Err(e)
            }
        }
    }
}

struct ReleaseOnDrop {
    lock: Option<Arc<dyn Lock>>,
}

impl ReleaseOnDrop {
    fn new(lock: Arc<dyn Lock>) -> Self {
        Self { lock: Some(lock) }
    }

    fn disarm(&mut self) {
        self.lock = None;
    }
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let Some(lock) = self.lock.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(e) = lock.release().await {
                        tracing::warn!("Failed to release lock of cancelled operation: {}", e);
                    }
                });
            }
            Err(_) => {
                tracing::warn!("Lock of cancelled operation not released: no runtime available");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::Content;
    use crate::error::StashError;
    use crate::key::Key;
    use crate::lock::{LOCKS_ROOT, RetryLock, RetryPolicy, StorageLock};
    use crate::storage::{Exclusive, InMemoryStorage};
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingLock {
        fail_acquire: bool,
        fail_release: bool,
        events: Mutex<Vec<&'static str>>,
    }

    impl RecordingLock {
        fn events(&self) -> Vec<&'static str> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Lock for RecordingLock {
        async fn acquire(&self) -> Result<()> {
            self.events.lock().unwrap().push("acquire");
            if self.fail_acquire {
                return Err(StashError::LockBusy(Key::root()));
            }
            Ok(())
        }

        async fn release(&self) -> Result<()> {
            self.events.lock().unwrap().push("release");
            if self.fail_release {
                return Err(StashError::Backend("release failed".to_string()));
            }
            Ok(())
        }
    }

    fn storage() -> Arc<dyn Storage> {
        Arc::new(InMemoryStorage::new())
    }

    fn key(value: &str) -> Key {
        Key::parse(value).unwrap()
    }

    #[tokio::test]
    async fn test_operation_runs_between_acquire_and_release() {
        let lock = Arc::new(RecordingLock::default());
        let seen = Arc::clone(&lock);

        let value = UnderLockOperation::new(lock.clone(), |_storage| async move {
            seen.events.lock().unwrap().push("operation");
            Ok(42)
        })
        .perform(storage())
        .await
        .unwrap();

        assert_eq!(value, 42);
        assert_eq!(lock.events(), vec!["acquire", "operation", "release"]);
    }

    #[tokio::test]
    async fn test_operation_not_invoked_when_acquire_fails() {
        let lock = Arc::new(RecordingLock {
            fail_acquire: true,
            ..Default::default()
        });
        let invoked = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&invoked);

        let result = UnderLockOperation::new(lock.clone(), |_storage| async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .perform(storage())
        .await;

        assert!(matches!(result, Err(StashError::LockBusy(_))));
        assert_eq!(invoked.load(Ordering::SeqCst), 0);
        assert_eq!(lock.events(), vec!["acquire"]);
    }

    #[tokio::test]
    async fn test_release_after_failed_operation_keeps_operation_error() {
        let lock = Arc::new(RecordingLock {
            fail_release: true,
            ..Default::default()
        });

        let result: Result<()> = UnderLockOperation::new(lock.clone(), |_storage| async {
            Err(StashError::InvalidOperation("operation failed".to_string()))
        })
        .perform(storage())
        .await;

        assert!(matches!(result, Err(StashError::InvalidOperation(_))));
        assert_eq!(lock.events(), vec!["acquire", "release"]);
    }

    #[tokio::test]
    async fn test_release_failure_after_success_is_reported() {
        let lock = Arc::new(RecordingLock {
            fail_release: true,
            ..Default::default()
        });

        let result = UnderLockOperation::new(lock, |_storage| async { Ok("done") })
            .perform(storage())
            .await;

        assert!(matches!(result, Err(StashError::Backend(_))));
    }

    #[tokio::test]
    async fn test_cancelled_operation_still_releases() {
        let inner = InMemoryStorage::new();
        let shared: Arc<dyn Storage> = Arc::new(inner.clone());
        let lock = Arc::new(StorageLock::new(Arc::clone(&shared), key("target")));

        let pending = UnderLockOperation::new(lock, |_storage| async {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(())
        })
        .perform(Arc::clone(&shared));
        let timed_out = tokio::time::timeout(Duration::from_millis(20), pending).await;
        assert!(timed_out.is_err());

        let locks = key(LOCKS_ROOT);
        for _ in 0..100 {
            if inner.list(&locks).await.unwrap().is_empty() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("proposal of cancelled operation was not released");
    }

    #[tokio::test]
    async fn test_exclusively_saves_under_lock_and_cleans_up() {
        let inner = InMemoryStorage::new();
        let shared: Arc<dyn Storage> = Arc::new(inner.clone());

        let saved = shared
            .exclusively(&key("repo/index"), |storage| async move {
                storage
                    .save(&key("repo/index"), Content::from("v1"))
                    .await?;
                Ok("saved")
            })
            .await
            .unwrap();

        assert_eq!(saved, "saved");
        assert!(inner.exists(&key("repo/index")).await.unwrap());
        assert!(inner.list(&key(LOCKS_ROOT)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusively_waits_for_release_then_succeeds() {
        let inner = InMemoryStorage::new();
        let shared: Arc<dyn Storage> = Arc::new(inner.clone());
        let holder = StorageLock::new(Arc::clone(&shared), key("a/b/c"));
        holder.acquire().await.unwrap();

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            holder.release().await.unwrap();
        });

        let result = shared
            .exclusively(&key("a/b/c"), |_storage| async { Ok(()) })
            .await;
        releaser.await.unwrap();

        assert!(result.is_ok());
        assert!(inner.list(&key(LOCKS_ROOT)).await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_exclusive_bodies_never_overlap() {
        let shared: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let active = Arc::new(AtomicUsize::new(0));
        let max_active = Arc::new(AtomicUsize::new(0));
        let completed = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..4 {
            let shared = Arc::clone(&shared);
            let active = Arc::clone(&active);
            let max_active = Arc::clone(&max_active);
            let completed = Arc::clone(&completed);
            tasks.push(tokio::spawn(async move {
                shared
                    .exclusively(&key("shared/resource"), |_storage| async move {
                        let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                        max_active.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        active.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    })
                    .await
            }));
        }
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert_eq!(max_active.load(Ordering::SeqCst), 1);
        assert!(completed.load(Ordering::SeqCst) >= 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_mutual_exclusion_across_threads() {
        let shared: Arc<dyn Storage> = Arc::new(InMemoryStorage::new());
        let active = Arc::new(AtomicUsize::new(0));
        let overlaps = Arc::new(AtomicUsize::new(0));
        let policy = RetryPolicy {
            attempts: 20,
            base: Duration::from_millis(2),
            factor: 1.5,
        };

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            let active = Arc::clone(&active);
            let overlaps = Arc::clone(&overlaps);
            tasks.push(tokio::spawn(async move {
                let lock = RetryLock::with_policy(
                    StorageLock::new(Arc::clone(&shared), key("hot/key")),
                    policy,
                );
                UnderLockOperation::new(Arc::new(lock), |_storage| async move {
                    if active.fetch_add(1, Ordering::SeqCst) != 0 {
                        overlaps.fetch_add(1, Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(1)).await;
                    active.fetch_sub(1, Ordering::SeqCst);
                    Ok(())
                })
                .perform(shared)
                .await
            }));
        }
        for task in tasks {
            let _ = task.await.unwrap();
        }

        assert_eq!(overlaps.load(Ordering::SeqCst), 0);
        assert!(shared.list(&key(LOCKS_ROOT)).await.unwrap().is_empty());
    }
}
