//! Memoizing cache of constructed storage backends.
//!
//! Backends are keyed by their [`StorageConfig`]. Concurrent lookups of the
//! same configuration share a single construction, and entries expire a fixed
//! time after they were built.

use crate::error::{Result, StashError};
use crate::registry::{StorageConfig, StorageRegistry};
use crate::storage::Storage;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Environment variable overriding the entry time-to-live, in milliseconds.
pub const TTL_ENV: &str = "STASH_STORAGE_CACHE_TTL_MS";

pub const DEFAULT_TTL: Duration = Duration::from_millis(180_000);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub ttl: Duration,
    /// Upper bound on cached backends; unbounded when `None`.
    pub max_entries: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            ttl: DEFAULT_TTL,
            max_entries: None,
        }
    }
}

impl CacheSettings {
    /// Reads the time-to-live from [`TTL_ENV`], falling back to the default
    /// when the variable is unset.
    pub fn from_env() -> Result<Self> {
        Self::from_ttl_value(std::env::var(TTL_ENV).ok().as_deref())
    }

    fn from_ttl_value(value: Option<&str>) -> Result<Self> {
        let Some(value) = value else {
            return Ok(Self::default());
        };
        let millis: u64 = value.trim().parse().map_err(|_| {
            StashError::Config(format!(
                "{} must be a non-negative number of milliseconds, got '{}'",
                TTL_ENV, value
            ))
        })?;
        Ok(Self {
            ttl: Duration::from_millis(millis),
            ..Self::default()
        })
    }

    pub fn with_max_entries(mut self, max_entries: u64) -> Self {
        self.max_entries = Some(max_entries);
        self
    }
}

/// Configuration keyed cache of storage backends.
#[derive(Clone)]
pub struct StoragesCache {
    registry: Arc<StorageRegistry>,
    cache: Cache<StorageConfig, Arc<dyn Storage>>,
}

impl StoragesCache {
    pub fn new(registry: StorageRegistry, settings: CacheSettings) -> Self {
        let mut builder = Cache::builder().time_to_live(settings.ttl);
        if let Some(max_entries) = settings.max_entries {
            builder = builder.max_capacity(max_entries);
        }
        Self {
            registry: Arc::new(registry),
            cache: builder.build(),
        }
    }

    /// Cache over the built-in backends, configured from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self::new(
            StorageRegistry::with_defaults(),
            CacheSettings::from_env()?,
        ))
    }

    /// Returns the backend for `config`, building it on first use.
    ///
    /// Callers racing on the same configuration wait for one construction
    /// and all receive its result. Failed constructions are not cached.
    pub async fn storage(&self, config: &StorageConfig) -> Result<Arc<dyn Storage>> {
        self.registry.validate(config)?;
        let registry = Arc::clone(&self.registry);
        let owned = config.clone();
        self.cache
            .try_get_with(config.clone(), async move {
                tracing::info!("Storage cache miss for {} storage", owned.backend);
                registry.create(&owned).await
            })
            .await
            .map_err(|e| (*e).clone())
    }

    /// Drops every cached backend; the next lookup builds a fresh one.
    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Targeted invalidation is not offered; use [`Self::invalidate_all`].
    pub fn invalidate(&self, _config: &StorageConfig) -> Result<()> {
        Err(StashError::Unsupported(
            "invalidating a single storage is not supported".to_string(),
        ))
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StorageFactory;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts constructions and optionally fails them.
    struct CountingFactory {
        built: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl StorageFactory for CountingFactory {
        async fn create(&self, _config: &StorageConfig) -> Result<Arc<dyn Storage>> {
            self.built.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            if self.fail {
                return Err(StashError::Backend("unreachable backend".to_string()));
            }
            Ok(Arc::new(crate::storage::InMemoryStorage::new()))
        }
    }

    fn cache(fail: bool, settings: CacheSettings) -> (StoragesCache, Arc<AtomicUsize>) {
        let built = Arc::new(AtomicUsize::new(0));
        let registry = StorageRegistry::new().register(
            "counting",
            CountingFactory {
                built: Arc::clone(&built),
                fail,
            },
        );
        (StoragesCache::new(registry, settings), built)
    }

    fn config(name: &str) -> StorageConfig {
        StorageConfig::new("counting").with("name", name)
    }

    #[test]
    fn test_settings_from_ttl_value() {
        assert_eq!(CacheSettings::from_ttl_value(None).unwrap().ttl, DEFAULT_TTL);
        assert_eq!(
            CacheSettings::from_ttl_value(Some("5000")).unwrap().ttl,
            Duration::from_millis(5000)
        );
        assert!(matches!(
            CacheSettings::from_ttl_value(Some("soon")),
            Err(StashError::Config(_))
        ));
        assert!(CacheSettings::from_ttl_value(Some("-1")).is_err());
    }

    #[tokio::test]
    async fn test_same_config_returns_same_instance() {
        let (cache, built) = cache(false, CacheSettings::default());

        let first = cache.storage(&config("a")).await.unwrap();
        let second = cache.storage(&config("a")).await.unwrap();
        let other = cache.storage(&config("b")).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_concurrent_lookups_build_once() {
        let (cache, built) = cache(false, CacheSettings::default());

        let lookups: Vec<_> = (0..8)
            .map(|_| {
                let cache = cache.clone();
                tokio::spawn(async move { cache.storage(&config("shared")).await })
            })
            .collect();
        let mut storages = Vec::new();
        for lookup in lookups {
            storages.push(lookup.await.unwrap().unwrap());
        }

        assert_eq!(built.load(Ordering::SeqCst), 1);
        assert!(storages.iter().all(|storage| Arc::ptr_eq(storage, &storages[0])));
    }

    #[tokio::test]
    async fn test_construction_error_is_shared_and_not_cached() {
        let (cache, built) = cache(true, CacheSettings::default());

        let down = config("down");
        let (first, second) = tokio::join!(cache.storage(&down), cache.storage(&down));
        assert!(matches!(first, Err(StashError::Backend(ref m)) if m == "unreachable backend"));
        assert!(matches!(second, Err(StashError::Backend(ref m)) if m == "unreachable backend"));
        assert_eq!(built.load(Ordering::SeqCst), 1);

        assert!(cache.storage(&down).await.is_err());
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalid_type_fails_without_construction() {
        let (cache, built) = cache(false, CacheSettings::default());

        for backend in ["", "unknown"] {
            let result = cache.storage(&StorageConfig::new(backend)).await;
            assert!(matches!(result, Err(StashError::Config(_))));
        }
        assert_eq!(built.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let settings = CacheSettings {
            ttl: Duration::from_millis(50),
            max_entries: None,
        };
        let (cache, built) = cache(false, settings);

        let first = cache.storage(&config("a")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        let second = cache.storage(&config("a")).await.unwrap();

        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_all_and_single_invalidate() {
        let (cache, built) = cache(false, CacheSettings::default());

        let first = cache.storage(&config("a")).await.unwrap();
        assert!(matches!(
            cache.invalidate(&config("a")),
            Err(StashError::Unsupported(_))
        ));
        let still = cache.storage(&config("a")).await.unwrap();
        assert!(Arc::ptr_eq(&first, &still));

        cache.invalidate_all();
        let rebuilt = cache.storage(&config("a")).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &rebuilt));
        assert_eq!(built.load(Ordering::SeqCst), 2);
    }
}
