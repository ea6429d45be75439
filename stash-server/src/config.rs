use serde::{Deserialize, Serialize};
use stash_core::{CacheSettings, Result, StashError, StorageConfig};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    pub storage: StorageConfig,
    #[serde(default)]
    pub cache: Option<CacheConfig>,
}

/// Overrides of the storage cache settings taken from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub ttl_ms: Option<u64>,
    #[serde(default)]
    pub max_entries: Option<u64>,
}

fn default_bind_addr() -> String {
    "127.0.0.1:8080".to_string()
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(::config::File::with_name(path))
            .add_source(::config::Environment::with_prefix("STASH").separator("__"))
            .build()
            .map_err(|e| StashError::Config(e.to_string()))?;

        let config: Config = settings
            .try_deserialize()
            .map_err(|e| StashError::Config(e.to_string()))?;

        config.storage.resolve_backend()?;
        Ok(config)
    }

    /// Environment defaults with the file's `cache` section applied on top.
    pub fn cache_settings(&self) -> Result<CacheSettings> {
        let mut settings = CacheSettings::from_env()?;
        if let Some(cache) = &self.cache {
            if let Some(ttl_ms) = cache.ttl_ms {
                settings.ttl = Duration::from_millis(ttl_ms);
            }
            if let Some(max_entries) = cache.max_entries {
                settings = settings.with_max_entries(max_entries);
            }
        }
        Ok(settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_load_yaml() {
        let file = write_config(
            "bind_addr: 0.0.0.0:9000\nstorage:\n  type: fs\n  path: /var/lib/stash\ncache:\n  ttl_ms: 1000\n  max_entries: 16\n",
        );

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.storage.backend, "fs");
        assert_eq!(config.storage.string("path").unwrap(), "/var/lib/stash");

        let settings = config.cache_settings().unwrap();
        assert_eq!(settings.ttl, Duration::from_millis(1000));
        assert_eq!(settings.max_entries, Some(16));
    }

    #[test]
    fn test_defaults() {
        let file = write_config("storage:\n  type: in-memory\n");

        let config = Config::from_file(file.path().to_str().unwrap()).unwrap();

        assert_eq!(config.bind_addr, "127.0.0.1:8080");
        assert!(config.cache.is_none());
    }

    #[test]
    fn test_empty_storage_type_is_rejected() {
        let file = write_config("storage:\n  type: \"\"\n");
        assert!(matches!(
            Config::from_file(file.path().to_str().unwrap()),
            Err(StashError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            Config::from_file("/nonexistent/stash.yaml"),
            Err(StashError::Config(_))
        ));
    }
}
