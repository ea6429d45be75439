//! Backend construction from configuration records.

pub mod factory;

pub use factory::{StorageFactory, StorageRegistry};

use crate::error::{Result, StashError};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::hash::{Hash, Hasher};

/// Configuration of a single storage backend.
///
/// `type` selects the backend; every other field is passed to its factory.
/// Two records are equal when they carry the same fields with the same
/// values, regardless of field order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(rename = "type", default)]
    pub backend: String,

    #[serde(flatten)]
    pub params: Map<String, Value>,
}

impl StorageConfig {
    pub fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            params: Map::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Backend type, trimmed and lower-cased.
    pub fn resolve_backend(&self) -> Result<String> {
        let backend = self.backend.trim().to_ascii_lowercase();
        if backend.is_empty() {
            return Err(StashError::Config(
                "storage type cannot be empty".to_string(),
            ));
        }
        Ok(backend)
    }

    pub fn string(&self, name: &str) -> Result<String> {
        self.optional_string(name)?.ok_or_else(|| {
            StashError::Config(format!(
                "'{}' is required for {} storage",
                name, self.backend
            ))
        })
    }

    /// Reads a scalar field as text. Numbers and booleans are rendered, blank
    /// strings count as absent.
    pub fn optional_string(&self, name: &str) -> Result<Option<String>> {
        match self.params.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(text)) => {
                let text = text.trim();
                Ok((!text.is_empty()).then(|| text.to_string()))
            }
            Some(Value::Number(number)) => Ok(Some(number.to_string())),
            Some(Value::Bool(flag)) => Ok(Some(flag.to_string())),
            Some(other) => Err(self.invalid(name, other)),
        }
    }

    /// Reads a list field given either as a sequence or as comma separated text.
    pub fn string_list(&self, name: &str) -> Result<Vec<String>> {
        let items = match self.params.get(name) {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(text)) => text.split(',').map(str::to_string).collect(),
            Some(Value::Array(values)) => values
                .iter()
                .map(|value| match value {
                    Value::String(text) => Ok(text.clone()),
                    other => Err(self.invalid(name, other)),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => return Err(self.invalid(name, other)),
        };
        Ok(items
            .into_iter()
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect())
    }

    pub fn bool_or(&self, name: &str, default: bool) -> Result<bool> {
        match self.optional_string(name)? {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| {
                StashError::Config(format!("'{}' must be true or false, got '{}'", name, text))
            }),
        }
    }

    pub fn usize_or(&self, name: &str, default: usize) -> Result<usize> {
        match self.optional_string(name)? {
            None => Ok(default),
            Some(text) => text.parse().map_err(|_| {
                StashError::Config(format!(
                    "'{}' must be a non-negative integer, got '{}'",
                    name, text
                ))
            }),
        }
    }

    fn invalid(&self, name: &str, value: &Value) -> StashError {
        StashError::Config(format!(
            "unsupported value for '{}' of {} storage: {}",
            name, self.backend, value
        ))
    }

    /// Canonical rendering used for equality and hashing.
    fn fingerprint(&self) -> String {
        let sorted: BTreeMap<&String, &Value> = self.params.iter().collect();
        let params = serde_json::to_string(&sorted).unwrap_or_default();
        format!("{}\u{0}{}", self.backend, params)
    }
}

impl PartialEq for StorageConfig {
    fn eq(&self, other: &Self) -> bool {
        self.fingerprint() == other.fingerprint()
    }
}

impl Eq for StorageConfig {}

impl Hash for StorageConfig {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.fingerprint().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(value: Value) -> StorageConfig {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_deserialize_type_and_params() {
        let config = config(json!({"type": "fs", "path": "/var/stash"}));
        assert_eq!(config.backend, "fs");
        assert_eq!(config.string("path").unwrap(), "/var/stash");
    }

    #[test]
    fn test_equality_ignores_field_order() {
        let first = config(json!({"type": "s3", "bucket": "b", "region": "r"}));
        let second = config(json!({"region": "r", "bucket": "b", "type": "s3"}));
        let third = config(json!({"type": "s3", "bucket": "other", "region": "r"}));

        assert_eq!(first, second);
        assert_ne!(first, third);

        let mut set = std::collections::HashSet::new();
        set.insert(first);
        assert!(set.contains(&second));
    }

    #[test]
    fn test_resolve_backend() {
        assert_eq!(
            StorageConfig::new("  FS ").resolve_backend().unwrap(),
            "fs"
        );
        assert!(matches!(
            StorageConfig::new("  ").resolve_backend(),
            Err(StashError::Config(_))
        ));
    }

    #[test]
    fn test_missing_required_field() {
        let error = StorageConfig::new("fs").string("path").unwrap_err();
        assert!(matches!(error, StashError::Config(ref message) if message.contains("path")));
    }

    #[test]
    fn test_string_list_accepts_sequence_or_text() {
        let listed = config(json!({"type": "etcd", "endpoints": ["a:2379", " b:2379 "]}));
        let joined = config(json!({"type": "etcd", "endpoints": "a:2379, b:2379,"}));

        assert_eq!(listed.string_list("endpoints").unwrap(), vec!["a:2379", "b:2379"]);
        assert_eq!(joined.string_list("endpoints").unwrap(), vec!["a:2379", "b:2379"]);
        assert!(
            config(json!({"type": "etcd", "endpoints": {"a": 1}}))
                .string_list("endpoints")
                .is_err()
        );
    }

    #[test]
    fn test_scalar_helpers() {
        let config = StorageConfig::new("s3")
            .with("allow_http", true)
            .with("max_size", 1024)
            .with("broken", "maybe");

        assert!(config.bool_or("allow_http", false).unwrap());
        assert!(!config.bool_or("missing", false).unwrap());
        assert!(config.bool_or("broken", false).is_err());
        assert_eq!(config.usize_or("max_size", 1).unwrap(), 1024);
        assert_eq!(config.usize_or("missing", 7).unwrap(), 7);
    }
}
