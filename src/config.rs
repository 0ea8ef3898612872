//! Engine configuration.

use serde::{Deserialize, Serialize};

use crate::error::PermissionsError;

pub const DEFAULT_MAX_UPDATE_RETRIES: usize = 10;
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 100_000;

/// Tunables for [`crate::PermissionEngine`].
///
/// Every field has a default, so an empty JSON object is a valid configuration:
///
/// ```rust
/// use pex_core::EngineConfig;
///
/// let config = EngineConfig::from_json_str(r#"{ "max_update_retries": 3 }"#).unwrap();
/// assert_eq!(config.max_update_retries, 3);
/// assert!(config.cache_enabled);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineConfig {
    /// Compare-and-swap retries after the first attempt before an update gives up.
    pub max_update_retries: usize,
    /// Memoize resolution results. Results are identical either way.
    pub cache_enabled: bool,
    /// Entry count at which the cache drops everything and starts over.
    pub cache_max_entries: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_update_retries: DEFAULT_MAX_UPDATE_RETRIES,
            cache_enabled: true,
            cache_max_entries: DEFAULT_CACHE_MAX_ENTRIES,
        }
    }
}

impl EngineConfig {
    pub fn from_json_str(text: &str) -> Result<Self, PermissionsError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn with_max_update_retries(mut self, retries: usize) -> Self {
        self.max_update_retries = retries;
        self
    }

    pub fn with_cache_enabled(mut self, enabled: bool) -> Self {
        self.cache_enabled = enabled;
        self
    }

    pub fn with_cache_max_entries(mut self, entries: usize) -> Self {
        self.cache_max_entries = entries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_document_uses_defaults() {
        let config = EngineConfig::from_json_str("{}").unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_update_retries, 10);
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let result = EngineConfig::from_json_str(r#"{ "max_retries": 3 }"#);
        assert!(matches!(result, Err(PermissionsError::InvalidFormat(_))));
    }

    #[test]
    fn test_builders() {
        let config = EngineConfig::default()
            .with_max_update_retries(0)
            .with_cache_enabled(false)
            .with_cache_max_entries(8);
        assert_eq!(config.max_update_retries, 0);
        assert!(!config.cache_enabled);
        assert_eq!(config.cache_max_entries, 8);
    }
}
