//! Factory configuration and builder.

use std::fmt::Debug;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use super::SubscriptionCache;
use crate::traits::StreamSource;

/// Default factory name used in logs and metric labels.
pub const DEFAULT_CACHE_NAME: &str = "default";

/// Configuration for a [`SubscriptionCache`].
///
/// ```rust
/// # use hvergelmir::CacheConfig;
/// let config = CacheConfig::new().name("account-notifications");
/// assert_eq!(config.name, "account-notifications");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Name used in tracing fields and the `cache` metric label.
    /// Default: `"default"`.
    pub name: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            name: DEFAULT_CACHE_NAME.to_owned(),
        }
    }
}

impl CacheConfig {
    /// Create a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the factory name.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// Formats the diagnostic for an abort against a missing entry.
pub(crate) type MissingEntryMessage<K> = Arc<dyn Fn(&K) -> String + Send + Sync>;

pub(crate) fn default_missing_entry_message<K: Debug>(key: &K) -> String {
    format!("no cache entry for key {key:?}")
}

/// Builder for [`SubscriptionCache`].
pub struct SubscriptionCacheBuilder<Src: StreamSource> {
    source: Src,
    config: CacheConfig,
    missing_entry_message: Option<MissingEntryMessage<Src::Key>>,
}

impl<Src: StreamSource> SubscriptionCacheBuilder<Src> {
    pub(crate) fn new(source: Src) -> Self {
        Self {
            source,
            config: CacheConfig::default(),
            missing_entry_message: None,
        }
    }

    /// Replace the whole configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the factory name used in logs and metric labels.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.config.name = name.into();
        self
    }

    /// Customise the diagnostic raised when an abort fires for a key that
    /// has no entry.
    pub fn missing_entry_message<F>(mut self, f: F) -> Self
    where
        F: Fn(&Src::Key) -> String + Send + Sync + 'static,
    {
        self.missing_entry_message = Some(Arc::new(f));
        self
    }

    pub fn build(self) -> SubscriptionCache<Src> {
        let missing_entry_message: MissingEntryMessage<Src::Key> = match self.missing_entry_message
        {
            Some(f) => f,
            None => Arc::new(default_missing_entry_message::<Src::Key>),
        };
        SubscriptionCache::from_parts(self.source, self.config, missing_entry_message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.name, DEFAULT_CACHE_NAME);
    }

    #[test]
    fn default_message_names_the_key() {
        assert_eq!(
            default_missing_entry_message(&"slots"),
            "no cache entry for key \"slots\""
        );
    }
}
