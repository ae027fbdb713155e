//! Store configuration.

use serde::{Deserialize, Serialize};

use stash_cache::CacheConfig;
use stash_core::constants::{DEFAULT_KEY_SEPARATOR, ENV_INITIAL_CAPACITY, ENV_KEY_SEPARATOR};
use stash_core::error::{Result, StashError};

/// Store configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Joins the resource name and rendered arguments into a key
    pub key_separator: String,
    /// Underlying cache configuration
    pub cache: CacheConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            key_separator: DEFAULT_KEY_SEPARATOR.into(),
            cache: CacheConfig::default(),
        }
    }
}

impl StoreConfig {
    /// Creates a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads configuration from the environment (and a `.env` file, if present).
    ///
    /// Reads `STASH_KEY_SEPARATOR` and `STASH_INITIAL_CAPACITY`; unset
    /// variables keep their defaults.
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut config = Self::default();

        if let Ok(separator) = std::env::var(ENV_KEY_SEPARATOR) {
            config.key_separator = separator;
        }

        if let Ok(raw) = std::env::var(ENV_INITIAL_CAPACITY) {
            config.cache.initial_capacity = raw.trim().parse().map_err(|_| {
                StashError::ConfigError(format!("{ENV_INITIAL_CAPACITY} must be an integer, got '{raw}'"))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Sets the key separator.
    pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
        self.key_separator = separator.into();
        self
    }

    /// Sets the preallocated cache capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.cache.initial_capacity = capacity;
        self
    }

    /// Checks the configuration for values that cannot produce usable keys.
    pub fn validate(&self) -> Result<()> {
        if self.key_separator.is_empty() {
            return Err(StashError::ConfigError("key separator must not be empty".into()));
        }
        Ok(())
    }
}
