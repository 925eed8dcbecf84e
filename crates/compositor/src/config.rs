//! Render configuration
//!
//! Load throttling and fade settings, combined with the cache sizes into a
//! [`RenderConfig`]. Same sources as the cache configuration: defaults,
//! builder methods, environment variables and TOML files.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tessera_cache::config::env_usize;
use tessera_cache::{CacheConfig, ConfigError};
use tracing::info;

/// Environment variable overriding [`LoadingConfig::max_total_loading`]
pub const ENV_MAX_TOTAL_LOADING: &str = "TESSERA_MAX_TOTAL_LOADING";
/// Environment variable overriding [`LoadingConfig::max_new_loads`]
pub const ENV_MAX_NEW_LOADS: &str = "TESSERA_MAX_NEW_LOADS";
/// Environment variable overriding [`LoadingConfig::transition_ms`]
pub const ENV_TRANSITION_MS: &str = "TESSERA_TRANSITION_MS";

/// Tile load throttling and fade duration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadingConfig {
    /// Soft cap on loads in flight
    pub max_total_loading: usize,
    /// Loads started per frame at most
    pub max_new_loads: usize,
    /// Cap on loads in flight while the user is interacting
    pub interacting_max_total_loading: usize,
    /// Loads started per frame while the user is interacting
    pub interacting_max_new_loads: usize,
    /// Tile fade-in duration in milliseconds, 0 disables fading
    pub transition_ms: u64,
}

impl Default for LoadingConfig {
    fn default() -> Self {
        Self {
            max_total_loading: 16,
            max_new_loads: 8,
            interacting_max_total_loading: 4,
            interacting_max_new_loads: 2,
            transition_ms: 250,
        }
    }
}

impl LoadingConfig {
    pub fn with_limits(mut self, max_total_loading: usize, max_new_loads: usize) -> Self {
        self.max_total_loading = max_total_loading;
        self.max_new_loads = max_new_loads;
        self
    }

    pub fn with_interacting_limits(mut self, max_total_loading: usize, max_new_loads: usize) -> Self {
        self.interacting_max_total_loading = max_total_loading;
        self.interacting_max_new_loads = max_new_loads;
        self
    }

    pub fn with_transition(mut self, transition: Duration) -> Self {
        self.transition_ms = transition.as_millis() as u64;
        self
    }

    /// `(max_total_loading, max_new_loads)` for the current interaction state
    pub fn limits(&self, interacting: bool) -> (usize, usize) {
        if interacting {
            (self.interacting_max_total_loading, self.interacting_max_new_loads)
        } else {
            (self.max_total_loading, self.max_new_loads)
        }
    }

    pub fn transition(&self) -> Duration {
        Duration::from_millis(self.transition_ms)
    }

    /// Overrides fields from environment variables that are set.
    ///
    /// Environment variables:
    /// - `TESSERA_MAX_TOTAL_LOADING`: loads in flight (default: 16)
    /// - `TESSERA_MAX_NEW_LOADS`: loads started per frame (default: 8)
    /// - `TESSERA_TRANSITION_MS`: fade duration (default: 250)
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_usize(ENV_MAX_TOTAL_LOADING)? {
            self.max_total_loading = value;
        }
        if let Some(value) = env_usize(ENV_MAX_NEW_LOADS)? {
            self.max_new_loads = value;
        }
        if let Some(value) = env_usize(ENV_TRANSITION_MS)? {
            self.transition_ms = value as u64;
        }
        Ok(self)
    }
}

/// Complete configuration of a render loop
///
/// Expected file format:
/// ```toml
/// [cache]
/// tile_cache_size = 512
/// texture_cache_size = 1024
///
/// [loading]
/// max_total_loading = 16
/// max_new_loads = 8
/// transition_ms = 250
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub cache: CacheConfig,
    pub loading: LoadingConfig,
}

impl RenderConfig {
    pub fn new(cache: CacheConfig, loading: LoadingConfig) -> Self {
        Self { cache, loading }
    }

    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }

    pub fn with_loading(mut self, loading: LoadingConfig) -> Self {
        self.loading = loading;
        self
    }

    /// Defaults overridden by every `TESSERA_*` variable that is set
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    pub fn apply_env(self) -> Result<Self, ConfigError> {
        Ok(Self {
            cache: self.cache.apply_env()?,
            loading: self.loading.apply_env()?,
        })
    }

    /// Loads configuration from a TOML file; missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)?;
        let config = Self::from_toml(&contents)?;
        info!(path = %path.display(), "loaded render configuration");
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}
