//! Cache configuration
//!
//! Sizes for the decoded tile cache and the GPU texture cache, expressed in
//! entries. Configuration can be loaded from a TOML file, environment
//! variables, or created programmatically.

use std::fs;
use std::io;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::gpu::DEFAULT_TEXTURE_HIGH_WATER_MARK;

/// Default high-water mark of a source's decoded tile cache
pub const DEFAULT_TILE_CACHE_SIZE: usize = 512;

/// Environment variable overriding [`CacheConfig::tile_cache_size`]
pub const ENV_TILE_CACHE_SIZE: &str = "TESSERA_TILE_CACHE_SIZE";
/// Environment variable overriding [`CacheConfig::texture_cache_size`]
pub const ENV_TEXTURE_CACHE_SIZE: &str = "TESSERA_TEXTURE_CACHE_SIZE";

/// Configuration for the cache system.
///
/// A size of zero disables high-water-mark expiry for that cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// High-water mark of each tile source's decoded tile cache
    pub tile_cache_size: usize,
    /// High-water mark of the GPU texture cache
    pub texture_cache_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            tile_cache_size: DEFAULT_TILE_CACHE_SIZE,
            texture_cache_size: DEFAULT_TEXTURE_HIGH_WATER_MARK,
        }
    }
}

impl CacheConfig {
    pub fn new(tile_cache_size: usize, texture_cache_size: usize) -> Self {
        Self {
            tile_cache_size,
            texture_cache_size,
        }
    }

    /// Sets the decoded tile cache size.
    pub fn with_tile_cache_size(mut self, entries: usize) -> Self {
        self.tile_cache_size = entries;
        self
    }

    /// Sets the texture cache size.
    pub fn with_texture_cache_size(mut self, entries: usize) -> Self {
        self.texture_cache_size = entries;
        self
    }

    /// Loads configuration from environment variables over the defaults.
    ///
    /// Environment variables:
    /// - `TESSERA_TILE_CACHE_SIZE`: decoded tiles per source (default: 512)
    /// - `TESSERA_TEXTURE_CACHE_SIZE`: GPU textures (default: 1024)
    ///
    /// # Errors
    /// Returns an error if any environment variable contains an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Overrides fields from environment variables that are set.
    pub fn apply_env(mut self) -> Result<Self, ConfigError> {
        if let Some(value) = env_usize(ENV_TILE_CACHE_SIZE)? {
            self.tile_cache_size = value;
        }
        if let Some(value) = env_usize(ENV_TEXTURE_CACHE_SIZE)? {
            self.texture_cache_size = value;
        }
        Ok(self)
    }

    /// Loads configuration from a TOML file.
    ///
    /// Expected file format:
    /// ```toml
    /// tile_cache_size = 512
    /// texture_cache_size = 1024
    /// ```
    ///
    /// Missing keys keep their defaults.
    ///
    /// # Errors
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path.as_ref())?;
        Self::from_toml(&contents)
    }

    /// Parses configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(toml_str)?)
    }

    /// Saves configuration to a TOML file.
    ///
    /// # Errors
    /// Returns an error if the file cannot be written.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        fs::write(path.as_ref(), self.to_toml()?)?;
        Ok(())
    }

    /// Converts configuration to TOML format.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string(self)?)
    }
}

/// Reads an unsigned integer from the environment, `None` when unset.
pub fn env_usize(name: &str) -> Result<Option<usize>, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse::<usize>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(name.to_string())),
        Err(_) => Ok(None),
    }
}

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Invalid value for a configuration parameter
    #[error("invalid value for configuration key: {0}")]
    InvalidValue(String),

    /// I/O error reading or writing configuration file
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;

    #[test]
    fn test_default_config() {
        let config = CacheConfig::default();
        assert_eq!(config.tile_cache_size, 512);
        assert_eq!(config.texture_cache_size, 1024);
    }

    #[test]
    fn test_builder_methods() {
        let config = CacheConfig::default()
            .with_tile_cache_size(64)
            .with_texture_cache_size(0);

        assert_eq!(config, CacheConfig::new(64, 0));
    }

    #[test]
    #[serial]
    fn test_from_env() {
        let _guard = EnvGuard::new(&[ENV_TILE_CACHE_SIZE, ENV_TEXTURE_CACHE_SIZE]);

        env::set_var(ENV_TILE_CACHE_SIZE, "128");
        env::set_var(ENV_TEXTURE_CACHE_SIZE, "256");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.tile_cache_size, 128);
        assert_eq!(config.texture_cache_size, 256);
    }

    #[test]
    #[serial]
    fn test_from_env_partial() {
        let _guard = EnvGuard::new(&[ENV_TILE_CACHE_SIZE, ENV_TEXTURE_CACHE_SIZE]);

        env::remove_var(ENV_TEXTURE_CACHE_SIZE);
        env::set_var(ENV_TILE_CACHE_SIZE, "64");

        let config = CacheConfig::from_env().unwrap();
        assert_eq!(config.tile_cache_size, 64);
        assert_eq!(config.texture_cache_size, 1024); // default
    }

    #[test]
    #[serial]
    fn test_from_env_invalid() {
        let _guard = EnvGuard::new(&[ENV_TILE_CACHE_SIZE]);

        env::set_var(ENV_TILE_CACHE_SIZE, "not_a_number");
        let result = CacheConfig::from_env();
        assert!(matches!(result, Err(ConfigError::InvalidValue(key)) if key == ENV_TILE_CACHE_SIZE));
    }

    // Helper to save and restore environment variables
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new(var_names: &[&str]) -> Self {
            let vars = var_names
                .iter()
                .map(|name| (name.to_string(), env::var(name).ok()))
                .collect();
            Self { vars }
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (name, value) in &self.vars {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    #[test]
    fn test_from_toml_partial() {
        let config = CacheConfig::from_toml("tile_cache_size = 32\n").unwrap();
        assert_eq!(config.tile_cache_size, 32);
        assert_eq!(config.texture_cache_size, 1024); // default
    }

    #[test]
    fn test_from_toml_invalid() {
        let result = CacheConfig::from_toml("tile_cache_size = \"many\"\n");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn test_file_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("cache.toml");

        let config = CacheConfig::new(100, 200);
        config.save_to_file(&config_path).unwrap();

        let loaded = CacheConfig::from_file(&config_path).unwrap();
        assert_eq!(config, loaded);
    }

    #[test]
    fn test_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = CacheConfig::from_file(dir.path().join("absent.toml"));
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }
}
