//! Application configuration management.
//!
//! Holds the API base URL, where the refresh token is persisted, timeouts and
//! the last used username.
//!
//! Configuration is stored at `~/.config/tokenkeep/config.json`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::auth::{
    FileStorage, KeyringStorage, MemoryStorage, RefreshStorage, SessionControllerBuilder,
};
use crate::SessionController;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "tokenkeep";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Environment variable overriding the API base URL
pub const API_URL_ENV: &str = "TOKENKEEP_API_URL";

const DEFAULT_API_URL: &str = "http://localhost:5000/api";

/// Matches the request timeout: a renewal is a single request.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// A zero timeout would fail every request and end every session on renewal.
const MIN_TIMEOUT_SECS: u64 = 1;

/// Where the refresh token is kept between runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    /// OS keychain
    #[default]
    Keyring,
    /// JSON file in the cache directory
    File,
    /// Not persisted
    Memory,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub storage: StorageBackend,
    pub request_timeout_secs: u64,
    pub renewal_timeout_secs: u64,
    pub last_username: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_URL.to_string(),
            storage: StorageBackend::default(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            renewal_timeout_secs: DEFAULT_TIMEOUT_SECS,
            last_username: None,
        }
    }
}

impl Config {
    /// Load from the user config directory, then apply environment overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path()?)?;
        config.apply_env();
        Ok(config)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file {}", path.display()))
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var(API_URL_ENV) {
            if !url.trim().is_empty() {
                self.api_base_url = url;
            }
        }
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(MIN_TIMEOUT_SECS))
    }

    pub fn renewal_timeout(&self) -> Duration {
        Duration::from_secs(self.renewal_timeout_secs.max(MIN_TIMEOUT_SECS))
    }

    pub fn refresh_storage(&self) -> Result<Arc<dyn RefreshStorage>> {
        Ok(match self.storage {
            StorageBackend::Keyring => Arc::new(KeyringStorage::new()),
            StorageBackend::File => Arc::new(FileStorage::new(self.cache_dir()?)),
            StorageBackend::Memory => Arc::new(MemoryStorage::new()),
        })
    }

    pub fn session_builder(&self) -> Result<SessionControllerBuilder> {
        Ok(SessionController::builder(self.api_base_url.clone())
            .storage(self.refresh_storage()?)
            .request_timeout(self.request_timeout())
            .renewal_timeout(self.renewal_timeout()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let path = std::env::temp_dir().join("tokenkeep-no-such-dir/config.json");
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.api_base_url, DEFAULT_API_URL);
        assert_eq!(config.storage, StorageBackend::Keyring);
        assert_eq!(config.renewal_timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = std::env::temp_dir().join(format!("tokenkeep-config-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, r#"{"storage":"file","renewal_timeout_secs":5}"#).unwrap();

        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.storage, StorageBackend::File);
        assert_eq!(config.renewal_timeout(), Duration::from_secs(5));
        assert_eq!(config.request_timeout_secs, DEFAULT_TIMEOUT_SECS);

        let mut updated = config.clone();
        updated.last_username = Some("alice".into());
        updated.save_to(&path).unwrap();
        let reloaded = Config::load_from(&path).unwrap();
        assert_eq!(reloaded.last_username.as_deref(), Some("alice"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_zero_timeouts_are_clamped() {
        let config: Config =
            serde_json::from_str(r#"{"request_timeout_secs":0,"renewal_timeout_secs":0}"#).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_secs(MIN_TIMEOUT_SECS));
        assert_eq!(config.renewal_timeout(), Duration::from_secs(MIN_TIMEOUT_SECS));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = std::env::temp_dir().join(format!("tokenkeep-badcfg-{}", std::process::id()));
        let path = dir.join(CONFIG_FILE);
        std::fs::create_dir_all(&dir).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(Config::load_from(&path).is_err());

        let _ = std::fs::remove_dir_all(&dir);
    }
}
