//! Application configuration management.
//!
//! This module handles loading and saving the application configuration,
//! which includes the API base URL, request timeout, credential storage
//! backend and the last e-mail used to sign in.
//!
//! Configuration is stored at `~/.config/gymtrack/config.json`. The
//! `GYMTRACK_API_URL` and `GYMTRACK_STORE` environment variables override
//! the stored values.

use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::api::client::DEFAULT_TIMEOUT_SECS;
use crate::auth::{CredentialStore, FileCredentialStore, KeyringCredentialStore};

/// Application name used for config/data directory paths
const APP_NAME: &str = "gymtrack";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_API_BASE_URL: &str = "http://localhost:3333";

const ENV_API_URL: &str = "GYMTRACK_API_URL";
const ENV_STORE: &str = "GYMTRACK_STORE";

/// Where session credentials are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreKind {
    /// JSON files in the data directory
    #[default]
    File,
    /// The OS keychain
    Keyring,
}

impl FromStr for StoreKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "file" => Ok(StoreKind::File),
            "keyring" | "keychain" => Ok(StoreKind::Keyring),
            other => Err(anyhow::anyhow!("Unknown credential store: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub api_base_url: String,
    pub request_timeout_secs: u64,
    pub store: StoreKind,
    pub last_email: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            store: StoreKind::default(),
            last_email: None,
        }
    }
}

impl Config {
    /// Load the stored config and apply environment overrides
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            serde_json::from_str(&contents).context("Failed to parse config file")?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(url) = var(ENV_API_URL).filter(|u| !u.is_empty()) {
            self.api_base_url = url;
        }
        if let Some(store) = var(ENV_STORE).filter(|s| !s.is_empty()) {
            self.store = store.parse()?;
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn data_dir(&self) -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find data directory"))?;
        Ok(data_dir.join(APP_NAME))
    }

    /// Build the configured credential store
    pub fn credential_store(&self) -> Result<Arc<dyn CredentialStore>> {
        Ok(match self.store {
            StoreKind::File => Arc::new(FileCredentialStore::new(self.data_dir()?)),
            StoreKind::Keyring => Arc::new(KeyringCredentialStore::new()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_service() {
        let config = Config::default();
        assert_eq!(config.api_base_url, "http://localhost:3333");
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.store, StoreKind::File);
    }

    #[test]
    fn test_partial_config_file() {
        let config: Config = serde_json::from_str(r#"{"store": "keyring"}"#).expect("parse");
        assert_eq!(config.store, StoreKind::Keyring);
        assert_eq!(config.api_base_url, DEFAULT_API_BASE_URL);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_env(|key| match key {
                ENV_API_URL => Some("https://gym.example.com".to_string()),
                ENV_STORE => Some("Keychain".to_string()),
                _ => None,
            })
            .expect("apply env");
        assert_eq!(config.api_base_url, "https://gym.example.com");
        assert_eq!(config.store, StoreKind::Keyring);

        let err = Config::default().apply_env(|key| (key == ENV_STORE).then(|| "cloud".to_string()));
        assert!(err.is_err());
    }
}
