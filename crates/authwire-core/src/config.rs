//! Client configuration management.
//!
//! This module handles loading and saving the settings an application uses
//! to build its `AuthenticatedClient`: base URL, timeout, retryable statuses,
//! default headers and the name the session snapshot is persisted under.
//!
//! Configuration is stored at `<config dir>/<app>/config.json`. The
//! `AUTHWIRE_BASE_URL` and `AUTHWIRE_TIMEOUT_SECS` environment variables
//! (or a `.env` file) override what the file says.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::api::{
    ClientOptions, RefreshHandler, TransportConfig, DEFAULT_RETRYABLE_STATUS_CODES,
    REQUEST_TIMEOUT_SECS,
};
use crate::storage::{Persistence, StorageBackend};

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Overrides `base_url`
pub const BASE_URL_ENV: &str = "AUTHWIRE_BASE_URL";

/// Overrides `timeout_secs`
pub const TIMEOUT_ENV: &str = "AUTHWIRE_TIMEOUT_SECS";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub base_url: Option<String>,
    pub timeout_secs: u64,
    pub retryable_status_codes: Vec<u16>,
    pub default_headers: BTreeMap<String, String>,
    /// Storage key for the session snapshot; `None` disables persistence
    pub persistence_name: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: REQUEST_TIMEOUT_SECS,
            retryable_status_codes: DEFAULT_RETRYABLE_STATUS_CODES.to_vec(),
            default_headers: BTreeMap::new(),
            persistence_name: None,
        }
    }
}

impl ClientConfig {
    /// Load the app's config file, then apply environment overrides
    pub fn load(app_name: &str) -> Result<Self> {
        let mut config = Self::load_from(&Self::config_path(app_name)?)?;
        config.apply_env();
        Ok(config)
    }

    /// Read a config file; a missing file yields the defaults
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "No config file, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config {}", path.display()))
    }

    pub fn save(&self, app_name: &str) -> Result<()> {
        self.save_to(&Self::config_path(app_name)?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path(app_name: &str) -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(app_name).join(CONFIG_FILE))
    }

    /// Apply `.env` and process environment overrides
    pub fn apply_env(&mut self) {
        // Load .env file if present (silently ignore if not found)
        let _ = dotenvy::dotenv();
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(base_url) = lookup(BASE_URL_ENV).filter(|v| !v.is_empty()) {
            self.base_url = Some(base_url);
        }
        if let Some(timeout) = lookup(TIMEOUT_ENV) {
            match timeout.trim().parse() {
                Ok(secs) => self.timeout_secs = secs,
                Err(_) => warn!(value = %timeout, "Ignoring invalid {}", TIMEOUT_ENV),
            }
        }
    }

    pub fn transport_config(&self) -> TransportConfig {
        let mut config = TransportConfig::default().with_timeout(Duration::from_secs(self.timeout_secs));
        config.base_url = self.base_url.clone();
        config
    }

    /// Client options with this config applied; `default_headers` must be valid HTTP headers
    pub fn client_options(&self, refresh: impl RefreshHandler + 'static) -> Result<ClientOptions> {
        let mut headers = HeaderMap::new();
        for (name, value) in &self.default_headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("Invalid default header name {:?}", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("Invalid value for default header {}", name))?;
            headers.insert(name, value);
        }

        Ok(ClientOptions::new(refresh)
            .with_transport_config(self.transport_config())
            .with_retryable_status_codes(self.retryable_status_codes.iter().copied())
            .with_default_headers(headers))
    }

    /// Persistence over `backend` under `persistence_name`, if one is configured
    pub fn persistence(&self, backend: Arc<dyn StorageBackend>) -> Option<Persistence> {
        self.persistence_name
            .as_ref()
            .map(|name| Persistence::shared(name.clone(), backend))
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use tempfile::TempDir;

    use super::*;
    use crate::storage::MemoryStorage;

    fn refresh() -> impl RefreshHandler {
        |token: String| async move { Ok::<_, anyhow::Error>(token) }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let config = ClientConfig::load_from(&dir.path().join("missing.json")).unwrap();
        assert_eq!(config, ClientConfig::default());
        assert_eq!(config.retryable_status_codes, vec![401, 498]);
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("app").join(CONFIG_FILE);
        let mut config = ClientConfig {
            base_url: Some("https://api.example.com".into()),
            persistence_name: Some("session".into()),
            ..Default::default()
        };
        config.default_headers.insert("x-client".into(), "cli".into());

        config.save_to(&path).unwrap();
        assert_eq!(ClientConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, r#"{"timeout_secs": 5}"#).unwrap();

        let config = ClientConfig::load_from(&path).unwrap();
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.retryable_status_codes, vec![401, 498]);
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "not json").unwrap();
        assert!(ClientConfig::load_from(&path).is_err());
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> =
            HashMap::from([(BASE_URL_ENV, "https://env.example.com"), (TIMEOUT_ENV, "12")]);
        let mut config = ClientConfig::default();
        config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.base_url.as_deref(), Some("https://env.example.com"));
        assert_eq!(config.timeout_secs, 12);

        let bad: HashMap<&str, &str> = HashMap::from([(TIMEOUT_ENV, "soon")]);
        config.apply_overrides(|name| bad.get(name).map(|v| v.to_string()));
        assert_eq!(config.timeout_secs, 12);
    }

    #[test]
    fn test_client_options() {
        let mut config = ClientConfig {
            base_url: Some("https://api.example.com".into()),
            timeout_secs: 7,
            retryable_status_codes: vec![401],
            ..Default::default()
        };
        config.default_headers.insert("x-client".into(), "cli".into());

        let options = config.client_options(refresh()).unwrap();
        assert_eq!(options.transport_config.base_url.as_deref(), Some("https://api.example.com"));
        assert_eq!(options.transport_config.timeout, Duration::from_secs(7));
        assert_eq!(options.retryable_status_codes.len(), 1);
        assert!(options.retryable_status_codes.contains(&401));
        assert_eq!(options.default_headers["x-client"], "cli");

        config.default_headers.insert("bad header".into(), "x".into());
        assert!(config.client_options(refresh()).is_err());
    }

    #[test]
    fn test_persistence() {
        let backend: Arc<dyn StorageBackend> = Arc::new(MemoryStorage::new());
        assert!(ClientConfig::default().persistence(backend.clone()).is_none());

        let config = ClientConfig {
            persistence_name: Some("session".into()),
            ..Default::default()
        };
        assert_eq!(config.persistence(backend).unwrap().name, "session");
    }
}
