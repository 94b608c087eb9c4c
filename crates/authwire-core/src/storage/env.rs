use async_trait::async_trait;
use tracing::debug;

use super::{StorageBackend, StorageError, StorageResult};

/// Read-only storage backed by the process environment.
///
/// A key `accesstoken` with prefix `AUTHWIRE_` is read from the variable
/// `AUTHWIRE_ACCESSTOKEN`. Writes are rejected, which makes this backend a
/// session-scoped token source: values live exactly as long as the process
/// environment that supplied them.
#[derive(Debug, Clone)]
pub struct EnvStorage {
    prefix: String,
}

impl EnvStorage {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load a `.env` file (if present) into the environment first
    pub fn with_dotenv(prefix: impl Into<String>) -> Self {
        if let Err(e) = dotenvy::dotenv() {
            debug!(error = %e, "No .env file loaded");
        }
        Self::new(prefix)
    }

    pub fn var_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key.to_ascii_uppercase())
    }
}

#[async_trait]
impl StorageBackend for EnvStorage {
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(std::env::var(self.var_name(key)).ok())
    }

    async fn set_item(&self, key: &str, _value: &str) -> StorageResult<()> {
        Err(StorageError::ReadOnly(self.var_name(key)))
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        Err(StorageError::ReadOnly(self.var_name(key)))
    }
}
