use async_trait::async_trait;
use keyring::Entry;

use super::{StorageBackend, StorageResult};

/// Storage backend keeping each item in the OS keychain.
///
/// Every key maps to one keychain entry under the configured service name.
/// Keychain calls block (some platforms prompt the user), so they run on
/// tokio's blocking pool.
#[derive(Debug, Clone)]
pub struct KeychainStorage {
    service: String,
}

impl KeychainStorage {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
        }
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    /// Run `op` against the entry for `key` on the blocking pool
    async fn with_entry<T, F>(&self, key: &str, op: F) -> StorageResult<T>
    where
        T: Send + 'static,
        F: FnOnce(Entry) -> StorageResult<T> + Send + 'static,
    {
        let service = self.service.clone();
        let key = key.to_string();
        tokio::task::spawn_blocking(move || op(Entry::new(&service, &key)?)).await?
    }
}

#[async_trait]
impl StorageBackend for KeychainStorage {
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        self.with_entry(key, |entry| match entry.get_password() {
            Ok(value) => Ok(Some(value)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e.into()),
        })
        .await
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        let value = value.to_string();
        self.with_entry(key, move |entry| Ok(entry.set_password(&value)?))
            .await
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.with_entry(key, |entry| match entry.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
            Err(e) => Err(e.into()),
        })
        .await
    }
}
