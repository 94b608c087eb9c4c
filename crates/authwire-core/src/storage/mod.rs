//! Pluggable key/value storage for persisted session state.
//!
//! This module provides the `StorageBackend` trait the session store writes
//! snapshots through, plus the backends shipped with the crate:
//! - `MemoryStorage`: shared in-process map
//! - `FileStorage`: one JSON file per key in a cache directory
//! - `KeychainStorage`: OS-level credential storage via keyring
//! - `EnvStorage`: read-only process environment, used as a session-scoped token source

pub mod env;
pub mod file;
pub mod keychain;
pub mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

pub use env::EnvStorage;
pub use file::FileStorage;
pub use keychain::KeychainStorage;
pub use memory::MemoryStorage;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage is read-only: cannot modify {0}")]
    ReadOnly(String),

    #[error("Invalid storage key: {0:?}")]
    InvalidKey(String),

    #[error("Storage task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Asynchronous string key/value storage.
///
/// `get_item` returns `Ok(None)` for keys that were never written or have
/// been removed. Removing a missing key is not an error.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()>;

    async fn remove_item(&self, key: &str) -> StorageResult<()>;
}

/// A storage backend plus the name session snapshots are written under.
#[derive(Clone)]
pub struct Persistence {
    pub name: String,
    pub backend: Arc<dyn StorageBackend>,
}

impl Persistence {
    pub fn new(name: impl Into<String>, backend: impl StorageBackend + 'static) -> Self {
        Self::shared(name, Arc::new(backend))
    }

    /// Build from a backend that is also used elsewhere.
    pub fn shared(name: impl Into<String>, backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            name: name.into(),
            backend,
        }
    }
}

impl std::fmt::Debug for Persistence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Persistence")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}
