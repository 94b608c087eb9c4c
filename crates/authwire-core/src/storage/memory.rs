use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use super::{StorageBackend, StorageResult};

/// In-process storage backend.
/// Clone is cheap - clones share the same underlying map.
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    items: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a storage pre-populated with the given entries
    pub fn with_items<K, V>(items: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        let storage = Self::new();
        {
            let mut map = storage.lock();
            for (key, value) in items {
                map.insert(key.into(), value.into());
            }
        }
        storage
    }

    /// Synchronous read, mostly useful for inspecting state in tests
    pub fn get(&self, key: &str) -> Option<String> {
        self.lock().get(key).cloned()
    }

    pub fn insert(&self, key: impl Into<String>, value: impl Into<String>) {
        self.lock().insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, String>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn get_item(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.get(key))
    }

    async fn set_item(&self, key: &str, value: &str) -> StorageResult<()> {
        self.insert(key, value);
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> StorageResult<()> {
        self.lock().remove(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage_set_get_remove() {
        let storage = MemoryStorage::new();
        assert_eq!(storage.get_item("session").await.unwrap(), None);

        storage.set_item("session", "{}").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap().as_deref(), Some("{}"));

        storage.remove_item("session").await.unwrap();
        assert_eq!(storage.get_item("session").await.unwrap(), None);

        // Removing a missing key is fine
        storage.remove_item("session").await.unwrap();
    }

    #[tokio::test]
    async fn test_memory_storage_clones_share_state() {
        let storage = MemoryStorage::with_items([("a", "1")]);
        let clone = storage.clone();
        clone.set_item("b", "2").await.unwrap();

        assert_eq!(storage.len(), 2);
        assert_eq!(storage.get("b").as_deref(), Some("2"));
    }
}
