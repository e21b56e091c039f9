use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::sync::Arc;

use super::KeyValueStore;
use crate::errors::Result;

/// In-process key-value store
#[derive(Clone, Default)]
pub struct MemoryStore {
    entries: Arc<DashMap<String, Bytes>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Read back a value
    pub fn get(&self, key: &str) -> Option<Bytes> {
        self.entries.get(key).map(|v| v.value().clone())
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }

    /// Number of stored entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn put(&self, key: &str, value: Bytes) -> Result<()> {
        self.entries.insert(key.to_string(), value);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_replaces_value() {
        let store = MemoryStore::new();
        store.put("k", Bytes::from_static(b"one")).await.unwrap();
        store.put("k", Bytes::from_static(b"two")).await.unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("k"), Some(Bytes::from_static(b"two")));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }
}
