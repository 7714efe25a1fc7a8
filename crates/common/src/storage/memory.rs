use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

use super::{verify, StorageError, StorageProvider, SweepableStorage};
use crate::hash::Key;

/// In-memory storage provider using a BTreeMap
#[derive(Debug, Clone, Default)]
pub struct MemoryStorage {
    inner: Arc<RwLock<BTreeMap<Key, Bytes>>>,
}

fn poisoned(e: impl std::fmt::Display) -> StorageError {
    StorageError::Backend(format!("failed to acquire storage lock: {}", e))
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored nodes
    pub fn len(&self) -> usize {
        self.inner.read().map(|map| map.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bytes held, counting each key once
    pub fn total_bytes(&self) -> u64 {
        self.inner
            .read()
            .map(|map| map.values().map(|b| b.len() as u64).sum())
            .unwrap_or(0)
    }

    /// Every stored key with its encoded length.
    pub fn entries(&self) -> Vec<(Key, usize)> {
        self.inner
            .read()
            .map(|map| map.iter().map(|(k, v)| (*k, v.len())).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl StorageProvider for MemoryStorage {
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<bool, StorageError> {
        verify(key, &bytes)?;
        let mut map = self.inner.write().map_err(poisoned)?;
        match map.get(key) {
            Some(existing) if *existing == bytes => Ok(false),
            Some(_) => {
                tracing::error!(key = %key, "refusing to overwrite key with different bytes");
                Err(StorageError::Integrity {
                    key: *key,
                    reason: "key already holds different bytes".to_string(),
                })
            }
            None => {
                map.insert(*key, bytes);
                Ok(true)
            }
        }
    }

    async fn get(&self, key: &Key) -> Result<Bytes, StorageError> {
        let map = self.inner.read().map_err(poisoned)?;
        map.get(key).cloned().ok_or(StorageError::NotFound(*key))
    }

    async fn has(&self, key: &Key) -> Result<bool, StorageError> {
        let map = self.inner.read().map_err(poisoned)?;
        Ok(map.contains_key(key))
    }
}

#[async_trait]
impl SweepableStorage for MemoryStorage {
    async fn list_keys(&self, after: Option<Key>, limit: usize) -> Result<Vec<Key>, StorageError> {
        use std::ops::Bound;

        let map = self.inner.read().map_err(poisoned)?;
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(map
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(k, _)| *k)
            .collect())
    }

    async fn delete(&self, key: &Key) -> Result<bool, StorageError> {
        let mut map = self.inner.write().map_err(poisoned)?;
        Ok(map.remove(key).is_some())
    }
}
