//! Byte storage for encoded nodes.
//!
//! A [`StorageProvider`] is a flat key/value namespace of node encodings
//! keyed by their digest. Providers are interchangeable and stack:
//!
//! - [`MemoryStorage`]: process local map, used by tests and ephemeral stores
//! - [`ObjectStorage`]: SQLite metadata + object storage via `casket-object-store`
//! - [`RetryingStorage`]: backoff on transient failures of any provider

mod memory;
mod object;
mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use crate::hash::Key;
use crate::node::{CodecError, Node};

pub use memory::MemoryStorage;
pub use object::ObjectStorage;
pub use retry::RetryingStorage;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("no bytes stored for {0}")]
    NotFound(Key),
    /// Bytes do not match their key, or a key was written twice with
    ///  different bytes
    #[error("integrity violation for {key}: {reason}")]
    Integrity { key: Key, reason: String },
    #[error("corrupt node {key}: {source}")]
    Corrupt {
        key: Key,
        #[source]
        source: CodecError,
    },
    #[error("transient storage error: {0}")]
    Transient(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transient(_))
    }
}

/// Reject bytes that do not hash to `key`.
pub(crate) fn verify(key: &Key, bytes: &[u8]) -> Result<(), StorageError> {
    if key.verify(bytes) {
        Ok(())
    } else {
        tracing::error!(key = %key, len = bytes.len(), "bytes do not match their key");
        Err(StorageError::Integrity {
            key: *key,
            reason: "digest of bytes does not match key".to_string(),
        })
    }
}

#[async_trait]
pub trait StorageProvider: Send + Sync + std::fmt::Debug {
    /// Store `bytes` under `key`. Returns `true` if the bytes were newly
    ///  written and `false` if the key was already present.
    ///
    /// Should fail with `StorageError::Integrity` if the bytes do not hash
    ///  to the key.
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<bool, StorageError>;

    /// Fetch the bytes stored under `key`, or `StorageError::NotFound`.
    async fn get(&self, key: &Key) -> Result<Bytes, StorageError>;

    async fn has(&self, key: &Key) -> Result<bool, StorageError>;

    /// Fetch and decode a node. Undecodable bytes are reported loudly as
    ///  `StorageError::Corrupt`.
    async fn get_node(&self, key: &Key) -> Result<Node, StorageError> {
        let bytes = self.get(key).await?;
        Node::decode(&bytes).map_err(|source| {
            tracing::error!(key = %key, error = %source, "stored node failed to decode");
            StorageError::Corrupt { key: *key, source }
        })
    }

    /// Like [`StorageProvider::get`] but maps a missing key to `None`.
    async fn try_get(&self, key: &Key) -> Result<Option<Bytes>, StorageError> {
        match self.get(key).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(StorageError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Providers that can enumerate and physically delete their contents.
///  Only the garbage collector needs this.
#[async_trait]
pub trait SweepableStorage: StorageProvider {
    /// Stored keys in ascending order, strictly after `after`.
    async fn list_keys(&self, after: Option<Key>, limit: usize) -> Result<Vec<Key>, StorageError>;

    /// Remove the bytes for `key`. Returns `false` if nothing was stored.
    async fn delete(&self, key: &Key) -> Result<bool, StorageError>;
}

#[async_trait]
impl<S: StorageProvider + ?Sized> StorageProvider for Arc<S> {
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<bool, StorageError> {
        (**self).put(key, bytes).await
    }

    async fn get(&self, key: &Key) -> Result<Bytes, StorageError> {
        (**self).get(key).await
    }

    async fn has(&self, key: &Key) -> Result<bool, StorageError> {
        (**self).has(key).await
    }
}

#[async_trait]
impl<S: SweepableStorage + ?Sized> SweepableStorage for Arc<S> {
    async fn list_keys(&self, after: Option<Key>, limit: usize) -> Result<Vec<Key>, StorageError> {
        (**self).list_keys(after, limit).await
    }

    async fn delete(&self, key: &Key) -> Result<bool, StorageError> {
        (**self).delete(key).await
    }
}
