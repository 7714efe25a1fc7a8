use async_trait::async_trait;
use bytes::Bytes;
use object_store::{BlobStore, BlobStoreError};

use super::{verify, StorageError, StorageProvider, SweepableStorage};
use crate::hash::Key;

impl From<BlobStoreError> for StorageError {
    fn from(err: BlobStoreError) -> Self {
        if err.is_transient() {
            StorageError::Transient(err.to_string())
        } else {
            StorageError::Backend(err.to_string())
        }
    }
}

/// Storage provider over a [`BlobStore`] (SQLite metadata + object storage).
///
/// The blob store trusts its callers, so bytes are checked against their
///  key on the way in and again on the way out.
#[derive(Debug, Clone)]
pub struct ObjectStorage {
    store: BlobStore,
}

impl ObjectStorage {
    pub fn new(store: BlobStore) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &BlobStore {
        &self.store
    }
}

#[async_trait]
impl StorageProvider for ObjectStorage {
    async fn put(&self, key: &Key, bytes: Bytes) -> Result<bool, StorageError> {
        verify(key, &bytes)?;
        Ok(self.store.put(&key.to_string(), bytes).await?)
    }

    async fn get(&self, key: &Key) -> Result<Bytes, StorageError> {
        let bytes = self
            .store
            .get(&key.to_string())
            .await?
            .ok_or(StorageError::NotFound(*key))?;
        verify(key, &bytes)?;
        Ok(bytes)
    }

    async fn has(&self, key: &Key) -> Result<bool, StorageError> {
        Ok(self.store.has(&key.to_string()).await?)
    }
}

#[async_trait]
impl SweepableStorage for ObjectStorage {
    async fn list_keys(&self, after: Option<Key>, limit: usize) -> Result<Vec<Key>, StorageError> {
        let after = after.map(|k| k.to_string());
        let listed = self.store.list(after.as_deref(), limit).await?;
        let mut keys = Vec::with_capacity(listed.len());
        for raw in listed {
            match raw.parse::<Key>() {
                Ok(key) => keys.push(key),
                // foreign objects are not ours to collect
                Err(e) => tracing::warn!(key = %raw, error = %e, "skipping unparseable blob key"),
            }
        }
        Ok(keys)
    }

    async fn delete(&self, key: &Key) -> Result<bool, StorageError> {
        Ok(self.store.delete(&key.to_string()).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_object_storage_roundtrip() {
        let storage = ObjectStorage::new(BlobStore::new_ephemeral().await.unwrap());
        let bytes = Bytes::from_static(b"payload");
        let key = Key::digest(&bytes);

        assert!(storage.put(&key, bytes.clone()).await.unwrap());
        assert!(!storage.put(&key, bytes.clone()).await.unwrap());
        assert!(storage.has(&key).await.unwrap());
        assert_eq!(storage.get(&key).await.unwrap(), bytes);
        assert_eq!(storage.list_keys(None, 10).await.unwrap(), vec![key]);

        assert!(storage.delete(&key).await.unwrap());
        assert!(matches!(
            storage.get(&key).await,
            Err(StorageError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_object_storage_detects_tampering() {
        let store = BlobStore::new_ephemeral().await.unwrap();
        let key = Key::digest(b"original");
        // write around the provider so the check on read is what catches it
        store
            .put(&key.to_string(), Bytes::from_static(b"tampered"))
            .await
            .unwrap();

        let storage = ObjectStorage::new(store);
        assert!(matches!(
            storage.get(&key).await,
            Err(StorageError::Integrity { .. })
        ));
    }
}
