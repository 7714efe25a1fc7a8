//! Object storage backend abstraction (S3/MinIO/local filesystem/memory).

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use object_store::aws::AmazonS3Builder;
use object_store::local::LocalFileSystem;
use object_store::memory::InMemory;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};

use crate::error::{BlobStoreError, Result};

/// Configuration for the object storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObjectStoreConfig {
    /// In-memory storage (for testing)
    #[default]
    Memory,

    /// Local filesystem storage
    Local {
        /// Path to the storage directory
        path: PathBuf,
    },

    /// S3-compatible storage (AWS S3, MinIO, etc.)
    S3 {
        /// S3 endpoint URL (e.g., "http://localhost:9000" for MinIO)
        endpoint: String,
        /// Access key ID
        access_key: String,
        /// Secret access key
        secret_key: String,
        /// Bucket name
        bucket: String,
        /// Optional region (defaults to "us-east-1")
        region: Option<String>,
    },
}

/// Wrapper around different object storage backends.
#[derive(Debug, Clone)]
pub(crate) struct Storage {
    inner: Arc<dyn ObjectStore>,
}

impl Storage {
    /// Create a new storage backend from configuration.
    pub async fn new(config: ObjectStoreConfig) -> Result<Self> {
        let inner: Arc<dyn ObjectStore> = match &config {
            ObjectStoreConfig::Memory => Arc::new(InMemory::new()),

            ObjectStoreConfig::Local { path } => {
                tokio::fs::create_dir_all(path).await?;
                Arc::new(
                    LocalFileSystem::new_with_prefix(path)
                        .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?,
                )
            }

            ObjectStoreConfig::S3 {
                endpoint,
                access_key,
                secret_key,
                bucket,
                region,
            } => {
                let builder = AmazonS3Builder::new()
                    .with_endpoint(endpoint)
                    .with_access_key_id(access_key)
                    .with_secret_access_key(secret_key)
                    .with_bucket_name(bucket)
                    .with_region(region.as_deref().unwrap_or("us-east-1"))
                    .with_allow_http(endpoint.starts_with("http://"));

                let store: Arc<dyn ObjectStore> = Arc::new(
                    builder
                        .build()
                        .map_err(|e| BlobStoreError::InvalidConfig(e.to_string()))?,
                );

                // Fail fast if the bucket doesn't exist
                {
                    use futures::TryStreamExt;
                    let prefix = ObjectPath::from("");
                    let mut stream = store.list(Some(&prefix));
                    match stream.try_next().await {
                        Ok(_) => {}
                        Err(object_store::Error::NotFound { .. }) => {
                            return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                        }
                        Err(e) => {
                            let msg = e.to_string();
                            if msg.contains("NoSuchBucket")
                                || msg.contains("bucket") && msg.contains("not")
                            {
                                return Err(BlobStoreError::BucketNotFound(bucket.clone()));
                            }
                            return Err(e.into());
                        }
                    }
                }

                store
            }
        };

        Ok(Self { inner })
    }

    /// Create an in-memory storage backend.
    pub fn memory() -> Self {
        Self {
            inner: Arc::new(InMemory::new()),
        }
    }

    /// Build the object path for a key of the form `<algorithm>:<hex>`.
    ///  Stored as `data/<algorithm>/<hex>` so every path segment is plain.
    pub fn data_path(key: &str) -> Result<ObjectPath> {
        let (algorithm, hex) = key
            .split_once(':')
            .ok_or_else(|| BlobStoreError::InvalidKey(key.to_string()))?;
        let plain = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric());
        if !plain(algorithm) || !plain(hex) {
            return Err(BlobStoreError::InvalidKey(key.to_string()));
        }
        Ok(ObjectPath::from(format!("data/{}/{}", algorithm, hex)))
    }

    fn key_from_path(path: &str) -> Option<String> {
        let rest = path.strip_prefix("data/")?;
        let (algorithm, hex) = rest.split_once('/')?;
        Some(format!("{}:{}", algorithm, hex))
    }

    /// Put blob data into storage.
    pub async fn put_data(&self, key: &str, data: Bytes) -> Result<()> {
        let path = Self::data_path(key)?;
        self.inner.put(&path, data.into()).await?;
        Ok(())
    }

    /// Get blob data from storage.
    pub async fn get_data(&self, key: &str) -> Result<Option<Bytes>> {
        let path = Self::data_path(key)?;
        match self.inner.get(&path).await {
            Ok(result) => {
                let bytes = result.bytes().await?;
                Ok(Some(bytes))
            }
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Check if blob data exists in storage.
    pub async fn has_data(&self, key: &str) -> Result<bool> {
        let path = Self::data_path(key)?;
        match self.inner.head(&path).await {
            Ok(_) => Ok(true),
            Err(object_store::Error::NotFound { .. }) => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete blob data from storage.
    pub async fn delete_data(&self, key: &str) -> Result<()> {
        let path = Self::data_path(key)?;
        // the blob may already be deleted
        match self.inner.delete(&path).await {
            Ok(()) => Ok(()),
            Err(object_store::Error::NotFound { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// List all keys present in the data directory, with their sizes.
    pub async fn list_data(&self) -> Result<Vec<(String, u64)>> {
        use futures::TryStreamExt;

        let prefix = ObjectPath::from("data/");
        let stream = self.inner.list(Some(&prefix));
        let items: Vec<_> = stream.try_collect().await?;

        Ok(items
            .into_iter()
            .filter_map(|meta| {
                Self::key_from_path(meta.location.as_ref()).map(|k| (k, meta.size as u64))
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = Storage::memory();

        let key = "sha256:abc123";
        let data = Bytes::from("hello world");

        storage.put_data(key, data.clone()).await.unwrap();
        let retrieved = storage.get_data(key).await.unwrap().unwrap();
        assert_eq!(retrieved, data);

        assert!(storage.has_data(key).await.unwrap());

        let listed = storage.list_data().await.unwrap();
        assert_eq!(listed, vec![(key.to_string(), 11)]);

        storage.delete_data(key).await.unwrap();
        assert!(!storage.has_data(key).await.unwrap());
        assert!(storage.get_data(key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_local_storage() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config = ObjectStoreConfig::Local {
            path: temp_dir.path().to_path_buf(),
        };

        let storage = Storage::new(config).await.unwrap();

        let key = "sha256:def456";
        let data = Bytes::from("test data");

        storage.put_data(key, data.clone()).await.unwrap();
        let retrieved = storage.get_data(key).await.unwrap().unwrap();
        assert_eq!(retrieved, data);

        let file_path = temp_dir.path().join("data").join("sha256").join("def456");
        assert!(file_path.exists());
    }

    #[test]
    fn test_data_path_rejects_odd_keys() {
        assert!(Storage::data_path("sha256:abc").is_ok());
        assert!(Storage::data_path("no-colon").is_err());
        assert!(Storage::data_path("sha256:../etc").is_err());
        assert!(Storage::data_path(":abc").is_err());
    }
}
