//! BlobStore - node byte storage backed by SQLite metadata + object storage.
//!
//! Writes go to object storage first and are only made visible once the
//! metadata row flips to complete, so a crash between the two never exposes a
//! key whose bytes are missing.

use std::path::Path;

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::database::{BlobState, Database};
use crate::error::{BlobStoreError, Result};
use crate::storage::{ObjectStoreConfig, Storage};

/// Aggregate numbers about the store contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StoreStats {
    pub count: u64,
    pub total_size: u64,
}

/// Key/value byte store for content-addressed nodes.
///
/// # Example
///
/// ```rust,no_run
/// use casket_object_store::{BlobStore, ObjectStoreConfig};
/// use std::path::Path;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = BlobStore::new(Path::new("/tmp/blobs.db"), ObjectStoreConfig::Memory).await?;
/// assert!(!store.has("sha256:00").await?);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct BlobStore {
    db: Database,
    storage: Storage,
}

impl BlobStore {
    /// Create a new BlobStore with a file-based SQLite database.
    ///
    /// # Arguments
    /// * `db_path` - Path to the SQLite database file
    /// * `config` - Object storage configuration (S3, MinIO, local, or memory)
    pub async fn new(db_path: &Path, config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::new(db_path).await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new BlobStore with an in-memory SQLite database.
    pub async fn in_memory(config: ObjectStoreConfig) -> Result<Self> {
        let db = Database::in_memory().await?;
        let storage = Storage::new(config).await?;
        Ok(Self { db, storage })
    }

    /// Create a new BlobStore backed by local filesystem.
    ///
    /// # Arguments
    /// * `data_dir` - Directory for all storage (db at data_dir/blobs.db, objects at data_dir/objects/)
    pub async fn new_local(data_dir: &Path) -> Result<Self> {
        let db_path = data_dir.join("blobs.db");
        let objects_path = data_dir.join("objects");
        let config = ObjectStoreConfig::Local { path: objects_path };
        Self::new(&db_path, config).await
    }

    /// Create a fully ephemeral BlobStore (in-memory DB + in-memory object storage).
    pub async fn new_ephemeral() -> Result<Self> {
        let db = Database::in_memory().await?;
        Ok(Self {
            db,
            storage: Storage::memory(),
        })
    }

    /// Store bytes under `key`. Returns `false` when the key was already
    ///  present, in which case nothing is written.
    pub async fn put(&self, key: &str, data: Bytes) -> Result<bool> {
        if self.db.has_blob(key).await? {
            debug!(key = %key, "blob already present");
            return Ok(false);
        }

        let size = data.len() as i64;
        self.db.begin_blob(key, size).await?;
        self.storage.put_data(key, data).await?;
        self.db.complete_blob(key, size).await?;

        debug!(key = %key, size = size, "blob stored");
        Ok(true)
    }

    /// Retrieve bytes by key.
    pub async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        if !self.db.has_blob(key).await? {
            return Ok(None);
        }
        match self.storage.get_data(key).await? {
            Some(bytes) => Ok(Some(bytes)),
            None => {
                warn!(key = %key, "metadata present but object missing");
                Err(BlobStoreError::MissingBytes(key.to_string()))
            }
        }
    }

    /// Check whether a key is stored.
    pub async fn has(&self, key: &str) -> Result<bool> {
        self.db.has_blob(key).await
    }

    /// Delete a blob from the store. Returns `false` if it was not present.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        if self.db.get_blob(key).await?.is_none() {
            return Ok(false);
        }

        self.db.mark_deleting(key).await?;
        self.storage.delete_data(key).await?;
        self.db.delete_blob(key).await?;

        info!(key = %key, "blob deleted");
        Ok(true)
    }

    /// List stored keys in key order, starting after `after`.
    pub async fn list(&self, after: Option<&str>, limit: usize) -> Result<Vec<String>> {
        self.db.list_blobs(after, limit as i64).await
    }

    /// Count and total size of stored blobs.
    pub async fn stats(&self) -> Result<StoreStats> {
        let (count, total) = self.db.stats().await?;
        Ok(StoreStats {
            count: count.max(0) as u64,
            total_size: total.max(0) as u64,
        })
    }

    /// Rebuild metadata from what is actually present in object storage.
    ///  Rows stuck in a non-complete state whose bytes exist are completed;
    ///  objects without any row are adopted. Returns the number of rows
    ///  touched.
    pub async fn recover(&self) -> Result<usize> {
        let mut touched = 0;
        for (key, size) in self.storage.list_data().await? {
            let state = self.db.get_blob(&key).await?.map(|m| m.state);
            if state != Some(BlobState::Complete) {
                self.db.complete_blob(&key, size as i64).await?;
                touched += 1;
            }
        }
        if touched > 0 {
            info!(touched = touched, "recovered blob metadata from object storage");
        }
        Ok(touched)
    }
}
