use std::sync::Arc;

use common::cas::Cas;
use common::clock::SystemClock;
use common::error::CasError;
use common::storage::{ObjectStorage, RetryingStorage};
use object_store::{BlobStore, BlobStoreError};

use super::config::Config;
use super::database::{Database, DatabaseSetupError};

/// Node bytes as the service stores them: object storage behind the
///  transient-failure retry layer.
pub type ServiceStorage = RetryingStorage<ObjectStorage>;

pub type ServiceCas = Cas<ServiceStorage, Database>;

/// Main service state: the record database, the blob store and the CAS
///  facade wired over both.
#[derive(Clone, Debug)]
pub struct State {
    cas: ServiceCas,
    database: Database,
    blobs: BlobStore,
}

impl State {
    pub async fn from_config(config: &Config) -> Result<Self, StateSetupError> {
        // 1. Setup database
        let database = match config.sqlite_path {
            Some(ref path) => Database::open(path).await?,
            None => Database::in_memory().await?,
        };
        tracing::info!(sqlite_path = ?config.sqlite_path, "record database ready");

        // 2. Setup blobs store
        let blobs = match config.blob_index_path {
            Some(ref path) => BlobStore::new(path, config.blob_store.clone()).await?,
            None => BlobStore::in_memory(config.blob_store.clone()).await?,
        };
        tracing::debug!(blob_store = ?config.blob_store, "blob store ready");

        // 3. Wire the store over both
        let storage = RetryingStorage::new(ObjectStorage::new(blobs.clone()), config.cas.retry.clone());
        let cas = Cas::new(
            storage,
            database.clone(),
            config.cas.clone(),
            Arc::new(SystemClock),
        )?;

        Ok(Self {
            cas,
            database,
            blobs,
        })
    }

    pub fn cas(&self) -> &ServiceCas {
        &self.cas
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    pub fn blobs(&self) -> &BlobStore {
        &self.blobs
    }
}

impl AsRef<Database> for State {
    fn as_ref(&self) -> &Database {
        self.database()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateSetupError {
    #[error("Database setup error: {0}")]
    DatabaseSetupError(#[from] DatabaseSetupError),
    #[error("Blobs store error: {0}")]
    BlobsStoreError(#[from] BlobStoreError),
    #[error("Invalid cas config: {0}")]
    Cas(#[from] CasError),
}
