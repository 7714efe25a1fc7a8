//! Error types for the blobs store.

use std::path::PathBuf;

/// Errors that can occur when working with the blob store.
#[derive(Debug, thiserror::Error)]
pub enum BlobStoreError {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Object storage error
    #[error("object storage error: {0}")]
    ObjectStore(#[from] object_store::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Migration error
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Key could not be mapped to an object path
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Metadata says the blob exists but the bytes are gone
    #[error("blob bytes missing for: {0}")]
    MissingBytes(String),

    /// Invalid configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Path error
    #[error("path error: {0}")]
    Path(PathBuf),

    /// S3 bucket not found - must be created before use
    #[error("S3 bucket '{0}' does not exist. Create it before starting the store.")]
    BucketNotFound(String),
}

impl BlobStoreError {
    /// Whether the failure is worth retrying locally (timeouts, pool
    /// exhaustion, interrupted I/O). Everything else is surfaced as-is.
    pub fn is_transient(&self) -> bool {
        match self {
            BlobStoreError::Database(sqlx::Error::PoolTimedOut) => true,
            BlobStoreError::Database(sqlx::Error::Io(e)) | BlobStoreError::Io(e) => matches!(
                e.kind(),
                std::io::ErrorKind::TimedOut
                    | std::io::ErrorKind::Interrupted
                    | std::io::ErrorKind::WouldBlock
                    | std::io::ErrorKind::ConnectionReset
            ),
            BlobStoreError::ObjectStore(object_store::Error::Generic { source, .. }) => {
                let msg = source.to_string().to_lowercase();
                msg.contains("timed out") || msg.contains("throttl") || msg.contains("slow down")
            }
            _ => false,
        }
    }
}

/// Result type alias for blob store operations.
pub type Result<T> = std::result::Result<T, BlobStoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        let timeout = BlobStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            "slow disk",
        ));
        assert!(timeout.is_transient());

        let denied = BlobStoreError::Io(std::io::Error::new(
            std::io::ErrorKind::PermissionDenied,
            "nope",
        ));
        assert!(!denied.is_transient());

        assert!(BlobStoreError::Database(sqlx::Error::PoolTimedOut).is_transient());
        assert!(!BlobStoreError::InvalidKey("x".into()).is_transient());
    }
}
