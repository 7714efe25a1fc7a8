use crate::hash::{Key, KeyError};
use crate::node::{CodecError, LayoutError};
use crate::storage::StorageError;

/// Failure reported by a record provider (ledger, tickets, depots).
#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Timeouts, lock contention, throttling. Safe to retry.
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Backend(String),
}

impl ProviderError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }
}

/// Stable discriminant for [`CasError`], suitable for mapping onto an
///  outer protocol's status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotFound,
    Forbidden,
    Conflict,
    QuotaExceeded,
    UnacceptedType,
    AlreadyConsumed,
    Expired,
    CorruptNode,
    IntegrityViolation,
    MalformedKey,
    NotADirectory,
    ChildNotFound,
    InvalidInput,
    Storage,
    Provider,
}

#[derive(Debug, thiserror::Error)]
pub enum CasError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("write of {size} bytes exceeds quota of {quota} bytes")]
    QuotaExceeded { size: u64, quota: u64 },
    #[error("content type {0:?} is not accepted")]
    UnacceptedType(String),
    #[error("ticket {0} has already been used for a write")]
    AlreadyConsumed(String),
    #[error("expired: {0}")]
    Expired(String),
    #[error("corrupt node {key}: {source}")]
    CorruptNode {
        key: Key,
        #[source]
        source: CodecError,
    },
    #[error("integrity violation for {key}: {reason}")]
    IntegrityViolation { key: Key, reason: String },
    #[error("malformed key: {0}")]
    MalformedKey(#[from] KeyError),
    #[error("{0} is not a collection")]
    NotADirectory(String),
    #[error("no child named {name:?} under {parent}")]
    ChildNotFound { parent: String, name: String },
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("storage error: {0}")]
    Storage(StorageError),
    #[error("provider error: {0}")]
    Provider(#[from] ProviderError),
}

impl CasError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CasError::NotFound(_) => ErrorKind::NotFound,
            CasError::Forbidden(_) => ErrorKind::Forbidden,
            CasError::Conflict(_) => ErrorKind::Conflict,
            CasError::QuotaExceeded { .. } => ErrorKind::QuotaExceeded,
            CasError::UnacceptedType(_) => ErrorKind::UnacceptedType,
            CasError::AlreadyConsumed(_) => ErrorKind::AlreadyConsumed,
            CasError::Expired(_) => ErrorKind::Expired,
            CasError::CorruptNode { .. } => ErrorKind::CorruptNode,
            CasError::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            CasError::MalformedKey(_) => ErrorKind::MalformedKey,
            CasError::NotADirectory(_) => ErrorKind::NotADirectory,
            CasError::ChildNotFound { .. } => ErrorKind::ChildNotFound,
            CasError::InvalidInput(_) => ErrorKind::InvalidInput,
            CasError::Storage(_) => ErrorKind::Storage,
            CasError::Provider(_) => ErrorKind::Provider,
        }
    }

    /// Only transient backend failures may be retried locally.
    pub fn is_retryable(&self) -> bool {
        match self {
            CasError::Storage(err) => err.is_transient(),
            CasError::Provider(err) => matches!(err, ProviderError::Transient(_)),
            _ => false,
        }
    }

    pub fn not_found(what: impl std::fmt::Display) -> Self {
        CasError::NotFound(what.to_string())
    }

    pub fn forbidden(why: impl std::fmt::Display) -> Self {
        CasError::Forbidden(why.to_string())
    }
}

impl From<StorageError> for CasError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::NotFound(key) => CasError::NotFound(key.to_string()),
            StorageError::Integrity { key, reason } => CasError::IntegrityViolation { key, reason },
            StorageError::Corrupt { key, source } => CasError::CorruptNode { key, source },
            other => CasError::Storage(other),
        }
    }
}

impl From<LayoutError> for CasError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::DuplicateName(name) => {
                CasError::Conflict(format!("duplicate entry name {:?}", name))
            }
            other => CasError::InvalidInput(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CasError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transient_errors_retry() {
        let key = Key::digest(b"k");
        assert!(CasError::from(StorageError::Transient("timed out".into())).is_retryable());
        assert!(CasError::from(ProviderError::Transient("busy".into())).is_retryable());
        assert!(!CasError::from(ProviderError::Backend("disk full".into())).is_retryable());
        assert!(!CasError::from(StorageError::NotFound(key)).is_retryable());
        assert!(!CasError::forbidden("nope").is_retryable());
    }

    #[test]
    fn test_storage_errors_map_onto_taxonomy() {
        let key = Key::digest(b"k");
        assert_eq!(
            CasError::from(StorageError::NotFound(key)).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CasError::from(StorageError::Integrity {
                key,
                reason: "bytes differ".into()
            })
            .kind(),
            ErrorKind::IntegrityViolation
        );
        assert_eq!(
            CasError::from(StorageError::Corrupt {
                key,
                source: CodecError::BadMagic
            })
            .kind(),
            ErrorKind::CorruptNode
        );
        assert_eq!(
            CasError::from(LayoutError::DuplicateName("a".into())).kind(),
            ErrorKind::Conflict
        );
    }
}
