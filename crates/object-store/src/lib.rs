//! SQLite + Object Storage Backend
//!
//! This crate stores the bytes of content-addressed nodes. SQLite keeps the
//! metadata (key, size, timestamps) and a pluggable object storage backend
//! (S3/MinIO/local filesystem/memory) keeps the bytes.
//!
//! # Features
//!
//! - Keys are the canonical `<algorithm>:<hex>` strings produced by the caller
//! - SQLite for fast existence checks and listing
//! - Multiple storage backends: S3, MinIO, local filesystem, in-memory
//! - Recovery support: rebuild metadata from object storage
//!
//! The store does not hash anything itself; callers are responsible for
//! handing it bytes that match their key.
//!
//! # Example
//!
//! ```rust,no_run
//! use casket_object_store::BlobStore;
//! use std::path::Path;
//!
//! # async fn example() -> Result<(), casket_object_store::BlobStoreError> {
//! let store = BlobStore::new_local(Path::new("/tmp/casket")).await?;
//! store.put("sha256:00", bytes::Bytes::from_static(b"hello")).await?;
//! # Ok(())
//! # }
//! ```

mod database;
mod error;
mod object_store;
mod storage;

pub use error::{BlobStoreError, Result};
pub use crate::object_store::{BlobStore, StoreStats};
pub use storage::ObjectStoreConfig;
