//! Shared test utilities for casket integration tests
#![allow(dead_code)]

use std::sync::Arc;

use bytes::Bytes;
use common::clock::ManualClock;
use common::prelude::*;
use object_store::BlobStore;
use tempfile::TempDir;

pub type MemoryCas = Cas<MemoryStorage, MemoryRecords>;

pub struct TestEnv {
    pub cas: MemoryCas,
    pub storage: MemoryStorage,
    pub clock: ManualClock,
}

impl TestEnv {
    /// Full-rights identity for `realm`
    pub fn admin(&self, realm: &str) -> Caller {
        Identity::full(realm, format!("{}-admin", realm)).into()
    }
}

/// Set up an in-memory store with the given node limit
pub fn setup_test_env(node_limit: usize) -> TestEnv {
    let storage = MemoryStorage::new();
    let clock = ManualClock::default();
    let cas = Cas::new(
        storage.clone(),
        MemoryRecords::new(),
        CasConfig::with_node_limit(node_limit),
        Arc::new(clock.clone()),
    )
    .unwrap();
    TestEnv {
        cas,
        storage,
        clock,
    }
}

/// Set up a store whose bytes live on disk under a temp directory
pub async fn setup_object_env(node_limit: usize) -> (Cas<ObjectStorage, MemoryRecords>, TempDir) {
    let temp_dir = TempDir::new().unwrap();
    let blobs = BlobStore::new_local(temp_dir.path()).await.unwrap();
    let cas = Cas::new(
        ObjectStorage::new(blobs),
        MemoryRecords::new(),
        CasConfig::with_node_limit(node_limit),
        Arc::new(SystemClock),
    )
    .unwrap();
    (cas, temp_dir)
}

/// Bytes that do not repeat within a chunk, so chunks never dedupe
pub fn pattern(len: usize) -> Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<u8>>()
        .into()
}
