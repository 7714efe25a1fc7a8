//! Shared setup for service integration tests
#![allow(dead_code)]

use std::path::Path;
use std::sync::Arc;

use common::clock::ManualClock;
use common::prelude::*;
use object_store::ObjectStoreConfig;
use service::{Config, Database, ServiceState};

pub type SqliteCas = Cas<MemoryStorage, Database>;

/// The CAS facade over an in-memory record database
pub async fn setup_sqlite_cas(node_limit: usize) -> (SqliteCas, ManualClock) {
    let clock = ManualClock::default();
    let cas = Cas::new(
        MemoryStorage::new(),
        Database::in_memory().await.unwrap(),
        CasConfig::with_node_limit(node_limit),
        Arc::new(clock.clone()),
    )
    .unwrap();
    (cas, clock)
}

/// A config keeping every file under `dir`
pub fn on_disk_config(dir: &Path) -> Config {
    Config {
        sqlite_path: Some(dir.join("db.sqlite")),
        blob_index_path: Some(dir.join("blobs").join("blobs.db")),
        blob_store: ObjectStoreConfig::Local {
            path: dir.join("blobs").join("objects"),
        },
        ..Default::default()
    }
}

pub async fn open_state(dir: &Path) -> ServiceState {
    ServiceState::from_config(&on_disk_config(dir)).await.unwrap()
}

pub fn admin(realm: &str) -> Caller {
    Identity::full(realm, format!("{}-admin", realm)).into()
}

/// Bytes that do not repeat within a chunk
pub fn pattern(len: usize) -> bytes::Bytes {
    (0..len)
        .map(|i| (i.wrapping_mul(31) ^ (i >> 8)) as u8)
        .collect::<Vec<u8>>()
        .into()
}
