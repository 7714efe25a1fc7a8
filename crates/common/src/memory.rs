use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::depot::{Depot, HistoryEntry};
use crate::error::ProviderError;
use crate::hash::Key;
use crate::ledger::Ownership;
use crate::ticket::Ticket;

/// In-memory record store implementing the ledger, ticket and depot
///  providers. Every mutation happens under one write lock, which is what
///  makes ticket consumption and depot advances atomic here.
#[derive(Debug, Clone, Default)]
pub struct MemoryRecords {
    inner: Arc<RwLock<MemoryRecordsInner>>,
}

#[derive(Debug, Default)]
pub(crate) struct MemoryRecordsInner {
    /// Forward index: realm -> key -> record
    pub ownership: HashMap<String, BTreeMap<Key, Ownership>>,
    /// Reverse index: key -> realms holding a record
    pub owners: HashMap<Key, BTreeSet<String>>,
    pub tickets: HashMap<String, Ticket>,
    /// depot id -> depot
    pub depots: HashMap<String, Depot>,
    /// (realm, name) -> depot id
    pub depot_names: HashMap<(String, String), String>,
    /// depot id -> superseded versions, oldest first
    pub history: HashMap<String, Vec<HistoryEntry>>,
}

impl MemoryRecords {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn read(&self) -> Result<RwLockReadGuard<'_, MemoryRecordsInner>, ProviderError> {
        self.inner
            .read()
            .map_err(|e| ProviderError::Backend(format!("failed to acquire read lock: {}", e)))
    }

    pub(crate) fn write(&self) -> Result<RwLockWriteGuard<'_, MemoryRecordsInner>, ProviderError> {
        self.inner
            .write()
            .map_err(|e| ProviderError::Backend(format!("failed to acquire write lock: {}", e)))
    }
}
