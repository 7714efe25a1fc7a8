//! Depots: named, versioned pointers to a root key within a realm.
//!
//! Every change of root (update or rollback) supersedes the current
//! version, which is appended to the depot's history before the version
//! number is bumped. History is append-only and never rewritten.

mod manager;
mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::hash::Key;

pub use manager::{Depots, RollbackOutcome};

/// Name of the depot every realm gets and can never delete
pub const MAIN_DEPOT: &str = "main";

/// Largest page of history `Depots::history` will return
pub const MAX_HISTORY_PAGE: usize = 1_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Depot {
    pub id: String,
    pub realm: String,
    pub name: String,
    pub root: Key,
    /// Starts at 0, bumped by one on every root change
    pub version: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A superseded version of a depot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub version: u64,
    pub root: Key,
    /// When this version became current
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl HistoryEntry {
    /// The entry recording `depot`'s current version
    pub fn superseding(depot: &Depot) -> Self {
        Self {
            version: depot.version,
            root: depot.root,
            created_at: depot.updated_at,
            message: depot.message.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvanceOutcome {
    Advanced(Depot),
    /// Someone else moved the depot first
    VersionMismatch,
    Missing,
}

#[async_trait]
pub trait DepotProvider: Send + Sync + std::fmt::Debug {
    /// Insert a new depot. Returns `false` if the realm already has a depot
    ///  with that name.
    async fn insert_depot(&self, depot: Depot) -> Result<bool, ProviderError>;

    async fn get_depot(&self, realm: &str, id: &str) -> Result<Option<Depot>, ProviderError>;

    async fn get_depot_by_name(&self, realm: &str, name: &str)
        -> Result<Option<Depot>, ProviderError>;

    /// Depots of a realm ordered by name
    async fn list_depots(&self, realm: &str) -> Result<Vec<Depot>, ProviderError>;

    /// Atomically: if the depot is still at `expected_version`, append its
    ///  current version to the history, point it at `root` and bump the
    ///  version.
    async fn advance_depot(
        &self,
        realm: &str,
        id: &str,
        expected_version: u64,
        root: &Key,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, ProviderError>;

    /// History entries newest first, with versions strictly below `before`
    async fn history(
        &self,
        realm: &str,
        id: &str,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ProviderError>;

    async fn history_entry(
        &self,
        realm: &str,
        id: &str,
        version: u64,
    ) -> Result<Option<HistoryEntry>, ProviderError>;

    /// Remove a depot and its history. Returns `false` if it did not exist.
    async fn delete_depot(&self, realm: &str, id: &str) -> Result<bool, ProviderError>;
}
