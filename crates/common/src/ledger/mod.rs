//! Ownership ledger: which realm can see which node.
//!
//! Bytes in storage are shared by every realm. A realm only sees a node
//! when it holds an ownership record for the key; the reverse index from
//! key to realms is what the garbage collector consults before reclaiming
//! bytes.

mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clock::SharedClock;
use crate::engine::WriteReceipt;
use crate::error::{ProviderError, Result};
use crate::hash::Key;

/// Largest page `list` will return
pub const MAX_PAGE: usize = 1_000;

/// Visibility record binding a realm to a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ownership {
    pub realm: String,
    pub key: Key,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
    pub size: u64,
}

/// Outcome of a batch ownership check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipCheck {
    pub found: Vec<Key>,
    pub missing: Vec<Key>,
}

impl OwnershipCheck {
    pub fn all_found(&self) -> bool {
        self.missing.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OwnershipPage {
    pub records: Vec<Ownership>,
    /// Pass back as `cursor` to fetch the next page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next: Option<Key>,
}

#[async_trait]
pub trait LedgerProvider: Send + Sync + std::fmt::Debug {
    /// Insert or replace the record for `(record.realm, record.key)`
    ///  together with its reverse index entry.
    async fn put_ownership(&self, record: Ownership) -> std::result::Result<(), ProviderError>;

    async fn get_ownership(
        &self,
        realm: &str,
        key: &Key,
    ) -> std::result::Result<Option<Ownership>, ProviderError>;

    /// Remove a record. Returns `false` if there was none.
    async fn delete_ownership(&self, realm: &str, key: &Key)
        -> std::result::Result<bool, ProviderError>;

    /// Realms holding a record for `key`, read from the reverse index
    async fn owners(&self, key: &Key) -> std::result::Result<Vec<String>, ProviderError>;

    /// Records of `realm` in key order, strictly after `after`
    async fn list_ownership(
        &self,
        realm: &str,
        after: Option<Key>,
        limit: usize,
    ) -> std::result::Result<Vec<Ownership>, ProviderError>;

    /// Number of realms referencing `key`.
    async fn count_owners(&self, key: &Key) -> std::result::Result<u64, ProviderError> {
        Ok(self.owners(key).await?.len() as u64)
    }
}

/// Ledger operations over a [`LedgerProvider`].
#[derive(Debug, Clone)]
pub struct Ledger<P> {
    provider: P,
    clock: SharedClock,
}

impl<P: LedgerProvider> Ledger<P> {
    pub fn new(provider: P, clock: SharedClock) -> Self {
        Self { provider, clock }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Record that `realm` references `key`. Idempotent per key; a repeat
    ///  call refreshes the metadata.
    pub async fn add(
        &self,
        realm: &str,
        key: &Key,
        creator: &str,
        content_type: Option<&str>,
        size: u64,
    ) -> Result<()> {
        let record = Ownership {
            realm: realm.to_string(),
            key: *key,
            created_at: self.clock.now(),
            created_by: creator.to_string(),
            content_type: content_type.map(str::to_string),
            size,
        };
        self.provider.put_ownership(record).await?;
        tracing::debug!(realm = %realm, key = %key, "recorded ownership");
        Ok(())
    }

    /// Record every node of a completed write, children first, so the root
    ///  only becomes visible once everything below it is.
    pub async fn add_receipt(&self, realm: &str, creator: &str, receipt: &WriteReceipt) -> Result<()> {
        for node in &receipt.nodes {
            self.add(realm, &node.key, creator, node.content_type.as_deref(), node.size)
                .await?;
        }
        Ok(())
    }

    pub async fn has(&self, realm: &str, key: &Key) -> Result<bool> {
        Ok(self.provider.get_ownership(realm, key).await?.is_some())
    }

    pub async fn get(&self, realm: &str, key: &Key) -> Result<Option<Ownership>> {
        Ok(self.provider.get_ownership(realm, key).await?)
    }

    /// Split `keys` into those `realm` owns and those it does not.
    pub async fn check(&self, realm: &str, keys: &[Key]) -> Result<OwnershipCheck> {
        let mut check = OwnershipCheck::default();
        for key in keys {
            if self.has(realm, key).await? {
                check.found.push(*key);
            } else {
                check.missing.push(*key);
            }
        }
        Ok(check)
    }

    /// Drop the visibility record. Stored bytes are never touched here.
    pub async fn remove(&self, realm: &str, key: &Key) -> Result<bool> {
        let removed = self.provider.delete_ownership(realm, key).await?;
        if removed {
            tracing::debug!(realm = %realm, key = %key, "removed ownership");
        }
        Ok(removed)
    }

    pub async fn count_references(&self, key: &Key) -> Result<u64> {
        Ok(self.provider.count_owners(key).await?)
    }

    pub async fn list(&self, realm: &str, limit: usize, cursor: Option<Key>) -> Result<OwnershipPage> {
        let limit = limit.clamp(1, MAX_PAGE);
        // fetch one extra to learn whether another page exists
        let mut records = self.provider.list_ownership(realm, cursor, limit + 1).await?;
        let next = if records.len() > limit {
            records.truncate(limit);
            records.last().map(|r| r.key)
        } else {
            None
        };
        Ok(OwnershipPage { records, next })
    }
}
