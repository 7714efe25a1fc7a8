//! Reclaiming bytes no realm can see any more.
//!
//! A stored key is a root of the mark phase when at least one realm holds
//! an ownership record for it. Everything reachable from a root is kept;
//! the rest is reported and optionally deleted. The sweep assumes writes
//! are quiesced: a write that stores bytes but has not yet recorded
//! ownership would otherwise look like garbage.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::engine::Engine;
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::ledger::{Ledger, LedgerProvider};
use crate::node::{empty_collection_key, Node};
use crate::storage::SweepableStorage;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepOptions {
    /// Delete unreferenced bytes instead of only reporting them
    pub delete: bool,
    /// Keys listed from storage per round trip
    pub batch: usize,
}

impl Default for SweepOptions {
    fn default() -> Self {
        Self {
            delete: false,
            batch: 1_000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Keys found in storage
    pub scanned: u64,
    /// Keys kept because something references them
    pub retained: u64,
    /// Unreferenced keys, in key order
    pub collectable: Vec<Key>,
    /// How many of those were deleted
    pub deleted: u64,
}

async fn list_all<S>(engine: &Engine<S>, batch: usize) -> Result<Vec<Key>>
where
    S: SweepableStorage + 'static,
{
    let batch = batch.max(1);
    let mut keys = Vec::new();
    let mut after = None;
    loop {
        let page = engine.storage().list_keys(after, batch).await?;
        let done = page.len() < batch;
        after = page.last().copied();
        keys.extend(page);
        if done || after.is_none() {
            return Ok(keys);
        }
    }
}

/// Mark everything reachable from `root` into `marked`.
async fn mark<S>(engine: &Engine<S>, root: Key, marked: &mut HashSet<Key>) -> Result<()>
where
    S: SweepableStorage + 'static,
{
    let mut pending = vec![root];
    while let Some(key) = pending.pop() {
        if !marked.insert(key) {
            continue;
        }
        let node = match engine.get_node(&key).await {
            Ok(node) => node,
            // an owned key whose bytes are gone has nothing left to keep
            Err(CasError::NotFound(_)) => {
                tracing::warn!(key = %key, "owned key missing from storage");
                continue;
            }
            Err(e) => return Err(e),
        };
        match node {
            Node::File(file) if file.is_leaf_level() => {
                marked.extend(file.children().iter().map(|c| c.key));
            }
            other => pending.extend(other.child_keys()),
        }
    }
    Ok(())
}

pub async fn sweep<S, L>(
    engine: &Engine<S>,
    ledger: &Ledger<L>,
    options: &SweepOptions,
) -> Result<SweepReport>
where
    S: SweepableStorage + 'static,
    L: LedgerProvider,
{
    let stored = list_all(engine, options.batch).await?;
    let mut marked = HashSet::new();
    marked.insert(empty_collection_key());

    for key in &stored {
        if marked.contains(key) {
            continue;
        }
        if ledger.count_references(key).await? > 0 {
            mark(engine, *key, &mut marked).await?;
        }
    }

    let mut report = SweepReport {
        scanned: stored.len() as u64,
        ..Default::default()
    };
    for key in stored {
        if marked.contains(&key) {
            report.retained += 1;
            continue;
        }
        if options.delete && engine.storage().delete(&key).await? {
            report.deleted += 1;
        }
        report.collectable.push(key);
    }

    tracing::info!(
        scanned = report.scanned,
        retained = report.retained,
        collectable = report.collectable.len(),
        deleted = report.deleted,
        "sweep finished"
    );
    Ok(report)
}
