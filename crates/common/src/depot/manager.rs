use uuid::Uuid;

use super::{
    AdvanceOutcome, Depot, DepotProvider, HistoryEntry, MAIN_DEPOT, MAX_HISTORY_PAGE,
};
use crate::clock::SharedClock;
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::ledger::{Ledger, LedgerProvider};

/// Times `update_root` re-reads and retries after losing a race
const ADVANCE_ATTEMPTS: usize = 8;

const MAX_DEPOT_NAME: usize = 128;

/// Result of a rollback
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RollbackOutcome {
    pub depot: Depot,
    /// False when the target root was already current
    pub changed: bool,
    pub message: String,
}

/// Depot operations over a [`DepotProvider`], checking roots against the
///  realm's ownership records.
#[derive(Debug, Clone)]
pub struct Depots<D, L> {
    provider: D,
    ledger: Ledger<L>,
    clock: SharedClock,
}

fn validate_depot_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_DEPOT_NAME {
        return Err(CasError::InvalidInput(format!(
            "depot name must be 1 to {} bytes",
            MAX_DEPOT_NAME
        )));
    }
    if name.contains('/') || name.chars().any(char::is_control) {
        return Err(CasError::InvalidInput(format!(
            "invalid depot name: {:?}",
            name
        )));
    }
    Ok(())
}

impl<D, L> Depots<D, L>
where
    D: DepotProvider,
    L: LedgerProvider,
{
    pub fn new(provider: D, ledger: Ledger<L>, clock: SharedClock) -> Self {
        Self {
            provider,
            ledger,
            clock,
        }
    }

    pub fn provider(&self) -> &D {
        &self.provider
    }

    async fn require_owned(&self, realm: &str, root: &Key) -> Result<()> {
        if !self.ledger.has(realm, root).await? {
            return Err(CasError::not_found(format!("{} in realm {}", root, realm)));
        }
        Ok(())
    }

    /// Create a depot at version 0 pointing at `root`, which the realm must
    ///  own.
    pub async fn create(
        &self,
        realm: &str,
        name: &str,
        root: &Key,
        message: Option<String>,
    ) -> Result<Depot> {
        validate_depot_name(name)?;
        self.require_owned(realm, root).await?;

        let now = self.clock.now();
        let depot = Depot {
            id: Uuid::new_v4().to_string(),
            realm: realm.to_string(),
            name: name.to_string(),
            root: *root,
            version: 0,
            message,
            created_at: now,
            updated_at: now,
        };
        if !self.provider.insert_depot(depot.clone()).await? {
            return Err(CasError::Conflict(format!(
                "depot {:?} already exists in realm {}",
                name, realm
            )));
        }
        tracing::info!(realm = %realm, depot = %depot.id, name = %name, root = %root, "created depot");
        Ok(depot)
    }

    /// The realm's `main` depot, created at `empty_root` on first use.
    pub async fn ensure_main(&self, realm: &str, empty_root: &Key) -> Result<Depot> {
        if let Some(depot) = self.provider.get_depot_by_name(realm, MAIN_DEPOT).await? {
            return Ok(depot);
        }
        match self.create(realm, MAIN_DEPOT, empty_root, None).await {
            Ok(depot) => Ok(depot),
            // lost the race to another creator
            Err(CasError::Conflict(_)) => self.get_by_name(realm, MAIN_DEPOT).await,
            Err(e) => Err(e),
        }
    }

    pub async fn get(&self, realm: &str, id: &str) -> Result<Depot> {
        self.provider
            .get_depot(realm, id)
            .await?
            .ok_or_else(|| CasError::not_found(format!("depot {}", id)))
    }

    pub async fn get_by_name(&self, realm: &str, name: &str) -> Result<Depot> {
        self.provider
            .get_depot_by_name(realm, name)
            .await?
            .ok_or_else(|| CasError::not_found(format!("depot {:?}", name)))
    }

    pub async fn list(&self, realm: &str) -> Result<Vec<Depot>> {
        Ok(self.provider.list_depots(realm).await?)
    }

    /// Point the depot at `root`, recording the superseded version in its
    ///  history.
    pub async fn update_root(
        &self,
        realm: &str,
        id: &str,
        root: &Key,
        message: Option<String>,
    ) -> Result<Depot> {
        self.require_owned(realm, root).await?;

        for attempt in 1..=ADVANCE_ATTEMPTS {
            let current = self.get(realm, id).await?;
            let outcome = self
                .provider
                .advance_depot(
                    realm,
                    id,
                    current.version,
                    root,
                    message.clone(),
                    self.clock.now(),
                )
                .await?;
            match outcome {
                AdvanceOutcome::Advanced(depot) => {
                    tracing::info!(
                        realm = %realm,
                        depot = %id,
                        version = depot.version,
                        root = %root,
                        "updated depot"
                    );
                    return Ok(depot);
                }
                AdvanceOutcome::VersionMismatch => {
                    tracing::debug!(depot = %id, attempt, "depot moved underneath update, retrying");
                }
                AdvanceOutcome::Missing => {
                    return Err(CasError::not_found(format!("depot {}", id)));
                }
            }
        }
        Err(CasError::Conflict(format!(
            "depot {} kept changing during update",
            id
        )))
    }

    /// Make the root of history entry `version` current again, as a new
    ///  version.
    pub async fn rollback(&self, realm: &str, id: &str, version: u64) -> Result<RollbackOutcome> {
        let current = self.get(realm, id).await?;
        let entry = self
            .provider
            .history_entry(realm, id, version)
            .await?
            .ok_or_else(|| {
                CasError::not_found(format!("version {} in history of depot {}", version, id))
            })?;

        if entry.root == current.root {
            return Ok(RollbackOutcome {
                message: format!("depot is already at the root of version {}", version),
                depot: current,
                changed: false,
            });
        }

        let message = format!("rollback to version {}", version);
        let depot = self
            .update_root(realm, id, &entry.root, Some(message.clone()))
            .await?;
        tracing::info!(realm = %realm, depot = %id, target = version, version = depot.version, "rolled back depot");
        Ok(RollbackOutcome {
            depot,
            changed: true,
            message,
        })
    }

    /// Superseded versions, newest first. Pass the last version seen as
    ///  `cursor` to continue.
    pub async fn history(
        &self,
        realm: &str,
        id: &str,
        limit: usize,
        cursor: Option<u64>,
    ) -> Result<Vec<HistoryEntry>> {
        // distinguish an unknown depot from an empty history
        self.get(realm, id).await?;
        let limit = limit.clamp(1, MAX_HISTORY_PAGE);
        Ok(self.provider.history(realm, id, cursor, limit).await?)
    }

    /// Delete a depot and its history. `main` can never be deleted. The
    ///  roots it pointed at keep their ownership records.
    pub async fn delete(&self, realm: &str, id: &str) -> Result<()> {
        let depot = self.get(realm, id).await?;
        if depot.name == MAIN_DEPOT {
            return Err(CasError::forbidden("the main depot cannot be deleted"));
        }
        if !self.provider.delete_depot(realm, id).await? {
            return Err(CasError::not_found(format!("depot {}", id)));
        }
        tracing::info!(realm = %realm, depot = %id, name = %depot.name, "deleted depot");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::clock::ManualClock;
    use crate::memory::MemoryRecords;

    struct Fixture {
        depots: Depots<MemoryRecords, MemoryRecords>,
        ledger: Ledger<MemoryRecords>,
        clock: ManualClock,
    }

    fn fixture() -> Fixture {
        let records = MemoryRecords::new();
        let clock = ManualClock::default();
        let ledger = Ledger::new(records.clone(), Arc::new(clock.clone()));
        Fixture {
            depots: Depots::new(records, ledger.clone(), Arc::new(clock.clone())),
            ledger,
            clock,
        }
    }

    async fn owned(f: &Fixture, seed: &[u8]) -> Key {
        let key = Key::digest(seed);
        f.ledger.add("r", &key, "tok", None, 0).await.unwrap();
        key
    }

    #[tokio::test]
    async fn test_history_and_rollback() {
        let f = fixture();
        let a = owned(&f, b"a").await;
        let b = owned(&f, b"b").await;
        let c = owned(&f, b"c").await;

        let depot = f.depots.create("r", "site", &a, None).await.unwrap();
        assert_eq!(depot.version, 0);
        f.clock.advance(chrono::Duration::seconds(1));
        f.depots
            .update_root("r", &depot.id, &b, Some("second".into()))
            .await
            .unwrap();
        f.clock.advance(chrono::Duration::seconds(1));
        let updated = f
            .depots
            .update_root("r", &depot.id, &c, Some("third".into()))
            .await
            .unwrap();
        assert_eq!(updated.version, 2);

        let rolled = f.depots.rollback("r", &depot.id, 1).await.unwrap();
        assert!(rolled.changed);
        assert_eq!(rolled.depot.version, 3);
        assert_eq!(rolled.depot.root, b);

        let history = f.depots.history("r", &depot.id, 10, None).await.unwrap();
        let versions: Vec<(u64, Key)> = history.iter().map(|e| (e.version, e.root)).collect();
        assert_eq!(versions, vec![(2, c), (1, b), (0, a)]);
        assert_eq!(history[1].message.as_deref(), Some("second"));
        assert_eq!(history[2].created_at, depot.created_at);

        // paging by version cursor
        let page = f.depots.history("r", &depot.id, 1, Some(2)).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].version, 1);
    }

    #[tokio::test]
    async fn test_rollback_edge_cases() {
        let f = fixture();
        let a = owned(&f, b"a").await;
        let b = owned(&f, b"b").await;
        let depot = f.depots.create("r", "site", &a, None).await.unwrap();
        f.depots.update_root("r", &depot.id, &b, None).await.unwrap();
        f.depots.update_root("r", &depot.id, &a, None).await.unwrap();

        // version 0 had root a, which is current again
        let noop = f.depots.rollback("r", &depot.id, 0).await.unwrap();
        assert!(!noop.changed);
        assert_eq!(noop.depot.version, 2);

        // the current version has no history entry
        assert!(matches!(
            f.depots.rollback("r", &depot.id, 2).await,
            Err(CasError::NotFound(_))
        ));
        assert!(matches!(
            f.depots.rollback("r", &depot.id, 42).await,
            Err(CasError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_roots_must_be_owned() {
        let f = fixture();
        let a = owned(&f, b"a").await;
        let stranger = Key::digest(b"not mine");

        assert!(matches!(
            f.depots.create("r", "x", &stranger, None).await,
            Err(CasError::NotFound(_))
        ));
        let depot = f.depots.create("r", "x", &a, None).await.unwrap();
        assert!(matches!(
            f.depots.update_root("r", &depot.id, &stranger, None).await,
            Err(CasError::NotFound(_))
        ));
        // other realms do not see it
        assert!(matches!(
            f.depots.get("other", &depot.id).await,
            Err(CasError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_names_and_main() {
        let f = fixture();
        let a = owned(&f, b"a").await;

        let main = f.depots.ensure_main("r", &a).await.unwrap();
        assert_eq!(main.name, MAIN_DEPOT);
        assert_eq!(f.depots.ensure_main("r", &a).await.unwrap().id, main.id);
        assert!(matches!(
            f.depots.delete("r", &main.id).await,
            Err(CasError::Forbidden(_))
        ));

        f.depots.create("r", "docs", &a, None).await.unwrap();
        assert!(matches!(
            f.depots.create("r", "docs", &a, None).await,
            Err(CasError::Conflict(_))
        ));
        assert!(matches!(
            f.depots.create("r", "a/b", &a, None).await,
            Err(CasError::InvalidInput(_))
        ));

        let docs = f.depots.get_by_name("r", "docs").await.unwrap();
        f.depots.delete("r", &docs.id).await.unwrap();
        assert!(matches!(
            f.depots.history("r", &docs.id, 10, None).await,
            Err(CasError::NotFound(_))
        ));
        let names: Vec<String> = f
            .depots
            .list("r")
            .await
            .unwrap()
            .into_iter()
            .map(|d| d.name)
            .collect();
        assert_eq!(names, vec![MAIN_DEPOT.to_string()]);
    }
}
