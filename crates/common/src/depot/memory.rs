use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{AdvanceOutcome, Depot, DepotProvider, HistoryEntry};
use crate::error::ProviderError;
use crate::hash::Key;
use crate::memory::MemoryRecords;

#[async_trait]
impl DepotProvider for MemoryRecords {
    async fn insert_depot(&self, depot: Depot) -> Result<bool, ProviderError> {
        let mut inner = self.write()?;
        let name_key = (depot.realm.clone(), depot.name.clone());
        if inner.depot_names.contains_key(&name_key) {
            return Ok(false);
        }
        inner.depot_names.insert(name_key, depot.id.clone());
        inner.history.insert(depot.id.clone(), Vec::new());
        inner.depots.insert(depot.id.clone(), depot);
        Ok(true)
    }

    async fn get_depot(&self, realm: &str, id: &str) -> Result<Option<Depot>, ProviderError> {
        let inner = self.read()?;
        Ok(inner
            .depots
            .get(id)
            .filter(|d| d.realm == realm)
            .cloned())
    }

    async fn get_depot_by_name(
        &self,
        realm: &str,
        name: &str,
    ) -> Result<Option<Depot>, ProviderError> {
        let inner = self.read()?;
        Ok(inner
            .depot_names
            .get(&(realm.to_string(), name.to_string()))
            .and_then(|id| inner.depots.get(id))
            .cloned())
    }

    async fn list_depots(&self, realm: &str) -> Result<Vec<Depot>, ProviderError> {
        let inner = self.read()?;
        let mut depots: Vec<Depot> = inner
            .depots
            .values()
            .filter(|d| d.realm == realm)
            .cloned()
            .collect();
        depots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(depots)
    }

    async fn advance_depot(
        &self,
        realm: &str,
        id: &str,
        expected_version: u64,
        root: &Key,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<AdvanceOutcome, ProviderError> {
        let mut inner = self.write()?;
        let Some(depot) = inner.depots.get_mut(id).filter(|d| d.realm == realm) else {
            return Ok(AdvanceOutcome::Missing);
        };
        if depot.version != expected_version {
            return Ok(AdvanceOutcome::VersionMismatch);
        }
        let entry = HistoryEntry::superseding(depot);
        depot.root = *root;
        depot.version += 1;
        depot.message = message;
        depot.updated_at = now;
        let advanced = depot.clone();
        inner.history.entry(id.to_string()).or_default().push(entry);
        Ok(AdvanceOutcome::Advanced(advanced))
    }

    async fn history(
        &self,
        realm: &str,
        id: &str,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ProviderError> {
        let inner = self.read()?;
        if !inner.depots.get(id).is_some_and(|d| d.realm == realm) {
            return Ok(Vec::new());
        }
        Ok(inner
            .history
            .get(id)
            .map(|entries| {
                entries
                    .iter()
                    .rev()
                    .filter(|e| before.map_or(true, |b| e.version < b))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn history_entry(
        &self,
        realm: &str,
        id: &str,
        version: u64,
    ) -> Result<Option<HistoryEntry>, ProviderError> {
        let inner = self.read()?;
        if !inner.depots.get(id).is_some_and(|d| d.realm == realm) {
            return Ok(None);
        }
        Ok(inner
            .history
            .get(id)
            .and_then(|entries| entries.iter().find(|e| e.version == version))
            .cloned())
    }

    async fn delete_depot(&self, realm: &str, id: &str) -> Result<bool, ProviderError> {
        let mut inner = self.write()?;
        let Some(depot) = inner.depots.get(id).filter(|d| d.realm == realm).cloned() else {
            return Ok(false);
        };
        inner.depots.remove(id);
        inner.depot_names.remove(&(depot.realm, depot.name));
        inner.history.remove(id);
        Ok(true)
    }
}
