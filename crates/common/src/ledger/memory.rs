use async_trait::async_trait;

use super::{LedgerProvider, Ownership};
use crate::error::ProviderError;
use crate::hash::Key;
use crate::memory::MemoryRecords;

#[async_trait]
impl LedgerProvider for MemoryRecords {
    async fn put_ownership(&self, record: Ownership) -> Result<(), ProviderError> {
        let mut inner = self.write()?;
        inner
            .owners
            .entry(record.key)
            .or_default()
            .insert(record.realm.clone());
        inner
            .ownership
            .entry(record.realm.clone())
            .or_default()
            .insert(record.key, record);
        Ok(())
    }

    async fn get_ownership(&self, realm: &str, key: &Key) -> Result<Option<Ownership>, ProviderError> {
        let inner = self.read()?;
        Ok(inner
            .ownership
            .get(realm)
            .and_then(|records| records.get(key))
            .cloned())
    }

    async fn delete_ownership(&self, realm: &str, key: &Key) -> Result<bool, ProviderError> {
        let mut inner = self.write()?;
        let removed = inner
            .ownership
            .get_mut(realm)
            .and_then(|records| records.remove(key))
            .is_some();
        if removed {
            if let Some(realms) = inner.owners.get_mut(key) {
                realms.remove(realm);
                if realms.is_empty() {
                    inner.owners.remove(key);
                }
            }
        }
        Ok(removed)
    }

    async fn owners(&self, key: &Key) -> Result<Vec<String>, ProviderError> {
        let inner = self.read()?;
        Ok(inner
            .owners
            .get(key)
            .map(|realms| realms.iter().cloned().collect())
            .unwrap_or_default())
    }

    async fn list_ownership(
        &self,
        realm: &str,
        after: Option<Key>,
        limit: usize,
    ) -> Result<Vec<Ownership>, ProviderError> {
        use std::ops::Bound;

        let inner = self.read()?;
        let Some(records) = inner.ownership.get(realm) else {
            return Ok(Vec::new());
        };
        let lower = match after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        Ok(records
            .range((lower, Bound::Unbounded))
            .take(limit)
            .map(|(_, record)| record.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::clock::SystemClock;
    use crate::hash::Key;
    use crate::ledger::Ledger;
    use crate::memory::MemoryRecords;

    fn ledger() -> Ledger<MemoryRecords> {
        Ledger::new(MemoryRecords::new(), Arc::new(SystemClock))
    }

    #[tokio::test]
    async fn test_reference_counting_across_realms() {
        let ledger = ledger();
        let key = Key::digest(b"shared");

        ledger.add("a", &key, "tok-a", None, 6).await.unwrap();
        ledger.add("b", &key, "tok-b", None, 6).await.unwrap();
        // idempotent per realm
        ledger.add("a", &key, "tok-a", None, 6).await.unwrap();
        assert_eq!(ledger.count_references(&key).await.unwrap(), 2);

        assert!(ledger.remove("a", &key).await.unwrap());
        assert_eq!(ledger.count_references(&key).await.unwrap(), 1);
        assert!(!ledger.has("a", &key).await.unwrap());
        assert!(ledger.has("b", &key).await.unwrap());

        assert!(ledger.remove("b", &key).await.unwrap());
        assert!(!ledger.remove("b", &key).await.unwrap());
        assert_eq!(ledger.count_references(&key).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_batch_check() {
        let ledger = ledger();
        let owned = Key::digest(b"owned");
        let other = Key::digest(b"other");
        ledger
            .add("r", &owned, "tok", Some("text/plain"), 5)
            .await
            .unwrap();

        let check = ledger.check("r", &[owned, other]).await.unwrap();
        assert_eq!(check.found, vec![owned]);
        assert_eq!(check.missing, vec![other]);
        assert!(!check.all_found());

        let record = ledger.get("r", &owned).await.unwrap().unwrap();
        assert_eq!(record.content_type.as_deref(), Some("text/plain"));
        assert_eq!(record.created_by, "tok");
    }

    #[tokio::test]
    async fn test_paginated_listing() {
        let ledger = ledger();
        for i in 0..5u8 {
            ledger
                .add("r", &Key::digest(&[i]), "tok", None, 1)
                .await
                .unwrap();
        }
        ledger
            .add("elsewhere", &Key::digest(b"x"), "tok", None, 1)
            .await
            .unwrap();

        let first = ledger.list("r", 2, None).await.unwrap();
        assert_eq!(first.records.len(), 2);
        let second = ledger.list("r", 2, first.next).await.unwrap();
        assert_eq!(second.records.len(), 2);
        let third = ledger.list("r", 2, second.next).await.unwrap();
        assert_eq!(third.records.len(), 1);
        assert!(third.next.is_none());

        let mut seen: Vec<Key> = [first, second, third]
            .into_iter()
            .flat_map(|page| page.records.into_iter().map(|r| r.key))
            .collect();
        seen.dedup();
        assert_eq!(seen.len(), 5);
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }
}
