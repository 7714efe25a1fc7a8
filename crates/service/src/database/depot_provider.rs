use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::depot::{AdvanceOutcome, Depot, DepotProvider, HistoryEntry};
use common::error::ProviderError;
use common::hash::Key;

use super::types::{from_micros, provider_error, to_micros, DKey};
use super::Database;

const DEPOT_COLUMNS: &str = "id, realm, name, root, version, message, created_at, updated_at";

fn depot_from_row(row: &SqliteRow) -> Result<Depot, sqlx::Error> {
    let root: DKey = row.try_get("root")?;
    let version: i64 = row.try_get("version")?;
    Ok(Depot {
        id: row.try_get("id")?,
        realm: row.try_get("realm")?,
        name: row.try_get("name")?,
        root: root.into(),
        version: version as u64,
        message: row.try_get("message")?,
        created_at: from_micros(row.try_get("created_at")?)?,
        updated_at: from_micros(row.try_get("updated_at")?)?,
    })
}

fn entry_from_row(row: &SqliteRow) -> Result<HistoryEntry, sqlx::Error> {
    let root: DKey = row.try_get("root")?;
    let version: i64 = row.try_get("version")?;
    Ok(HistoryEntry {
        version: version as u64,
        root: root.into(),
        created_at: from_micros(row.try_get("created_at")?)?,
        message: row.try_get("message")?,
    })
}

#[async_trait]
impl DepotProvider for Database {
    async fn insert_depot(&self, depot: Depot) -> Result<bool, ProviderError> {
        let result = sqlx::query(
            r#"
            INSERT INTO depots (id, realm, name, root, version, message, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(&depot.id)
        .bind(&depot.realm)
        .bind(&depot.name)
        .bind(DKey::from(depot.root))
        .bind(depot.version as i64)
        .bind(&depot.message)
        .bind(to_micros(depot.created_at))
        .bind(to_micros(depot.updated_at))
        .execute(&**self)
        .await
        .map_err(provider_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn get_depot(&self, realm: &str, id: &str) -> Result<Option<Depot>, ProviderError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM depots WHERE realm = ? AND id = ?",
            DEPOT_COLUMNS
        ))
        .bind(realm)
        .bind(id)
        .fetch_optional(&**self)
        .await
        .map_err(provider_error)?;

        row.as_ref()
            .map(depot_from_row)
            .transpose()
            .map_err(provider_error)
    }

    async fn get_depot_by_name(
        &self,
        realm: &str,
        name: &str,
    ) -> Result<Option<Depot>, ProviderError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM depots WHERE realm = ? AND name = ?",
            DEPOT_COLUMNS
        ))
        .bind(realm)
        .bind(name)
        .fetch_optional(&**self)
        .await
        .map_err(provider_error)?;

        row.as_ref()
            .map(depot_from_row)
            .transpose()
            .map_err(provider_error)
    }

    async fn list_depots(&self, realm: &str) -> Result<Vec<Depot>, ProviderError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM depots WHERE realm = ? ORDER BY name",
            DEPOT_COLUMNS
        ))
        .bind(realm)
        .fetch_all(&**self)
        .await
        .map_err(provider_error)?;

        rows.iter()
            .map(depot_from_row)
            .collect::<Result<_, _>>()
            .map_err(provider_error)
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
        let mut tx = self.begin().await.map_err(provider_error)?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM depots WHERE realm = ? AND id = ?",
            DEPOT_COLUMNS
        ))
        .bind(realm)
        .bind(id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(provider_error)?;
        let Some(current) = row
            .as_ref()
            .map(depot_from_row)
            .transpose()
            .map_err(provider_error)?
        else {
            return Ok(AdvanceOutcome::Missing);
        };
        if current.version != expected_version {
            return Ok(AdvanceOutcome::VersionMismatch);
        }

        // the version guard rejects a writer that read the same version
        //  as us but committed first
        let updated = sqlx::query(
            r#"
            UPDATE depots
            SET root = ?, version = version + 1, message = ?, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(DKey::from(root))
        .bind(&message)
        .bind(to_micros(now))
        .bind(id)
        .bind(expected_version as i64)
        .execute(&mut *tx)
        .await
        .map_err(provider_error)?;
        if updated.rows_affected() == 0 {
            return Ok(AdvanceOutcome::VersionMismatch);
        }

        let superseded = HistoryEntry::superseding(&current);
        sqlx::query(
            r#"
            INSERT INTO depot_history (depot_id, version, root, message, created_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(id)
        .bind(superseded.version as i64)
        .bind(DKey::from(superseded.root))
        .bind(&superseded.message)
        .bind(to_micros(superseded.created_at))
        .execute(&mut *tx)
        .await
        .map_err(provider_error)?;

        tx.commit().await.map_err(provider_error)?;

        Ok(AdvanceOutcome::Advanced(Depot {
            root: *root,
            version: expected_version + 1,
            message,
            updated_at: now,
            ..current
        }))
    }

    async fn history(
        &self,
        realm: &str,
        id: &str,
        before: Option<u64>,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>, ProviderError> {
        let before = before.map(|b| b as i64);
        let rows = sqlx::query(
            r#"
            SELECT h.version, h.root, h.message, h.created_at
            FROM depot_history h
            INNER JOIN depots d ON d.id = h.depot_id
            WHERE d.realm = ? AND d.id = ? AND (? IS NULL OR h.version < ?)
            ORDER BY h.version DESC
            LIMIT ?
            "#,
        )
        .bind(realm)
        .bind(id)
        .bind(before)
        .bind(before)
        .bind(limit as i64)
        .fetch_all(&**self)
        .await
        .map_err(provider_error)?;

        rows.iter()
            .map(entry_from_row)
            .collect::<Result<_, _>>()
            .map_err(provider_error)
    }

    async fn history_entry(
        &self,
        realm: &str,
        id: &str,
        version: u64,
    ) -> Result<Option<HistoryEntry>, ProviderError> {
        let row = sqlx::query(
            r#"
            SELECT h.version, h.root, h.message, h.created_at
            FROM depot_history h
            INNER JOIN depots d ON d.id = h.depot_id
            WHERE d.realm = ? AND d.id = ? AND h.version = ?
            "#,
        )
        .bind(realm)
        .bind(id)
        .bind(version as i64)
        .fetch_optional(&**self)
        .await
        .map_err(provider_error)?;

        row.as_ref()
            .map(entry_from_row)
            .transpose()
            .map_err(provider_error)
    }

    async fn delete_depot(&self, realm: &str, id: &str) -> Result<bool, ProviderError> {
        let mut tx = self.begin().await.map_err(provider_error)?;

        let deleted = sqlx::query("DELETE FROM depots WHERE realm = ? AND id = ?")
            .bind(realm)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(provider_error)?;
        if deleted.rows_affected() == 0 {
            return Ok(false);
        }
        sqlx::query("DELETE FROM depot_history WHERE depot_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(provider_error)?;

        tx.commit().await.map_err(provider_error)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn depot(id: &str, name: &str) -> Depot {
        let now = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        Depot {
            id: id.into(),
            realm: "r".into(),
            name: name.into(),
            root: Key::digest(b"v0"),
            version: 0,
            message: Some("initial".into()),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_names_are_unique_per_realm() {
        let db = Database::in_memory().await.unwrap();
        assert!(db.insert_depot(depot("d1", "main")).await.unwrap());
        assert!(!db.insert_depot(depot("d2", "main")).await.unwrap());
        assert!(db
            .insert_depot(Depot {
                realm: "elsewhere".into(),
                ..depot("d3", "main")
            })
            .await
            .unwrap());

        let listed = db.list_depots("r").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(db.get_depot_by_name("r", "main").await.unwrap().unwrap().id, "d1");
        assert!(db.get_depot("elsewhere", "d1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_advance_records_superseded_version() {
        let db = Database::in_memory().await.unwrap();
        let original = depot("d1", "site");
        db.insert_depot(original.clone()).await.unwrap();
        let now = original.created_at + chrono::Duration::seconds(1);

        let v1 = Key::digest(b"v1");
        let outcome = db
            .advance_depot("r", "d1", 0, &v1, None, now)
            .await
            .unwrap();
        let AdvanceOutcome::Advanced(advanced) = outcome else {
            panic!("expected advance, got {:?}", outcome);
        };
        assert_eq!(advanced.version, 1);
        assert_eq!(advanced.root, v1);
        assert_eq!(db.get_depot("r", "d1").await.unwrap(), Some(advanced));

        // a writer still holding version 0 loses
        assert_eq!(
            db.advance_depot("r", "d1", 0, &Key::digest(b"late"), None, now)
                .await
                .unwrap(),
            AdvanceOutcome::VersionMismatch
        );
        assert_eq!(
            db.advance_depot("r", "nope", 0, &v1, None, now).await.unwrap(),
            AdvanceOutcome::Missing
        );

        let history = db.history("r", "d1", None, 10).await.unwrap();
        assert_eq!(history, vec![HistoryEntry::superseding(&original)]);
        assert_eq!(
            db.history_entry("r", "d1", 0).await.unwrap(),
            Some(HistoryEntry::superseding(&original))
        );
        assert!(db.history_entry("r", "d1", 1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_drops_history() {
        let db = Database::in_memory().await.unwrap();
        let original = depot("d1", "site");
        db.insert_depot(original.clone()).await.unwrap();
        db.advance_depot("r", "d1", 0, &Key::digest(b"v1"), None, original.created_at)
            .await
            .unwrap();

        assert!(db.delete_depot("r", "d1").await.unwrap());
        assert!(!db.delete_depot("r", "d1").await.unwrap());
        assert!(db.history("r", "d1", None, 10).await.unwrap().is_empty());
        // the name is free again
        assert!(db.insert_depot(depot("d2", "site")).await.unwrap());
    }
}
