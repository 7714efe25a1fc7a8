use async_trait::async_trait;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::error::ProviderError;
use common::hash::Key;
use common::ledger::{LedgerProvider, Ownership};

use super::types::{from_micros, provider_error, to_micros, DKey};
use super::Database;

fn ownership_from_row(row: &SqliteRow) -> Result<Ownership, sqlx::Error> {
    let key: DKey = row.try_get("key")?;
    let size: i64 = row.try_get("size")?;
    Ok(Ownership {
        realm: row.try_get("realm")?,
        key: key.into(),
        created_at: from_micros(row.try_get("created_at")?)?,
        created_by: row.try_get("created_by")?,
        content_type: row.try_get("content_type")?,
        size: size as u64,
    })
}

#[async_trait]
impl LedgerProvider for Database {
    async fn put_ownership(&self, record: Ownership) -> Result<(), ProviderError> {
        sqlx::query(
            r#"
            INSERT INTO ownership (realm, key, created_at, created_by, content_type, size)
            VALUES (?, ?, ?, ?, ?, ?)
            ON CONFLICT(realm, key) DO UPDATE SET
                created_at = excluded.created_at,
                created_by = excluded.created_by,
                content_type = excluded.content_type,
                size = excluded.size
            "#,
        )
        .bind(&record.realm)
        .bind(DKey::from(record.key))
        .bind(to_micros(record.created_at))
        .bind(&record.created_by)
        .bind(&record.content_type)
        .bind(record.size as i64)
        .execute(&**self)
        .await
        .map_err(provider_error)?;
        Ok(())
    }

    async fn get_ownership(&self, realm: &str, key: &Key) -> Result<Option<Ownership>, ProviderError> {
        let row = sqlx::query(
            r#"
            SELECT realm, key, created_at, created_by, content_type, size
            FROM ownership
            WHERE realm = ? AND key = ?
            "#,
        )
        .bind(realm)
        .bind(DKey::from(key))
        .fetch_optional(&**self)
        .await
        .map_err(provider_error)?;

        row.as_ref()
            .map(ownership_from_row)
            .transpose()
            .map_err(provider_error)
    }

    async fn delete_ownership(&self, realm: &str, key: &Key) -> Result<bool, ProviderError> {
        let result = sqlx::query("DELETE FROM ownership WHERE realm = ? AND key = ?")
            .bind(realm)
            .bind(DKey::from(key))
            .execute(&**self)
            .await
            .map_err(provider_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn owners(&self, key: &Key) -> Result<Vec<String>, ProviderError> {
        let rows = sqlx::query("SELECT realm FROM ownership WHERE key = ? ORDER BY realm")
            .bind(DKey::from(key))
            .fetch_all(&**self)
            .await
            .map_err(provider_error)?;

        rows.iter()
            .map(|r| r.try_get::<String, _>("realm"))
            .collect::<Result<_, _>>()
            .map_err(provider_error)
    }

    async fn list_ownership(
        &self,
        realm: &str,
        after: Option<Key>,
        limit: usize,
    ) -> Result<Vec<Ownership>, ProviderError> {
        // canonical key strings sort the same way as the digests
        let rows = sqlx::query(
            r#"
            SELECT realm, key, created_at, created_by, content_type, size
            FROM ownership
            WHERE realm = ? AND (? IS NULL OR key > ?)
            ORDER BY key
            LIMIT ?
            "#,
        )
        .bind(realm)
        .bind(after.map(DKey::from))
        .bind(after.map(DKey::from))
        .bind(limit as i64)
        .fetch_all(&**self)
        .await
        .map_err(provider_error)?;

        rows.iter()
            .map(ownership_from_row)
            .collect::<Result<_, _>>()
            .map_err(provider_error)
    }

    async fn count_owners(&self, key: &Key) -> Result<u64, ProviderError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM ownership WHERE key = ?")
            .bind(DKey::from(key))
            .fetch_one(&**self)
            .await
            .map_err(provider_error)?;
        Ok(count as u64)
    }
}
