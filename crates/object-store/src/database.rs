//! SQLite database for blob metadata storage.

use std::path::Path;

use sqlx::{
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
    Row,
};

use crate::error::Result;

/// Blob metadata stored in SQLite.
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub(crate) struct BlobMetadata {
    pub key: String,
    pub size: i64,
    pub state: BlobState,
    pub created_at: i64,
    pub updated_at: i64,
}

/// State of a blob in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) enum BlobState {
    /// Blob is complete and ready to use
    #[default]
    Complete,
    /// Blob upload is in progress
    Partial,
    /// Blob is marked for deletion
    Deleting,
}

impl BlobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlobState::Complete => "complete",
            BlobState::Partial => "partial",
            BlobState::Deleting => "deleting",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "partial" => BlobState::Partial,
            "deleting" => BlobState::Deleting,
            _ => BlobState::Complete,
        }
    }
}

/// SQLite database connection pool.
#[derive(Debug, Clone)]
pub(crate) struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Create a new database connection from a file path.
    pub async fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    /// Create an in-memory database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .journal_mode(SqliteJournalMode::Wal);

        // a single connection, otherwise every connection sees its own
        //  private in-memory database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self { pool };
        db.run_migrations().await?;
        Ok(db)
    }

    async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    /// Mark a blob upload as started. Existing complete rows are left alone.
    pub async fn begin_blob(&self, key: &str, size: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO blobs (key, size, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO NOTHING
            "#,
        )
        .bind(key)
        .bind(size)
        .bind(BlobState::Partial.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Insert or complete a blob record.
    pub async fn complete_blob(&self, key: &str, size: i64) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        sqlx::query(
            r#"
            INSERT INTO blobs (key, size, state, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(key) DO UPDATE SET
                size = excluded.size,
                state = excluded.state,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(key)
        .bind(size)
        .bind(BlobState::Complete.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Flag a blob as being deleted so readers stop seeing it before the
    ///  bytes are removed.
    pub async fn mark_deleting(&self, key: &str) -> Result<bool> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            r#"
            UPDATE blobs SET state = ?, updated_at = ? WHERE key = ?
            "#,
        )
        .bind(BlobState::Deleting.as_str())
        .bind(now)
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Get blob metadata by key.
    pub async fn get_blob(&self, key: &str) -> Result<Option<BlobMetadata>> {
        let row = sqlx::query(
            r#"
            SELECT key, size, state, created_at, updated_at
            FROM blobs
            WHERE key = ?
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| BlobMetadata {
            key: r.get("key"),
            size: r.get("size"),
            state: BlobState::parse(r.get("state")),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    /// Check if a complete blob exists.
    pub async fn has_blob(&self, key: &str) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT 1 FROM blobs WHERE key = ? AND state = ?
            "#,
        )
        .bind(key)
        .bind(BlobState::Complete.as_str())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    /// Delete a blob record.
    pub async fn delete_blob(&self, key: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            DELETE FROM blobs WHERE key = ?
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// List complete blob keys in key order, starting after `after`.
    pub async fn list_blobs(&self, after: Option<&str>, limit: i64) -> Result<Vec<String>> {
        let rows = sqlx::query(
            r#"
            SELECT key FROM blobs
            WHERE state = ? AND key > ?
            ORDER BY key ASC
            LIMIT ?
            "#,
        )
        .bind(BlobState::Complete.as_str())
        .bind(after.unwrap_or(""))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(|r| r.get("key")).collect())
    }

    /// Count complete blobs and their total size.
    pub async fn stats(&self) -> Result<(i64, i64)> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) as count, COALESCE(SUM(size), 0) as total
            FROM blobs WHERE state = ?
            "#,
        )
        .bind(BlobState::Complete.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok((row.get("count"), row.get("total")))
    }
}
