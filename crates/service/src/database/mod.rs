mod depot_provider;
mod ledger_provider;
mod sqlite;
mod ticket_provider;
mod types;

use std::ops::Deref;
use std::path::Path;

use sqlx::SqlitePool;

pub use types::DKey;

/// SQLite record store. Implements the ledger, ticket and depot providers,
///  so one `Database` is a complete `RecordStore`.
#[derive(Clone, Debug)]
pub struct Database(SqlitePool);

impl Database {
    /// Open (creating if needed) the database file at `path` and migrate it.
    pub async fn open(path: &Path) -> Result<Self, DatabaseSetupError> {
        let db = sqlite::connect_sqlite(path).await?;
        sqlite::migrate_sqlite(&db).await?;
        tracing::debug!(path = %path.display(), "opened record database");
        Ok(Database::new(db))
    }

    /// A private database that lives as long as the returned handle.
    pub async fn in_memory() -> Result<Self, DatabaseSetupError> {
        let db = sqlite::connect_sqlite_memory().await?;
        sqlite::migrate_sqlite(&db).await?;
        Ok(Database::new(db))
    }

    pub fn new(pool: SqlitePool) -> Self {
        Self(pool)
    }
}

impl Deref for Database {
    type Target = SqlitePool;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

#[derive(Debug, thiserror::Error)]
pub enum DatabaseSetupError {
    #[error("error occurred while attempting database migration: {0}")]
    MigrationFailed(#[from] sqlx::migrate::MigrateError),

    #[error("unable to perform initial connection and check of the database: {0}")]
    Unavailable(#[from] sqlx::Error),

    #[error("unable to prepare the database directory: {0}")]
    Io(#[from] std::io::Error),
}
