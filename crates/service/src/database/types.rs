use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use sqlx::encode::IsNull;
use sqlx::error::BoxDynError;
use sqlx::sqlite::{SqliteArgumentValue, SqliteTypeInfo, SqliteValueRef};
use sqlx::{Decode, Encode, Sqlite, Type};

use common::error::ProviderError;
use common::hash::Key;

/// Database-compatible key wrapper, stored as its canonical text form
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct DKey(Key);

impl From<DKey> for Key {
    fn from(val: DKey) -> Self {
        val.0
    }
}

impl From<Key> for DKey {
    fn from(key: Key) -> Self {
        Self(key)
    }
}

impl From<&Key> for DKey {
    fn from(key: &Key) -> Self {
        Self(*key)
    }
}

impl Decode<'_, Sqlite> for DKey {
    fn decode(value: SqliteValueRef<'_>) -> Result<Self, BoxDynError> {
        let db_val = <String as Decode<Sqlite>>::decode(value)?;
        let key = db_val.parse::<Key>()?;
        Ok(Self(key))
    }
}

impl Encode<'_, Sqlite> for DKey {
    fn encode_by_ref(
        &self,
        args: &mut Vec<SqliteArgumentValue<'_>>,
    ) -> Result<IsNull, BoxDynError> {
        args.push(SqliteArgumentValue::Text(self.0.to_string().into()));
        Ok(IsNull::No)
    }
}

impl Type<Sqlite> for DKey {
    fn compatible(ty: &SqliteTypeInfo) -> bool {
        <String as Type<Sqlite>>::compatible(ty)
    }

    fn type_info() -> SqliteTypeInfo {
        <String as Type<Sqlite>>::type_info()
    }
}

/// Timestamps are stored as microseconds since the epoch.
pub(super) fn to_micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

pub(super) fn from_micros(micros: i64) -> Result<DateTime<Utc>, sqlx::Error> {
    DateTime::from_timestamp_micros(micros).ok_or_else(|| {
        sqlx::Error::Decode(format!("timestamp out of range: {}", micros).into())
    })
}

pub(super) fn to_json<T: serde::Serialize>(value: &T) -> Result<String, ProviderError> {
    serde_json::to_string(value).map_err(ProviderError::backend)
}

pub(super) fn from_json<T: DeserializeOwned>(raw: &str) -> Result<T, sqlx::Error> {
    serde_json::from_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

/// Map a sqlx error onto the provider taxonomy. Lock contention and pool
///  exhaustion are transient.
pub(super) fn provider_error(err: sqlx::Error) -> ProviderError {
    let transient = match &err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => true,
        sqlx::Error::Database(db_error) => {
            let message = db_error.message();
            message.contains("database is locked") || message.contains("database is busy")
        }
        _ => false,
    };
    if transient {
        tracing::warn!(error = %err, "transient database error");
        ProviderError::Transient(err.to_string())
    } else {
        ProviderError::backend(err)
    }
}
