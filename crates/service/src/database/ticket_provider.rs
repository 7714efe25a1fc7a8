use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use common::error::ProviderError;
use common::hash::Key;
use common::ticket::{ChargeOutcome, CommitOutcome, Ticket, TicketProvider};

use super::types::{from_json, from_micros, provider_error, to_json, to_micros, DKey};
use super::Database;

const TICKET_COLUMNS: &str = "id, realm, issuer, scope, write_grant, created_at, expires_at, \
     written_root, revoked, bytes_written";

// sqlite integers are signed; byte counts past i64::MAX pin there
fn to_count(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn from_count(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

fn ticket_from_row(row: &SqliteRow) -> Result<Ticket, sqlx::Error> {
    let scope: String = row.try_get("scope")?;
    let write: String = row.try_get("write_grant")?;
    let written_root: Option<DKey> = row.try_get("written_root")?;
    Ok(Ticket {
        id: row.try_get("id")?,
        realm: row.try_get("realm")?,
        issuer: row.try_get("issuer")?,
        scope: from_json(&scope)?,
        write: from_json(&write)?,
        created_at: from_micros(row.try_get("created_at")?)?,
        expires_at: from_micros(row.try_get("expires_at")?)?,
        written_root: written_root.map(Key::from),
        revoked: row.try_get("revoked")?,
        bytes_written: from_count(row.try_get("bytes_written")?),
    })
}

#[async_trait]
impl TicketProvider for Database {
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), ProviderError> {
        let scope = to_json(&ticket.scope)?;
        let write = to_json(&ticket.write)?;
        sqlx::query(
            r#"
            INSERT INTO tickets
                (id, realm, issuer, scope, write_grant, created_at, expires_at,
                 written_root, revoked, bytes_written)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&ticket.id)
        .bind(&ticket.realm)
        .bind(&ticket.issuer)
        .bind(scope)
        .bind(write)
        .bind(to_micros(ticket.created_at))
        .bind(to_micros(ticket.expires_at))
        .bind(ticket.written_root.map(DKey::from))
        .bind(ticket.revoked)
        .bind(to_count(ticket.bytes_written))
        .execute(&**self)
        .await
        .map_err(provider_error)?;
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, ProviderError> {
        let row = sqlx::query(&format!("SELECT {} FROM tickets WHERE id = ?", TICKET_COLUMNS))
            .bind(id)
            .fetch_optional(&**self)
            .await
            .map_err(provider_error)?;

        row.as_ref()
            .map(ticket_from_row)
            .transpose()
            .map_err(provider_error)
    }

    async fn commit_ticket(&self, id: &str, root: &Key) -> Result<CommitOutcome, ProviderError> {
        // the IS NULL guard makes the first writer win
        let result = sqlx::query(
            "UPDATE tickets SET written_root = ? WHERE id = ? AND written_root IS NULL",
        )
        .bind(DKey::from(root))
        .bind(id)
        .execute(&**self)
        .await
        .map_err(provider_error)?;

        if result.rows_affected() == 1 {
            return Ok(CommitOutcome::Committed);
        }

        let written: Option<Option<DKey>> =
            sqlx::query_scalar("SELECT written_root FROM tickets WHERE id = ?")
                .bind(id)
                .fetch_optional(&**self)
                .await
                .map_err(provider_error)?;

        Ok(match written {
            None => CommitOutcome::Missing,
            Some(Some(written)) => CommitOutcome::AlreadyWritten(written.into()),
            Some(None) => {
                return Err(ProviderError::Backend(format!(
                    "ticket {} neither committed nor written",
                    id
                )))
            }
        })
    }

    async fn charge_ticket(
        &self,
        id: &str,
        bytes: u64,
        quota: Option<u64>,
    ) -> Result<ChargeOutcome, ProviderError> {
        let bytes = to_count(bytes);
        let quota = quota.map(to_count);
        // the check and the increment are one statement, so concurrent
        //  charges serialize on the row
        let charged: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE tickets
            SET bytes_written = CASE
                WHEN bytes_written > 9223372036854775807 - ? THEN 9223372036854775807
                ELSE bytes_written + ?
            END
            WHERE id = ?
              AND written_root IS NULL
              AND (? IS NULL OR bytes_written <= ? - ?)
            RETURNING bytes_written
            "#,
        )
        .bind(bytes)
        .bind(bytes)
        .bind(id)
        .bind(quota)
        .bind(quota)
        .bind(bytes)
        .fetch_optional(&**self)
        .await
        .map_err(provider_error)?;

        if let Some(total) = charged {
            return Ok(ChargeOutcome::Charged(from_count(total)));
        }

        let row = sqlx::query("SELECT written_root, bytes_written FROM tickets WHERE id = ?")
            .bind(id)
            .fetch_optional(&**self)
            .await
            .map_err(provider_error)?;
        let Some(row) = row else {
            return Ok(ChargeOutcome::Missing);
        };
        let written_root: Option<DKey> = row.try_get("written_root").map_err(provider_error)?;
        if written_root.is_some() {
            return Ok(ChargeOutcome::Consumed);
        }
        let used: i64 = row.try_get("bytes_written").map_err(provider_error)?;
        Ok(ChargeOutcome::OverQuota(from_count(used)))
    }

    async fn revoke_ticket(&self, id: &str) -> Result<bool, ProviderError> {
        let result = sqlx::query("UPDATE tickets SET revoked = 1 WHERE id = ?")
            .bind(id)
            .execute(&**self)
            .await
            .map_err(provider_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_tickets(&self, realm: &str) -> Result<Vec<Ticket>, ProviderError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tickets WHERE realm = ? ORDER BY created_at, id",
            TICKET_COLUMNS
        ))
        .bind(realm)
        .fetch_all(&**self)
        .await
        .map_err(provider_error)?;

        rows.iter()
            .map(ticket_from_row)
            .collect::<Result<_, _>>()
            .map_err(provider_error)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, ProviderError> {
        let result = sqlx::query("DELETE FROM tickets WHERE expires_at <= ?")
            .bind(to_micros(now))
            .execute(&**self)
            .await
            .map_err(provider_error)?;
        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use common::ticket::{Scope, WriteGrant};

    use super::*;

    fn ticket(id: &str, realm: &str, expires_in: i64) -> Ticket {
        let now = DateTime::from_timestamp_micros(1_700_000_000_000_000).unwrap();
        Ticket {
            id: id.into(),
            realm: realm.into(),
            issuer: "tok".into(),
            scope: Scope::keys([Key::digest(b"root")]),
            write: WriteGrant::Bounded {
                quota: Some(10),
                accepted_types: Some(["text/plain".to_string()].into()),
            },
            created_at: now,
            expires_at: now + chrono::Duration::seconds(expires_in),
            written_root: None,
            revoked: false,
            bytes_written: 0,
        }
    }

    #[tokio::test]
    async fn test_ticket_survives_storage() {
        let db = Database::in_memory().await.unwrap();
        let original = ticket("tkt_one", "r", 60);
        db.insert_ticket(original.clone()).await.unwrap();

        assert_eq!(db.get_ticket("tkt_one").await.unwrap(), Some(original));
        assert_eq!(db.get_ticket("tkt_missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_first_commit_wins() {
        let db = Database::in_memory().await.unwrap();
        db.insert_ticket(ticket("tkt_one", "r", 60)).await.unwrap();
        let first = Key::digest(b"first");

        assert_eq!(
            db.commit_ticket("tkt_one", &first).await.unwrap(),
            CommitOutcome::Committed
        );
        assert_eq!(
            db.commit_ticket("tkt_one", &Key::digest(b"second")).await.unwrap(),
            CommitOutcome::AlreadyWritten(first)
        );
        assert_eq!(
            db.commit_ticket("tkt_nope", &first).await.unwrap(),
            CommitOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_charges_are_cumulative() {
        let db = Database::in_memory().await.unwrap();
        db.insert_ticket(ticket("tkt_one", "r", 60)).await.unwrap();

        assert_eq!(
            db.charge_ticket("tkt_one", 6, Some(10)).await.unwrap(),
            ChargeOutcome::Charged(6)
        );
        assert_eq!(
            db.charge_ticket("tkt_one", 5, Some(10)).await.unwrap(),
            ChargeOutcome::OverQuota(6)
        );
        assert_eq!(
            db.charge_ticket("tkt_one", 4, Some(10)).await.unwrap(),
            ChargeOutcome::Charged(10)
        );
        assert_eq!(
            db.charge_ticket("tkt_one", u64::MAX, None).await.unwrap(),
            ChargeOutcome::Charged(i64::MAX as u64)
        );
        assert_eq!(db.get_ticket("tkt_one").await.unwrap().unwrap().bytes_written, i64::MAX as u64);

        db.commit_ticket("tkt_one", &Key::digest(b"root")).await.unwrap();
        assert_eq!(
            db.charge_ticket("tkt_one", 0, None).await.unwrap(),
            ChargeOutcome::Consumed
        );
        assert_eq!(
            db.charge_ticket("tkt_nope", 1, None).await.unwrap(),
            ChargeOutcome::Missing
        );
    }

    #[tokio::test]
    async fn test_revoke_list_and_prune() {
        let db = Database::in_memory().await.unwrap();
        db.insert_ticket(ticket("tkt_short", "r", 1)).await.unwrap();
        db.insert_ticket(ticket("tkt_long", "r", 3_600)).await.unwrap();
        db.insert_ticket(ticket("tkt_other", "s", 3_600)).await.unwrap();

        assert!(db.revoke_ticket("tkt_long").await.unwrap());
        assert!(!db.revoke_ticket("tkt_nope").await.unwrap());

        let listed = db.list_tickets("r").await.unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed.iter().any(|t| t.id == "tkt_long" && t.revoked));

        let later = ticket("x", "r", 0).created_at + chrono::Duration::seconds(10);
        assert_eq!(db.delete_expired(later).await.unwrap(), 1);
        assert!(db.get_ticket("tkt_short").await.unwrap().is_none());
    }
}
