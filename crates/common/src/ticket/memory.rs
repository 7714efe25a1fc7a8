use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{ChargeOutcome, CommitOutcome, Ticket, TicketProvider};
use crate::error::ProviderError;
use crate::hash::Key;
use crate::memory::MemoryRecords;

#[async_trait]
impl TicketProvider for MemoryRecords {
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), ProviderError> {
        let mut inner = self.write()?;
        inner.tickets.insert(ticket.id.clone(), ticket);
        Ok(())
    }

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, ProviderError> {
        let inner = self.read()?;
        Ok(inner.tickets.get(id).cloned())
    }

    async fn commit_ticket(&self, id: &str, root: &Key) -> Result<CommitOutcome, ProviderError> {
        let mut inner = self.write()?;
        let Some(ticket) = inner.tickets.get_mut(id) else {
            return Ok(CommitOutcome::Missing);
        };
        if let Some(written) = ticket.written_root {
            return Ok(CommitOutcome::AlreadyWritten(written));
        }
        ticket.written_root = Some(*root);
        Ok(CommitOutcome::Committed)
    }

    async fn charge_ticket(
        &self,
        id: &str,
        bytes: u64,
        quota: Option<u64>,
    ) -> Result<ChargeOutcome, ProviderError> {
        let mut inner = self.write()?;
        let Some(ticket) = inner.tickets.get_mut(id) else {
            return Ok(ChargeOutcome::Missing);
        };
        if ticket.is_consumed() {
            return Ok(ChargeOutcome::Consumed);
        }
        let total = ticket.bytes_written.saturating_add(bytes);
        if quota.is_some_and(|quota| total > quota) {
            return Ok(ChargeOutcome::OverQuota(ticket.bytes_written));
        }
        ticket.bytes_written = total;
        Ok(ChargeOutcome::Charged(total))
    }

    async fn revoke_ticket(&self, id: &str) -> Result<bool, ProviderError> {
        let mut inner = self.write()?;
        match inner.tickets.get_mut(id) {
            Some(ticket) => {
                ticket.revoked = true;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list_tickets(&self, realm: &str) -> Result<Vec<Ticket>, ProviderError> {
        let inner = self.read()?;
        let mut tickets: Vec<Ticket> = inner
            .tickets
            .values()
            .filter(|t| t.realm == realm)
            .cloned()
            .collect();
        tickets.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(tickets)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, ProviderError> {
        let mut inner = self.write()?;
        let before = inner.tickets.len();
        inner.tickets.retain(|_, t| !t.is_expired(now));
        Ok((before - inner.tickets.len()) as u64)
    }
}
