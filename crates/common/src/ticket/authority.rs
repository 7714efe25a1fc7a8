use std::time::Duration;

use uuid::Uuid;

use super::{ChargeOutcome, CommitOutcome, Scope, Ticket, TicketConfig, TicketInfo, TicketProvider, WriteGrant};
use crate::auth::Identity;
use crate::clock::SharedClock;
use crate::config::CasConfig;
use crate::engine::Engine;
use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::storage::StorageProvider;

/// Who is asking for a new ticket
#[derive(Debug, Clone, Copy)]
pub enum Issuer<'a> {
    Identity(&'a Identity),
    /// Re-delegation from an existing ticket, by id
    Ticket(&'a str),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TicketRequest {
    pub scope: Option<Scope>,
    pub write: WriteGrant,
    /// Lifetime; the configured default when unset
    pub ttl: Option<Duration>,
}

/// Why a read was allowed: the whole realm, or a specific in-scope root
///  the key is (or is reachable from). The caller still has to check the
///  realm owns whatever matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeMatch {
    All,
    Root(Key),
}

impl ScopeMatch {
    /// Key whose ownership makes the read visible
    pub fn anchor(&self, key: &Key) -> Key {
        match self {
            ScopeMatch::All => *key,
            ScopeMatch::Root(root) => *root,
        }
    }
}

/// Decide whether `scope` covers `key`, walking from in-scope roots when
///  the key is not named directly.
pub(crate) async fn scope_covers<S>(
    engine: &Engine<S>,
    scope: &Scope,
    key: &Key,
) -> Result<Option<ScopeMatch>>
where
    S: StorageProvider + 'static,
{
    match scope {
        Scope::All => Ok(Some(ScopeMatch::All)),
        Scope::Keys(roots) => {
            if roots.contains(key) {
                return Ok(Some(ScopeMatch::Root(*key)));
            }
            for root in roots {
                match engine.is_reachable(root, key).await {
                    Ok(true) => return Ok(Some(ScopeMatch::Root(*root))),
                    // a scoped root that was never stored grants nothing
                    Ok(false) | Err(CasError::NotFound(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(None)
        }
    }
}

/// Issues and checks tickets against a [`TicketProvider`].
#[derive(Debug, Clone)]
pub struct Authority<P> {
    provider: P,
    clock: SharedClock,
    config: CasConfig,
}

impl<P: TicketProvider> Authority<P> {
    pub fn new(provider: P, clock: SharedClock, config: CasConfig) -> Self {
        Self {
            provider,
            clock,
            config,
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    fn lifetime(&self, ttl: Option<Duration>) -> Result<chrono::Duration> {
        let secs = ttl
            .map(|d| d.as_secs())
            .unwrap_or(self.config.default_ticket_ttl_secs);
        if secs == 0 || secs > self.config.max_ticket_ttl_secs {
            return Err(CasError::InvalidInput(format!(
                "ticket ttl must be between 1 and {} seconds",
                self.config.max_ticket_ttl_secs
            )));
        }
        Ok(chrono::Duration::seconds(secs as i64))
    }

    /// Issue a ticket no broader than what the issuer holds.
    pub async fn issue<S>(
        &self,
        engine: &Engine<S>,
        issuer: Issuer<'_>,
        request: TicketRequest,
    ) -> Result<Ticket>
    where
        S: StorageProvider + 'static,
    {
        let now = self.clock.now();
        let mut expires_at = now + self.lifetime(request.ttl)?;

        let (realm, issuer_id, held_scope) = match issuer {
            Issuer::Identity(identity) => {
                if !identity.can_issue_ticket {
                    return Err(CasError::forbidden("identity may not issue tickets"));
                }
                if request.write.allows_write() && !identity.can_write {
                    return Err(CasError::forbidden("identity may not grant writes"));
                }
                (identity.realm.clone(), identity.token_id.clone(), identity.scope())
            }
            Issuer::Ticket(id) => {
                let held = self.live(id).await?;
                if !request.write.is_within(&held.write) {
                    return Err(CasError::forbidden(
                        "requested write grant exceeds the issuing ticket",
                    ));
                }
                if request.write.allows_write() && held.is_consumed() {
                    return Err(CasError::AlreadyConsumed(held.id));
                }
                expires_at = expires_at.min(held.expires_at);
                (held.realm, held.id, held.scope)
            }
        };

        let scope = request.scope.unwrap_or_else(|| held_scope.clone());
        match (&scope, &held_scope) {
            (_, Scope::All) => {}
            (Scope::All, Scope::Keys(_)) => {
                return Err(CasError::forbidden(
                    "cannot grant realm-wide scope from a key-scoped issuer",
                ));
            }
            (Scope::Keys(keys), held) => {
                for key in keys {
                    if scope_covers(engine, held, key).await?.is_none() {
                        return Err(CasError::forbidden(format!(
                            "issuer does not hold {}",
                            key
                        )));
                    }
                }
            }
        }

        let ticket = Ticket {
            id: format!("tkt_{}", Uuid::new_v4().simple()),
            realm,
            issuer: issuer_id,
            scope,
            write: request.write,
            created_at: now,
            expires_at,
            written_root: None,
            revoked: false,
            bytes_written: 0,
        };
        self.provider.insert_ticket(ticket.clone()).await?;
        tracing::info!(
            ticket = %ticket.id,
            realm = %ticket.realm,
            issuer = %ticket.issuer,
            write = ticket.write.allows_write(),
            expires_at = %ticket.expires_at,
            "issued ticket"
        );
        Ok(ticket)
    }

    pub async fn get(&self, id: &str) -> Result<Ticket> {
        self.provider
            .get_ticket(id)
            .await?
            .ok_or_else(|| CasError::not_found(format!("ticket {}", id)))
    }

    /// A ticket that is neither revoked nor expired.
    pub async fn live(&self, id: &str) -> Result<Ticket> {
        let ticket = self.get(id).await?;
        if ticket.revoked {
            return Err(CasError::forbidden(format!("ticket {} was revoked", id)));
        }
        if ticket.is_expired(self.clock.now()) {
            return Err(CasError::Expired(format!(
                "ticket {} expired at {}",
                id, ticket.expires_at
            )));
        }
        Ok(ticket)
    }

    /// Check a read of `key` against the ticket's scope.
    pub async fn authorize_read<S>(
        &self,
        engine: &Engine<S>,
        id: &str,
        key: &Key,
    ) -> Result<(Ticket, ScopeMatch)>
    where
        S: StorageProvider + 'static,
    {
        let ticket = self.live(id).await?;
        match scope_covers(engine, &ticket.scope, key).await? {
            Some(matched) => Ok((ticket, matched)),
            None => Err(CasError::forbidden(format!(
                "{} is outside the scope of ticket {}",
                key, id
            ))),
        }
    }

    /// Check a write of `size` bytes of `content_type` against the
    ///  ticket's write grant.
    pub async fn authorize_write(&self, id: &str, content_type: &str, size: u64) -> Result<Ticket> {
        let ticket = self.writable(id).await?;
        check_write_policy(&ticket.write, content_type, size)?;
        Ok(ticket)
    }

    /// A live ticket that still has its write available. Policy checks are
    ///  left to the caller, for writes whose size and types are only known
    ///  as they are built.
    pub async fn writable(&self, id: &str) -> Result<Ticket> {
        let ticket = self.live(id).await?;
        if !ticket.write.allows_write() {
            return Err(CasError::forbidden(format!("ticket {} is read-only", id)));
        }
        if ticket.is_consumed() {
            return Err(CasError::AlreadyConsumed(ticket.id));
        }
        Ok(ticket)
    }

    /// Consume the ticket's single write for `root`.
    pub async fn commit_write(&self, id: &str, root: &Key) -> Result<()> {
        let ticket = self.live(id).await?;
        if !ticket.write.allows_write() {
            return Err(CasError::forbidden(format!("ticket {} is read-only", id)));
        }
        match self.provider.commit_ticket(id, root).await? {
            CommitOutcome::Committed => {
                tracing::info!(ticket = %id, root = %root, "ticket consumed");
                Ok(())
            }
            CommitOutcome::AlreadyWritten(existing) => {
                tracing::debug!(ticket = %id, existing = %existing, "ticket already consumed");
                Err(CasError::AlreadyConsumed(id.to_string()))
            }
            CommitOutcome::Missing => Err(CasError::not_found(format!("ticket {}", id))),
        }
    }

    /// Charge `bytes` against the ticket's running total. Returns the new
    ///  total, or `QuotaExceeded` with what the total would have become.
    pub async fn charge_write(&self, id: &str, bytes: u64) -> Result<u64> {
        let ticket = self.writable(id).await?;
        let quota = ticket.write.quota();
        match self.provider.charge_ticket(id, bytes, quota).await? {
            ChargeOutcome::Charged(total) => {
                tracing::debug!(ticket = %id, bytes, total, "charged ticket");
                Ok(total)
            }
            ChargeOutcome::OverQuota(used) => {
                let quota = quota.unwrap_or(u64::MAX);
                tracing::debug!(ticket = %id, bytes, used, quota, "ticket quota exhausted");
                Err(CasError::QuotaExceeded {
                    size: used.saturating_add(bytes),
                    quota,
                })
            }
            ChargeOutcome::Consumed => Err(CasError::AlreadyConsumed(id.to_string())),
            ChargeOutcome::Missing => Err(CasError::not_found(format!("ticket {}", id))),
        }
    }

    pub async fn revoke(&self, id: &str) -> Result<()> {
        if !self.provider.revoke_ticket(id).await? {
            return Err(CasError::not_found(format!("ticket {}", id)));
        }
        tracing::info!(ticket = %id, "revoked ticket");
        Ok(())
    }

    /// What the bearer of `id` may do. Needs nothing but the id.
    pub async fn resolve(&self, id: &str) -> Result<TicketInfo> {
        let ticket = self.live(id).await?;
        Ok(TicketInfo {
            realm: ticket.realm,
            scope: ticket.scope,
            write: ticket.write,
            expires_at: ticket.expires_at,
            written_root: ticket.written_root,
            config: TicketConfig {
                node_limit: self.config.node_limit,
                max_children: self.config.max_children,
                max_name_bytes: self.config.max_name_bytes,
            },
        })
    }

    pub async fn list(&self, realm: &str) -> Result<Vec<Ticket>> {
        Ok(self.provider.list_tickets(realm).await?)
    }

    pub async fn prune_expired(&self) -> Result<u64> {
        let pruned = self.provider.delete_expired(self.clock.now()).await?;
        if pruned > 0 {
            tracing::info!(pruned, "pruned expired tickets");
        }
        Ok(pruned)
    }
}

/// Quota and content type rules of a write grant.
pub(crate) fn check_write_policy(write: &WriteGrant, content_type: &str, size: u64) -> Result<()> {
    if let Some(quota) = write.quota() {
        if size > quota {
            return Err(CasError::QuotaExceeded { size, quota });
        }
    }
    if let Some(accepted) = write.accepted_types() {
        if !accepted.contains(content_type) {
            return Err(CasError::UnacceptedType(content_type.to_string()));
        }
    }
    Ok(())
}
