//! Capability tickets: scoped, expiring grants of read and write access to
//! a realm's nodes.
//!
//! A ticket moves through `issued -> [consumed] -> expired | revoked`. The
//! ticket id is the bearer credential; whoever holds it holds the grant.

mod authority;
mod memory;

use std::collections::BTreeSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::ProviderError;
use crate::hash::Key;

pub(crate) use authority::{check_write_policy, scope_covers};
pub use authority::{Authority, Issuer, ScopeMatch, TicketRequest};

/// Which keys a ticket may read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Every key the realm owns
    All,
    /// These roots and everything reachable from them
    Keys(BTreeSet<Key>),
}

impl Scope {
    pub fn keys(keys: impl IntoIterator<Item = Key>) -> Self {
        Scope::Keys(keys.into_iter().collect())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, Scope::All)
    }

    /// Explicitly listed roots; none for `All`
    pub fn roots(&self) -> impl Iterator<Item = &Key> {
        match self {
            Scope::All => None,
            Scope::Keys(keys) => Some(keys),
        }
        .into_iter()
        .flatten()
    }
}

/// Write policy attached to a ticket.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteGrant {
    #[default]
    None,
    /// One write of any size and type
    Unbounded,
    /// One write within these limits
    Bounded {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        quota: Option<u64>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        accepted_types: Option<BTreeSet<String>>,
    },
}

impl WriteGrant {
    pub fn allows_write(&self) -> bool {
        !matches!(self, WriteGrant::None)
    }

    pub fn quota(&self) -> Option<u64> {
        match self {
            WriteGrant::Bounded { quota, .. } => *quota,
            _ => None,
        }
    }

    pub fn accepted_types(&self) -> Option<&BTreeSet<String>> {
        match self {
            WriteGrant::Bounded { accepted_types, .. } => accepted_types.as_ref(),
            _ => None,
        }
    }

    /// Whether `self` grants no more than `held`.
    pub fn is_within(&self, held: &WriteGrant) -> bool {
        match (self, held) {
            (WriteGrant::None, _) => true,
            (_, WriteGrant::None) => false,
            (_, WriteGrant::Unbounded) => true,
            (WriteGrant::Unbounded, WriteGrant::Bounded { .. }) => false,
            (
                WriteGrant::Bounded {
                    quota,
                    accepted_types,
                },
                WriteGrant::Bounded {
                    quota: held_quota,
                    accepted_types: held_types,
                },
            ) => {
                let quota_ok = match (quota, held_quota) {
                    (_, None) => true,
                    (Some(q), Some(h)) => q <= h,
                    (None, Some(_)) => false,
                };
                let types_ok = match (accepted_types, held_types) {
                    (_, None) => true,
                    (Some(t), Some(h)) => t.is_subset(h),
                    (None, Some(_)) => false,
                };
                quota_ok && types_ok
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Ticket {
    pub id: String,
    pub realm: String,
    /// Token id of whoever issued the ticket
    pub issuer: String,
    pub scope: Scope,
    pub write: WriteGrant,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_root: Option<Key>,
    #[serde(default)]
    pub revoked: bool,
    /// Bytes charged against the write grant so far
    #[serde(default)]
    pub bytes_written: u64,
}

impl Ticket {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    pub fn is_consumed(&self) -> bool {
        self.written_root.is_some()
    }

    /// External address of the ticket: `{base}/{realm}/ticket/{id}`.
    pub fn descriptor(&self, base: &Url) -> Result<Url, url::ParseError> {
        let base = base.as_str().trim_end_matches('/');
        Url::parse(&format!("{}/{}/ticket/{}", base, self.realm, self.id))
    }
}

/// Limits a ticket holder needs to know before writing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketConfig {
    pub node_limit: usize,
    pub max_children: usize,
    pub max_name_bytes: usize,
}

/// What a bearer learns by resolving a ticket id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TicketInfo {
    pub realm: String,
    pub scope: Scope,
    pub write: WriteGrant,
    pub expires_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub written_root: Option<Key>,
    pub config: TicketConfig,
}

/// Result of trying to consume a ticket for a write
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitOutcome {
    Committed,
    /// The ticket was already consumed, for this root
    AlreadyWritten(Key),
    Missing,
}

/// Result of charging bytes against a ticket's write grant
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// Charged; the running total after the charge
    Charged(u64),
    /// Refused, nothing charged; the running total before the attempt
    OverQuota(u64),
    /// The ticket already has a written root
    Consumed,
    Missing,
}

#[async_trait]
pub trait TicketProvider: Send + Sync + std::fmt::Debug {
    async fn insert_ticket(&self, ticket: Ticket) -> Result<(), ProviderError>;

    async fn get_ticket(&self, id: &str) -> Result<Option<Ticket>, ProviderError>;

    /// Set `written_root` if and only if it is unset. Must be atomic: of
    ///  two concurrent commits exactly one sees `Committed`.
    async fn commit_ticket(&self, id: &str, root: &Key) -> Result<CommitOutcome, ProviderError>;

    /// Add `bytes` to the ticket's running total unless that would pass
    ///  `quota` or the ticket is already consumed. Must be atomic: two
    ///  concurrent charges can never both fit under the quota if their sum
    ///  does not.
    async fn charge_ticket(
        &self,
        id: &str,
        bytes: u64,
        quota: Option<u64>,
    ) -> Result<ChargeOutcome, ProviderError>;

    /// Mark a ticket revoked. Returns `false` if it does not exist.
    async fn revoke_ticket(&self, id: &str) -> Result<bool, ProviderError>;

    async fn list_tickets(&self, realm: &str) -> Result<Vec<Ticket>, ProviderError>;

    /// Drop every ticket that expired before `now`. Returns how many.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<u64, ProviderError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounded(quota: Option<u64>, types: Option<&[&str]>) -> WriteGrant {
        WriteGrant::Bounded {
            quota,
            accepted_types: types.map(|t| t.iter().map(|s| s.to_string()).collect()),
        }
    }

    #[test]
    fn test_write_grant_containment() {
        assert!(WriteGrant::None.is_within(&WriteGrant::None));
        assert!(!WriteGrant::Unbounded.is_within(&WriteGrant::None));
        assert!(bounded(Some(10), None).is_within(&WriteGrant::Unbounded));
        assert!(!WriteGrant::Unbounded.is_within(&bounded(Some(10), None)));

        assert!(bounded(Some(5), None).is_within(&bounded(Some(10), None)));
        assert!(!bounded(Some(50), None).is_within(&bounded(Some(10), None)));
        assert!(!bounded(None, None).is_within(&bounded(Some(10), None)));

        let held = bounded(None, Some(&["text/plain", "image/png"]));
        assert!(bounded(None, Some(&["text/plain"])).is_within(&held));
        assert!(!bounded(None, Some(&["video/mp4"])).is_within(&held));
        assert!(!bounded(None, None).is_within(&held));
    }

    #[test]
    fn test_descriptor() {
        let now = Utc::now();
        let ticket = Ticket {
            id: "tkt_abc".into(),
            realm: "acme".into(),
            issuer: "tok".into(),
            scope: Scope::All,
            write: WriteGrant::None,
            created_at: now,
            expires_at: now,
            written_root: None,
            revoked: false,
            bytes_written: 0,
        };
        let base = Url::parse("https://cas.example.com/api/").unwrap();
        assert_eq!(
            ticket.descriptor(&base).unwrap().as_str(),
            "https://cas.example.com/api/acme/ticket/tkt_abc"
        );
        assert!(ticket.is_expired(now));
    }

    #[test]
    fn test_scope_wire_shape() {
        let json = serde_json::to_value(Scope::All).unwrap();
        assert_eq!(json, "all");
        let key = Key::digest(b"k");
        let json = serde_json::to_value(Scope::keys([key])).unwrap();
        assert_eq!(json["keys"][0], key.to_string());
    }
}
