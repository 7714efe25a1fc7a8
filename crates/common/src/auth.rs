//! Inbound identity: who is calling, and with what rights.
//!
//! Credentials are checked by an ordered chain of [`Validator`]s. The first
//! one to accept decides the caller; one that finds the credentials
//! malformed stops the chain.

use std::collections::{BTreeMap, BTreeSet};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{CasError, Result};
use crate::hash::Key;
use crate::ticket::Scope;

/// An authenticated principal acting within one realm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub realm: String,
    /// Id of the credential that authenticated, recorded as `created_by`
    pub token_id: String,
    pub can_read: bool,
    pub can_write: bool,
    pub can_issue_ticket: bool,
    /// Restricts the identity to these roots; `None` means the whole realm
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_keys: Option<BTreeSet<Key>>,
}

impl Identity {
    /// Full rights over the whole realm
    pub fn full(realm: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            realm: realm.into(),
            token_id: token_id.into(),
            can_read: true,
            can_write: true,
            can_issue_ticket: true,
            allowed_keys: None,
        }
    }

    /// Read access only
    pub fn reader(realm: impl Into<String>, token_id: impl Into<String>) -> Self {
        Self {
            can_write: false,
            can_issue_ticket: false,
            ..Self::full(realm, token_id)
        }
    }

    pub fn scope(&self) -> Scope {
        match &self.allowed_keys {
            None => Scope::All,
            Some(keys) => Scope::Keys(keys.clone()),
        }
    }

    pub fn is_unscoped(&self) -> bool {
        self.allowed_keys.is_none()
    }
}

/// Whoever is making a call against the facade.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Caller {
    Identity(Identity),
    /// Bearer of a ticket id
    Ticket(String),
}

impl Caller {
    pub fn ticket(id: impl Into<String>) -> Self {
        Caller::Ticket(id.into())
    }
}

impl From<Identity> for Caller {
    fn from(identity: Identity) -> Self {
        Caller::Identity(identity)
    }
}

/// Credential name carrying a ticket id
pub const TICKET_HEADER: &str = "x-casket-ticket";

/// Raw credentials presented with a request, keyed by lowercased
///  header-like names.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    values: BTreeMap<String, String>,
}

impl Credentials {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.values.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Accepted(Caller),
    /// Not this validator's kind of credential
    Declined,
    Malformed(String),
}

#[async_trait]
pub trait Validator: Send + Sync {
    async fn validate(&self, credentials: &Credentials) -> Verdict;
}

#[async_trait]
impl<F> Validator for F
where
    F: Fn(&Credentials) -> Verdict + Send + Sync,
{
    async fn validate(&self, credentials: &Credentials) -> Verdict {
        self(credentials)
    }
}

/// Accepts a ticket id presented under [`TICKET_HEADER`]. Whether the
///  ticket is live is decided later, on every call that uses it.
#[derive(Debug, Clone, Copy, Default)]
pub struct TicketValidator;

#[async_trait]
impl Validator for TicketValidator {
    async fn validate(&self, credentials: &Credentials) -> Verdict {
        match credentials.get(TICKET_HEADER).map(str::trim) {
            None => Verdict::Declined,
            Some("") => Verdict::Malformed("empty ticket id".to_string()),
            Some(id) if id.chars().any(char::is_whitespace) => {
                Verdict::Malformed(format!("ticket id {:?} contains whitespace", id))
            }
            Some(id) => Verdict::Accepted(Caller::ticket(id)),
        }
    }
}

/// Runs validators in order until one decides.
#[derive(Default)]
pub struct Dispatcher {
    validators: Vec<Box<dyn Validator>>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("validators", &self.validators.len())
            .finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, validator: impl Validator + 'static) -> Self {
        self.validators.push(Box::new(validator));
        self
    }

    pub async fn authenticate(&self, credentials: &Credentials) -> Result<Caller> {
        for validator in &self.validators {
            match validator.validate(credentials).await {
                Verdict::Accepted(caller) => {
                    match &caller {
                        Caller::Identity(identity) => {
                            tracing::debug!(realm = %identity.realm, token = %identity.token_id, "authenticated")
                        }
                        Caller::Ticket(id) => tracing::debug!(ticket = %id, "authenticated by ticket"),
                    }
                    return Ok(caller);
                }
                Verdict::Declined => continue,
                Verdict::Malformed(reason) => {
                    tracing::warn!(reason = %reason, "rejected malformed credentials");
                    return Err(CasError::forbidden(format!("malformed credentials: {}", reason)));
                }
            }
        }
        Err(CasError::forbidden("no validator accepted the credentials"))
    }
}
