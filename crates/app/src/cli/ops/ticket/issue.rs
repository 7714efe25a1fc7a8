use std::collections::BTreeSet;
use std::time::Duration;

use clap::Args;
use url::Url;

use common::error::CasError;
use common::hash::Key;
use common::ticket::{Scope, TicketRequest, WriteGrant};

use crate::cli::op::OpenError;

#[derive(Args, Debug, Clone)]
pub struct Issue {
    /// Root the ticket may read (repeatable). Without any, the whole realm
    #[arg(long = "key")]
    pub keys: Vec<Key>,

    /// Allow one unbounded write
    #[arg(long)]
    pub write: bool,

    /// Allow one write of at most this many bytes
    #[arg(long)]
    pub quota: Option<u64>,

    /// Allow one write of this content type (repeatable)
    #[arg(long = "accept")]
    pub accepted_types: Vec<String>,

    /// Lifetime in seconds (defaults to the configured ticket ttl)
    #[arg(long)]
    pub ttl: Option<u64>,

    /// Public address the ticket descriptor is built on
    #[arg(long)]
    pub base_url: Option<Url>,
}

#[derive(Debug, thiserror::Error)]
pub enum IssueError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error("invalid descriptor url: {0}")]
    Descriptor(#[from] url::ParseError),
}

impl Issue {
    fn request(&self) -> TicketRequest {
        let scope = if self.keys.is_empty() {
            None
        } else {
            Some(Scope::keys(self.keys.iter().copied()))
        };

        let write = if self.quota.is_some() || !self.accepted_types.is_empty() {
            WriteGrant::Bounded {
                quota: self.quota,
                accepted_types: if self.accepted_types.is_empty() {
                    None
                } else {
                    Some(self.accepted_types.iter().cloned().collect::<BTreeSet<_>>())
                },
            }
        } else if self.write {
            WriteGrant::Unbounded
        } else {
            WriteGrant::None
        };

        TicketRequest {
            scope,
            write,
            ttl: self.ttl.map(Duration::from_secs),
        }
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Issue {
    type Error = IssueError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let ticket = session
            .cas()
            .issue_ticket(&session.caller, self.request())
            .await?;

        let mut output = format!("{}\nexpires {}", ticket.id, ticket.expires_at.to_rfc3339());
        if let Some(base) = &self.base_url {
            output.push_str(&format!("\n{}", ticket.descriptor(base)?));
        }
        Ok(output)
    }
}
