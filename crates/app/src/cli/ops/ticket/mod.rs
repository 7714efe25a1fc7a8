use clap::{Args, Subcommand};

pub mod issue;
pub mod list;
pub mod revoke;
pub mod show;

use crate::cli::op::Op;

crate::command_enum! {
    (Issue, issue::Issue),
    (Show, show::Show),
    (List, list::List),
    (Revoke, revoke::Revoke),
}

pub type TicketCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Ticket {
    #[command(subcommand)]
    pub command: TicketCommand,
}

#[async_trait::async_trait]
impl Op for Ticket {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

pub(crate) fn state(ticket: &common::ticket::Ticket, now: chrono::DateTime<chrono::Utc>) -> &'static str {
    if ticket.revoked {
        "revoked"
    } else if ticket.is_expired(now) {
        "expired"
    } else if ticket.is_consumed() {
        "written"
    } else {
        "live"
    }
}
