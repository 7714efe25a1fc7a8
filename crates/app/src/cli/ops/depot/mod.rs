use clap::{Args, Subcommand};

pub mod create;
pub mod delete;
pub mod history;
pub mod list;
pub mod rollback;
pub mod update;

use common::auth::Caller;
use common::depot::Depot as DepotRecord;
use common::error::{CasError, ErrorKind};
use service::ServiceCas;

use crate::cli::op::Op;

crate::command_enum! {
    (Create, create::Create),
    (List, list::List),
    (Update, update::Update),
    (History, history::History),
    (Rollback, rollback::Rollback),
    (Delete, delete::Delete),
}

pub type DepotCommand = Command;

#[derive(Args, Debug, Clone)]
pub struct Depot {
    #[command(subcommand)]
    pub command: DepotCommand,
}

#[async_trait::async_trait]
impl Op for Depot {
    type Error = OpError;
    type Output = OpOutput;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        self.command.execute(ctx).await
    }
}

/// Find a depot by name, falling back to treating the argument as an id.
pub async fn lookup(cas: &ServiceCas, caller: &Caller, depot: &str) -> Result<DepotRecord, CasError> {
    match cas.get_depot_by_name(caller, depot).await {
        Err(e) if e.kind() == ErrorKind::NotFound => cas.get_depot(caller, depot).await,
        result => result,
    }
}

/// One-line summary of a depot.
pub fn describe(depot: &DepotRecord) -> String {
    let mut line = format!(
        "{} (id: {} | version: {} | root: {})",
        depot.name, depot.id, depot.version, depot.root
    );
    if let Some(message) = &depot.message {
        line.push_str(&format!(" {:?}", message));
    }
    line
}
