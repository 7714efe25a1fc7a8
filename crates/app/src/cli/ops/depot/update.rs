use clap::Args;

use common::hash::Key;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Update {
    /// Depot name or id
    pub depot: String,

    /// New root; must be owned by the realm
    pub root: Key,

    #[arg(long, short)]
    pub message: Option<String>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Update {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let depot = super::lookup(cas, &session.caller, &self.depot).await?;
        let updated = cas
            .update_depot(&session.caller, &depot.id, &self.root, self.message.clone())
            .await?;

        if updated.version == depot.version {
            return Ok(format!("depot {} already at {}", updated.name, updated.root));
        }
        Ok(format!("updated depot {}", super::describe(&updated)))
    }
}
