use clap::Args;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Rollback {
    /// Depot name or id
    pub depot: String,

    /// Earlier version whose root becomes current again
    pub version: u64,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rollback {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let depot = super::lookup(cas, &session.caller, &self.depot).await?;
        let outcome = cas
            .rollback_depot(&session.caller, &depot.id, self.version)
            .await?;

        if !outcome.changed {
            return Ok(outcome.message);
        }
        Ok(format!(
            "{}: {}",
            outcome.message,
            super::describe(&outcome.depot)
        ))
    }
}
