use clap::Args;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Delete {
    /// Depot name or id
    pub depot: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Delete {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let depot = super::lookup(cas, &session.caller, &self.depot).await?;
        cas.delete_depot(&session.caller, &depot.id).await?;
        Ok(format!("deleted depot {} ({})", depot.name, depot.id))
    }
}
