use clap::Args;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Revoke {
    /// Ticket id
    pub id: String,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Revoke {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        session.cas().revoke_ticket(&session.caller, &self.id).await?;
        Ok(format!("revoked ticket {}", self.id))
    }
}
