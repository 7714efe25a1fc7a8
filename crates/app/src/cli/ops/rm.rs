use clap::Args;

use common::hash::Key;

use super::StoreOpError;

/// Drop the realm's claim on a key. The bytes stay until `gc` finds
///  nothing else referencing them.
#[derive(Args, Debug, Clone)]
pub struct Rm {
    pub key: Key,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Rm {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        session.cas().delete(&session.caller, &self.key).await?;
        Ok(format!("removed {} from realm {}", self.key, ctx.realm))
    }
}
