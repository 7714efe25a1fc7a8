use clap::Args;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct List;

#[async_trait::async_trait]
impl crate::cli::op::Op for List {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let depots = session.cas().list_depots(&session.caller).await?;

        if depots.is_empty() {
            return Ok("No depots found".to_string());
        }
        Ok(depots
            .iter()
            .map(super::describe)
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
