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
        let tickets = session.cas().list_tickets(&session.caller).await?;

        if tickets.is_empty() {
            return Ok("No tickets found".to_string());
        }
        let now = chrono::Utc::now();
        Ok(tickets
            .iter()
            .map(|t| {
                format!(
                    "{}\t{}\texpires {}",
                    t.id,
                    super::state(t, now),
                    t.expires_at.to_rfc3339()
                )
            })
            .collect::<Vec<_>>()
            .join("\n"))
    }
}
