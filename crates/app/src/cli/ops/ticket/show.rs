use clap::Args;

use common::error::CasError;

use crate::cli::op::OpenError;

#[derive(Args, Debug, Clone)]
pub struct Show {
    /// Ticket id
    pub id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum ShowError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error("failed to render ticket: {0}")]
    Render(#[from] serde_json::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Show {
    type Error = ShowError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let info = session.cas().resolve_ticket(&self.id).await?;
        Ok(serde_json::to_string_pretty(&info)?)
    }
}
