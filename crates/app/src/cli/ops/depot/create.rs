use clap::Args;

use common::hash::Key;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Create {
    /// Name of the depot, unique within the realm
    pub name: String,

    /// Initial root (defaults to the empty collection)
    #[arg(long)]
    pub root: Option<Key>,

    /// Message recorded with the first version
    #[arg(long, short)]
    pub message: Option<String>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Create {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let depot = session
            .cas()
            .create_depot(&session.caller, &self.name, self.root, self.message.clone())
            .await?;
        Ok(format!("created depot {}", super::describe(&depot)))
    }
}
