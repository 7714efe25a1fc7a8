use clap::Args;

use crate::cli::ops::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct History {
    /// Depot name or id
    pub depot: String,

    #[arg(long, default_value_t = 20)]
    pub limit: usize,

    /// Only show versions older than this one
    #[arg(long)]
    pub before: Option<u64>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for History {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let depot = super::lookup(cas, &session.caller, &self.depot).await?;
        let entries = cas
            .depot_history(&session.caller, &depot.id, self.limit, self.before)
            .await?;

        let mut lines = vec![format!("current: {}", super::describe(&depot))];
        for entry in &entries {
            let mut line = format!(
                "v{}\t{}\t{}",
                entry.version,
                entry.root,
                entry.created_at.to_rfc3339()
            );
            if let Some(message) = &entry.message {
                line.push_str(&format!("\t{}", message));
            }
            lines.push(line);
        }
        if entries.is_empty() {
            lines.push("no earlier versions".to_string());
        }
        Ok(lines.join("\n"))
    }
}
