use clap::Args;

use common::gc::{self, SweepOptions};

use super::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Gc {
    /// Delete unreferenced bytes instead of only reporting them
    #[arg(long)]
    pub delete: bool,

    /// Keys listed from storage per round trip
    #[arg(long, default_value_t = SweepOptions::default().batch)]
    pub batch: usize,

    /// Print every collectable key
    #[arg(long, short)]
    pub verbose: bool,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Gc {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let pruned = cas.authority().prune_expired().await?;
        let options = SweepOptions {
            delete: self.delete,
            batch: self.batch.max(1),
        };
        let report = gc::sweep(cas.engine(), cas.ledger(), &options).await?;

        let mut output = format!(
            "scanned {}, retained {}, collectable {}, deleted {}\npruned {} expired tickets",
            report.scanned,
            report.retained,
            report.collectable.len(),
            report.deleted,
            pruned
        );
        if self.verbose {
            for key in &report.collectable {
                output.push_str(&format!("\n{}", key));
            }
        }
        if !self.delete && !report.collectable.is_empty() {
            output.push_str("\nrun with --delete to reclaim");
        }
        Ok(output)
    }
}
