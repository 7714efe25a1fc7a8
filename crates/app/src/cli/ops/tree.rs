use clap::Args;

use common::hash::Key;

use super::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Tree {
    /// Root of the graph to walk
    pub key: Key,

    /// Nodes fetched per page (defaults to the configured tree page size)
    #[arg(long)]
    pub page_size: Option<usize>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Tree {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let page_size = self
            .page_size
            .unwrap_or(session.app.config.cas.tree_page_size);

        let mut lines = Vec::new();
        let mut cursor = None;
        let mut pages = 0usize;
        loop {
            let page = cas
                .tree(&session.caller, &self.key, cursor, page_size)
                .await?;
            pages += 1;
            for (key, info) in &page.nodes {
                let mut line = format!("{}\t{}\t{}", key, info.kind, info.size);
                if let Some(children) = info.children {
                    line.push_str(&format!("\t{} children", children));
                }
                if let Some(content_type) = &info.content_type {
                    line.push_str(&format!("\t{}", content_type));
                }
                lines.push(line);
            }
            match page.next {
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        tracing::debug!(root = %self.key, nodes = lines.len(), pages, "walked tree");
        lines.push(format!("{} nodes", lines.len()));
        Ok(lines.join("\n"))
    }
}
