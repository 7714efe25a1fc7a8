use clap::Args;

use common::hash::Key;

use super::StoreOpError;

#[derive(Args, Debug, Clone)]
pub struct Ls {
    /// Collection to list. Without one, lists the keys the realm owns
    pub key: Option<Key>,

    /// Path below the key to list
    #[arg(long, requires = "key")]
    pub path: Option<String>,

    /// Page size when listing owned keys
    #[arg(long, default_value_t = 100)]
    pub limit: usize,

    /// Key to continue an owned listing after
    #[arg(long, conflicts_with = "key")]
    pub after: Option<Key>,
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Ls {
    type Error = StoreOpError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let Some(key) = self.key else {
            let page = cas
                .list_owned(&session.caller, self.limit, self.after)
                .await?;
            let mut lines: Vec<String> = page
                .records
                .iter()
                .map(|record| {
                    format!(
                        "{}\t{}\t{}\t{}",
                        record.key,
                        record.size,
                        record.content_type.as_deref().unwrap_or("-"),
                        record.created_at.to_rfc3339()
                    )
                })
                .collect();
            if let Some(next) = page.next {
                lines.push(format!("(more: --after {})", next));
            }
            if lines.is_empty() {
                return Ok("no keys owned".to_string());
            }
            return Ok(lines.join("\n"));
        };

        let key = match &self.path {
            Some(path) => cas.resolve(&session.caller, &key, path).await?,
            None => key,
        };
        let view = cas.list(&session.caller, &key).await?;
        if view.children.is_empty() {
            return Ok("empty collection".to_string());
        }

        let mut lines = Vec::with_capacity(view.children.len());
        for (name, child) in &view.children {
            let info = cas.stat(&session.caller, child).await?;
            lines.push(format!("{}\t{}\t{}\t{}", info.kind, info.size, child, name));
        }
        Ok(lines.join("\n"))
    }
}
