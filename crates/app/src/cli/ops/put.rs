use std::path::PathBuf;

use bytes::Bytes;
use clap::Args;

use common::depot::MAIN_DEPOT;
use common::error::CasError;
use common::node::NodeKind;

use crate::cli::op::OpenError;

#[derive(Args, Debug, Clone)]
pub struct Put {
    /// File to store
    pub file: PathBuf,

    /// Declared content type of the file
    #[arg(long, default_value = "application/octet-stream")]
    pub content_type: String,

    /// Also link the file into this depot's root and advance the depot
    #[arg(long, num_args = 0..=1, default_missing_value = MAIN_DEPOT)]
    pub depot: Option<String>,

    /// Path to link the file at inside the depot (defaults to the file name)
    #[arg(long = "as", requires = "depot")]
    pub link_as: Option<String>,

    /// Message recorded with the depot update
    #[arg(long, short, requires = "depot")]
    pub message: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum PutError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error("failed to read {0}: {1}")]
    Read(PathBuf, std::io::Error),
    #[error("cannot derive a name from {0}, pass --as")]
    NoName(PathBuf),
}

impl Put {
    fn link_path(&self) -> Result<String, PutError> {
        if let Some(path) = &self.link_as {
            return Ok(path.clone());
        }
        let name = self
            .file
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| PutError::NoName(self.file.clone()))?;
        Ok(format!("./{}", name))
    }
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Put {
    type Error = PutError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let data = tokio::fs::read(&self.file)
            .await
            .map_err(|e| PutError::Read(self.file.clone(), e))?;
        let size = data.len();

        let session = ctx.open().await?;
        let cas = session.cas();
        let receipt = cas
            .write_file(&session.caller, Bytes::from(data), &self.content_type)
            .await?;

        let chunks = receipt
            .nodes
            .iter()
            .filter(|n| n.kind == NodeKind::Chunk)
            .count();
        let mut output = format!(
            "{}\n{} bytes in {} chunks, {} new nodes",
            receipt.root,
            size,
            chunks,
            receipt.new_nodes()
        );

        if let Some(name) = &self.depot {
            let link_path = self.link_path()?;
            let depot = cas.get_depot_by_name(&session.caller, name).await?;

            let mut draft = cas.engine().draft_from(&depot.root).await?;
            draft.link(&link_path, receipt.root).await?;
            let collection = cas.write_collection(&session.caller, &draft).await?;

            let updated = cas
                .update_depot(
                    &session.caller,
                    &depot.id,
                    &collection.root,
                    self.message.clone(),
                )
                .await?;
            output.push_str(&format!(
                "\nlinked at {} in depot {} (version {}, root {})",
                link_path, updated.name, updated.version, updated.root
            ));
        }

        Ok(output)
    }
}
