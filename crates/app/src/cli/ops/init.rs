use std::path::PathBuf;

use clap::Args;

use common::config::CasConfig;
use common::error::CasError;
use service::Config;

use crate::cli::op::OpenError;
use crate::state::AppState;

#[derive(Args, Debug, Clone)]
pub struct Init {
    /// Maximum encoded size of a single node, in bytes
    #[arg(long)]
    pub node_limit: Option<usize>,

    /// Default log level (overridable with RUST_LOG)
    #[arg(long, default_value = "warn")]
    pub log_level: String,

    /// Directory for daily rolling log files
    #[arg(long)]
    pub log_dir: Option<PathBuf>,
}

#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("init failed: {0}")]
    StateFailed(#[from] crate::state::StateError),
    #[error("init failed: {0}")]
    Open(#[from] OpenError),
    #[error("failed to create the main depot: {0}")]
    Cas(#[from] CasError),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Init {
    type Error = InitError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let mut cas = CasConfig::default();
        if let Some(node_limit) = self.node_limit {
            cas.node_limit = node_limit;
        }
        let config = Config {
            log_level: self.log_level.clone(),
            log_dir: self.log_dir.clone(),
            cas,
            ..Config::default()
        };

        let state = AppState::init(ctx.config_path.clone(), Some(config))?;

        let session = ctx.open().await?;
        let main = session.cas().ensure_main(&session.caller).await?;

        let output = format!(
            "Initialized casket directory at: {}\n\
             - Database: {}\n\
             - Blobs: {}\n\
             - Config: {}\n\
             - Node limit: {} bytes\n\
             - Depot {} in realm {}: {}",
            state.casket_dir.display(),
            state.db_path.display(),
            state.blobs_path.display(),
            state.config_path.display(),
            state.config.cas.node_limit,
            main.name,
            ctx.realm,
            main.root
        );

        Ok(output)
    }
}
