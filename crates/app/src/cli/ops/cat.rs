use std::ops::Range;
use std::path::PathBuf;

use clap::Args;
use futures::TryStreamExt;
use tokio::io::AsyncWriteExt;

use common::error::CasError;
use common::hash::Key;

use crate::cli::op::OpenError;

#[derive(Args, Debug, Clone)]
pub struct Cat {
    /// Key of a file, or of a collection when used with --path
    pub key: Key,

    /// Path below the key to read
    #[arg(long)]
    pub path: Option<String>,

    /// Byte range to read, as START..END
    #[arg(long, value_parser = parse_range)]
    pub range: Option<Range<u64>>,

    /// Write the bytes to this file instead of printing them
    #[arg(long, short)]
    pub out: Option<PathBuf>,
}

/// Parse `START..END` (end exclusive). Either bound may be omitted.
pub fn parse_range(raw: &str) -> Result<Range<u64>, String> {
    let (start, end) = raw
        .split_once("..")
        .ok_or_else(|| format!("expected START..END, got {:?}", raw))?;
    let start = match start {
        "" => 0,
        s => s.parse().map_err(|e| format!("bad range start {:?}: {}", s, e))?,
    };
    let end = match end {
        "" => u64::MAX,
        s => s.parse().map_err(|e| format!("bad range end {:?}: {}", s, e))?,
    };
    if end < start {
        return Err(format!("range end {} is before start {}", end, start));
    }
    Ok(start..end)
}

#[derive(Debug, thiserror::Error)]
pub enum CatError {
    #[error(transparent)]
    Open(#[from] OpenError),
    #[error(transparent)]
    Cas(#[from] CasError),
    #[error("failed to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

#[async_trait::async_trait]
impl crate::cli::op::Op for Cat {
    type Error = CatError;
    type Output = String;

    async fn execute(&self, ctx: &crate::cli::op::OpContext) -> Result<Self::Output, Self::Error> {
        let session = ctx.open().await?;
        let cas = session.cas();

        let key = match &self.path {
            Some(path) => cas.resolve(&session.caller, &self.key, path).await?,
            None => self.key,
        };
        let size = cas.stat(&session.caller, &key).await?.size;
        let range = match &self.range {
            Some(range) => range.start.min(size)..range.end.min(size),
            None => 0..size,
        };

        if let Some(out) = &self.out {
            let write_err = |e| CatError::Write(out.clone(), e);
            let mut file = tokio::fs::File::create(out).await.map_err(write_err)?;
            let mut pieces = cas
                .slice(&session.caller, &key, range.start, range.end)
                .await?;
            let mut written = 0u64;
            while let Some(piece) = pieces.try_next().await? {
                file.write_all(&piece).await.map_err(write_err)?;
                written += piece.len() as u64;
            }
            file.flush().await.map_err(write_err)?;
            return Ok(format!("wrote {} bytes of {} to {}", written, key, out.display()));
        }

        let bytes = cas
            .read_range(&session.caller, &key, range.start, range.end)
            .await?;

        // print text as is, show binary content as hex
        match std::str::from_utf8(&bytes) {
            Ok(text) => Ok(text.to_string()),
            Err(_) => Ok(bytes
                .iter()
                .map(|b| format!("{:02x}", b))
                .collect::<Vec<_>>()
                .join(" ")),
        }
    }
}
