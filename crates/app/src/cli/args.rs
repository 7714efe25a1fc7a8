pub use clap::Parser;

use std::path::PathBuf;

use super::op::DEFAULT_REALM;

#[derive(Parser, Debug)]
#[command(name = "casket")]
#[command(about = "Content-addressed storage with capability tickets and versioned depots")]
pub struct Args {
    /// Path to the casket directory (defaults to ~/.casket)
    #[arg(long, global = true)]
    pub config_path: Option<PathBuf>,

    /// Realm to act in
    #[arg(long, global = true, default_value = DEFAULT_REALM)]
    pub realm: String,

    /// Ticket id to act with instead of the local owner identity
    #[arg(long, global = true)]
    pub ticket: Option<String>,

    #[command(subcommand)]
    pub command: super::Command,
}
