//! The `casket` command-line front end: one `Op` per command, each run
//! against a locally opened service state.

pub mod cli;
pub mod state;
