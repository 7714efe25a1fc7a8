//! Service infrastructure for casket.
//!
//! - Database (SQLite implementing the ledger, ticket and depot providers)
//! - Config (TOML, with an embedded `[cas]` table)
//! - State (record database + blob store + the CAS facade over both)
//! - Logging setup

pub mod config;
pub mod database;
pub mod logging;
pub mod state;

// Re-export key types for convenience
pub use config::{Config, ConfigError};
pub use database::{Database, DatabaseSetupError};
pub use logging::init_logging;
pub use state::{ServiceCas, State as ServiceState, StateSetupError};
