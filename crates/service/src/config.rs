use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use common::config::CasConfig;
use object_store::ObjectStoreConfig;

/// Service configuration, read from `config.toml`. Every field has a
///  default so a partial file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // data store configuration
    /// a path to the sqlite record database, if not set then an
    ///  in-memory database will be used
    pub sqlite_path: Option<PathBuf>,
    /// a path to the sqlite index of stored blobs, if not set then
    ///  an in-memory index will be used
    pub blob_index_path: Option<PathBuf>,

    // misc
    /// default log directive, overridable with RUST_LOG
    pub log_level: String,
    /// directory for daily rolling log files, if set
    pub log_dir: Option<PathBuf>,

    // tables last, so the file serializes cleanly
    /// where node bytes live
    pub blob_store: ObjectStoreConfig,
    pub cas: CasConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            sqlite_path: None,
            blob_index_path: None,
            log_level: "info".to_string(),
            log_dir: None,
            blob_store: ObjectStoreConfig::Memory,
            cas: CasConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        let config = Self::from_toml(&raw)?;
        tracing::debug!(path = %path.display(), "loaded config");
        Ok(config)
    }

    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.log_level()?;
        self.cas.validate()?;
        Ok(())
    }

    pub fn log_level(&self) -> Result<tracing::Level, ConfigError> {
        tracing::Level::from_str(&self.log_level)
            .map_err(|_| ConfigError::InvalidLogLevel(self.log_level.clone()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to write config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid log level: {0}")]
    InvalidLogLevel(String),
    #[error("invalid cas config: {0}")]
    Cas(#[from] common::config::ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_all_defaults() {
        assert_eq!(Config::from_toml("").unwrap(), Config::default());
    }

    #[test]
    fn test_partial_file() {
        let raw = r#"
            sqlite_path = "/var/lib/casket/db.sqlite"
            log_level = "debug"

            [blob_store]
            type = "local"
            path = "/var/lib/casket/blobs"

            [cas]
            node_limit = 65536
            unscoped_write_quota = 1048576
        "#;
        let config = Config::from_toml(raw).unwrap();
        assert_eq!(config.log_level().unwrap(), tracing::Level::DEBUG);
        assert_eq!(config.cas.node_limit, 65_536);
        assert_eq!(config.cas.unscoped_write_quota, Some(1_048_576));
        assert_eq!(config.cas.max_children, CasConfig::default().max_children);
        assert_eq!(
            config.blob_store,
            ObjectStoreConfig::Local {
                path: "/var/lib/casket/blobs".into()
            }
        );
    }

    #[test]
    fn test_rejects_bad_values() {
        assert!(matches!(
            Config::from_toml("log_level = \"loud\""),
            Err(ConfigError::InvalidLogLevel(_))
        ));
        assert!(matches!(
            Config::from_toml("[cas]\nnode_limit = 16"),
            Err(ConfigError::Cas(_))
        ));
    }

    #[test]
    fn test_written_config_reads_back() {
        let config = Config {
            sqlite_path: Some("/tmp/db.sqlite".into()),
            log_dir: Some("/tmp/logs".into()),
            ..Default::default()
        };
        let raw = config.to_toml().unwrap();
        assert_eq!(Config::from_toml(&raw).unwrap(), config);
    }
}
