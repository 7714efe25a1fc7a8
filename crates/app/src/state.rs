use std::{fs, path::PathBuf};

use object_store::ObjectStoreConfig;
use service::{Config, ConfigError};

pub const APP_NAME: &str = "casket";
pub const CONFIG_FILE_NAME: &str = "config.toml";
pub const DB_FILE_NAME: &str = "db.sqlite";
pub const BLOBS_DIR_NAME: &str = "blobs";
pub const BLOB_INDEX_FILE_NAME: &str = "blobs.db";
pub const OBJECTS_DIR_NAME: &str = "objects";

#[derive(Debug, Clone)]
pub struct AppState {
    /// Path to the casket directory (~/.casket)
    pub casket_dir: PathBuf,
    /// Path to the SQLite record database
    pub db_path: PathBuf,
    /// Path to the blobs directory
    pub blobs_path: PathBuf,
    /// Path to the config file
    pub config_path: PathBuf,
    /// Loaded configuration
    pub config: Config,
}

impl AppState {
    /// Get the casket directory path (custom or default ~/.casket)
    pub fn casket_dir(custom_path: Option<PathBuf>) -> Result<PathBuf, StateError> {
        if let Some(path) = custom_path {
            return Ok(path);
        }

        let home = dirs::home_dir().ok_or(StateError::NoHomeDirectory)?;
        Ok(home.join(format!(".{}", APP_NAME)))
    }

    /// Service config laying every file out under `casket_dir`. When
    ///  `template` is given its logging and `[cas]` settings are kept.
    pub fn local_config(casket_dir: &std::path::Path, template: Option<Config>) -> Config {
        let blobs_path = casket_dir.join(BLOBS_DIR_NAME);
        let template = template.unwrap_or_else(|| Config {
            log_level: "warn".to_string(),
            ..Config::default()
        });
        Config {
            sqlite_path: Some(casket_dir.join(DB_FILE_NAME)),
            blob_index_path: Some(blobs_path.join(BLOB_INDEX_FILE_NAME)),
            blob_store: ObjectStoreConfig::Local {
                path: blobs_path.join(OBJECTS_DIR_NAME),
            },
            ..template
        }
    }

    /// Initialize a new casket state directory
    pub fn init(custom_path: Option<PathBuf>, config: Option<Config>) -> Result<Self, StateError> {
        let casket_dir = Self::casket_dir(custom_path)?;

        if casket_dir.exists() {
            return Err(StateError::AlreadyInitialized);
        }

        fs::create_dir_all(&casket_dir)?;

        let blobs_path = casket_dir.join(BLOBS_DIR_NAME);
        fs::create_dir_all(&blobs_path)?;

        let config = Self::local_config(&casket_dir, config);
        config.validate()?;
        let config_path = casket_dir.join(CONFIG_FILE_NAME);
        fs::write(&config_path, config.to_toml()?)?;

        let db_path = casket_dir.join(DB_FILE_NAME);

        Ok(Self {
            casket_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }

    /// Load existing state from the casket directory
    pub fn load(custom_path: Option<PathBuf>) -> Result<Self, StateError> {
        let casket_dir = Self::casket_dir(custom_path)?;

        if !casket_dir.exists() {
            return Err(StateError::NotInitialized);
        }

        let db_path = casket_dir.join(DB_FILE_NAME);
        let blobs_path = casket_dir.join(BLOBS_DIR_NAME);
        let config_path = casket_dir.join(CONFIG_FILE_NAME);

        if !blobs_path.exists() {
            return Err(StateError::MissingFile(format!("{}/", BLOBS_DIR_NAME)));
        }
        if !config_path.exists() {
            return Err(StateError::MissingFile(CONFIG_FILE_NAME.to_string()));
        }

        let config = Config::load(&config_path)?;

        Ok(Self {
            casket_dir,
            db_path,
            blobs_path,
            config_path,
            config,
        })
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error("casket directory not initialized. Run 'casket init' first")]
    NotInitialized,

    #[error("casket directory already initialized")]
    AlreadyInitialized,

    #[error("no home directory found")]
    NoHomeDirectory,

    #[error("missing required file: {0}")]
    MissingFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_then_load() {
        let temp = tempfile::tempdir().unwrap();
        let dir = temp.path().join("casket");

        let state = AppState::init(Some(dir.clone()), None).unwrap();
        assert!(state.blobs_path.is_dir());
        assert_eq!(state.config.sqlite_path.as_deref(), Some(state.db_path.as_path()));

        let loaded = AppState::load(Some(dir.clone())).unwrap();
        assert_eq!(loaded.config, state.config);

        assert!(matches!(
            AppState::init(Some(dir), None),
            Err(StateError::AlreadyInitialized)
        ));
    }

    #[test]
    fn test_load_requires_init() {
        let temp = tempfile::tempdir().unwrap();
        assert!(matches!(
            AppState::load(Some(temp.path().join("missing"))),
            Err(StateError::NotInitialized)
        ));
    }
}
