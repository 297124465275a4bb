//! Filesystem locations

use std::path::PathBuf;

use crate::constants::paths::{CONFIG_DIR_NAME, CONFIG_FILE_NAME, LOGS_DIR_NAME};
use crate::constants::storage::DB_FILE_NAME;

/// Base config directory (~/.coverage)
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(CONFIG_DIR_NAME)
}

pub fn config_file() -> PathBuf {
    config_dir().join(CONFIG_FILE_NAME)
}

pub fn logs_dir() -> PathBuf {
    config_dir().join(LOGS_DIR_NAME)
}

pub fn default_db_path() -> PathBuf {
    config_dir().join(DB_FILE_NAME)
}
