//! Engine configuration
//!
//! Loaded from TOML; every section and field is optional:
//! ```toml
//! [database]
//! path = "/var/lib/coverage/coverage.db"
//! busy_timeout_secs = 5
//!
//! [retry]
//! max_retries = 3
//! initial_delay_ms = 50
//! max_delay_ms = 2000
//! jitter = true
//!
//! [logging]
//! filter = "coverage_core=debug,info"
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::storage::DEFAULT_BUSY_TIMEOUT;
use crate::constants::DEFAULT_LOG_FILTER;
use crate::paths;
use crate::retry::RetryConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverageConfig {
    pub database: DatabaseConfig,
    pub retry: RetryConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// Database file; defaults to ~/.coverage/coverage.db
    pub path: Option<PathBuf>,
    pub busy_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            busy_timeout_secs: DEFAULT_BUSY_TIMEOUT.as_secs(),
        }
    }
}

impl DatabaseConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path.clone().unwrap_or_else(paths::default_db_path)
    }

    pub fn busy_timeout(&self) -> Duration {
        Duration::from_secs(self.busy_timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `tracing_subscriber::EnvFilter` directive; RUST_LOG wins when set
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_LOG_FILTER.to_string(),
        }
    }
}

impl CoverageConfig {
    /// Load from the default location
    pub fn load() -> Result<Self> {
        Self::load_from_path(&paths::config_file())
    }

    /// Load from a specific path; a missing file yields defaults
    pub fn load_from_path(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config {}", path.display()))?;
        Self::from_toml(&contents)
            .with_context(|| format!("Invalid config {}", path.display()))
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        Ok(toml::from_str(contents)?)
    }
}
