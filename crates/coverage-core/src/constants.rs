//! Engine constants and configuration defaults

use std::time::Duration;

/// Storage configuration
pub mod storage {
    use super::*;

    /// How long a writer waits for another writer's lock before failing
    pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

    /// Database file name inside the config directory
    pub const DB_FILE_NAME: &str = "coverage.db";

    /// ISO date format used in date columns
    pub const DATE_FORMAT: &str = "%Y-%m-%d";
}

/// Retry configuration for optimistic-concurrency conflicts
pub mod retry {
    use super::*;

    pub const MAX_RETRIES: u32 = 3;

    pub const INITIAL_DELAY: Duration = Duration::from_millis(50);

    pub const MAX_DELAY: Duration = Duration::from_secs(2);
}

/// Paths and file names
pub mod paths {
    /// Config directory name under the home directory
    pub const CONFIG_DIR_NAME: &str = ".coverage";

    pub const CONFIG_FILE_NAME: &str = "config.toml";

    pub const LOGS_DIR_NAME: &str = "logs";

    pub const LOG_FILE_NAME: &str = "coverage.log";
}

/// Default log filter when neither config nor RUST_LOG sets one
pub const DEFAULT_LOG_FILTER: &str = "info";
