//! Shared test fixtures

use std::path::Path;
use std::sync::Arc;

use chrono::NaiveDate;
use tempfile::TempDir;

use crate::context::CallContext;
use crate::engine::CoverageEngine;
use crate::guards::InMemoryGuardDirectory;
use crate::retry::RetryConfig;
use crate::storage::Database;

pub const TENANT: &str = "acme";
pub const ACTOR: &str = "dispatcher";

/// Helper to create a temporary database for testing
pub fn create_test_db() -> (Database, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.db");
    let db = Database::new(&db_path).expect("Failed to create database");
    (db, temp_dir)
}

pub fn date(year: i32, month: u32, day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, day).expect("valid date")
}

/// Caller pinned to `today`
pub fn ctx(today: NaiveDate) -> CallContext {
    CallContext::new(TENANT, ACTOR).with_today(today)
}

/// Engine over a temp database with an in-memory guard directory
pub struct TestEngine {
    pub engine: CoverageEngine,
    pub guards: Arc<InMemoryGuardDirectory>,
    pub temp: TempDir,
}

impl TestEngine {
    pub fn new() -> Self {
        let (db, temp) = create_test_db();
        let guards = Arc::new(InMemoryGuardDirectory::new());
        let engine = CoverageEngine::new(db, guards.clone()).with_retry_config(RetryConfig {
            max_retries: 3,
            initial_delay_ms: 1,
            max_delay_ms: 5,
            jitter: false,
        });
        Self {
            engine,
            guards,
            temp,
        }
    }

    pub fn db_path(&self) -> std::path::PathBuf {
        self.temp.path().join("test.db")
    }

    /// Second engine on its own connection to the same file
    pub fn connect(&self) -> CoverageEngine {
        open_engine(&self.db_path(), self.guards.clone())
    }

    pub fn add_guards(&self, ids: &[&str]) {
        for id in ids {
            self.guards.insert_active(TENANT, id);
        }
    }
}

pub fn open_engine(path: &Path, guards: Arc<InMemoryGuardDirectory>) -> CoverageEngine {
    let db = Database::new(path).expect("Failed to open database");
    CoverageEngine::new(db, guards)
}
