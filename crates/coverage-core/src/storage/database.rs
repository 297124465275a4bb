//! SQLite database wrapper with versioned migrations

use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::constants::storage::DEFAULT_BUSY_TIMEOUT;
use crate::error::Result;

/// Current schema version
const SCHEMA_VERSION: i32 = 4;

/// SQLite database wrapper
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Create a new database at the given path
    pub fn new(path: &Path) -> Result<Self> {
        Self::with_busy_timeout(path, DEFAULT_BUSY_TIMEOUT)
    }

    /// Create a database with an explicit lock wait
    pub fn with_busy_timeout(path: &Path, busy_timeout: Duration) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // WAL lets report readers proceed while a writer holds the lock
        conn.pragma_update(None, "journal_mode", "WAL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;

        // Concurrent writers queue on the reserved lock instead of failing
        conn.busy_timeout(busy_timeout)?;

        let db = Self { conn };
        db.run_migrations()?;
        Ok(db)
    }

    /// Get the underlying connection
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Begin a write transaction holding SQLite's reserved lock up front
    ///
    /// Every engine write path runs inside one of these, so check-then-write
    /// sequences never interleave with another writer.
    pub fn begin_write(&self) -> Result<Transaction<'_>> {
        Ok(Transaction::new_unchecked(
            &self.conn,
            TransactionBehavior::Immediate,
        )?)
    }

    /// Get the current schema version from database
    pub(crate) fn get_schema_version(&self) -> i32 {
        // Create version table if it doesn't exist
        if let Err(e) = self.conn.execute(
            "CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        ) {
            tracing::warn!("Failed to create schema_version table: {}", e);
            return 0;
        }

        self.conn
            .query_row(
                "SELECT COALESCE(MAX(version), 0) FROM schema_version",
                [],
                |row| row.get(0),
            )
            .unwrap_or(0)
    }

    /// Set schema version after successful migration
    fn set_schema_version(&self, version: i32) -> Result<()> {
        self.conn.execute(
            "INSERT INTO schema_version (version) VALUES (?1)",
            [version],
        )?;
        Ok(())
    }

    /// Run database migrations incrementally
    pub(crate) fn run_migrations(&self) -> Result<()> {
        let current_version = self.get_schema_version();
        info!(
            "Database schema version: {} (target: {})",
            current_version, SCHEMA_VERSION
        );

        if current_version >= SCHEMA_VERSION {
            return Ok(());
        }

        // Migration 1: Registry mirrors
        if current_version < 1 {
            info!("Running migration 1: Guard directory and post registry");
            self.conn.execute_batch(
                r#"
                -- Guard directory (owned by the workforce system)
                CREATE TABLE IF NOT EXISTS guards (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    name TEXT NOT NULL,
                    active INTEGER NOT NULL DEFAULT 1
                );

                -- Roster slots (owned by the post registry)
                -- version is bumped on every engine write for optimistic concurrency
                CREATE TABLE IF NOT EXISTS posts (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    installation_id TEXT NOT NULL,
                    role_id TEXT NOT NULL,
                    assigned_guard_id TEXT,
                    is_pending_coverage INTEGER NOT NULL DEFAULT 0,
                    active INTEGER NOT NULL DEFAULT 1,
                    version INTEGER NOT NULL DEFAULT 0
                );

                CREATE INDEX IF NOT EXISTS idx_posts_tenant
                    ON posts(tenant_id);
                "#,
            )?;
            self.set_schema_version(1)?;
        }

        // Migration 2: Monthly plan
        if current_version < 2 {
            info!("Running migration 2: Plan entries");
            self.conn.execute_batch(
                r#"
                -- One row per (post, day); rows are superseded in state, never deleted
                CREATE TABLE IF NOT EXISTS plan_entries (
                    id TEXT PRIMARY KEY,
                    post_id TEXT NOT NULL REFERENCES posts(id),
                    year INTEGER NOT NULL,
                    month INTEGER NOT NULL,
                    day INTEGER NOT NULL,
                    date TEXT NOT NULL,
                    guard_id TEXT,
                    state TEXT NOT NULL,
                    ui_state TEXT NOT NULL,
                    metadata TEXT NOT NULL DEFAULT '{}',
                    updated_at TEXT NOT NULL,
                    UNIQUE (post_id, year, month, day)
                );

                CREATE INDEX IF NOT EXISTS idx_plan_entries_post_date
                    ON plan_entries(post_id, date);

                -- Daily view, audits and double-booking checks scan by date
                CREATE INDEX IF NOT EXISTS idx_plan_entries_date
                    ON plan_entries(date);
                "#,
            )?;
            self.set_schema_version(2)?;
        }

        // Migration 3: Extra shift ledger
        if current_version < 3 {
            info!("Running migration 3: Extra shift records");
            self.conn.execute_batch(
                r#"
                -- At most one deleted = 0 row per (post_id, date).
                -- Enforced by the write lock held in AssignCoverage rather than a
                -- unique index so legacy duplicates stay repairable.
                CREATE TABLE IF NOT EXISTS extra_shift_records (
                    id TEXT PRIMARY KEY,
                    plan_entry_id TEXT REFERENCES plan_entries(id),
                    post_id TEXT NOT NULL REFERENCES posts(id),
                    date TEXT NOT NULL,
                    covering_guard_id TEXT NOT NULL,
                    amount TEXT,
                    paid INTEGER NOT NULL DEFAULT 0,
                    paid_at TEXT,
                    created_at TEXT NOT NULL,
                    deleted INTEGER NOT NULL DEFAULT 0,
                    deleted_at TEXT
                );

                CREATE INDEX IF NOT EXISTS idx_extra_shift_key
                    ON extra_shift_records(post_id, date, deleted);

                CREATE INDEX IF NOT EXISTS idx_extra_shift_guard_date
                    ON extra_shift_records(covering_guard_id, date)
                    WHERE deleted = 0;
                "#,
            )?;
            self.set_schema_version(3)?;
        }

        // Migration 4: Correction log
        if current_version < 4 {
            info!("Running migration 4: Coverage corrections");
            self.conn.execute_batch(
                r#"
                -- Before/after snapshots written by repair operations
                CREATE TABLE IF NOT EXISTS coverage_corrections (
                    id TEXT PRIMARY KEY,
                    tenant_id TEXT NOT NULL,
                    kind TEXT NOT NULL,
                    subject_id TEXT NOT NULL,
                    post_id TEXT NOT NULL,
                    date TEXT NOT NULL,
                    actor_id TEXT NOT NULL,
                    before_json TEXT,
                    after_json TEXT,
                    created_at TEXT NOT NULL
                );

                CREATE INDEX IF NOT EXISTS idx_corrections_post_date
                    ON coverage_corrections(post_id, date);
                "#,
            )?;
            self.set_schema_version(4)?;
        }

        info!("Migrations complete");
        Ok(())
    }
}
