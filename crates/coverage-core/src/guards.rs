//! Guard directory lookups
//!
//! The directory is owned elsewhere; the engine only asks whether a covering
//! guard exists and is active before booking them.

use dashmap::DashMap;
use parking_lot::Mutex;
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::storage::Database;

/// Guard as reported by the directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Guard {
    pub id: String,
    pub name: String,
    pub active: bool,
}

/// Read contract of the guard directory
pub trait GuardDirectory: Send + Sync {
    /// Look up a guard visible to the tenant
    fn get_guard(&self, tenant_id: &str, guard_id: &str) -> Result<Option<Guard>>;
}

/// Directory held in memory, keyed by (tenant, guard)
#[derive(Default)]
pub struct InMemoryGuardDirectory {
    guards: DashMap<(String, String), Guard>,
}

impl InMemoryGuardDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, tenant_id: &str, guard: Guard) {
        self.guards
            .insert((tenant_id.to_string(), guard.id.clone()), guard);
    }

    /// Convenience for an active guard named after its id
    pub fn insert_active(&self, tenant_id: &str, guard_id: &str) {
        self.insert(
            tenant_id,
            Guard {
                id: guard_id.to_string(),
                name: guard_id.to_string(),
                active: true,
            },
        );
    }
}

impl GuardDirectory for InMemoryGuardDirectory {
    fn get_guard(&self, tenant_id: &str, guard_id: &str) -> Result<Option<Guard>> {
        Ok(self
            .guards
            .get(&(tenant_id.to_string(), guard_id.to_string()))
            .map(|g| g.clone()))
    }
}

/// Directory backed by the `guards` table
pub struct SqliteGuardDirectory {
    db: Mutex<Database>,
}

impl SqliteGuardDirectory {
    pub fn new(db: Database) -> Self {
        Self { db: Mutex::new(db) }
    }

    /// Open a dedicated connection to the database at `path`
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    /// Add a guard to the directory
    pub fn register(&self, tenant_id: &str, name: &str) -> Result<Guard> {
        let id = uuid::Uuid::new_v4().to_string();
        self.db.lock().conn().execute(
            "INSERT INTO guards (id, tenant_id, name, active) VALUES (?1, ?2, ?3, 1)",
            params![id, tenant_id, name],
        )?;
        Ok(Guard {
            id,
            name: name.to_string(),
            active: true,
        })
    }

    pub fn set_active(&self, tenant_id: &str, guard_id: &str, active: bool) -> Result<bool> {
        let changed = self.db.lock().conn().execute(
            "UPDATE guards SET active = ?1 WHERE id = ?2 AND tenant_id = ?3",
            params![active as i64, guard_id, tenant_id],
        )?;
        Ok(changed == 1)
    }
}

impl GuardDirectory for SqliteGuardDirectory {
    fn get_guard(&self, tenant_id: &str, guard_id: &str) -> Result<Option<Guard>> {
        let db = self.db.lock();
        let guard = db
            .conn()
            .query_row(
                "SELECT id, name, active FROM guards WHERE id = ?1 AND tenant_id = ?2",
                params![guard_id, tenant_id],
                |row| {
                    Ok(Guard {
                        id: row.get(0)?,
                        name: row.get(1)?,
                        active: row.get::<_, i64>(2)? != 0,
                    })
                },
            )
            .optional()?;
        Ok(guard)
    }
}
