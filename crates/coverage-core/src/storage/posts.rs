//! Post registry rows
//!
//! The registry owns posts; the engine reads every field and only writes
//! `assigned_guard_id`, `is_pending_coverage` and `version`.

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use crate::error::{CoverageError, Result};

/// Roster slot requiring one guard per scheduled day
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationalPost {
    pub id: String,
    pub tenant_id: String,
    pub installation_id: String,
    pub role_id: String,
    pub assigned_guard_id: Option<String>,
    pub is_pending_coverage: bool,
    pub active: bool,
    pub version: i64,
}

impl OperationalPost {
    /// Active posts have a guard XOR are pending coverage
    pub fn satisfies_invariant(&self) -> bool {
        !self.active || (self.assigned_guard_id.is_some() != self.is_pending_coverage)
    }
}

/// Registration input for a new post
#[derive(Debug, Clone)]
pub struct NewPost {
    pub tenant_id: String,
    pub installation_id: String,
    pub role_id: String,
    pub assigned_guard_id: Option<String>,
}

const POST_COLUMNS: &str = "id, tenant_id, installation_id, role_id, assigned_guard_id,
     is_pending_coverage, active, version";

/// Post store over a connection or an open transaction
pub struct PostStore<'a> {
    conn: &'a Connection,
}

impl<'a> PostStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<OperationalPost> {
        Ok(OperationalPost {
            id: row.get(0)?,
            tenant_id: row.get(1)?,
            installation_id: row.get(2)?,
            role_id: row.get(3)?,
            assigned_guard_id: row.get(4)?,
            is_pending_coverage: row.get::<_, i64>(5)? != 0,
            active: row.get::<_, i64>(6)? != 0,
            version: row.get(7)?,
        })
    }

    /// Register a post; pending coverage follows from the missing guard
    pub fn register(&self, post: &NewPost) -> Result<OperationalPost> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO posts (id, tenant_id, installation_id, role_id, assigned_guard_id,
                                is_pending_coverage, active, version)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 0)",
            params![
                id,
                post.tenant_id,
                post.installation_id,
                post.role_id,
                post.assigned_guard_id,
                post.assigned_guard_id.is_none() as i64,
            ],
        )?;

        self.require(&post.tenant_id, &id)
    }

    /// Get a post visible to the tenant
    pub fn get(&self, tenant_id: &str, post_id: &str) -> Result<Option<OperationalPost>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE id = ?1 AND tenant_id = ?2",
            POST_COLUMNS
        );
        let post = self
            .conn
            .query_row(&sql, params![post_id, tenant_id], Self::map_row)
            .optional()?;
        Ok(post)
    }

    /// Get a post or fail with `NotFound`
    pub fn require(&self, tenant_id: &str, post_id: &str) -> Result<OperationalPost> {
        self.get(tenant_id, post_id)?
            .ok_or_else(|| CoverageError::not_found("post", post_id))
    }

    /// List active posts for a tenant
    pub fn list_active(&self, tenant_id: &str) -> Result<Vec<OperationalPost>> {
        let sql = format!(
            "SELECT {} FROM posts WHERE tenant_id = ?1 AND active = 1 ORDER BY id",
            POST_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let posts = stmt
            .query_map([tenant_id], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(posts)
    }

    /// Write the assignment pair and bump the version, guarded by `expected_version`
    ///
    /// Both columns change together so the guard/pending invariant holds after
    /// every write. Returns the new version.
    pub fn update_assignment(
        &self,
        post_id: &str,
        guard_id: Option<&str>,
        expected_version: i64,
    ) -> Result<i64> {
        let changed = self.conn.execute(
            "UPDATE posts SET assigned_guard_id = ?1, is_pending_coverage = ?2,
                              version = version + 1
             WHERE id = ?3 AND version = ?4",
            params![
                guard_id,
                guard_id.is_none() as i64,
                post_id,
                expected_version
            ],
        )?;
        self.check_version_write(post_id, changed, expected_version)
    }

    /// Bump the version without touching the assignment
    pub fn bump_version(&self, post_id: &str, expected_version: i64) -> Result<i64> {
        let changed = self.conn.execute(
            "UPDATE posts SET version = version + 1 WHERE id = ?1 AND version = ?2",
            params![post_id, expected_version],
        )?;
        self.check_version_write(post_id, changed, expected_version)
    }

    /// Current version of a post, regardless of tenant
    pub fn current_version(&self, post_id: &str) -> Result<Option<i64>> {
        let version = self
            .conn
            .query_row(
                "SELECT version FROM posts WHERE id = ?1",
                [post_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(version)
    }

    fn check_version_write(
        &self,
        post_id: &str,
        changed: usize,
        expected_version: i64,
    ) -> Result<i64> {
        if changed == 1 {
            return Ok(expected_version + 1);
        }
        match self.current_version(post_id)? {
            Some(found) => Err(CoverageError::ConcurrentModification {
                post_id: post_id.to_string(),
                expected: expected_version,
                found,
            }),
            None => Err(CoverageError::not_found("post", post_id)),
        }
    }
}
