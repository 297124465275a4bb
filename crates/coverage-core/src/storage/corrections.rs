//! Correction log for repair operations
//!
//! Each repair writes one row with a JSON snapshot of the subject before and
//! after the change, so incident reviews do not depend on log retention.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::{conversion_error, format_date, now_timestamp, parse_date, parse_timestamp};
use crate::error::Result;

/// Which repair produced a correction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionKind {
    /// Stale guard reference cleared by the consistency audit
    GhostAssignment,
    /// Duplicate extra shift soft-deleted
    DuplicateCoverage,
}

impl CorrectionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionKind::GhostAssignment => "ghost_assignment",
            CorrectionKind::DuplicateCoverage => "duplicate_coverage",
        }
    }
}

impl std::str::FromStr for CorrectionKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "ghost_assignment" => Ok(CorrectionKind::GhostAssignment),
            "duplicate_coverage" => Ok(CorrectionKind::DuplicateCoverage),
            _ => Err(format!("Unknown correction kind: {}", s)),
        }
    }
}

/// A persisted before/after snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Correction {
    pub id: String,
    pub kind: CorrectionKind,
    pub subject_id: String,
    pub post_id: String,
    pub date: NaiveDate,
    pub actor_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// Correction log over a connection or an open transaction
pub struct CorrectionLog<'a> {
    conn: &'a Connection,
    tenant_id: &'a str,
}

impl<'a> CorrectionLog<'a> {
    pub fn new(conn: &'a Connection, tenant_id: &'a str) -> Self {
        Self { conn, tenant_id }
    }

    /// Append one correction
    #[allow(clippy::too_many_arguments)]
    pub fn record<B: Serialize, A: Serialize>(
        &self,
        kind: CorrectionKind,
        subject_id: &str,
        post_id: &str,
        date: NaiveDate,
        actor_id: &str,
        before: Option<&B>,
        after: Option<&A>,
    ) -> Result<String> {
        let id = uuid::Uuid::new_v4().to_string();
        let before = before.map(serde_json::to_string).transpose()?;
        let after = after.map(serde_json::to_string).transpose()?;

        self.conn.execute(
            "INSERT INTO coverage_corrections
                (id, tenant_id, kind, subject_id, post_id, date, actor_id,
                 before_json, after_json, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                id,
                self.tenant_id,
                kind.as_str(),
                subject_id,
                post_id,
                format_date(date),
                actor_id,
                before,
                after,
                now_timestamp(),
            ],
        )?;
        Ok(id)
    }

    /// Corrections for a post, oldest first
    pub fn list_for_post(&self, post_id: &str) -> Result<Vec<Correction>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, kind, subject_id, post_id, date, actor_id, before_json, after_json, created_at
             FROM coverage_corrections
             WHERE tenant_id = ?1 AND post_id = ?2
             ORDER BY created_at, rowid",
        )?;

        let corrections = stmt
            .query_map(params![self.tenant_id, post_id], |row| {
                let kind: String = row.get(1)?;
                let date: String = row.get(4)?;
                let before: Option<String> = row.get(6)?;
                let after: Option<String> = row.get(7)?;
                let created_at: String = row.get(8)?;

                Ok(Correction {
                    id: row.get(0)?,
                    kind: kind.parse().map_err(|e| conversion_error(1, e))?,
                    subject_id: row.get(2)?,
                    post_id: row.get(3)?,
                    date: parse_date(4, &date)?,
                    actor_id: row.get(5)?,
                    before: before.and_then(|s| serde_json::from_str(&s).ok()),
                    after: after.and_then(|s| serde_json::from_str(&s).ok()),
                    created_at: parse_timestamp(&created_at),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(corrections)
    }
}
