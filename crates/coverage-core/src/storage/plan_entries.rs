//! Plan entry persistence

use chrono::{Datelike, NaiveDate};
use rusqlite::{params, Connection, OptionalExtension};

use super::{conversion_error, format_date, now_timestamp, parse_date, parse_timestamp};
use crate::error::{CoverageError, Result};
use crate::plan::{EntryMetadata, PlanEntry, PlanState};

const ENTRY_COLUMNS: &str =
    "e.id, e.post_id, e.date, e.guard_id, e.state, e.metadata, e.updated_at";

/// Plan entry store over a connection or an open transaction
pub struct PlanEntryStore<'a> {
    conn: &'a Connection,
}

impl<'a> PlanEntryStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    /// Helper to map a row to PlanEntry
    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<PlanEntry> {
        let date: String = row.get(2)?;
        let state: String = row.get(4)?;
        let metadata: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        let state: PlanState = state.parse().map_err(|e| conversion_error(4, e))?;
        let metadata: EntryMetadata = serde_json::from_str(&metadata).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Text, Box::new(e))
        })?;

        Ok(PlanEntry {
            id: row.get(0)?,
            post_id: row.get(1)?,
            date: parse_date(2, &date)?,
            guard_id: row.get(3)?,
            state,
            ui_state: state.ui_state(),
            metadata,
            updated_at: parse_timestamp(&updated_at),
        })
    }

    fn query(&self, sql: &str, params: impl rusqlite::Params) -> Result<Vec<PlanEntry>> {
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params, Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }

    /// Insert an entry unless one already exists for the key
    ///
    /// Returns true when a row was created.
    pub fn insert_if_missing(
        &self,
        post_id: &str,
        date: NaiveDate,
        guard_id: Option<&str>,
        state: PlanState,
    ) -> Result<bool> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = now_timestamp();
        let created = self.conn.execute(
            "INSERT OR IGNORE INTO plan_entries
                (id, post_id, year, month, day, date, guard_id, state, ui_state, metadata, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, '{}', ?10)",
            params![
                id,
                post_id,
                date.year(),
                date.month(),
                date.day(),
                format_date(date),
                guard_id,
                state.as_str(),
                state.ui_state().as_str(),
                now,
            ],
        )?;
        Ok(created == 1)
    }

    /// Get an entry whose post belongs to the tenant
    pub fn get(&self, tenant_id: &str, entry_id: &str) -> Result<Option<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e JOIN posts p ON p.id = e.post_id
             WHERE e.id = ?1 AND p.tenant_id = ?2",
            ENTRY_COLUMNS
        );
        let entry = self
            .conn
            .query_row(&sql, params![entry_id, tenant_id], Self::map_row)
            .optional()?;
        Ok(entry)
    }

    /// Get an entry or fail with `NotFound`
    pub fn require(&self, tenant_id: &str, entry_id: &str) -> Result<PlanEntry> {
        self.get(tenant_id, entry_id)?
            .ok_or_else(|| CoverageError::not_found("plan entry", entry_id))
    }

    /// Find the entry for a (post, day) key
    pub fn find_by_key(&self, post_id: &str, date: NaiveDate) -> Result<Option<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e
             WHERE e.post_id = ?1 AND e.year = ?2 AND e.month = ?3 AND e.day = ?4",
            ENTRY_COLUMNS
        );
        let entry = self
            .conn
            .query_row(
                &sql,
                params![post_id, date.year(), date.month(), date.day()],
                Self::map_row,
            )
            .optional()?;
        Ok(entry)
    }

    /// All entries of one post for one month, by day
    pub fn list_month(&self, post_id: &str, year: i32, month: u32) -> Result<Vec<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e
             WHERE e.post_id = ?1 AND e.year = ?2 AND e.month = ?3
             ORDER BY e.day",
            ENTRY_COLUMNS
        );
        self.query(&sql, params![post_id, year, month])
    }

    /// Entries of one post dated on or after `start`, ascending
    pub fn list_from(&self, post_id: &str, start: NaiveDate) -> Result<Vec<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e
             WHERE e.post_id = ?1 AND e.date >= ?2
             ORDER BY e.date",
            ENTRY_COLUMNS
        );
        self.query(&sql, params![post_id, format_date(start)])
    }

    /// Months with at least one entry for the post dated on or after `start`
    pub fn months_from(&self, post_id: &str, start: NaiveDate) -> Result<Vec<(i32, u32)>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT year, month FROM plan_entries
             WHERE post_id = ?1 AND date >= ?2
             ORDER BY year, month",
        )?;
        let months = stmt
            .query_map(params![post_id, format_date(start)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(months)
    }

    /// Every entry of the tenant for one date, ordered by post
    pub fn list_for_date(&self, tenant_id: &str, date: NaiveDate) -> Result<Vec<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e JOIN posts p ON p.id = e.post_id
             WHERE p.tenant_id = ?1 AND e.date = ?2
             ORDER BY e.post_id",
            ENTRY_COLUMNS
        );
        self.query(&sql, params![tenant_id, format_date(date)])
    }

    /// Entries whose guard reference is stale relative to a pending post
    ///
    /// Only `planned`/`open` rows qualify: later states record who actually
    /// stood (or failed to stand) the shift and are history.
    pub fn find_ghosts(&self, tenant_id: &str, date: NaiveDate) -> Result<Vec<PlanEntry>> {
        let sql = format!(
            "SELECT {} FROM plan_entries e JOIN posts p ON p.id = e.post_id
             WHERE p.tenant_id = ?1
               AND e.date = ?2
               AND e.guard_id IS NOT NULL
               AND p.is_pending_coverage = 1
               AND (p.assigned_guard_id IS NULL OR p.assigned_guard_id != e.guard_id)
               AND e.state IN ('planned', 'open')
             ORDER BY e.post_id",
            ENTRY_COLUMNS
        );
        self.query(&sql, params![tenant_id, format_date(date)])
    }

    /// Persist guard, state, derived ui state and metadata
    pub fn update(&self, entry: &PlanEntry) -> Result<()> {
        let metadata = serde_json::to_string(&entry.metadata)?;
        let now = now_timestamp();
        let changed = self.conn.execute(
            "UPDATE plan_entries
             SET guard_id = ?1, state = ?2, ui_state = ?3, metadata = ?4, updated_at = ?5
             WHERE id = ?6",
            params![
                entry.guard_id,
                entry.state.as_str(),
                entry.state.ui_state().as_str(),
                metadata,
                now,
                entry.id,
            ],
        )?;
        if changed == 0 {
            return Err(CoverageError::not_found("plan entry", &entry.id));
        }
        Ok(())
    }
}
