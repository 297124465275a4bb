//! Extra shift ledger persistence

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};

use super::{format_date, now_timestamp, parse_date, parse_timestamp};
use crate::error::{CoverageError, Result};

/// Compensable coverage event for one post on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraShiftRecord {
    pub id: String,
    /// Set when the shift covers a marked absence, None for pure PPC coverage
    pub plan_entry_id: Option<String>,
    pub post_id: String,
    pub date: NaiveDate,
    pub covering_guard_id: String,
    /// Opaque to the engine; computed by payroll
    pub amount: Option<String>,
    pub paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub deleted: bool,
}

/// Insert input for a new ledger row
#[derive(Debug, Clone)]
pub struct NewExtraShift {
    pub plan_entry_id: Option<String>,
    pub post_id: String,
    pub date: NaiveDate,
    pub covering_guard_id: String,
    pub amount: Option<String>,
}

const RECORD_COLUMNS: &str = "x.id, x.plan_entry_id, x.post_id, x.date, x.covering_guard_id,
     x.amount, x.paid, x.paid_at, x.created_at, x.deleted";

/// Ledger store over a connection or an open transaction
pub struct ExtraShiftStore<'a> {
    conn: &'a Connection,
}

impl<'a> ExtraShiftStore<'a> {
    pub fn new(conn: &'a Connection) -> Self {
        Self { conn }
    }

    fn map_row(row: &rusqlite::Row) -> rusqlite::Result<ExtraShiftRecord> {
        let date: String = row.get(3)?;
        let paid_at: Option<String> = row.get(7)?;
        let created_at: String = row.get(8)?;

        Ok(ExtraShiftRecord {
            id: row.get(0)?,
            plan_entry_id: row.get(1)?,
            post_id: row.get(2)?,
            date: parse_date(3, &date)?,
            covering_guard_id: row.get(4)?,
            amount: row.get(5)?,
            paid: row.get::<_, i64>(6)? != 0,
            paid_at: paid_at.as_deref().map(parse_timestamp),
            created_at: parse_timestamp(&created_at),
            deleted: row.get::<_, i64>(9)? != 0,
        })
    }

    /// Insert a new active record
    pub fn insert(&self, record: &NewExtraShift) -> Result<ExtraShiftRecord> {
        let id = uuid::Uuid::new_v4().to_string();
        self.conn.execute(
            "INSERT INTO extra_shift_records
                (id, plan_entry_id, post_id, date, covering_guard_id, amount, paid, created_at, deleted)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 0, ?7, 0)",
            params![
                id,
                record.plan_entry_id,
                record.post_id,
                format_date(record.date),
                record.covering_guard_id,
                record.amount,
                now_timestamp(),
            ],
        )?;

        self.get(&id)?
            .ok_or_else(|| CoverageError::not_found("extra shift", &id))
    }

    /// Get a record by id, including soft-deleted rows
    pub fn get(&self, id: &str) -> Result<Option<ExtraShiftRecord>> {
        let sql = format!(
            "SELECT {} FROM extra_shift_records x WHERE x.id = ?1",
            RECORD_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, [id], Self::map_row)
            .optional()?;
        Ok(record)
    }

    /// Get a live record whose post belongs to the tenant
    pub fn get_active(&self, tenant_id: &str, id: &str) -> Result<Option<ExtraShiftRecord>> {
        let sql = format!(
            "SELECT {} FROM extra_shift_records x JOIN posts p ON p.id = x.post_id
             WHERE x.id = ?1 AND p.tenant_id = ?2 AND x.deleted = 0",
            RECORD_COLUMNS
        );
        let record = self
            .conn
            .query_row(&sql, params![id, tenant_id], Self::map_row)
            .optional()?;
        Ok(record)
    }

    /// Live records for a coverage key, newest first
    pub fn list_active(&self, post_id: &str, date: NaiveDate) -> Result<Vec<ExtraShiftRecord>> {
        let sql = format!(
            "SELECT {} FROM extra_shift_records x
             WHERE x.post_id = ?1 AND x.date = ?2 AND x.deleted = 0
             ORDER BY x.created_at DESC, x.rowid DESC",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![post_id, format_date(date)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Live records of a tenant for one date, keyed by post
    pub fn list_active_for_date(
        &self,
        tenant_id: &str,
        date: NaiveDate,
    ) -> Result<Vec<ExtraShiftRecord>> {
        let sql = format!(
            "SELECT {} FROM extra_shift_records x JOIN posts p ON p.id = x.post_id
             WHERE p.tenant_id = ?1 AND x.date = ?2 AND x.deleted = 0
             ORDER BY x.post_id, x.created_at DESC",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let records = stmt
            .query_map(params![tenant_id, format_date(date)], Self::map_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(records)
    }

    /// Coverage keys holding more than one live record
    pub fn duplicate_keys(&self, tenant_id: &str) -> Result<Vec<(String, NaiveDate)>> {
        let mut stmt = self.conn.prepare(
            "SELECT x.post_id, x.date FROM extra_shift_records x
             JOIN posts p ON p.id = x.post_id
             WHERE p.tenant_id = ?1 AND x.deleted = 0
             GROUP BY x.post_id, x.date
             HAVING COUNT(*) > 1
             ORDER BY x.post_id, x.date",
        )?;
        let keys = stmt
            .query_map([tenant_id], |row| {
                let date: String = row.get(1)?;
                Ok((row.get(0)?, parse_date(1, &date)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(keys)
    }

    /// Post where the guard is already on duty that day, if any
    ///
    /// A guard is on duty when they worked their own post or hold a live
    /// extra shift. The post being covered is excluded so a repeated
    /// assignment surfaces as duplicate coverage instead.
    pub fn find_conflicting_booking(
        &self,
        tenant_id: &str,
        guard_id: &str,
        date: NaiveDate,
        exclude_post_id: &str,
    ) -> Result<Option<String>> {
        let post_id = self
            .conn
            .query_row(
                "SELECT e.post_id FROM plan_entries e JOIN posts p ON p.id = e.post_id
                 WHERE p.tenant_id = ?1 AND e.date = ?2 AND e.guard_id = ?3
                   AND e.state = 'worked' AND e.post_id != ?4
                 UNION ALL
                 SELECT x.post_id FROM extra_shift_records x JOIN posts p ON p.id = x.post_id
                 WHERE p.tenant_id = ?1 AND x.date = ?2 AND x.covering_guard_id = ?3
                   AND x.deleted = 0 AND x.post_id != ?4
                 LIMIT 1",
                params![tenant_id, format_date(date), guard_id, exclude_post_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(post_id)
    }

    /// Soft-delete a live, unpaid record
    pub fn soft_delete(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE extra_shift_records SET deleted = 1, deleted_at = ?1
             WHERE id = ?2 AND deleted = 0 AND paid = 0",
            params![now_timestamp(), id],
        )?;
        if changed == 0 {
            return Err(CoverageError::ImmutableRecord(format!(
                "extra shift {} is paid or already deleted",
                id
            )));
        }
        Ok(())
    }

    /// Flag a live record as paid
    pub fn mark_paid(&self, id: &str) -> Result<()> {
        let changed = self.conn.execute(
            "UPDATE extra_shift_records SET paid = 1, paid_at = ?1
             WHERE id = ?2 AND deleted = 0",
            params![now_timestamp(), id],
        )?;
        if changed == 0 {
            return Err(CoverageError::not_found("extra shift", id));
        }
        Ok(())
    }
}
