//! Persistence layer
//!
//! SQLite-based storage for:
//! - Post registry and guard directory mirrors
//! - Monthly plan entries with JSON audit metadata
//! - Extra shift ledger (soft-deleted, never removed)
//! - Correction log written by repair operations

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::types::Type;

use crate::constants::storage::DATE_FORMAT;

mod corrections;
mod database;
mod extra_shifts;
mod plan_entries;
mod posts;


pub use corrections::{Correction, CorrectionKind, CorrectionLog};
pub use database::Database;
pub use extra_shifts::{ExtraShiftRecord, ExtraShiftStore, NewExtraShift};
pub use plan_entries::PlanEntryStore;
pub use posts::{NewPost, OperationalPost, PostStore};

/// Current time as a sortable RFC 3339 timestamp
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub(crate) fn parse_date(idx: usize, value: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

pub(crate) fn parse_timestamp(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}
