//! Engine error types

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, CoverageError>;

/// Coverage engine error type
#[derive(Debug, Error)]
pub enum CoverageError {
    /// An active extra shift already exists for the coverage key
    #[error("coverage already recorded for post {post_id} on {date}")]
    DuplicateCoverage { post_id: String, date: NaiveDate },

    /// Record is historical or paid and cannot change
    #[error("immutable record: {0}")]
    ImmutableRecord(String),

    /// Post version moved between read and write
    #[error("post {post_id} was modified concurrently (expected version {expected}, found {found})")]
    ConcurrentModification {
        post_id: String,
        expected: i64,
        found: i64,
    },

    /// Covering guard is already working somewhere else that day
    #[error("guard {guard_id} is already booked on {date} (post {conflicting_post_id})")]
    DoubleBooking {
        guard_id: String,
        date: NaiveDate,
        conflicting_post_id: String,
    },

    /// Entity missing, soft-deleted, or outside the caller's tenant
    #[error("not found: {0}")]
    NotFound(String),

    /// Requested change is not allowed from the current state
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Malformed request, e.g. a month outside 1..=12
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// SQLite error
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    /// Metadata (de)serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Closed classification of engine errors, reported by batch operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    DuplicateCoverage,
    ImmutableRecord,
    ConcurrentModification,
    DoubleBooking,
    NotFound,
    InvalidTransition,
    InvalidInput,
    Storage,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::DuplicateCoverage => "duplicate_coverage",
            ErrorKind::ImmutableRecord => "immutable_record",
            ErrorKind::ConcurrentModification => "concurrent_modification",
            ErrorKind::DoubleBooking => "double_booking",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::Storage => "storage",
        };
        f.write_str(name)
    }
}

impl CoverageError {
    /// Classify this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoverageError::DuplicateCoverage { .. } => ErrorKind::DuplicateCoverage,
            CoverageError::ImmutableRecord(_) => ErrorKind::ImmutableRecord,
            CoverageError::ConcurrentModification { .. } => ErrorKind::ConcurrentModification,
            CoverageError::DoubleBooking { .. } => ErrorKind::DoubleBooking,
            CoverageError::NotFound(_) => ErrorKind::NotFound,
            CoverageError::InvalidTransition(_) => ErrorKind::InvalidTransition,
            CoverageError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoverageError::Storage(_) | CoverageError::Serialization(_) | CoverageError::Io(_) => {
                ErrorKind::Storage
            }
        }
    }

    /// Only optimistic-concurrency conflicts may be re-issued after a fresh read
    pub fn is_retryable(&self) -> bool {
        matches!(self, CoverageError::ConcurrentModification { .. })
    }

    pub(crate) fn not_found(what: &str, id: &str) -> Self {
        CoverageError::NotFound(format!("{} {}", what, id))
    }
}
