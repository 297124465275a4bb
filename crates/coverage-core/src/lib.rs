//! Coverage Core - Operational coverage engine for guard rosters
//!
//! This crate keeps planned shifts, daily execution and compensated coverage
//! consistent:
//! - Monthly plan entries with an audited state machine
//! - Extra shift ledger with one live record per post and day
//! - Reconciliation of future entries against post assignment
//! - Consistency auditing with delegated repair
//! - Batch execution with retry on version conflicts

pub mod config;
pub mod constants;
pub mod context;
pub mod engine;
pub mod error;
pub mod guards;
pub mod paths;
pub mod plan;
pub mod retry;
pub mod storage;

#[cfg(test)]
mod testing;

// Re-exports for convenience
pub use config::CoverageConfig;
pub use context::CallContext;
pub use engine::{
    AuditReport, BatchReport, CoverageEngine, DailyAssignment, DeduplicationOutcome,
    ReconcileOutcome, ReconcileRequest,
};
pub use error::{CoverageError, ErrorKind, Result};
pub use guards::{Guard, GuardDirectory, InMemoryGuardDirectory, SqliteGuardDirectory};
pub use plan::{AttendanceOutcome, PlanEntry, PlanState, UiState};
pub use storage::{Database, ExtraShiftRecord, OperationalPost};
