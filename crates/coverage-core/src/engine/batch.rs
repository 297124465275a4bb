//! Batch execution
//!
//! Each unit commits on its own. Units failing on a version conflict are
//! retried with backoff; every other failure is collected and the batch moves
//! on, so one bad record never blocks the rest.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::CoverageEngine;
use crate::context::CallContext;
use crate::error::{CoverageError, ErrorKind};
use crate::retry::with_retry;

/// One reconciliation in a batch
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileRequest {
    pub post_id: String,
    #[serde(default)]
    pub guard_id: Option<String>,
    pub effective_date: NaiveDate,
}

impl ReconcileRequest {
    pub fn key(&self) -> String {
        format!("{}@{}", self.post_id, self.effective_date)
    }
}

/// A unit that failed for good
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchFailure {
    pub key: String,
    pub error_kind: ErrorKind,
    pub message: String,
}

impl BatchFailure {
    pub fn new(key: impl Into<String>, error: &CoverageError) -> Self {
        Self {
            key: key.into(),
            error_kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of a batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    pub fn record<T>(&mut self, key: String, result: Result<T, CoverageError>) {
        match result {
            Ok(_) => self.succeeded.push(key),
            Err(e) => {
                warn!(key = %key, error_kind = %e.kind(), "Batch unit failed: {}", e);
                self.failed.push(BatchFailure::new(key, &e));
            }
        }
    }

    /// Fold another report into this one
    pub fn merge(&mut self, other: BatchReport) {
        self.succeeded.extend(other.succeeded);
        self.failed.extend(other.failed);
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Key of a coverage slot in batch reports
pub fn coverage_key(post_id: &str, date: NaiveDate) -> String {
    format!("{}@{}", post_id, date)
}

impl CoverageEngine {
    /// Reconcile many posts, one transaction each
    pub fn reconcile_batch(&self, ctx: &CallContext, requests: &[ReconcileRequest]) -> BatchReport {
        let mut report = BatchReport::default();
        for request in requests {
            let result = with_retry(&self.retry, || {
                self.reconcile(
                    ctx,
                    &request.post_id,
                    request.guard_id.as_deref(),
                    request.effective_date,
                )
            });
            report.record(request.key(), result);
        }

        info!(
            units = requests.len(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Reconcile batch finished"
        );
        report
    }

    /// Deduplicate many coverage keys, one transaction each
    pub fn deduplicate_batch(&self, ctx: &CallContext, keys: &[(String, NaiveDate)]) -> BatchReport {
        let mut report = BatchReport::default();
        for (post_id, date) in keys {
            let result = with_retry(&self.retry, || {
                self.deduplicate_coverage(ctx, post_id, *date)
            });
            report.record(coverage_key(post_id, *date), result);
        }

        info!(
            units = keys.len(),
            succeeded = report.succeeded.len(),
            failed = report.failed.len(),
            "Deduplicate batch finished"
        );
        report
    }
}
