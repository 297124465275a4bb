//! Operational coverage engine
//!
//! Synchronous operations invoked by external callers (HTTP handlers, batch
//! jobs). Every write path runs in one immediate transaction scoped to a
//! single post, or a single (post, date) coverage key for ledger operations:
//! - `monthly`: monthly plan generation and reads
//! - `attendance`: attendance marking, payment submission, undo
//! - `ledger`: extra shift assignment, payment, deduplication
//! - `sync`: reconciliation of future entries against post assignment
//! - `auditor`: ghost assignment detection and delegated repair
//! - `batch`: independent per-unit execution with failure collection
//! - `daily`: read projection for dispatch tooling

use std::sync::Arc;

use chrono::Utc;

use crate::config::CoverageConfig;
use crate::context::CallContext;
use crate::error::{CoverageError, Result};
use crate::guards::GuardDirectory;
use crate::plan::{PlanEntry, PlanState, TransitionAction, TransitionRecord};
use crate::retry::RetryConfig;
use crate::storage::{Database, NewPost, OperationalPost, PostStore};

mod attendance;
mod auditor;
mod batch;
mod daily;
mod ledger;
mod monthly;
mod sync;

#[cfg(test)]
mod engine_tests;

pub use auditor::{AuditReport, GhostCorrection};
pub use batch::{coverage_key, BatchFailure, BatchReport, ReconcileRequest};
pub use daily::DailyAssignment;
pub use ledger::DeduplicationOutcome;
pub use monthly::GenerationOutcome;
pub use sync::ReconcileOutcome;

/// Coverage engine over one database connection
pub struct CoverageEngine {
    db: Database,
    guards: Arc<dyn GuardDirectory>,
    retry: RetryConfig,
}

impl CoverageEngine {
    pub fn new(db: Database, guards: Arc<dyn GuardDirectory>) -> Self {
        Self {
            db,
            guards,
            retry: RetryConfig::default(),
        }
    }

    /// Open the configured database with its own connection
    pub fn open(config: &CoverageConfig, guards: Arc<dyn GuardDirectory>) -> Result<Self> {
        let db = Database::with_busy_timeout(
            &config.database.resolved_path(),
            config.database.busy_timeout(),
        )?;
        Ok(Self::new(db, guards).with_retry_config(config.retry.clone()))
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Get reference to underlying database
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Register a post on behalf of the post registry
    pub fn register_post(
        &self,
        ctx: &CallContext,
        installation_id: &str,
        role_id: &str,
        assigned_guard_id: Option<&str>,
    ) -> Result<OperationalPost> {
        let post = PostStore::new(self.db.conn()).register(&NewPost {
            tenant_id: ctx.tenant_id.clone(),
            installation_id: installation_id.to_string(),
            role_id: role_id.to_string(),
            assigned_guard_id: assigned_guard_id.map(str::to_string),
        })?;
        tracing::info!(post_id = %post.id, tenant_id = %ctx.tenant_id, "Post registered");
        Ok(post)
    }

    pub fn get_post(&self, ctx: &CallContext, post_id: &str) -> Result<OperationalPost> {
        PostStore::new(self.db.conn()).require(&ctx.tenant_id, post_id)
    }

    /// Fail with `ImmutableRecord` for entries dated before the caller's today
    fn ensure_current(ctx: &CallContext, entry: &PlanEntry) -> Result<()> {
        if entry.is_past(ctx.today) {
            return Err(CoverageError::ImmutableRecord(format!(
                "plan entry {} for {} is history",
                entry.id, entry.date
            )));
        }
        Ok(())
    }

    fn ensure_transition(entry: &PlanEntry, to: PlanState) -> Result<()> {
        if entry.state.is_terminal() {
            return Err(CoverageError::InvalidTransition(format!(
                "plan entry {} is {} and cannot change",
                entry.id, entry.state
            )));
        }
        if !entry.state.can_transition(to) {
            return Err(CoverageError::InvalidTransition(format!(
                "{} -> {} is not allowed for plan entry {}",
                entry.state, to, entry.id
            )));
        }
        Ok(())
    }
}

/// Audit fields for one change, applied by [`apply_transition`]
pub(crate) struct Change<'a> {
    pub action: TransitionAction,
    pub to: PlanState,
    pub guard_id: Option<String>,
    pub reason: Option<String>,
    pub extra_shift_id: Option<String>,
    pub ctx: &'a CallContext,
}

/// Move an entry to a new state and append the audit record
pub(crate) fn apply_transition(entry: &mut PlanEntry, change: Change<'_>) {
    let record = TransitionRecord {
        action: change.action,
        from: entry.state,
        to: change.to,
        prior_guard_id: entry.guard_id.clone(),
        guard_id: change.guard_id.clone(),
        actor_id: change.ctx.actor_id.clone(),
        at: Utc::now(),
        reason: change.reason,
        extra_shift_id: change.extra_shift_id,
        undone: false,
    };
    entry.state = change.to;
    entry.ui_state = change.to.ui_state();
    entry.guard_id = change.guard_id;
    entry.metadata.push(record);
}
