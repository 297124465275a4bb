//! Coverage resolver
//!
//! Reconciles a post's future plan entries with its assignment. Only
//! `planned`/`open` entries are rewritten; every other state records what
//! actually happened on that day and stays as it is.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::monthly::{days_of_month, fill_day};
use super::{apply_transition, Change, CoverageEngine};
use crate::context::CallContext;
use crate::error::{CoverageError, Result};
use crate::plan::{PlanState, TransitionAction};
use crate::storage::{PlanEntryStore, PostStore};

/// Counts reported by one reconciliation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconcileOutcome {
    /// Entries given the new guard
    pub updated: usize,
    /// Missing days filled in within already generated months
    pub created: usize,
    /// Entries whose guard was cleared
    pub removed: usize,
}

impl ReconcileOutcome {
    pub fn is_noop(&self) -> bool {
        self.updated == 0 && self.created == 0 && self.removed == 0
    }
}

impl CoverageEngine {
    /// Apply an assignment change to a post from `effective_date` on
    ///
    /// Reads the post's current version and delegates to
    /// [`CoverageEngine::reconcile_at_version`]. Calling twice with the same
    /// arguments reports nothing the second time.
    pub fn reconcile(
        &self,
        ctx: &CallContext,
        post_id: &str,
        new_guard_id: Option<&str>,
        effective_date: NaiveDate,
    ) -> Result<ReconcileOutcome> {
        let post = PostStore::new(self.db.conn()).require(&ctx.tenant_id, post_id)?;
        self.reconcile_at_version(ctx, post_id, new_guard_id, effective_date, post.version)
    }

    /// Reconcile against a previously read post version
    ///
    /// Fails with `ConcurrentModification` when the post moved since that
    /// read. The post assignment and every entry write commit together.
    pub fn reconcile_at_version(
        &self,
        ctx: &CallContext,
        post_id: &str,
        new_guard_id: Option<&str>,
        effective_date: NaiveDate,
        expected_version: i64,
    ) -> Result<ReconcileOutcome> {
        let tx = self.db.begin_write()?;
        let posts = PostStore::new(&tx);
        let post = posts.require(&ctx.tenant_id, post_id)?;
        if post.version != expected_version {
            return Err(CoverageError::ConcurrentModification {
                post_id: post_id.to_string(),
                expected: expected_version,
                found: post.version,
            });
        }

        // History is never rewritten, whatever the caller asks for
        let start = effective_date.max(ctx.today);
        let desired_state = PlanState::initial(new_guard_id.is_some());
        let desired_guard = new_guard_id.map(str::to_string);

        let entries = PlanEntryStore::new(&tx);
        let mut outcome = ReconcileOutcome::default();

        for mut entry in entries.list_from(post_id, start)? {
            if !entry.state.is_reconcilable() {
                continue;
            }
            if entry.state == desired_state && entry.guard_id == desired_guard {
                continue;
            }

            let prior_guard = entry.guard_id.clone();
            apply_transition(
                &mut entry,
                Change {
                    action: TransitionAction::Reconcile,
                    to: desired_state,
                    guard_id: desired_guard.clone(),
                    reason: Some(format!("assignment effective {}", effective_date)),
                    extra_shift_id: None,
                    ctx,
                },
            );
            entries.update(&entry)?;

            if desired_guard.is_some() {
                outcome.updated += 1;
            } else {
                outcome.removed += 1;
            }
            debug!(
                entry_id = %entry.id,
                date = %entry.date,
                prior_guard = ?prior_guard,
                guard = ?entry.guard_id,
                state = %entry.state,
                "Plan entry reconciled"
            );
        }

        for (year, month) in entries.months_from(post_id, start)? {
            for day in days_of_month(year, month)?.into_iter().filter(|d| *d >= start) {
                if fill_day(&tx, ctx, post_id, day, new_guard_id, desired_state)? {
                    outcome.created += 1;
                }
            }
        }

        let assignment_changed = post.assigned_guard_id.as_deref() != new_guard_id
            || post.is_pending_coverage != new_guard_id.is_none();
        let version = if assignment_changed {
            posts.update_assignment(post_id, new_guard_id, post.version)?
        } else if !outcome.is_noop() {
            posts.bump_version(post_id, post.version)?
        } else {
            post.version
        };
        tx.commit()?;

        info!(
            post_id = %post_id,
            guard_id = ?new_guard_id,
            effective_date = %effective_date,
            start = %start,
            updated = outcome.updated,
            created = outcome.created,
            removed = outcome.removed,
            version,
            "Post reconciled"
        );
        Ok(outcome)
    }
}
