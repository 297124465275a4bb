//! Consistency auditor
//!
//! Detects ghost assignments: entries still naming a guard on a post that is
//! pending coverage under a different (or no) assignment. Repairs go through
//! [`CoverageEngine::reconcile`] with the post's current assignment.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{BatchFailure, CoverageEngine};
use crate::context::CallContext;
use crate::error::Result;
use crate::plan::PlanEntry;
use crate::retry::with_retry;
use crate::storage::{CorrectionKind, CorrectionLog, PlanEntryStore, PostStore};

/// Before/after snapshot of one repaired entry
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GhostCorrection {
    pub entry_id: String,
    pub post_id: String,
    pub before: PlanEntry,
    pub after: PlanEntry,
}

/// Result of auditing one date
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub flagged: usize,
    pub repaired: usize,
    pub corrections: Vec<GhostCorrection>,
    /// Active posts with both or neither of a guard and the pending flag
    pub invariant_violations: Vec<String>,
    /// Posts whose repair failed
    pub failed: Vec<BatchFailure>,
}

impl CoverageEngine {
    /// Flag and repair ghost assignments on one date
    ///
    /// Entries dated before the caller's today are flagged but stay as they
    /// are, since reconciliation never rewrites history.
    pub fn run_consistency_audit(&self, ctx: &CallContext, date: NaiveDate) -> Result<AuditReport> {
        let ghosts = PlanEntryStore::new(self.db.conn()).find_ghosts(&ctx.tenant_id, date)?;

        let mut report = AuditReport {
            flagged: ghosts.len(),
            ..Default::default()
        };

        let mut by_post: BTreeMap<String, Vec<PlanEntry>> = BTreeMap::new();
        for entry in ghosts {
            warn!(
                entry_id = %entry.id,
                post_id = %entry.post_id,
                date = %entry.date,
                guard_id = ?entry.guard_id,
                "Ghost assignment flagged"
            );
            by_post.entry(entry.post_id.clone()).or_default().push(entry);
        }

        for (post_id, before) in by_post {
            let repair = with_retry(&self.retry, || {
                let post = PostStore::new(self.db.conn()).require(&ctx.tenant_id, &post_id)?;
                self.reconcile_at_version(
                    ctx,
                    &post_id,
                    post.assigned_guard_id.as_deref(),
                    date,
                    post.version,
                )
            });
            if let Err(e) = repair {
                warn!(post_id = %post_id, error = %e, "Ghost repair failed");
                report.failed.push(BatchFailure::new(post_id, &e));
                continue;
            }

            // Repairs are committed; a failed log write is reported, not fatal
            match self.log_ghost_repairs(ctx, &post_id, before) {
                Ok(corrections) => {
                    report.repaired += corrections.len();
                    report.corrections.extend(corrections);
                }
                Err(e) => {
                    warn!(post_id = %post_id, error = %e, "Ghost correction log failed");
                    report.failed.push(BatchFailure::new(post_id, &e));
                }
            }
        }

        report.invariant_violations = PostStore::new(self.db.conn())
            .list_active(&ctx.tenant_id)?
            .into_iter()
            .filter(|post| !post.satisfies_invariant())
            .map(|post| post.id)
            .collect();
        for post_id in &report.invariant_violations {
            warn!(post_id = %post_id, "Post violates the guard/pending invariant");
        }

        info!(
            date = %date,
            flagged = report.flagged,
            repaired = report.repaired,
            failed = report.failed.len(),
            "Consistency audit finished"
        );
        Ok(report)
    }

    /// Write a correction row for every entry the repair actually changed
    fn log_ghost_repairs(
        &self,
        ctx: &CallContext,
        post_id: &str,
        before: Vec<PlanEntry>,
    ) -> Result<Vec<GhostCorrection>> {
        let tx = self.db.begin_write()?;
        let post = PostStore::new(&tx).require(&ctx.tenant_id, post_id)?;
        let entries = PlanEntryStore::new(&tx);
        let log = CorrectionLog::new(&tx, &ctx.tenant_id);

        let mut corrections = Vec::new();
        for entry in before {
            let after = entries.require(&ctx.tenant_id, &entry.id)?;
            if after.guard_id != post.assigned_guard_id {
                continue;
            }
            log.record(
                CorrectionKind::GhostAssignment,
                &entry.id,
                post_id,
                entry.date,
                &ctx.actor_id,
                Some(&entry),
                Some(&after),
            )?;
            info!(
                entry_id = %entry.id,
                post_id = %post_id,
                before_guard = ?entry.guard_id,
                before_state = %entry.state,
                after_guard = ?after.guard_id,
                after_state = %after.state,
                "Ghost assignment repaired"
            );
            corrections.push(GhostCorrection {
                entry_id: entry.id.clone(),
                post_id: post_id.to_string(),
                before: entry,
                after,
            });
        }
        tx.commit()?;
        Ok(corrections)
    }
}
