//! Extra shift ledger operations

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{apply_transition, Change, CoverageEngine};
use crate::context::CallContext;
use crate::error::{CoverageError, Result};
use crate::plan::{PlanState, TransitionAction};
use crate::storage::{
    CorrectionKind, CorrectionLog, ExtraShiftRecord, ExtraShiftStore, NewExtraShift,
    PlanEntryStore, PostStore,
};

/// Result of repairing one coverage key
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationOutcome {
    /// Soft-deleted record ids, for audit logging
    pub removed: Vec<String>,
    /// Surviving record, if the key had any live record
    pub kept: Option<String>,
}

impl CoverageEngine {
    /// Book a covering guard for a post on a date
    ///
    /// Covers a marked absence (`absent -> covered_by_replacement`) or an open
    /// post (`open -> covered`). The double-booking and duplicate checks, the
    /// ledger insert and the entry transition share one write transaction, so
    /// of two racing calls for the same key exactly one succeeds.
    pub fn assign_coverage(
        &self,
        ctx: &CallContext,
        post_id: &str,
        date: NaiveDate,
        covering_guard_id: &str,
        plan_entry_id: Option<&str>,
    ) -> Result<ExtraShiftRecord> {
        let guard = self
            .guards
            .get_guard(&ctx.tenant_id, covering_guard_id)?
            .ok_or_else(|| CoverageError::not_found("guard", covering_guard_id))?;
        if !guard.active {
            return Err(CoverageError::InvalidTransition(format!(
                "guard {} is inactive",
                covering_guard_id
            )));
        }
        if date < ctx.today {
            return Err(CoverageError::ImmutableRecord(format!(
                "cannot assign coverage for past date {}",
                date
            )));
        }

        let tx = self.db.begin_write()?;
        let post = PostStore::new(&tx).require(&ctx.tenant_id, post_id)?;
        let entries = PlanEntryStore::new(&tx);
        let ledger = ExtraShiftStore::new(&tx);

        let entry = match plan_entry_id {
            Some(id) => {
                let entry = entries.require(&ctx.tenant_id, id)?;
                if entry.post_id != post_id || entry.date != date {
                    return Err(CoverageError::InvalidInput(format!(
                        "plan entry {} is not the entry of post {} on {}",
                        id, post_id, date
                    )));
                }
                Some(entry)
            }
            None => entries.find_by_key(post_id, date)?,
        };

        if let Some(conflicting_post_id) =
            ledger.find_conflicting_booking(&ctx.tenant_id, covering_guard_id, date, post_id)?
        {
            return Err(CoverageError::DoubleBooking {
                guard_id: covering_guard_id.to_string(),
                date,
                conflicting_post_id,
            });
        }

        if !ledger.list_active(post_id, date)?.is_empty() {
            return Err(CoverageError::DuplicateCoverage {
                post_id: post_id.to_string(),
                date,
            });
        }

        let (target, linked_entry_id) = match &entry {
            Some(entry) => match entry.state {
                PlanState::Absent => {
                    let same_guard = post.assigned_guard_id.as_deref() == Some(covering_guard_id)
                        || entry.guard_id.as_deref() == Some(covering_guard_id);
                    if same_guard {
                        return Err(CoverageError::InvalidTransition(format!(
                            "guard {} cannot replace themselves on post {}",
                            covering_guard_id, post_id
                        )));
                    }
                    (
                        Some(PlanState::CoveredByReplacement),
                        Some(entry.id.clone()),
                    )
                }
                PlanState::Open => (Some(PlanState::Covered), None),
                state => {
                    return Err(CoverageError::InvalidTransition(format!(
                        "plan entry {} is {} and cannot take coverage",
                        entry.id, state
                    )));
                }
            },
            None if post.is_pending_coverage => (None, None),
            None => {
                return Err(CoverageError::NotFound(format!(
                    "plan entry for post {} on {}",
                    post_id, date
                )))
            }
        };

        if let (Some(entry), Some(to)) = (&entry, target) {
            Self::ensure_transition(entry, to)?;
        }

        let record = ledger.insert(&NewExtraShift {
            plan_entry_id: linked_entry_id,
            post_id: post_id.to_string(),
            date,
            covering_guard_id: covering_guard_id.to_string(),
            amount: None,
        })?;

        if let (Some(mut entry), Some(to)) = (entry, target) {
            let guard_id = entry.guard_id.clone();
            apply_transition(
                &mut entry,
                Change {
                    action: TransitionAction::Coverage,
                    to,
                    guard_id,
                    reason: None,
                    extra_shift_id: Some(record.id.clone()),
                    ctx,
                },
            );
            entries.update(&entry)?;
        }
        tx.commit()?;

        info!(
            extra_shift_id = %record.id,
            post_id = %post_id,
            date = %date,
            covering_guard_id = %covering_guard_id,
            state = ?target,
            "Coverage assigned"
        );
        Ok(record)
    }

    /// Mark an extra shift paid and settle its plan entry
    ///
    /// Already-paid records are returned unchanged. The linked entry moves to
    /// `paid`, passing through `pending_payment` when it was still covered.
    pub fn mark_paid(&self, ctx: &CallContext, extra_shift_id: &str) -> Result<ExtraShiftRecord> {
        let tx = self.db.begin_write()?;
        let ledger = ExtraShiftStore::new(&tx);
        let record = ledger
            .get_active(&ctx.tenant_id, extra_shift_id)?
            .ok_or_else(|| CoverageError::not_found("extra shift", extra_shift_id))?;

        if record.paid {
            debug!(extra_shift_id = %extra_shift_id, "Extra shift already paid");
            return Ok(record);
        }

        ledger.mark_paid(extra_shift_id)?;

        let entries = PlanEntryStore::new(&tx);
        let entry = match record.plan_entry_id.as_deref() {
            Some(id) => entries.get(&ctx.tenant_id, id)?,
            None => entries.find_by_key(&record.post_id, record.date)?,
        };
        if let Some(mut entry) = entry {
            let mut steps = Vec::new();
            if entry.state.is_covered() {
                steps.push((TransitionAction::SubmitPayment, PlanState::PendingPayment));
            }
            if entry.state.is_covered() || entry.state == PlanState::PendingPayment {
                steps.push((TransitionAction::Settle, PlanState::Paid));
            }
            if steps.is_empty() {
                warn!(
                    entry_id = %entry.id,
                    state = %entry.state,
                    "Paid extra shift has no settleable plan entry"
                );
            }
            for (action, to) in steps {
                let guard_id = entry.guard_id.clone();
                apply_transition(
                    &mut entry,
                    Change {
                        action,
                        to,
                        guard_id,
                        reason: None,
                        extra_shift_id: Some(record.id.clone()),
                        ctx,
                    },
                );
            }
            entries.update(&entry)?;
        }

        let paid = ledger
            .get(extra_shift_id)?
            .ok_or_else(|| CoverageError::not_found("extra shift", extra_shift_id))?;
        tx.commit()?;

        info!(extra_shift_id = %extra_shift_id, post_id = %paid.post_id, date = %paid.date, "Extra shift paid");
        Ok(paid)
    }

    /// Keep one live record per coverage key and soft-delete the rest
    ///
    /// The most recently created record survives; a paid record always wins
    /// since paid rows are immutable. Plan entries are not touched.
    pub fn deduplicate_coverage(
        &self,
        ctx: &CallContext,
        post_id: &str,
        date: NaiveDate,
    ) -> Result<DeduplicationOutcome> {
        let tx = self.db.begin_write()?;
        PostStore::new(&tx).require(&ctx.tenant_id, post_id)?;
        let ledger = ExtraShiftStore::new(&tx);

        // Newest first
        let records = ledger.list_active(post_id, date)?;
        let Some(survivor) = records.iter().find(|r| r.paid).or(records.first()) else {
            return Ok(DeduplicationOutcome::default());
        };
        let survivor_id = survivor.id.clone();

        let log = CorrectionLog::new(&tx, &ctx.tenant_id);
        let mut removed = Vec::new();
        for record in records.iter().filter(|r| r.id != survivor_id) {
            if record.paid {
                warn!(
                    extra_shift_id = %record.id,
                    post_id = %post_id,
                    date = %date,
                    "Duplicate extra shift is paid and cannot be removed"
                );
                continue;
            }
            ledger.soft_delete(&record.id)?;
            let after = ExtraShiftRecord {
                deleted: true,
                ..record.clone()
            };
            log.record(
                CorrectionKind::DuplicateCoverage,
                &record.id,
                post_id,
                date,
                &ctx.actor_id,
                Some(record),
                Some(&after),
            )?;
            removed.push(record.id.clone());
        }
        tx.commit()?;

        if removed.is_empty() {
            debug!(post_id = %post_id, date = %date, "No duplicate coverage to remove");
        } else {
            info!(
                post_id = %post_id,
                date = %date,
                kept = %survivor_id,
                removed = ?removed,
                "Duplicate coverage removed"
            );
        }
        Ok(DeduplicationOutcome {
            removed,
            kept: Some(survivor_id),
        })
    }

    /// Coverage keys of the tenant holding more than one live record
    pub fn find_duplicate_coverage_keys(
        &self,
        ctx: &CallContext,
    ) -> Result<Vec<(String, NaiveDate)>> {
        ExtraShiftStore::new(self.db.conn()).duplicate_keys(&ctx.tenant_id)
    }

    /// Get a live extra shift visible to the tenant
    pub fn get_extra_shift(&self, ctx: &CallContext, id: &str) -> Result<ExtraShiftRecord> {
        ExtraShiftStore::new(self.db.conn())
            .get_active(&ctx.tenant_id, id)?
            .ok_or_else(|| CoverageError::not_found("extra shift", id))
    }
}
