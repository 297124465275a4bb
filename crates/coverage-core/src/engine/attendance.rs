//! Attendance marking, payment submission and undo

use tracing::info;

use super::{apply_transition, Change, CoverageEngine};
use crate::context::CallContext;
use crate::error::{CoverageError, Result};
use crate::plan::{AttendanceOutcome, PlanEntry, PlanState, TransitionAction};
use crate::storage::{ExtraShiftStore, PlanEntryStore, PostStore};

impl CoverageEngine {
    /// Record whether the planned guard worked or was absent
    ///
    /// Absences require a reason code and do not create coverage by
    /// themselves; see [`CoverageEngine::assign_coverage`].
    pub fn mark_attendance(
        &self,
        ctx: &CallContext,
        entry_id: &str,
        outcome: AttendanceOutcome,
        reason_code: Option<&str>,
    ) -> Result<PlanEntry> {
        let reason = reason_code
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let tx = self.db.begin_write()?;
        let entries = PlanEntryStore::new(&tx);
        let mut entry = entries.require(&ctx.tenant_id, entry_id)?;

        Self::ensure_current(ctx, &entry)?;
        let to = outcome.target_state();
        Self::ensure_transition(&entry, to)?;
        if to == PlanState::Absent && reason.is_none() {
            return Err(CoverageError::InvalidTransition(format!(
                "marking plan entry {} absent requires a reason code",
                entry_id
            )));
        }

        let guard_id = entry.guard_id.clone();
        apply_transition(
            &mut entry,
            Change {
                action: TransitionAction::Attendance,
                to,
                guard_id,
                reason,
                extra_shift_id: None,
                ctx,
            },
        );
        entries.update(&entry)?;
        tx.commit()?;

        info!(
            entry_id = %entry.id,
            post_id = %entry.post_id,
            date = %entry.date,
            state = %entry.state,
            actor = %ctx.actor_id,
            "Attendance marked"
        );
        Ok(entry)
    }

    /// Administrative move of a covered entry to `pending_payment`
    ///
    /// Allowed on past entries.
    pub fn submit_for_payment(&self, ctx: &CallContext, entry_id: &str) -> Result<PlanEntry> {
        let tx = self.db.begin_write()?;
        let entries = PlanEntryStore::new(&tx);
        let mut entry = entries.require(&ctx.tenant_id, entry_id)?;

        Self::ensure_transition(&entry, PlanState::PendingPayment)?;
        let guard_id = entry.guard_id.clone();
        apply_transition(
            &mut entry,
            Change {
                action: TransitionAction::SubmitPayment,
                to: PlanState::PendingPayment,
                guard_id,
                reason: None,
                extra_shift_id: None,
                ctx,
            },
        );
        entries.update(&entry)?;
        tx.commit()?;

        info!(entry_id = %entry.id, post_id = %entry.post_id, "Coverage submitted for payment");
        Ok(entry)
    }

    /// Revert the most recent transition of an entry
    ///
    /// Restores the prior state and guard recorded in metadata and soft-deletes
    /// the extra shift that transition created, if any. An entry going back to
    /// `planned`/`open` takes the post's current assignment instead, since the
    /// post may have been reconciled in between. Paid entries and paid extra
    /// shifts are immutable.
    pub fn undo_last_transition(&self, ctx: &CallContext, entry_id: &str) -> Result<PlanEntry> {
        let tx = self.db.begin_write()?;
        let entries = PlanEntryStore::new(&tx);
        let mut entry = entries.require(&ctx.tenant_id, entry_id)?;

        if entry.state == PlanState::Paid {
            return Err(CoverageError::ImmutableRecord(format!(
                "plan entry {} is paid",
                entry_id
            )));
        }

        let idx = entry.metadata.last_undoable().ok_or_else(|| {
            CoverageError::InvalidTransition(format!(
                "plan entry {} has no transition to undo",
                entry_id
            ))
        })?;
        let last = entry.metadata.history[idx].clone();

        // Payment status stays administrable on history; everything else is frozen
        if last.action != TransitionAction::SubmitPayment {
            Self::ensure_current(ctx, &entry)?;
        }
        if last.to != entry.state {
            return Err(CoverageError::InvalidTransition(format!(
                "plan entry {} is {} but its last transition ended in {}",
                entry_id, entry.state, last.to
            )));
        }

        if let Some(extra_shift_id) = last.extra_shift_id.as_deref() {
            let ledger = ExtraShiftStore::new(&tx);
            match ledger.get(extra_shift_id)? {
                Some(record) if record.paid => {
                    return Err(CoverageError::ImmutableRecord(format!(
                        "extra shift {} is paid",
                        extra_shift_id
                    )));
                }
                Some(record) if !record.deleted => ledger.soft_delete(&record.id)?,
                _ => {}
            }
        }

        let (to, guard_id) = if last.from.is_reconcilable() {
            let post = PostStore::new(&tx).require(&ctx.tenant_id, &entry.post_id)?;
            let guard_id = post.assigned_guard_id;
            (PlanState::initial(guard_id.is_some()), guard_id)
        } else {
            (last.from, last.prior_guard_id.clone())
        };

        entry.metadata.history[idx].undone = true;
        apply_transition(
            &mut entry,
            Change {
                action: TransitionAction::Undo,
                to,
                guard_id,
                reason: Some(format!("undo {}", last.to)),
                extra_shift_id: last.extra_shift_id.clone(),
                ctx,
            },
        );
        entries.update(&entry)?;
        tx.commit()?;

        info!(
            entry_id = %entry.id,
            post_id = %entry.post_id,
            from = %last.to,
            to = %entry.state,
            extra_shift_id = ?last.extra_shift_id,
            "Transition undone"
        );
        Ok(entry)
    }
}
