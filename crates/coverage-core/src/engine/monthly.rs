//! Monthly plan generation and reads

use chrono::{Datelike, NaiveDate};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{apply_transition, Change, CoverageEngine};
use crate::context::CallContext;
use crate::error::{CoverageError, Result};
use crate::plan::{PlanEntry, PlanState, TransitionAction};
use crate::storage::{ExtraShiftStore, PlanEntryStore, PostStore};

/// Result of generating one month for one post
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationOutcome {
    pub created: usize,
    pub existing: usize,
}

/// Every calendar day of a month, in order
pub(crate) fn days_of_month(year: i32, month: u32) -> Result<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| CoverageError::InvalidInput(format!("no such month {}-{}", year, month)))?;
    Ok(first
        .iter_days()
        .take_while(|d| d.month() == month)
        .collect())
}

/// Insert the entry of a day that has none yet
///
/// A day already holding a live extra shift starts `covered` instead, or
/// `paid` when that record is paid, so the plan never shows it uncovered.
/// Returns whether an entry was created.
pub(crate) fn fill_day(
    conn: &Connection,
    ctx: &CallContext,
    post_id: &str,
    day: NaiveDate,
    guard_id: Option<&str>,
    state: PlanState,
) -> Result<bool> {
    let entries = PlanEntryStore::new(conn);
    let records = ExtraShiftStore::new(conn).list_active(post_id, day)?;
    let Some(record) = records.iter().find(|r| r.paid).or(records.first()) else {
        return entries.insert_if_missing(post_id, day, guard_id, state);
    };

    if !entries.insert_if_missing(post_id, day, None, PlanState::Open)? {
        return Ok(false);
    }
    let mut entry = entries.find_by_key(post_id, day)?.ok_or_else(|| {
        CoverageError::NotFound(format!("plan entry for post {} on {}", post_id, day))
    })?;

    let mut steps = vec![(TransitionAction::Coverage, PlanState::Covered)];
    if record.paid {
        steps.push((TransitionAction::SubmitPayment, PlanState::PendingPayment));
        steps.push((TransitionAction::Settle, PlanState::Paid));
    }
    for (action, to) in steps {
        apply_transition(
            &mut entry,
            Change {
                action,
                to,
                guard_id: None,
                reason: Some("existing extra shift".to_string()),
                extra_shift_id: Some(record.id.clone()),
                ctx,
            },
        );
    }
    entries.update(&entry)?;

    debug!(
        entry_id = %entry.id,
        post_id = %post_id,
        date = %day,
        extra_shift_id = %record.id,
        state = %entry.state,
        "Plan entry created over existing coverage"
    );
    Ok(true)
}

impl CoverageEngine {
    /// Create one entry per day for an active post
    ///
    /// Staffed posts start `planned` with their guard, pending posts start
    /// `open`, and days already covered by an extra shift start covered.
    /// Days that already have an entry are left as they are, so re-running a
    /// generation is safe.
    pub fn generate_monthly_plan(
        &self,
        ctx: &CallContext,
        post_id: &str,
        year: i32,
        month: u32,
    ) -> Result<GenerationOutcome> {
        let days = days_of_month(year, month)?;

        let tx = self.db.begin_write()?;
        let post = PostStore::new(&tx).require(&ctx.tenant_id, post_id)?;
        if !post.active {
            return Err(CoverageError::InvalidTransition(format!(
                "post {} is inactive",
                post_id
            )));
        }

        let guard = post.assigned_guard_id.as_deref();
        let state = PlanState::initial(guard.is_some());

        let mut outcome = GenerationOutcome::default();
        for day in days {
            if fill_day(&tx, ctx, post_id, day, guard, state)? {
                outcome.created += 1;
            } else {
                outcome.existing += 1;
            }
        }
        tx.commit()?;

        info!(
            post_id = %post_id,
            year,
            month,
            created = outcome.created,
            existing = outcome.existing,
            "Monthly plan generated"
        );
        Ok(outcome)
    }

    /// All entries of one post for one month, ordered by day
    pub fn get_monthly_plan(
        &self,
        ctx: &CallContext,
        post_id: &str,
        year: i32,
        month: u32,
    ) -> Result<Vec<PlanEntry>> {
        if !(1..=12).contains(&month) {
            return Err(CoverageError::InvalidInput(format!(
                "no such month {}-{}",
                year, month
            )));
        }
        PostStore::new(self.db.conn()).require(&ctx.tenant_id, post_id)?;
        PlanEntryStore::new(self.db.conn()).list_month(post_id, year, month)
    }

    /// Get one plan entry visible to the tenant
    pub fn get_plan_entry(&self, ctx: &CallContext, entry_id: &str) -> Result<PlanEntry> {
        PlanEntryStore::new(self.db.conn()).require(&ctx.tenant_id, entry_id)
    }
}
