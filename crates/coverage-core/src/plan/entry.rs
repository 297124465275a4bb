//! Plan entry record and its audit metadata

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::state::{PlanState, UiState};

/// Expected/actual coverage for one post on one day
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub id: String,
    pub post_id: String,
    pub date: NaiveDate,
    pub guard_id: Option<String>,
    pub state: PlanState,
    pub ui_state: UiState,
    pub metadata: EntryMetadata,
    pub updated_at: DateTime<Utc>,
}

impl PlanEntry {
    pub fn year(&self) -> i32 {
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        self.date.day()
    }

    /// Entries dated before the caller's today are history
    pub fn is_past(&self, today: NaiveDate) -> bool {
        self.date < today
    }
}

/// What drove a transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransitionAction {
    Attendance,
    Coverage,
    SubmitPayment,
    Settle,
    Reconcile,
    Undo,
}

impl TransitionAction {
    /// Reconciliation rewrites and undo markers are not themselves undoable
    pub fn is_undoable(self) -> bool {
        !matches!(self, TransitionAction::Reconcile | TransitionAction::Undo)
    }
}

/// One audited change to a plan entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub action: TransitionAction,
    pub from: PlanState,
    pub to: PlanState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prior_guard_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard_id: Option<String>,
    pub actor_id: String,
    pub at: DateTime<Utc>,
    /// Reason code for absences, or a free-form action reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Extra shift created by this transition
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extra_shift_id: Option<String>,
    #[serde(default)]
    pub undone: bool,
}

/// Audit blob stored as JSON in `plan_entries.metadata`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntryMetadata {
    #[serde(default)]
    pub history: Vec<TransitionRecord>,
}

impl EntryMetadata {
    /// Index of the most recent live transition, if it may be undone
    ///
    /// Undo markers are skipped; reconciliation rewrites block undo since the
    /// sync engine owns them.
    pub fn last_undoable(&self) -> Option<usize> {
        let (idx, record) = self
            .history
            .iter()
            .enumerate()
            .rev()
            .find(|(_, r)| !r.undone && r.action != TransitionAction::Undo)?;
        record.action.is_undoable().then_some(idx)
    }

    pub fn push(&mut self, record: TransitionRecord) {
        self.history.push(record);
    }
}
