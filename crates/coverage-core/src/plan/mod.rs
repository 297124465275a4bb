//! Monthly plan model
//!
//! One `PlanEntry` per (post, day) with a closed state enumeration:
//! - `planned`/`open` are the generated states the sync engine may rewrite
//! - `worked`/`absent` are set by attendance marking
//! - `covered_by_replacement`/`covered` are driven by the extra shift ledger
//! - `pending_payment`/`paid` are administrative, `paid` is terminal
//!
//! Every change is appended to the entry's JSON metadata so the most recent
//! transition can be undone and audits can read the trail chronologically.

mod entry;
mod state;

pub use entry::{EntryMetadata, PlanEntry, TransitionAction, TransitionRecord};
pub use state::{AttendanceOutcome, PlanState, UiState};
