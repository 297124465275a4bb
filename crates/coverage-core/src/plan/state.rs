//! Plan entry states and the legal transition table

use serde::{Deserialize, Serialize};

/// Coverage state of one post on one day
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanState {
    /// Post has its permanent guard scheduled
    Planned,
    /// Post has no guard for the day (pending coverage)
    Open,
    /// Attendance confirmed
    Worked,
    /// Scheduled guard did not show up
    Absent,
    /// Absence covered by a replacement guard
    CoveredByReplacement,
    /// Open post covered by an extra shift
    Covered,
    /// Coverage submitted to payroll
    PendingPayment,
    /// Coverage paid; terminal
    Paid,
}

impl PlanState {
    pub const ALL: [PlanState; 8] = [
        PlanState::Planned,
        PlanState::Open,
        PlanState::Worked,
        PlanState::Absent,
        PlanState::CoveredByReplacement,
        PlanState::Covered,
        PlanState::PendingPayment,
        PlanState::Paid,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PlanState::Planned => "planned",
            PlanState::Open => "open",
            PlanState::Worked => "worked",
            PlanState::Absent => "absent",
            PlanState::CoveredByReplacement => "covered_by_replacement",
            PlanState::Covered => "covered",
            PlanState::PendingPayment => "pending_payment",
            PlanState::Paid => "paid",
        }
    }

    /// Initial state for a freshly generated entry
    pub fn initial(has_guard: bool) -> Self {
        if has_guard {
            PlanState::Planned
        } else {
            PlanState::Open
        }
    }

    /// Whether the transition `self -> to` appears in the transition table
    pub fn can_transition(self, to: PlanState) -> bool {
        use PlanState::*;
        matches!(
            (self, to),
            (Planned, Worked)
                | (Planned, Absent)
                | (Absent, CoveredByReplacement)
                | (Open, Covered)
                | (CoveredByReplacement, PendingPayment)
                | (Covered, PendingPayment)
                | (PendingPayment, Paid)
        )
    }

    /// States the sync engine may rewrite
    pub fn is_reconcilable(self) -> bool {
        matches!(self, PlanState::Planned | PlanState::Open)
    }

    /// States produced by an extra shift
    pub fn is_covered(self) -> bool {
        matches!(self, PlanState::CoveredByReplacement | PlanState::Covered)
    }

    pub fn is_terminal(self) -> bool {
        self == PlanState::Paid
    }

    /// Display hint derived from the state
    pub fn ui_state(self) -> UiState {
        match self {
            PlanState::Planned => UiState::Scheduled,
            PlanState::Open => UiState::Uncovered,
            PlanState::Worked => UiState::Present,
            PlanState::Absent => UiState::Absent,
            PlanState::CoveredByReplacement => UiState::Replaced,
            PlanState::Covered => UiState::Covered,
            PlanState::PendingPayment | PlanState::Paid => UiState::Settlement,
        }
    }
}

impl std::fmt::Display for PlanState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PlanState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PlanState::ALL
            .iter()
            .copied()
            .find(|state| state.as_str() == s.trim())
            .ok_or_else(|| format!("Unknown plan state: {}", s))
    }
}

/// Display hint shown by dispatch tooling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UiState {
    Scheduled,
    Uncovered,
    Present,
    Absent,
    Replaced,
    Covered,
    Settlement,
}

impl UiState {
    pub fn as_str(&self) -> &'static str {
        match self {
            UiState::Scheduled => "scheduled",
            UiState::Uncovered => "uncovered",
            UiState::Present => "present",
            UiState::Absent => "absent",
            UiState::Replaced => "replaced",
            UiState::Covered => "covered",
            UiState::Settlement => "settlement",
        }
    }
}

impl std::fmt::Display for UiState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Attendance outcome reported by the marking caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceOutcome {
    Worked,
    Absent,
}

impl AttendanceOutcome {
    pub fn target_state(self) -> PlanState {
        match self {
            AttendanceOutcome::Worked => PlanState::Worked,
            AttendanceOutcome::Absent => PlanState::Absent,
        }
    }
}

impl std::str::FromStr for AttendanceOutcome {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "worked" | "present" => Ok(AttendanceOutcome::Worked),
            "absent" => Ok(AttendanceOutcome::Absent),
            _ => Err(format!("Unknown attendance outcome: {}", s)),
        }
    }
}
