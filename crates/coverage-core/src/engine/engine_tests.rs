//! Tests for engine operations
//!
//! These tests verify that:
//! - Coverage assignment drives the plan state machine and the ledger together
//! - Reconciliation only rewrites future planned/open entries and is idempotent
//! - Racing assignments on one coverage key leave exactly one live record
//! - The auditor repairs ghost assignments through reconciliation
//! - History and paid records stay immutable

use std::sync::{Arc, Barrier};
use std::thread;

use chrono::NaiveDate;

use crate::error::{CoverageError, ErrorKind};
use crate::plan::{AttendanceOutcome, PlanEntry, PlanState, UiState};
use crate::storage::{
    CorrectionKind, CorrectionLog, ExtraShiftStore, NewExtraShift, PlanEntryStore,
};
use crate::testing::{ctx, date, TestEngine, TENANT};

use super::{CoverageEngine, ReconcileRequest};

fn register(engine: &CoverageEngine, guard: Option<&str>) -> String {
    engine
        .register_post(&ctx(date(2025, 8, 1)), "hq", "night", guard)
        .unwrap()
        .id
}

/// Post with an August 2025 plan, caller pinned to 2025-08-01
fn post_with_plan(t: &TestEngine, guard: Option<&str>) -> String {
    let post_id = register(&t.engine, guard);
    t.engine
        .generate_monthly_plan(&ctx(date(2025, 8, 1)), &post_id, 2025, 8)
        .unwrap();
    post_id
}

fn entry_on(engine: &CoverageEngine, post_id: &str, d: NaiveDate) -> PlanEntry {
    PlanEntryStore::new(engine.db().conn())
        .find_by_key(post_id, d)
        .unwrap()
        .expect("entry exists")
}

fn live_records(engine: &CoverageEngine, post_id: &str, d: NaiveDate) -> usize {
    ExtraShiftStore::new(engine.db().conn())
        .list_active(post_id, d)
        .unwrap()
        .len()
}

#[test]
fn test_open_post_covered_by_extra_shift() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = post_with_plan(&t, None);
    let d = date(2025, 8, 5);
    assert_eq!(entry_on(&t.engine, &post_id, d).state, PlanState::Open);

    let record = t
        .engine
        .assign_coverage(&ctx(date(2025, 8, 1)), &post_id, d, "guard-x", None)
        .unwrap();

    assert_eq!(record.covering_guard_id, "guard-x");
    assert!(!record.paid);
    assert!(record.plan_entry_id.is_none());
    let entry = entry_on(&t.engine, &post_id, d);
    assert_eq!(entry.state, PlanState::Covered);
    assert_eq!(entry.ui_state, UiState::Covered);
    assert_eq!(
        entry.metadata.history.last().unwrap().extra_shift_id.as_deref(),
        Some(record.id.as_str())
    );
    assert_eq!(live_records(&t.engine, &post_id, d), 1);
}

#[test]
fn test_guard_removal_opens_future_entries_only() {
    let t = TestEngine::new();
    let post_id = register(&t.engine, Some("guard-g"));
    let today = ctx(date(2025, 8, 20));
    t.engine
        .generate_monthly_plan(&today, &post_id, 2025, 8)
        .unwrap();
    t.engine
        .generate_monthly_plan(&today, &post_id, 2025, 9)
        .unwrap();

    let outcome = t
        .engine
        .reconcile(&today, &post_id, None, date(2025, 9, 1))
        .unwrap();
    assert_eq!((outcome.updated, outcome.created, outcome.removed), (0, 0, 30));

    for entry in t.engine.get_monthly_plan(&today, &post_id, 2025, 9).unwrap() {
        assert_eq!(entry.state, PlanState::Open);
        assert!(entry.guard_id.is_none());
    }
    for entry in t.engine.get_monthly_plan(&today, &post_id, 2025, 8).unwrap() {
        assert_eq!(entry.state, PlanState::Planned);
        assert_eq!(entry.guard_id.as_deref(), Some("guard-g"));
    }

    let post = t.engine.get_post(&today, &post_id).unwrap();
    assert!(post.assigned_guard_id.is_none());
    assert!(post.is_pending_coverage);
    assert!(post.satisfies_invariant());
}

#[test]
fn test_reconcile_twice_reports_nothing() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));

    let first = t.engine.reconcile(&c, &post_id, None, date(2025, 8, 10)).unwrap();
    assert_eq!(first.removed, 22);
    let version = t.engine.get_post(&c, &post_id).unwrap().version;

    let second = t.engine.reconcile(&c, &post_id, None, date(2025, 8, 10)).unwrap();
    assert!(second.is_noop());
    assert_eq!(t.engine.get_post(&c, &post_id).unwrap().version, version);
}

#[test]
fn test_reconcile_assigns_guard_to_pending_post() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));

    let outcome = t
        .engine
        .reconcile(&c, &post_id, Some("guard-n"), date(2025, 8, 15))
        .unwrap();
    assert_eq!((outcome.updated, outcome.created, outcome.removed), (17, 0, 0));

    let post = t.engine.get_post(&c, &post_id).unwrap();
    assert_eq!(post.assigned_guard_id.as_deref(), Some("guard-n"));
    assert!(!post.is_pending_coverage);

    let before = entry_on(&t.engine, &post_id, date(2025, 8, 14));
    assert_eq!(before.state, PlanState::Open);
    let after = entry_on(&t.engine, &post_id, date(2025, 8, 15));
    assert_eq!(after.state, PlanState::Planned);
    assert_eq!(after.guard_id.as_deref(), Some("guard-n"));
}

#[test]
fn test_reconcile_skips_settled_states_and_fills_gaps() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));

    let worked = entry_on(&t.engine, &post_id, date(2025, 8, 3));
    t.engine
        .mark_attendance(&c, &worked.id, AttendanceOutcome::Worked, None)
        .unwrap();
    t.engine
        .db()
        .conn()
        .execute(
            "DELETE FROM plan_entries WHERE post_id = ?1 AND date = '2025-08-20'",
            [&post_id],
        )
        .unwrap();

    let outcome = t.engine.reconcile(&c, &post_id, None, date(2025, 8, 1)).unwrap();
    assert_eq!(outcome.removed, 29);
    assert_eq!(outcome.created, 1);

    let worked = entry_on(&t.engine, &post_id, date(2025, 8, 3));
    assert_eq!(worked.state, PlanState::Worked);
    assert_eq!(worked.guard_id.as_deref(), Some("guard-g"));
    let filled = entry_on(&t.engine, &post_id, date(2025, 8, 20));
    assert_eq!(filled.state, PlanState::Open);
}

#[test]
fn test_reconcile_never_rewrites_history() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 10));

    let outcome = t.engine.reconcile(&c, &post_id, None, date(2025, 8, 1)).unwrap();
    assert_eq!(outcome.removed, 22);

    let past = entry_on(&t.engine, &post_id, date(2025, 8, 5));
    assert_eq!(past.state, PlanState::Planned);
    assert_eq!(past.guard_id.as_deref(), Some("guard-g"));
}

#[test]
fn test_stale_version_is_rejected() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let stale = t.engine.get_post(&c, &post_id).unwrap().version;

    t.engine.reconcile(&c, &post_id, None, date(2025, 8, 10)).unwrap();

    let err = t
        .engine
        .reconcile_at_version(&c, &post_id, Some("guard-h"), date(2025, 8, 10), stale)
        .unwrap_err();
    assert!(matches!(err, CoverageError::ConcurrentModification { .. }));
    assert!(err.is_retryable());

    // Nothing from the rejected call was written
    let entry = entry_on(&t.engine, &post_id, date(2025, 8, 12));
    assert_eq!(entry.state, PlanState::Open);
}

#[test]
fn test_racing_assignments_leave_one_record() {
    let t = TestEngine::new();
    t.add_guards(&["guard-a", "guard-b"]);
    let post_id = post_with_plan(&t, None);
    let d = date(2025, 8, 5);

    let barrier = Arc::new(Barrier::new(2));
    let handles: Vec<_> = ["guard-a", "guard-b"]
        .into_iter()
        .map(|guard| {
            let engine = t.connect();
            let barrier = barrier.clone();
            let post_id = post_id.clone();
            thread::spawn(move || {
                barrier.wait();
                engine.assign_coverage(&ctx(date(2025, 8, 1)), &post_id, d, guard, None)
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let succeeded = results.iter().filter(|r| r.is_ok()).count();
    let duplicates = results
        .iter()
        .filter(|r| matches!(r, Err(CoverageError::DuplicateCoverage { .. })))
        .count();
    assert_eq!(succeeded, 1);
    assert_eq!(duplicates, 1);
    assert_eq!(live_records(&t.engine, &post_id, d), 1);
    assert_eq!(entry_on(&t.engine, &post_id, d).state, PlanState::Covered);
}

#[test]
fn test_second_assignment_is_duplicate() {
    let t = TestEngine::new();
    t.add_guards(&["guard-a", "guard-b"]);
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);

    t.engine.assign_coverage(&c, &post_id, d, "guard-a", None).unwrap();
    let err = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-b", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DuplicateCoverage);
    assert_eq!(live_records(&t.engine, &post_id, d), 1);
}

#[test]
fn test_audit_repairs_ghost_assignment() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, None);
    let d = date(2025, 8, 10);

    // Leftover from an assignment change that never propagated
    let mut ghost = entry_on(&t.engine, &post_id, d);
    ghost.guard_id = Some("guard-old".into());
    ghost.state = PlanState::Planned;
    PlanEntryStore::new(t.engine.db().conn()).update(&ghost).unwrap();

    let c = ctx(date(2025, 8, 1));
    let report = t.engine.run_consistency_audit(&c, d).unwrap();
    assert_eq!((report.flagged, report.repaired), (1, 1));
    assert!(report.failed.is_empty());
    assert_eq!(
        report.corrections[0].before.guard_id.as_deref(),
        Some("guard-old")
    );

    let post = t.engine.get_post(&c, &post_id).unwrap();
    let repaired = entry_on(&t.engine, &post_id, d);
    assert_eq!(repaired.guard_id, post.assigned_guard_id);
    assert_eq!(repaired.state, PlanState::Open);

    let log = CorrectionLog::new(t.engine.db().conn(), TENANT)
        .list_for_post(&post_id)
        .unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].kind, CorrectionKind::GhostAssignment);
    assert!(log[0].before.is_some() && log[0].after.is_some());

    let again = t.engine.run_consistency_audit(&c, d).unwrap();
    assert_eq!((again.flagged, again.repaired), (0, 0));
}

#[test]
fn test_audit_reports_post_invariant_violations() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    t.engine
        .db()
        .conn()
        .execute(
            "UPDATE posts SET is_pending_coverage = 1 WHERE id = ?1",
            [&post_id],
        )
        .unwrap();

    let report = t
        .engine
        .run_consistency_audit(&ctx(date(2025, 8, 1)), date(2025, 8, 10))
        .unwrap();
    assert_eq!(report.flagged, 0);
    assert_eq!(report.invariant_violations, vec![post_id]);
}

#[test]
fn test_absence_coverage_and_undo_round_trip() {
    let t = TestEngine::new();
    t.add_guards(&["guard-r"]);
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let entry = entry_on(&t.engine, &post_id, d);

    let absent = t
        .engine
        .mark_attendance(&c, &entry.id, AttendanceOutcome::Absent, Some("sick"))
        .unwrap();
    assert_eq!(absent.state, PlanState::Absent);
    assert_eq!(absent.metadata.history.last().unwrap().reason.as_deref(), Some("sick"));

    let record = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-r", Some(&entry.id))
        .unwrap();
    assert_eq!(record.plan_entry_id.as_deref(), Some(entry.id.as_str()));
    let covered = t.engine.get_plan_entry(&c, &entry.id).unwrap();
    assert_eq!(covered.state, PlanState::CoveredByReplacement);
    assert_eq!(covered.guard_id.as_deref(), Some("guard-g"));

    let undone = t.engine.undo_last_transition(&c, &entry.id).unwrap();
    assert_eq!(undone.state, PlanState::Absent);
    assert_eq!(undone.guard_id.as_deref(), Some("guard-g"));
    assert!(matches!(
        t.engine.get_extra_shift(&c, &record.id),
        Err(CoverageError::NotFound(_))
    ));
    assert_eq!(live_records(&t.engine, &post_id, d), 0);

    let planned = t.engine.undo_last_transition(&c, &entry.id).unwrap();
    assert_eq!(planned.state, PlanState::Planned);

    let err = t.engine.undo_last_transition(&c, &entry.id).unwrap_err();
    assert!(matches!(err, CoverageError::InvalidTransition(_)));
}

#[test]
fn test_absence_requires_reason() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let entry = entry_on(&t.engine, &post_id, date(2025, 8, 5));

    let err = t
        .engine
        .mark_attendance(&c, &entry.id, AttendanceOutcome::Absent, Some("  "))
        .unwrap_err();
    assert!(matches!(err, CoverageError::InvalidTransition(_)));
    assert_eq!(
        t.engine.get_plan_entry(&c, &entry.id).unwrap().state,
        PlanState::Planned
    );
}

#[test]
fn test_guard_cannot_replace_themselves() {
    let t = TestEngine::new();
    t.add_guards(&["guard-g"]);
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let entry = entry_on(&t.engine, &post_id, d);
    t.engine
        .mark_attendance(&c, &entry.id, AttendanceOutcome::Absent, Some("late"))
        .unwrap();

    let err = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-g", None)
        .unwrap_err();
    assert!(matches!(err, CoverageError::InvalidTransition(_)));
    assert_eq!(live_records(&t.engine, &post_id, d), 0);
}

#[test]
fn test_worked_entry_cannot_take_coverage() {
    let t = TestEngine::new();
    t.add_guards(&["guard-r"]);
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let entry = entry_on(&t.engine, &post_id, d);
    t.engine
        .mark_attendance(&c, &entry.id, AttendanceOutcome::Worked, None)
        .unwrap();

    let err = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-r", None)
        .unwrap_err();
    assert!(matches!(err, CoverageError::InvalidTransition(_)));
    assert_eq!(live_records(&t.engine, &post_id, d), 0);
    assert_eq!(entry_on(&t.engine, &post_id, d).state, PlanState::Worked);
}

#[test]
fn test_double_booking_is_rejected() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x", "guard-w"]);
    let first = post_with_plan(&t, None);
    let second = post_with_plan(&t, None);
    let staffed = post_with_plan(&t, Some("guard-w"));
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);

    t.engine.assign_coverage(&c, &first, d, "guard-x", None).unwrap();
    match t.engine.assign_coverage(&c, &second, d, "guard-x", None) {
        Err(CoverageError::DoubleBooking {
            conflicting_post_id,
            ..
        }) => assert_eq!(conflicting_post_id, first),
        other => panic!("expected double booking, got {:?}", other),
    }

    let entry = entry_on(&t.engine, &staffed, d);
    t.engine
        .mark_attendance(&c, &entry.id, AttendanceOutcome::Worked, None)
        .unwrap();
    let err = t
        .engine
        .assign_coverage(&c, &second, d, "guard-w", None)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::DoubleBooking);

    // Another day is free
    t.engine
        .assign_coverage(&c, &second, date(2025, 8, 6), "guard-x", None)
        .unwrap();
}

#[test]
fn test_unknown_or_inactive_guard_is_rejected() {
    let t = TestEngine::new();
    t.guards.insert(
        TENANT,
        crate::guards::Guard {
            id: "guard-gone".into(),
            name: "Gone".into(),
            active: false,
        },
    );
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);

    assert!(matches!(
        t.engine.assign_coverage(&c, &post_id, d, "guard-nobody", None),
        Err(CoverageError::NotFound(_))
    ));
    assert!(matches!(
        t.engine.assign_coverage(&c, &post_id, d, "guard-gone", None),
        Err(CoverageError::InvalidTransition(_))
    ));
}

#[test]
fn test_past_entries_are_immutable() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = post_with_plan(&t, Some("guard-g"));
    let later = ctx(date(2025, 8, 10));
    let d = date(2025, 8, 5);
    let entry = entry_on(&t.engine, &post_id, d);

    assert!(matches!(
        t.engine
            .mark_attendance(&later, &entry.id, AttendanceOutcome::Worked, None),
        Err(CoverageError::ImmutableRecord(_))
    ));
    assert!(matches!(
        t.engine.assign_coverage(&later, &post_id, d, "guard-x", None),
        Err(CoverageError::ImmutableRecord(_))
    ));
    assert_eq!(entry_on(&t.engine, &post_id, d).state, PlanState::Planned);
}

#[test]
fn test_payment_status_stays_administrable_on_history() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = post_with_plan(&t, None);
    let d = date(2025, 8, 5);
    t.engine
        .assign_coverage(&ctx(date(2025, 8, 1)), &post_id, d, "guard-x", None)
        .unwrap();
    let entry = entry_on(&t.engine, &post_id, d);

    let later = ctx(date(2025, 8, 10));
    let pending = t.engine.submit_for_payment(&later, &entry.id).unwrap();
    assert_eq!(pending.state, PlanState::PendingPayment);

    let reverted = t.engine.undo_last_transition(&later, &entry.id).unwrap();
    assert_eq!(reverted.state, PlanState::Covered);

    let err = t.engine.undo_last_transition(&later, &entry.id).unwrap_err();
    assert!(matches!(err, CoverageError::ImmutableRecord(_)));
    assert_eq!(live_records(&t.engine, &post_id, d), 1);
}

#[test]
fn test_mark_paid_settles_entry_and_blocks_undo() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let record = t.engine.assign_coverage(&c, &post_id, d, "guard-x", None).unwrap();

    let paid = t.engine.mark_paid(&c, &record.id).unwrap();
    assert!(paid.paid);
    assert!(paid.paid_at.is_some());

    let entry = entry_on(&t.engine, &post_id, d);
    assert_eq!(entry.state, PlanState::Paid);
    assert_eq!(entry.ui_state, UiState::Settlement);

    let again = t.engine.mark_paid(&c, &record.id).unwrap();
    assert_eq!(again.paid_at, paid.paid_at);

    let err = t.engine.undo_last_transition(&c, &entry.id).unwrap_err();
    assert!(matches!(err, CoverageError::ImmutableRecord(_)));
    let unchanged = entry_on(&t.engine, &post_id, d);
    assert_eq!(unchanged.state, PlanState::Paid);
    assert_eq!(unchanged.metadata.history.len(), entry.metadata.history.len());
}

#[test]
fn test_mark_paid_unknown_record_is_not_found() {
    let t = TestEngine::new();
    let err = t
        .engine
        .mark_paid(&ctx(date(2025, 8, 1)), "no-such-record")
        .unwrap_err();
    assert!(matches!(err, CoverageError::NotFound(_)));
}

fn legacy_duplicates(t: &TestEngine, post_id: &str, d: NaiveDate, guards: &[&str]) -> Vec<String> {
    let store = ExtraShiftStore::new(t.engine.db().conn());
    guards
        .iter()
        .map(|guard| {
            store
                .insert(&NewExtraShift {
                    plan_entry_id: None,
                    post_id: post_id.to_string(),
                    date: d,
                    covering_guard_id: guard.to_string(),
                    amount: None,
                })
                .unwrap()
                .id
        })
        .collect()
}

#[test]
fn test_deduplicate_keeps_newest_record() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let ids = legacy_duplicates(&t, &post_id, d, &["guard-a", "guard-b", "guard-c"]);

    assert_eq!(
        t.engine.find_duplicate_coverage_keys(&c).unwrap(),
        vec![(post_id.clone(), d)]
    );

    let outcome = t.engine.deduplicate_coverage(&c, &post_id, d).unwrap();
    assert_eq!(outcome.kept.as_deref(), Some(ids[2].as_str()));
    let mut removed = outcome.removed.clone();
    removed.sort();
    let mut expected = vec![ids[0].clone(), ids[1].clone()];
    expected.sort();
    assert_eq!(removed, expected);
    assert_eq!(live_records(&t.engine, &post_id, d), 1);

    let log = CorrectionLog::new(t.engine.db().conn(), TENANT)
        .list_for_post(&post_id)
        .unwrap();
    assert_eq!(log.len(), 2);
    assert!(log.iter().all(|c| c.kind == CorrectionKind::DuplicateCoverage));

    let again = t.engine.deduplicate_coverage(&c, &post_id, d).unwrap();
    assert!(again.removed.is_empty());
    assert!(t.engine.find_duplicate_coverage_keys(&c).unwrap().is_empty());
}

#[test]
fn test_deduplicate_prefers_paid_record() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let ids = legacy_duplicates(&t, &post_id, d, &["guard-a", "guard-b"]);
    ExtraShiftStore::new(t.engine.db().conn())
        .mark_paid(&ids[0])
        .unwrap();

    let outcome = t.engine.deduplicate_coverage(&c, &post_id, d).unwrap();
    assert_eq!(outcome.kept.as_deref(), Some(ids[0].as_str()));
    assert_eq!(outcome.removed, vec![ids[1].clone()]);
}

#[test]
fn test_batches_collect_failures() {
    let t = TestEngine::new();
    let first = post_with_plan(&t, Some("guard-g"));
    let second = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));

    let requests = vec![
        ReconcileRequest {
            post_id: first.clone(),
            guard_id: None,
            effective_date: date(2025, 8, 10),
        },
        ReconcileRequest {
            post_id: "missing".into(),
            guard_id: None,
            effective_date: date(2025, 8, 10),
        },
        ReconcileRequest {
            post_id: second.clone(),
            guard_id: Some("guard-n".into()),
            effective_date: date(2025, 8, 10),
        },
    ];
    let report = t.engine.reconcile_batch(&c, &requests);
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, "missing@2025-08-10");
    assert_eq!(report.failed[0].error_kind, ErrorKind::NotFound);

    legacy_duplicates(&t, &second, date(2025, 8, 20), &["guard-a", "guard-b"]);
    let keys = t.engine.find_duplicate_coverage_keys(&c).unwrap();
    let report = t.engine.deduplicate_batch(&c, &keys);
    assert!(report.is_clean());
    assert_eq!(report.succeeded, vec![format!("{}@2025-08-20", second)]);
}

#[test]
fn test_daily_view_shows_coverage() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let open = post_with_plan(&t, None);
    let staffed = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);
    let record = t.engine.assign_coverage(&c, &open, d, "guard-x", None).unwrap();

    let view = t.engine.get_daily_view(&c, d).unwrap();
    assert_eq!(view.len(), 2);

    let covered = view.iter().find(|a| a.post_id == open).unwrap();
    assert_eq!(covered.state, PlanState::Covered);
    assert_eq!(covered.covering_guard_id.as_deref(), Some("guard-x"));
    assert_eq!(covered.extra_shift_id.as_deref(), Some(record.id.as_str()));

    let planned = view.iter().find(|a| a.post_id == staffed).unwrap();
    assert_eq!(planned.ui_state, UiState::Scheduled);
    assert_eq!(planned.guard_id.as_deref(), Some("guard-g"));
    assert!(planned.covering_guard_id.is_none());
}

#[test]
fn test_generation_is_idempotent_and_tenant_scoped() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));

    let again = t.engine.generate_monthly_plan(&c, &post_id, 2025, 8).unwrap();
    assert_eq!((again.created, again.existing), (0, 31));
    assert_eq!(
        t.engine.get_monthly_plan(&c, &post_id, 2025, 8).unwrap().len(),
        31
    );

    let other = crate::context::CallContext::new("globex", "someone").with_today(date(2025, 8, 1));
    assert!(matches!(
        t.engine.get_monthly_plan(&other, &post_id, 2025, 8),
        Err(CoverageError::NotFound(_))
    ));
    assert!(matches!(
        t.engine.get_monthly_plan(&c, &post_id, 2025, 13),
        Err(CoverageError::InvalidInput(_))
    ));
}

#[test]
fn test_reconciled_entry_cannot_be_undone() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    t.engine.reconcile(&c, &post_id, None, date(2025, 8, 10)).unwrap();

    let entry = entry_on(&t.engine, &post_id, date(2025, 8, 12));
    let err = t.engine.undo_last_transition(&c, &entry.id).unwrap_err();
    assert!(matches!(err, CoverageError::InvalidTransition(_)));
}

#[test]
fn test_undo_takes_current_post_assignment() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, Some("guard-g"));
    let c = ctx(date(2025, 8, 1));
    let first = entry_on(&t.engine, &post_id, date(2025, 8, 10));
    let second = entry_on(&t.engine, &post_id, date(2025, 8, 11));
    for entry in [&first, &second] {
        t.engine
            .mark_attendance(&c, &entry.id, AttendanceOutcome::Absent, Some("sick"))
            .unwrap();
    }

    // Guard removed while the absences stand
    t.engine.reconcile(&c, &post_id, None, date(2025, 8, 5)).unwrap();
    let undone = t.engine.undo_last_transition(&c, &first.id).unwrap();
    assert_eq!(undone.state, PlanState::Open);
    assert!(undone.guard_id.is_none());

    let report = t.engine.run_consistency_audit(&c, date(2025, 8, 10)).unwrap();
    assert_eq!(report.flagged, 0);
    assert!(report.invariant_violations.is_empty());

    // New guard assigned before the second undo
    t.engine
        .reconcile(&c, &post_id, Some("guard-h"), date(2025, 8, 5))
        .unwrap();
    let undone = t.engine.undo_last_transition(&c, &second.id).unwrap();
    assert_eq!(undone.state, PlanState::Planned);
    assert_eq!(undone.guard_id.as_deref(), Some("guard-h"));
}

#[test]
fn test_generation_over_ledger_only_coverage_starts_covered() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = register(&t.engine, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 5);

    let record = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-x", None)
        .unwrap();
    assert!(record.plan_entry_id.is_none());

    let outcome = t.engine.generate_monthly_plan(&c, &post_id, 2025, 8).unwrap();
    assert_eq!(outcome.created, 31);

    let entry = entry_on(&t.engine, &post_id, d);
    assert_eq!(entry.state, PlanState::Covered);
    assert_eq!(entry.ui_state, UiState::Covered);
    assert_eq!(
        entry.metadata.history.last().unwrap().extra_shift_id.as_deref(),
        Some(record.id.as_str())
    );
    assert_eq!(entry_on(&t.engine, &post_id, date(2025, 8, 6)).state, PlanState::Open);

    t.engine.mark_paid(&c, &record.id).unwrap();
    assert_eq!(entry_on(&t.engine, &post_id, d).state, PlanState::Paid);
}

#[test]
fn test_gap_fill_over_paid_coverage_starts_paid() {
    let t = TestEngine::new();
    t.add_guards(&["guard-x"]);
    let post_id = post_with_plan(&t, None);
    let c = ctx(date(2025, 8, 1));
    let d = date(2025, 8, 20);
    t.engine
        .db()
        .conn()
        .execute(
            "DELETE FROM plan_entries WHERE post_id = ?1 AND date = '2025-08-20'",
            [&post_id],
        )
        .unwrap();

    let record = t
        .engine
        .assign_coverage(&c, &post_id, d, "guard-x", None)
        .unwrap();
    t.engine.mark_paid(&c, &record.id).unwrap();

    let outcome = t
        .engine
        .reconcile(&c, &post_id, Some("guard-n"), date(2025, 8, 1))
        .unwrap();
    assert_eq!((outcome.updated, outcome.created), (30, 1));

    let filled = entry_on(&t.engine, &post_id, d);
    assert_eq!(filled.state, PlanState::Paid);
    assert_eq!(filled.ui_state, UiState::Settlement);
    assert!(filled.guard_id.is_none());
}

#[test]
fn test_audit_keeps_repairs_when_correction_log_fails() {
    let t = TestEngine::new();
    let post_id = post_with_plan(&t, None);
    let d = date(2025, 8, 10);

    let mut ghost = entry_on(&t.engine, &post_id, d);
    ghost.guard_id = Some("guard-old".into());
    ghost.state = PlanState::Planned;
    PlanEntryStore::new(t.engine.db().conn()).update(&ghost).unwrap();
    t.engine
        .db()
        .conn()
        .execute("DROP TABLE coverage_corrections", [])
        .unwrap();

    let c = ctx(date(2025, 8, 1));
    let report = t.engine.run_consistency_audit(&c, d).unwrap();
    assert_eq!((report.flagged, report.repaired), (1, 0));
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].key, post_id);

    let repaired = entry_on(&t.engine, &post_id, d);
    assert!(repaired.guard_id.is_none());
    assert_eq!(repaired.state, PlanState::Open);
}
