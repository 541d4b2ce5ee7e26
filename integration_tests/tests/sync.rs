mod common;

use dispatch_core::{
    ChangeDetector, Focus, MemoryBackend, ReconcileOutcome, Section, StateCache, SyncEvent,
};
use dispatch_runtime::{IncidentId, Priority, StatusCode, UnitId};
use pretty_assertions::assert_eq;

#[test]
fn reapplying_a_delta_is_idempotent() {
    let full = common::fixture_payload("full_snapshot.json");
    let delta = common::fixture_payload("delta_snapshot.json");
    let mut cache = StateCache::new();
    let mut detector = ChangeDetector::new();

    assert!(cache.apply(full).full);
    assert!(detector.detect(&cache).any());

    let summary = cache.apply(delta.clone());
    assert!(!summary.full);
    assert_eq!(summary.units_replaced, 1);
    let changes = detector.detect(&cache);
    assert_eq!(
        changes.changed_sections(),
        vec![Section::Units, Section::Incidents, Section::Banners]
    );

    let after_once = cache.clone();
    cache.apply(delta);
    assert_eq!(cache, after_once);
    assert!(!detector.detect(&cache).any());

    // The delta only touched E4; M1 survives from the full snapshot.
    assert_eq!(
        cache.unit(&UnitId::new("M1")).unwrap().status,
        StatusCode::Dispatched
    );
    assert_eq!(
        cache.unit(&UnitId::new("E4")).unwrap().status,
        StatusCode::OnScene
    );
    assert_eq!(
        cache.max_revision().unwrap().as_str(),
        "2026-03-01T08:04:40.000Z"
    );
    assert_eq!(
        cache.aggregate_priority(&UnitId::new("E4")),
        Some(Priority(1))
    );
}

#[tokio::test]
async fn quiet_board_reports_no_changes() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let desk = common::desk(&board, clock, "DISP1").await;

    match desk.engine.reconcile().await {
        ReconcileOutcome::Applied {
            summary, changes, ..
        } => {
            assert!(!summary.full);
            assert_eq!(summary.units_replaced, 0);
            assert!(!changes.any());
        }
        other => panic!("expected an applied delta, got {other:?}"),
    }
}

#[tokio::test]
async fn another_desks_write_arrives_as_a_delta() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut writer = common::desk(&board, clock.clone(), "DISP2").await;
    let reader = common::desk(&board, clock, "DISP1").await;
    let mut events = reader.engine.reconciler().subscribe();

    writer.engine.submit_line("D E4 0024").await.unwrap();

    match reader.engine.reconcile().await {
        ReconcileOutcome::Applied {
            summary, changes, ..
        } => {
            assert_eq!(summary.units_replaced, 1);
            assert!(changes.units);
        }
        other => panic!("expected an applied delta, got {other:?}"),
    }
    match events.try_recv() {
        Ok(SyncEvent::Changed(changes)) => assert!(changes.units),
        other => panic!("expected a change event, got {other:?}"),
    }
    let e4 = reader
        .engine
        .with_cache(|cache| cache.unit(&UnitId::new("E4")).cloned())
        .unwrap();
    assert_eq!(e4.incident, Some(IncidentId::new("26-0024")));
    assert_eq!(e4.updated_by, "DISP2");
}

#[tokio::test]
async fn own_writes_do_not_hide_other_desks_changes() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut first = common::desk(&board, clock.clone(), "DISP1").await;
    let mut second = common::desk(&board, clock, "DISP2").await;

    second.engine.submit_line("OOS M12").await.unwrap();
    // DISP1's own write gets a newer marker than DISP2's change.
    first.engine.submit_line("OS E4").await.unwrap();
    first.engine.reconcile().await;

    let m12 = first
        .engine
        .with_cache(|cache| cache.unit(&UnitId::new("M12")).map(|unit| unit.status.clone()));
    assert_eq!(m12, Some(StatusCode::OutOfService));
}

#[tokio::test]
async fn background_changes_are_held_until_focus_returns() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut writer = common::desk(&board, clock.clone(), "DISP2").await;
    let reader = common::desk(&board, clock, "DISP1").await;
    let mut events = reader.engine.reconciler().subscribe();

    reader.engine.set_focus(Focus::Background);
    writer.engine.submit_line("BRK M1").await.unwrap();
    match reader.engine.reconcile().await {
        ReconcileOutcome::Applied { deferred, .. } => assert!(deferred),
        other => panic!("expected a deferred delta, got {other:?}"),
    }
    assert!(events.try_recv().is_err());

    reader.engine.set_focus(Focus::Foreground);
    match events.try_recv() {
        Ok(SyncEvent::Changed(changes)) => assert!(changes.units),
        other => panic!("expected the held changes, got {other:?}"),
    }
}

#[tokio::test]
async fn refresh_in_a_chain_runs_a_cycle() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    let submission = desk.engine.submit_line("OS E4 | REFRESH").await.unwrap();

    assert_eq!(submission.dispatched.len(), 1);
    assert!(matches!(
        submission.refresh,
        Some(ReconcileOutcome::Applied { .. })
    ));
}
