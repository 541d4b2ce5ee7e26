mod common;

use dispatch_core::{ErrorKind, MemoryBackend};
use dispatch_runtime::{IncidentId, StatusCode, UnitId};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn dispatch_resolves_bare_incident_number_and_copies_destination() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("D M1 0023").await.unwrap();

    let m1 = board.unit(&UnitId::new("M1")).unwrap();
    assert_eq!(m1.status, StatusCode::Dispatched);
    assert_eq!(m1.incident, Some(IncidentId::new("26-0023")));
    assert_eq!(m1.destination.as_deref(), Some("SCMC"));
    assert_eq!(m1.updated_by, "DISP1");
    insta::assert_snapshot!(desk.last_report(), @"OK: M1 D 26-0023 -> SCMC");

    let cached = desk
        .engine
        .with_cache(|cache| cache.unit(&UnitId::new("M1")).cloned())
        .unwrap();
    assert_eq!(cached.status, StatusCode::Dispatched);
}

#[tokio::test]
async fn status_and_unit_order_are_interchangeable() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("OS E4").await.unwrap();
    let first = board.unit(&UnitId::new("E4")).unwrap();
    desk.engine.submit_line("AV E4").await.unwrap();
    desk.engine.submit_line("E4 OS").await.unwrap();
    let second = board.unit(&UnitId::new("E4")).unwrap();

    assert_eq!(first.status, StatusCode::OnScene);
    assert_eq!(second.status, first.status);
    assert_eq!(second.incident, first.incident);
    assert!(second.revision > first.revision);
}

#[tokio::test]
async fn invalid_chain_sends_nothing() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;
    let calls_before = board.call_log().len();

    let err = desk
        .engine
        .submit_line("OS E4 | OS ZZ99")
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(board.call_log().len(), calls_before);
    assert_eq!(
        board.unit(&UnitId::new("E4")).unwrap().status,
        StatusCode::Available
    );
    assert!(desk.engine.undo_history().is_empty());
    assert_eq!(desk.reports.failures().len(), 1);
}

#[tokio::test]
async fn chained_commands_run_in_order() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    let submission = desk
        .engine
        .submit_line("D M1 0023 | ETA M1 7 | OK M12")
        .await
        .unwrap();

    assert_eq!(submission.dispatched.len(), 3);
    assert_eq!(board.unit(&UnitId::new("M1")).unwrap().tags.eta_minutes, Some(7));
    // OK has nothing to reverse.
    assert_eq!(desk.engine.undo_history(), vec!["ETA M1 7", "M1 D 26-0023 -> SCMC"]);
}

#[tokio::test]
async fn clearing_the_primary_promotes_the_next_queued_incident() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine
        .submit_line("QUEUE 0023 E4 | QUEUE 0024 E4")
        .await
        .unwrap();
    let submission = desk.engine.submit_line("CLEAR 0023 E4").await.unwrap();

    assert_eq!(
        submission.dispatched[0].promoted,
        Some(IncidentId::new("26-0024"))
    );
    assert!(desk.last_report().ends_with("(promoted 26-0024)"));
    assert_eq!(
        board.assignments().primary(&UnitId::new("E4")),
        Some(&IncidentId::new("26-0024"))
    );
    let cached_primary = desk
        .engine
        .with_cache(|cache| cache.board().primary(&UnitId::new("E4")).cloned());
    assert_eq!(cached_primary, Some(IncidentId::new("26-0024")));
}

#[tokio::test]
async fn unit_aliases_resolve_before_dispatch() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("OS MEDIC 12").await.unwrap();

    assert_eq!(
        board.unit(&UnitId::new("M12")).unwrap().status,
        StatusCode::OnScene
    );
}

#[tokio::test]
async fn option_words_inside_a_destination_are_kept() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("T M1 URGENT CARE").await.unwrap();

    let m1 = board.unit(&UnitId::new("M1")).unwrap();
    assert_eq!(m1.status, StatusCode::Transporting);
    assert_eq!(m1.destination.as_deref(), Some("URGENT CARE"));
}

#[tokio::test]
async fn trailing_urgent_on_a_status_change_is_refused() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;
    let calls_before = board.call_log().len();

    let err = desk.engine.submit_line("T M1 SCMC URGENT").await.unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(board.call_log().len(), calls_before);
    assert_eq!(
        board.unit(&UnitId::new("M1")).unwrap().status,
        StatusCode::Available
    );
}
