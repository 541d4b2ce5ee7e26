mod common;

use chrono::Duration;
use dispatch_core::{ErrorKind, MemoryBackend, UndoOutcome};
use dispatch_runtime::{IncidentId, StatusCode, UnitId};
use pretty_assertions::assert_eq;

#[tokio::test]
async fn registry_keeps_only_the_three_newest_commands() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    for line in ["OS E4", "BRK M12", "ETA M1 5", "OOS E4"] {
        desk.engine.submit_line(line).await.unwrap();
    }
    assert_eq!(
        desk.engine.undo_history(),
        vec!["E4 OOS", "ETA M1 5", "M12 BRK"]
    );

    for _ in 0..3 {
        assert!(matches!(
            desk.engine.undo().await,
            UndoOutcome::Undone { .. }
        ));
    }
    assert!(matches!(desk.engine.undo().await, UndoOutcome::Nothing));

    // The evicted first command stays applied.
    assert_eq!(
        board.unit(&UnitId::new("E4")).unwrap().status,
        StatusCode::OnScene
    );
    assert_eq!(
        board.unit(&UnitId::new("M12")).unwrap().status,
        StatusCode::Available
    );
    assert_eq!(board.unit(&UnitId::new("M1")).unwrap().tags.eta_minutes, None);
}

#[tokio::test]
async fn expired_entry_is_dropped_without_sending() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock.clone(), "DISP1").await;

    desk.engine.submit_line("OS E4").await.unwrap();
    clock.advance(Duration::seconds(299));
    desk.engine.submit_line("BRK M12").await.unwrap();
    clock.advance(Duration::seconds(2));

    // OS E4 is now 301s old, BRK M12 only 2s.
    assert!(matches!(
        desk.engine.undo().await,
        UndoOutcome::Undone { .. }
    ));
    let calls_before = board.call_log().len();
    match desk.engine.undo().await {
        UndoOutcome::Expired {
            description,
            age_secs,
        } => {
            assert_eq!(description, "E4 OS");
            assert_eq!(age_secs, 301);
        }
        other => panic!("expected expiry, got {other:?}"),
    }
    assert_eq!(board.call_log().len(), calls_before);
    assert_eq!(
        desk.reports.failures().last().unwrap().kind(),
        Some(ErrorKind::Expiry)
    );
    assert_eq!(
        board.unit(&UnitId::new("E4")).unwrap().status,
        StatusCode::OnScene
    );
}

#[tokio::test]
async fn undo_of_a_dispatch_restores_the_previous_assignment() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("ASSIGN 0023 M1").await.unwrap();
    desk.engine.submit_line("ASSIGN 0024 M1").await.unwrap();
    assert_eq!(
        board.assignments().primary(&UnitId::new("M1")),
        Some(&IncidentId::new("26-0024"))
    );

    desk.engine.submit_line("UNDO").await.unwrap();

    let assignments = board.assignments();
    assert_eq!(
        assignments.primary(&UnitId::new("M1")),
        Some(&IncidentId::new("26-0023"))
    );
    assert!(!assignments
        .stack(&UnitId::new("M1"))
        .unwrap()
        .contains(&IncidentId::new("26-0024")));
}

#[tokio::test]
async fn transport_failure_during_undo_is_reported_apart_from_expiry() {
    let clock = common::clock();
    let board = MemoryBackend::demo(clock.clone());
    let mut desk = common::desk(&board, clock, "DISP1").await;

    desk.engine.submit_line("BRK M12").await.unwrap();
    board.fail_next(1);

    assert!(matches!(
        desk.engine.undo().await,
        UndoOutcome::Failed(_)
    ));
    let kinds: Vec<_> = desk
        .reports
        .failures()
        .iter()
        .filter_map(|report| report.kind())
        .collect();
    assert_eq!(kinds, vec![ErrorKind::UndoFailed]);
    assert_eq!(
        board.unit(&UnitId::new("M12")).unwrap().status,
        StatusCode::Break
    );
}
