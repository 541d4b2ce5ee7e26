#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Once};

use chrono::{TimeZone, Utc};
use dispatch_core::{
    DispatchConfig, DispatchEngine, FixedClock, LocalStore, MemoryBackend, MemoryReportSink,
    SessionContext,
};
use dispatch_runtime::StatePayload;

static INIT: Once = Once::new();

/// Route engine logs through the test writer; `RUST_LOG` picks the level.
pub fn ensure_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub fn fixture_payload(name: &str) -> StatePayload {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name);
    let contents = std::fs::read_to_string(&path)
        .unwrap_or_else(|err| panic!("missing fixture {}: {err}", path.display()));
    serde_json::from_str(&contents)
        .unwrap_or_else(|err| panic!("bad fixture {}: {err}", path.display()))
}

pub fn clock() -> Arc<FixedClock> {
    Arc::new(FixedClock::new(
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap(),
    ))
}

/// One operator's view of a shared board.
pub struct Desk {
    pub engine: DispatchEngine,
    pub backend: MemoryBackend,
    pub reports: MemoryReportSink,
}

impl Desk {
    pub fn last_report(&self) -> String {
        self.reports
            .reports()
            .last()
            .map(ToString::to_string)
            .unwrap_or_default()
    }
}

/// A desk on `board`, already holding a full snapshot.
pub async fn desk(board: &MemoryBackend, clock: Arc<FixedClock>, operator: &str) -> Desk {
    desk_with_session(board, clock, SessionContext::new("tok", operator)).await
}

pub async fn desk_with_session(
    board: &MemoryBackend,
    clock: Arc<FixedClock>,
    session: SessionContext,
) -> Desk {
    ensure_tracing();
    let backend = board.as_actor(session.operator.clone());
    let reports = MemoryReportSink::new();
    let engine = DispatchEngine::new(
        &DispatchConfig::builtin(),
        Arc::new(backend.clone()),
        session,
        clock,
        LocalStore::in_memory(50),
        Arc::new(reports.clone()),
    );
    engine.reconcile().await;
    Desk {
        engine,
        backend,
        reports,
    }
}
