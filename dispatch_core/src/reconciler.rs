//! Poll-driven reconciliation of the cached board.
//!
//! Each cycle asks for a full snapshot when there is no baseline (or one was
//! requested) and a delta since the cached maximum marker otherwise. Only one
//! cycle runs at a time; a trigger that arrives while one is in flight is
//! dropped. Responses carry the sequence number of the request that produced
//! them and anything older than the last applied response is discarded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dispatch_runtime::{ResultEnvelope, RevisionMarker, RpcCall, StatePayload};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};

use crate::backend::{RemoteBackend, TransportError};
use crate::cache::{MergeSummary, SharedState};
use crate::error::DispatchError;
use crate::fingerprint::{ChangeDetector, SectionChanges};
use crate::metrics::SyncMetrics;
use crate::report::{Report, ReportSink};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Focus {
    Foreground,
    Background,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Live,
    /// Recent cycles failed; the board may be behind.
    Stale,
    Offline,
}

/// Consecutive failed cycles at which liveness degrades.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LivenessThresholds {
    pub stale: u32,
    pub offline: u32,
}

impl Default for LivenessThresholds {
    fn default() -> Self {
        Self {
            stale: 1,
            offline: 3,
        }
    }
}

impl LivenessThresholds {
    pub fn classify(&self, failures: u32) -> Liveness {
        if failures >= self.offline {
            Liveness::Offline
        } else if failures >= self.stale {
            Liveness::Stale
        } else {
            Liveness::Live
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSchedule {
    pub foreground: Duration,
    pub background: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            foreground: Duration::from_secs(4),
            background: Duration::from_secs(30),
        }
    }
}

impl PollSchedule {
    pub fn interval(&self, focus: Focus) -> Duration {
        match focus {
            Focus::Foreground => self.foreground,
            Focus::Background => self.background,
        }
    }
}

/// Broadcast to anything rendering the board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    Changed(SectionChanges),
    Liveness(Liveness),
}

/// Identifies one `getState` request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestTicket {
    pub sequence: u64,
    /// `None` asks for a full snapshot.
    pub since: Option<RevisionMarker>,
}

impl RequestTicket {
    pub fn is_full(&self) -> bool {
        self.since.is_none()
    }
}

#[derive(Debug)]
pub enum ReconcileOutcome {
    Applied {
        summary: MergeSummary,
        changes: SectionChanges,
        /// Changes were held back because the view is in the background.
        deferred: bool,
    },
    /// Another cycle was already running.
    Skipped,
    /// A newer response had already been applied.
    StaleDiscarded { sequence: u64 },
    Failed(DispatchError),
}

#[derive(Debug)]
struct ReconcileInner {
    focus: Focus,
    full_refresh: bool,
    last_applied: u64,
    failures: u32,
    liveness: Liveness,
    detector: ChangeDetector,
    pending: SectionChanges,
}

/// Clears the in-flight flag when a cycle ends, however it ends.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Reconciler {
    backend: Arc<dyn RemoteBackend>,
    state: SharedState,
    metrics: Arc<SyncMetrics>,
    reports: Arc<dyn ReportSink>,
    token: String,
    schedule: PollSchedule,
    thresholds: LivenessThresholds,
    in_flight: AtomicBool,
    next_sequence: AtomicU64,
    inner: Mutex<ReconcileInner>,
    events: broadcast::Sender<SyncEvent>,
}

impl Reconciler {
    pub fn new(
        backend: Arc<dyn RemoteBackend>,
        state: SharedState,
        metrics: Arc<SyncMetrics>,
        reports: Arc<dyn ReportSink>,
        token: impl Into<String>,
    ) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            backend,
            state,
            metrics,
            reports,
            token: token.into(),
            schedule: PollSchedule::default(),
            thresholds: LivenessThresholds::default(),
            in_flight: AtomicBool::new(false),
            next_sequence: AtomicU64::new(0),
            inner: Mutex::new(ReconcileInner {
                focus: Focus::Foreground,
                full_refresh: false,
                last_applied: 0,
                failures: 0,
                liveness: Liveness::Live,
                detector: ChangeDetector::new(),
                pending: SectionChanges::default(),
            }),
            events,
        }
    }

    pub fn with_schedule(mut self, schedule: PollSchedule) -> Self {
        self.schedule = schedule;
        self
    }

    pub fn with_thresholds(mut self, thresholds: LivenessThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    pub fn focus(&self) -> Focus {
        self.inner.lock().focus
    }

    pub fn liveness(&self) -> Liveness {
        self.inner.lock().liveness
    }

    pub fn interval(&self) -> Duration {
        self.schedule.interval(self.focus())
    }

    pub fn last_applied_sequence(&self) -> u64 {
        self.inner.lock().last_applied
    }

    pub fn is_in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Ask for a full snapshot on the next cycle.
    pub fn request_full_refresh(&self) {
        self.inner.lock().full_refresh = true;
    }

    /// Switch focus. Returning to the foreground flushes changes held back
    /// while in the background.
    pub fn set_focus(&self, focus: Focus) -> Option<SectionChanges> {
        let flushed = {
            let mut inner = self.inner.lock();
            inner.focus = focus;
            if focus == Focus::Foreground && inner.pending.any() {
                Some(std::mem::take(&mut inner.pending))
            } else {
                None
            }
        };
        tracing::debug!(target: "dispatch::reconcile", focus = ?focus, "reconcile.focus");
        if let Some(changes) = flushed {
            let _ = self.events.send(SyncEvent::Changed(changes));
        }
        flushed
    }

    /// Run one cycle unless one is already in flight.
    pub async fn reconcile(&self) -> ReconcileOutcome {
        if self
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.metrics.record_skipped();
            tracing::debug!(target: "dispatch::reconcile", "reconcile.skipped");
            return ReconcileOutcome::Skipped;
        }
        let _in_flight = InFlight(&self.in_flight);

        let ticket = self.begin_request();
        let call = RpcCall::GetState {
            since: ticket.since.clone(),
        };
        let result = self.backend.call(&self.token, &call).await;
        self.apply_response(&ticket, result)
    }

    /// Number the next request and decide between full and delta.
    pub fn begin_request(&self) -> RequestTicket {
        let sequence = self.next_sequence.fetch_add(1, Ordering::AcqRel) + 1;
        let full_refresh = self.inner.lock().full_refresh;
        let state = self.state.lock();
        let since = if full_refresh || !state.cache.has_baseline() {
            None
        } else {
            state.cache.max_revision().cloned()
        };
        RequestTicket { sequence, since }
    }

    /// Merge the response to `ticket` unless a newer one was applied first.
    pub fn apply_response(
        &self,
        ticket: &RequestTicket,
        result: Result<ResultEnvelope, TransportError>,
    ) -> ReconcileOutcome {
        let payload = match decode(result) {
            Ok(payload) => payload,
            Err(err) => return self.fail(err),
        };

        let mut inner = self.inner.lock();
        if ticket.sequence <= inner.last_applied {
            self.metrics.record_stale();
            tracing::debug!(
                target: "dispatch::reconcile",
                sequence = ticket.sequence,
                last_applied = inner.last_applied,
                "reconcile.stale_discarded"
            );
            return ReconcileOutcome::StaleDiscarded {
                sequence: ticket.sequence,
            };
        }

        let (summary, changes) = {
            let mut state = self.state.lock();
            let summary = state.apply(payload);
            (summary, inner.detector.detect(&state.cache))
        };
        inner.last_applied = ticket.sequence;
        if summary.full {
            inner.full_refresh = false;
        }
        inner.failures = 0;
        let recovered = inner.liveness != Liveness::Live;
        inner.liveness = Liveness::Live;
        self.metrics.record_cycle(summary.full);

        let deferred = inner.focus == Focus::Background;
        if deferred {
            inner.pending.merge(changes);
        }
        drop(inner);

        tracing::info!(
            target: "dispatch::reconcile",
            sequence = ticket.sequence,
            full = summary.full,
            units = summary.units_replaced,
            changed = ?changes.changed_sections(),
            deferred,
            "reconcile.applied"
        );
        if recovered {
            let _ = self.events.send(SyncEvent::Liveness(Liveness::Live));
        }
        if !deferred && changes.any() {
            let _ = self.events.send(SyncEvent::Changed(changes));
        }

        ReconcileOutcome::Applied {
            summary,
            changes,
            deferred,
        }
    }

    fn fail(&self, err: DispatchError) -> ReconcileOutcome {
        self.metrics.record_failure();
        let (failures, liveness, degraded) = {
            let mut inner = self.inner.lock();
            inner.failures = inner.failures.saturating_add(1);
            let liveness = self.thresholds.classify(inner.failures);
            let degraded = liveness != inner.liveness;
            inner.liveness = liveness;
            (inner.failures, liveness, degraded)
        };
        tracing::warn!(
            target: "dispatch::reconcile",
            failures,
            liveness = ?liveness,
            error = %err,
            "reconcile.failed"
        );
        self.reports.report(Report::failure(&err));
        if degraded {
            let _ = self.events.send(SyncEvent::Liveness(liveness));
        }
        ReconcileOutcome::Failed(err)
    }

    /// Poll until `triggers` closes. Every interval tick and every push
    /// trigger spawns a cycle; overlapping cycles are dropped by the
    /// in-flight flag.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<()>) {
        tracing::info!(target: "dispatch::reconcile", "reconcile.loop_started");
        self.spawn_cycle();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.interval()) => self.spawn_cycle(),
                trigger = triggers.recv() => match trigger {
                    Some(()) => self.spawn_cycle(),
                    None => break,
                },
            }
        }
        tracing::info!(target: "dispatch::reconcile", "reconcile.loop_stopped");
    }

    fn spawn_cycle(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.reconcile().await;
        });
    }
}

fn decode(
    result: Result<ResultEnvelope, TransportError>,
) -> Result<StatePayload, DispatchError> {
    let envelope = result?;
    if !envelope.ok {
        return Err(DispatchError::Rejected {
            verb: "getState",
            message: envelope.error.unwrap_or_default(),
        });
    }
    envelope
        .decode_body()
        .map_err(|err| TransportError::InvalidResponse(err.to_string()).into())
}
