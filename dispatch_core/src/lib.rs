//! Core of the dispatch board client.
//!
//! Commands typed by an operator are parsed by `dispatch_runtime`, planned and
//! validated by the [`Dispatcher`], and sent through a [`RemoteBackend`] with
//! the last observed revision marker for each unit. A [`Reconciler`] keeps
//! the [`StateCache`] current with full and delta snapshots, and a
//! [`ChangeDetector`] tells consumers which sections actually changed.
//! [`DispatchEngine`] ties these to one operator session.

pub mod assignments;
pub mod backend;
pub mod cache;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod fingerprint;
mod hashing;
pub mod local_store;
pub mod metrics;
pub mod notes;
pub mod reconciler;
pub mod report;
pub mod undo;

pub use assignments::{AssignmentBoard, StackError, StackOutcome, UnitStack};
pub use backend::{HttpBackend, MemoryBackend, RemoteBackend, TransportError};
pub use cache::{MergeSummary, SharedState, StateCache, SyncedState};
pub use clock::{Clock, FixedClock, SystemClock};
pub use concurrency::{ConcurrencyGuard, ConflictDecision, ConflictRecord, GuardError, PendingConflict};
pub use config::{
    load_dispatch_config, load_dispatch_config_from_env, BackendConfig, DispatchConfig,
    DispatchConfigError, BUILTIN_DISPATCH_CONFIG, DISPATCH_CONFIG_ENV,
};
pub use context::{Privileges, SessionContext, ViewPreferences};
pub use dispatcher::{Dispatched, Dispatcher, Plan, Step};
pub use engine::{DispatchEngine, Submission, UndoOutcome};
pub use error::{DispatchError, ErrorKind, ValidationError};
pub use fingerprint::{ChangeDetector, Fingerprints, Section, SectionChanges};
pub use local_store::{AddressHistory, LocalStore, LocalStoreError, OperatorProfile};
pub use metrics::{SyncMetrics, SyncMetricsSnapshot};
pub use reconciler::{
    Focus, Liveness, LivenessThresholds, PollSchedule, ReconcileOutcome, Reconciler,
    RequestTicket, SyncEvent,
};
pub use report::{MemoryReportSink, Report, ReportLevel, ReportSink, TracingReportSink};
pub use undo::{UndoEntry, UndoPop, UndoRegistry};
