//! Facade tying the interpreter, dispatcher, reconciler, and undo registry
//! to one operator session.

use std::sync::Arc;

use chrono::Datelike;
use dispatch_runtime::{
    parse_line, ControlCommand, DirectAction, Grammar, Mutation, MutationRequest, ParseContext,
    ParsedCommand, UnitId,
};

use crate::backend::RemoteBackend;
use crate::cache::{SharedState, StateCache, SyncedState};
use crate::clock::Clock;
use crate::concurrency::ConflictDecision;
use crate::config::DispatchConfig;
use crate::context::SessionContext;
use crate::dispatcher::{Dispatched, Dispatcher, Plan};
use crate::error::DispatchError;
use crate::local_store::LocalStore;
use crate::metrics::{SyncMetrics, SyncMetricsSnapshot};
use crate::reconciler::{Focus, Liveness, ReconcileOutcome, Reconciler};
use crate::report::{Report, ReportSink};
use crate::undo::{UndoEntry, UndoPop, UndoRegistry};

#[derive(Debug)]
pub enum UndoOutcome {
    Nothing,
    /// The newest entry had aged out and was discarded unexecuted.
    Expired { description: String, age_secs: i64 },
    Undone { description: String },
    Failed(DispatchError),
}

/// Everything one submitted line did, in order.
#[derive(Debug, Default)]
pub struct Submission {
    pub dispatched: Vec<Dispatched>,
    /// Non-mutating commands for the caller to handle.
    pub direct: Vec<DirectAction>,
    pub undo: Option<UndoOutcome>,
    pub refresh: Option<ReconcileOutcome>,
}

pub struct DispatchEngine {
    grammar: Grammar,
    session: SessionContext,
    clock: Arc<dyn Clock>,
    state: SharedState,
    dispatcher: Dispatcher,
    reconciler: Arc<Reconciler>,
    history: UndoRegistry,
    store: LocalStore,
    reports: Arc<dyn ReportSink>,
    metrics: Arc<SyncMetrics>,
}

impl DispatchEngine {
    pub fn new(
        config: &DispatchConfig,
        backend: Arc<dyn RemoteBackend>,
        session: SessionContext,
        clock: Arc<dyn Clock>,
        store: LocalStore,
        reports: Arc<dyn ReportSink>,
    ) -> Self {
        let state = SyncedState::shared();
        let metrics = Arc::new(SyncMetrics::default());
        let dispatcher = Dispatcher::new(Arc::clone(&backend), Arc::clone(&state), Arc::clone(&metrics))
            .with_legacy_tags(config.notes().legacy_tags());
        let reconciler = Reconciler::new(
            backend,
            Arc::clone(&state),
            Arc::clone(&metrics),
            Arc::clone(&reports),
            session.token.clone(),
        )
        .with_schedule(config.poll().schedule())
        .with_thresholds(config.liveness().thresholds());

        let mut session = session;
        if session.preferences == Default::default() {
            session.preferences = store.profile(&session.operator).preferences;
        }

        Self {
            grammar: config.commands().grammar(),
            session,
            clock,
            state,
            dispatcher,
            reconciler: Arc::new(reconciler),
            history: config.undo().registry(),
            store,
            reports,
            metrics,
        }
    }

    /// Interpret and run one line of operator input.
    ///
    /// The whole chain is parsed and validated before anything is sent; a
    /// failure at that stage sends nothing. Once dispatch starts, commands
    /// run in order and the first failure stops the rest.
    pub async fn submit_line(&mut self, line: &str) -> Result<Submission, DispatchError> {
        let commands = {
            let known = self.state.lock().cache.known_incidents();
            let context = ParseContext {
                grammar: &self.grammar,
                known_incidents: &known,
                year: self.clock.now().year(),
                selected_unit: self.session.selected_unit.as_ref(),
            };
            parse_line(line, &context).map_err(|err| self.fail(err.into()))?
        };

        let requests: Vec<MutationRequest> = commands
            .iter()
            .filter_map(|command| match command {
                ParsedCommand::Mutate(request) => Some(request.clone()),
                _ => None,
            })
            .collect();
        let plans = self
            .dispatcher
            .plan_chain(&requests, &self.session)
            .map_err(|err| self.fail(err.into()))?;
        let mut plans = plans.into_iter().zip(requests);

        let mut submission = Submission::default();
        for command in commands {
            match command {
                ParsedCommand::Mutate(_) => {
                    let Some((plan, request)) = plans.next() else {
                        continue;
                    };
                    let dispatched = self.run_plan(plan).await?;
                    if let Mutation::NewIncident { scene_address, .. } = &request.mutation {
                        self.remember_address(scene_address);
                    }
                    submission.dispatched.push(dispatched);
                }
                ParsedCommand::Direct(action) => submission.direct.push(action),
                ParsedCommand::Control(ControlCommand::Undo) => {
                    submission.undo = Some(self.undo().await);
                }
                ParsedCommand::Control(ControlCommand::Refresh) => {
                    self.reconciler.request_full_refresh();
                    submission.refresh = Some(self.reconciler.reconcile().await);
                }
            }
        }
        Ok(submission)
    }

    async fn run_plan(&mut self, plan: Plan) -> Result<Dispatched, DispatchError> {
        let dispatched = self
            .dispatcher
            .execute(&plan, &self.session.token)
            .await
            .map_err(|err| self.fail(err))?;
        if plan.is_reversible() {
            let entry = UndoEntry::new(plan.description.clone(), plan.inverse, self.clock.now());
            self.history.push(entry);
        }
        self.reports.report(Report::success(success_message(&dispatched)));
        Ok(dispatched)
    }

    /// Reverse the most recent command, if it is still fresh.
    pub async fn undo(&mut self) -> UndoOutcome {
        match self.history.pop(self.clock.now()) {
            UndoPop::Empty => {
                self.reports.report(Report::info("nothing to undo"));
                UndoOutcome::Nothing
            }
            UndoPop::Expired(entry) => {
                let age_secs = entry.age(self.clock.now()).num_seconds();
                self.fail(DispatchError::UndoExpired {
                    description: entry.description.clone(),
                    age_secs,
                });
                UndoOutcome::Expired {
                    description: entry.description,
                    age_secs,
                }
            }
            UndoPop::Ready(entry) => {
                let plan = Plan {
                    description: format!("undo {}", entry.description),
                    steps: entry.inverse,
                    inverse: Vec::new(),
                };
                match self.dispatcher.execute(&plan, &self.session.token).await {
                    Ok(_) => {
                        tracing::info!(
                            target: "dispatch::engine",
                            description = %entry.description,
                            "undo.applied"
                        );
                        self.reports
                            .report(Report::success(format!("undone: {}", entry.description)));
                        UndoOutcome::Undone {
                            description: entry.description,
                        }
                    }
                    Err(source) => UndoOutcome::Failed(self.fail(DispatchError::UndoFailed {
                        description: entry.description,
                        source: Box::new(source),
                    })),
                }
            }
        }
    }

    /// Settle the parked conflict on `unit_id`.
    pub async fn resolve_conflict(
        &mut self,
        unit_id: &UnitId,
        decision: ConflictDecision,
    ) -> Result<Option<Dispatched>, DispatchError> {
        let parked = self
            .dispatcher
            .resolve_conflict(unit_id, decision)
            .map_err(|err| self.fail(err.into()))?;
        match parked {
            Some(plan) => self.run_plan(plan).await.map(Some),
            None => {
                self.reports
                    .report(Report::info(format!("abandoned pending change on {unit_id}")));
                Ok(None)
            }
        }
    }

    pub async fn reconcile(&self) -> ReconcileOutcome {
        self.reconciler.reconcile().await
    }

    pub fn set_focus(&self, focus: Focus) {
        self.reconciler.set_focus(focus);
    }

    pub fn reconciler(&self) -> Arc<Reconciler> {
        Arc::clone(&self.reconciler)
    }

    pub fn liveness(&self) -> Liveness {
        self.reconciler.liveness()
    }

    pub fn metrics(&self) -> SyncMetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn select_unit(&mut self, unit: Option<UnitId>) {
        self.session.select_unit(unit);
    }

    pub fn grammar(&self) -> &Grammar {
        &self.grammar
    }

    /// Read the cached board.
    pub fn with_cache<R>(&self, read: impl FnOnce(&StateCache) -> R) -> R {
        read(&self.state.lock().cache)
    }

    pub fn pending_conflicts(&self) -> Vec<UnitId> {
        self.state.lock().guard.pending_units()
    }

    /// Undo descriptions, newest first.
    pub fn undo_history(&self) -> Vec<String> {
        self.history.descriptions().map(str::to_string).collect()
    }

    pub fn store(&self) -> &LocalStore {
        &self.store
    }

    pub fn save_store(&mut self) {
        self.store
            .set_preferences(&self.session.operator, self.session.preferences.clone());
        if let Err(err) = self.store.save() {
            tracing::warn!(target: "dispatch::engine", error = %err, "local_store.save_failed");
        }
    }

    fn remember_address(&mut self, address: &str) {
        self.store.record_address(&self.session.operator, address);
        if let Err(err) = self.store.save() {
            tracing::warn!(target: "dispatch::engine", error = %err, "local_store.save_failed");
        }
    }

    fn fail(&self, err: DispatchError) -> DispatchError {
        self.reports.report(Report::failure(&err));
        err
    }
}

fn success_message(dispatched: &Dispatched) -> String {
    let mut message = dispatched.description.clone();
    if let Some(created) = &dispatched.created {
        message.push_str(&format!(" (created {created})"));
    }
    if let Some(promoted) = &dispatched.promoted {
        message.push_str(&format!(" (promoted {promoted})"));
    }
    message
}
