//! Turns parsed mutations into guarded remote calls.
//!
//! A command is first planned: validated against the cached board and turned
//! into a list of [`Step`]s plus the steps that reverse it. Planning a chain
//! threads a projected board through every command so later commands see the
//! effect of earlier ones, and nothing is sent unless the whole chain plans.
//! Execution attaches the observed revision marker to each unit call.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;

use dispatch_runtime::{
    AssignmentOp, ConflictCurrent, IncidentId, IncidentRecord, Mutation, MutationRequest,
    NoteTags, Patch, ResultEnvelope, RevisionMarker, RpcCall, StatusChange, UnitId, UnitPatch,
    UnitRecord,
};
use serde_json::Value;

use crate::assignments::{AssignmentBoard, StackOutcome};
use crate::backend::{RemoteBackend, TransportError};
use crate::cache::{SharedState, StateCache, SyncedState};
use crate::concurrency::{ConflictDecision, ConflictRecord, GuardError};
use crate::context::SessionContext;
use crate::error::{DispatchError, ValidationError};
use crate::metrics::SyncMetrics;
use crate::notes::compose_legacy_note;

/// One remote call, before its revision marker is attached.
#[derive(Debug, Clone, PartialEq)]
pub enum Step {
    Upsert {
        unit_id: UnitId,
        patch: UnitPatch,
    },
    Logoff {
        unit_id: UnitId,
        /// Cite the wildcard marker instead of the observed one.
        bypass_guard: bool,
    },
    Touch {
        unit_id: UnitId,
    },
    Eta {
        unit_id: UnitId,
        minutes: u32,
    },
    Patient {
        unit_id: UnitId,
        text: String,
    },
    Assignment {
        op: AssignmentOp,
        incident_id: IncidentId,
        unit_id: UnitId,
    },
    /// A call that does not touch a unit record.
    Call(RpcCall),
}

impl Step {
    pub fn unit_id(&self) -> Option<&UnitId> {
        match self {
            Step::Upsert { unit_id, .. }
            | Step::Logoff { unit_id, .. }
            | Step::Touch { unit_id }
            | Step::Eta { unit_id, .. }
            | Step::Patient { unit_id, .. }
            | Step::Assignment { unit_id, .. } => Some(unit_id),
            Step::Call(_) => None,
        }
    }

    pub fn bypasses_guard(&self) -> bool {
        matches!(
            self,
            Step::Logoff {
                bypass_guard: true,
                ..
            }
        )
    }

    pub fn to_call(&self, expected: RevisionMarker) -> RpcCall {
        match self {
            Step::Upsert { unit_id, patch } => RpcCall::UpsertUnit {
                unit_id: unit_id.clone(),
                patch: patch.clone(),
                expected,
            },
            Step::Logoff { unit_id, .. } => RpcCall::LogoffUnit {
                unit_id: unit_id.clone(),
                expected,
            },
            Step::Touch { unit_id } => RpcCall::TouchUnit {
                unit_id: unit_id.clone(),
                expected,
            },
            Step::Eta { unit_id, minutes } => RpcCall::SetUnitEta {
                unit_id: unit_id.clone(),
                minutes: *minutes,
                expected,
            },
            Step::Patient { unit_id, text } => RpcCall::SetUnitPat {
                unit_id: unit_id.clone(),
                text: text.clone(),
                expected,
            },
            Step::Assignment {
                op,
                incident_id,
                unit_id,
            } => RpcCall::Assignment {
                op: *op,
                incident_id: incident_id.clone(),
                unit_id: unit_id.clone(),
                expected,
            },
            Step::Call(call) => call.clone(),
        }
    }
}

/// Validated calls for one command and the calls that reverse it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Plan {
    pub description: String,
    pub steps: Vec<Step>,
    /// Empty when the command has no undo.
    pub inverse: Vec<Step>,
}

impl Plan {
    pub fn is_reversible(&self) -> bool {
        !self.inverse.is_empty()
    }
}

/// What a successfully executed plan produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatched {
    pub description: String,
    pub calls: usize,
    /// Incident auto-promoted by a clear.
    pub promoted: Option<IncidentId>,
    /// Incident created by `NEW`.
    pub created: Option<IncidentId>,
}

/// The board as it will look once earlier commands in a chain have run.
struct Projection {
    units: HashMap<UnitId, UnitRecord>,
    board: AssignmentBoard,
}

impl Projection {
    fn new(cache: &StateCache) -> Self {
        Self {
            units: HashMap::new(),
            board: cache.board(),
        }
    }

    fn unit(&mut self, cache: &StateCache, unit_id: &UnitId) -> Result<&mut UnitRecord, ValidationError> {
        match self.units.entry(unit_id.clone()) {
            Entry::Occupied(entry) => Ok(entry.into_mut()),
            Entry::Vacant(entry) => {
                let record = cache
                    .unit(unit_id)
                    .ok_or_else(|| ValidationError::UnknownUnit(unit_id.clone()))?;
                Ok(entry.insert(record.clone()))
            }
        }
    }
}

pub struct Dispatcher {
    backend: Arc<dyn RemoteBackend>,
    state: SharedState,
    metrics: Arc<SyncMetrics>,
    legacy_tags: bool,
}

impl Dispatcher {
    pub fn new(backend: Arc<dyn RemoteBackend>, state: SharedState, metrics: Arc<SyncMetrics>) -> Self {
        Self {
            backend,
            state,
            metrics,
            legacy_tags: false,
        }
    }

    /// Send notes in the combined `text [TAG:value]` format.
    pub fn with_legacy_tags(mut self, enabled: bool) -> Self {
        self.legacy_tags = enabled;
        self
    }

    pub fn plan(&self, request: &MutationRequest, session: &SessionContext) -> Result<Plan, ValidationError> {
        let state = self.state.lock();
        let mut projection = Projection::new(&state.cache);
        self.plan_one(request, session, &state, &mut projection)
    }

    /// Plan every request of a chain, failing if any one of them fails.
    pub fn plan_chain(
        &self,
        requests: &[MutationRequest],
        session: &SessionContext,
    ) -> Result<Vec<Plan>, ValidationError> {
        let state = self.state.lock();
        let mut projection = Projection::new(&state.cache);
        requests
            .iter()
            .map(|request| self.plan_one(request, session, &state, &mut projection))
            .collect()
    }

    fn plan_one(
        &self,
        request: &MutationRequest,
        session: &SessionContext,
        state: &SyncedState,
        projection: &mut Projection,
    ) -> Result<Plan, ValidationError> {
        let MutationRequest { mutation, options } = request;
        if options.force && !matches!(mutation, Mutation::Logoff { .. }) {
            return Err(ValidationError::ForceNotAllowed {
                verb: keyword(mutation),
            });
        }
        if options.urgent
            && !matches!(mutation, Mutation::Message { .. } | Mutation::Broadcast { .. })
        {
            return Err(ValidationError::UrgentNotAllowed {
                verb: keyword(mutation),
            });
        }

        let cache = &state.cache;
        let plan = match mutation {
            Mutation::Status(change) => self.plan_status(change, cache, projection)?,
            Mutation::Assignment {
                op,
                incident_id,
                unit_id,
            } => plan_assignment(*op, incident_id, unit_id, cache, projection)?,
            Mutation::Logoff { unit_id } => {
                if options.force && !session.privileges.override_guard {
                    return Err(ValidationError::ForceNotPermitted);
                }
                let unit = projection.unit(cache, unit_id)?;
                let inverse = if unit.active {
                    vec![Step::Upsert {
                        unit_id: unit_id.clone(),
                        patch: UnitPatch {
                            active: Patch::Set(true),
                            ..UnitPatch::default()
                        },
                    }]
                } else {
                    Vec::new()
                };
                unit.active = false;
                Plan {
                    description: if options.force {
                        format!("{mutation} FORCE")
                    } else {
                        mutation.to_string()
                    },
                    steps: vec![Step::Logoff {
                        unit_id: unit_id.clone(),
                        bypass_guard: options.force,
                    }],
                    inverse,
                }
            }
            Mutation::Touch { unit_id } => {
                projection.unit(cache, unit_id)?;
                Plan {
                    description: mutation.to_string(),
                    steps: vec![Step::Touch {
                        unit_id: unit_id.clone(),
                    }],
                    inverse: Vec::new(),
                }
            }
            Mutation::Eta { unit_id, minutes } => {
                let unit = projection.unit(cache, unit_id)?;
                let inverse = restore_tags(unit_id, &unit.tags);
                unit.tags.eta_minutes = Some(*minutes);
                Plan {
                    description: mutation.to_string(),
                    steps: vec![Step::Eta {
                        unit_id: unit_id.clone(),
                        minutes: *minutes,
                    }],
                    inverse,
                }
            }
            Mutation::Patient { unit_id, text } => {
                let unit = projection.unit(cache, unit_id)?;
                let inverse = restore_tags(unit_id, &unit.tags);
                unit.tags.patient = Some(text.clone());
                Plan {
                    description: mutation.to_string(),
                    steps: vec![Step::Patient {
                        unit_id: unit_id.clone(),
                        text: text.clone(),
                    }],
                    inverse,
                }
            }
            Mutation::NewIncident {
                scene_address,
                note,
                priority,
            } => call_plan(
                mutation,
                RpcCall::CreateQueuedIncident {
                    scene_address: scene_address.clone(),
                    note: note.clone().unwrap_or_default(),
                    priority: *priority,
                    incident_type: String::new(),
                },
            ),
            Mutation::IncidentNote {
                incident_id,
                message,
            } => {
                known_incident(cache, incident_id)?;
                call_plan(
                    mutation,
                    RpcCall::AppendIncidentNote {
                        incident_id: incident_id.clone(),
                        message: message.clone(),
                    },
                )
            }
            Mutation::CloseIncident {
                incident_id,
                disposition,
            } => {
                known_incident(cache, incident_id)?;
                call_plan(
                    mutation,
                    RpcCall::CloseIncident {
                        incident_id: incident_id.clone(),
                        disposition: disposition.clone(),
                    },
                )
            }
            Mutation::Message { to_role, message } => call_plan(
                mutation,
                RpcCall::SendMessage {
                    to_role: to_role.clone(),
                    message: message.clone(),
                    urgent: options.urgent,
                },
            ),
            Mutation::Broadcast { message } => call_plan(
                mutation,
                RpcCall::SendBroadcast {
                    message: message.clone(),
                    urgent: options.urgent,
                },
            ),
        };

        for step in &plan.steps {
            let Some(unit_id) = step.unit_id() else {
                continue;
            };
            if step.bypasses_guard() {
                state.guard.ensure_clear(unit_id)?;
            } else {
                state.guard.expected_for(unit_id)?;
            }
        }
        Ok(plan)
    }

    fn plan_status(
        &self,
        change: &StatusChange,
        cache: &StateCache,
        projection: &mut Projection,
    ) -> Result<Plan, ValidationError> {
        let incident = change
            .incident
            .as_ref()
            .map(|id| known_incident(cache, id))
            .transpose()?;
        let destination = change
            .destination
            .clone()
            .or_else(|| incident.and_then(|record| record.destination.clone()));

        let unit = projection.unit(cache, &change.unit_id)?;
        let mut patch = UnitPatch {
            status: Patch::Set(change.status.clone()),
            ..UnitPatch::default()
        };
        let mut undo = UnitPatch {
            status: Patch::Set(unit.status.clone()),
            ..UnitPatch::default()
        };
        if let Some(incident) = &change.incident {
            patch.incident = Patch::Set(incident.clone());
            undo.incident = restore(&unit.incident);
        }
        if let Some(destination) = &destination {
            patch.destination = Patch::Set(destination.clone());
            undo.destination = restore(&unit.destination);
        }
        if let Some(note) = &change.note {
            patch.note = Patch::Set(self.outgoing_note(note, &unit.tags));
            undo.note = Patch::Set(self.outgoing_note(&unit.note, &unit.tags));
        }
        patch.apply(unit);

        let resolved = Mutation::Status(StatusChange {
            destination,
            ..change.clone()
        });
        Ok(Plan {
            description: resolved.to_string(),
            steps: vec![Step::Upsert {
                unit_id: change.unit_id.clone(),
                patch,
            }],
            inverse: vec![Step::Upsert {
                unit_id: change.unit_id.clone(),
                patch: undo,
            }],
        })
    }

    fn outgoing_note(&self, text: &str, tags: &NoteTags) -> String {
        if self.legacy_tags {
            compose_legacy_note(text, tags)
        } else {
            text.to_string()
        }
    }

    /// Send every step of `plan` in order, stopping at the first failure.
    ///
    /// A conflict parks the unsent remainder of the plan with the guard.
    pub async fn execute(&self, plan: &Plan, token: &str) -> Result<Dispatched, DispatchError> {
        let mut dispatched = Dispatched {
            description: plan.description.clone(),
            ..Dispatched::default()
        };

        for (idx, step) in plan.steps.iter().enumerate() {
            let expected = self.expected_for(step)?;
            let call = step.to_call(expected.clone());
            tracing::debug!(
                target: "dispatch::dispatch",
                verb = call.verb(),
                unit = ?call.unit_id(),
                expected = %expected,
                "dispatch.call"
            );
            let envelope = self.backend.call(token, &call).await?;

            if envelope.is_conflict() {
                if let (Some(current), Some(unit_id)) = (envelope.current.as_ref(), step.unit_id()) {
                    return Err(self.park(plan, idx, unit_id, expected, current.clone(), &envelope));
                }
            }
            if !envelope.ok {
                let message = envelope.error.unwrap_or_default();
                tracing::warn!(
                    target: "dispatch::dispatch",
                    verb = call.verb(),
                    message = %message,
                    "dispatch.rejected"
                );
                return Err(DispatchError::Rejected {
                    verb: call.verb(),
                    message,
                });
            }
            self.absorb(step, &envelope, &mut dispatched)?;
            dispatched.calls += 1;
        }

        tracing::info!(
            target: "dispatch::dispatch",
            description = %plan.description,
            calls = dispatched.calls,
            "dispatch.applied"
        );
        Ok(dispatched)
    }

    fn expected_for(&self, step: &Step) -> Result<RevisionMarker, GuardError> {
        let Some(unit_id) = step.unit_id() else {
            return Ok(RevisionMarker::wildcard());
        };
        let state = self.state.lock();
        if step.bypasses_guard() {
            state.guard.ensure_clear(unit_id)?;
            return Ok(RevisionMarker::wildcard());
        }
        state.guard.expected_for(unit_id)
    }

    fn park(
        &self,
        plan: &Plan,
        idx: usize,
        unit_id: &UnitId,
        attempted: RevisionMarker,
        current: ConflictCurrent,
        envelope: &ResultEnvelope,
    ) -> DispatchError {
        let record = ConflictRecord {
            unit_id: unit_id.clone(),
            attempted,
            current,
            message: envelope
                .error
                .clone()
                .unwrap_or_else(|| "revision conflict".to_string()),
        };
        let parked = Plan {
            description: plan.description.clone(),
            steps: plan.steps[idx..].to_vec(),
            inverse: plan.inverse.clone(),
        };
        self.state.lock().guard.park(record.clone(), parked);
        self.metrics.record_conflict();
        DispatchError::Conflict(record)
    }

    fn absorb(
        &self,
        step: &Step,
        envelope: &ResultEnvelope,
        dispatched: &mut Dispatched,
    ) -> Result<(), DispatchError> {
        let unit = envelope
            .unit()
            .map_err(|err| TransportError::InvalidResponse(err.to_string()))?;
        {
            let mut state = self.state.lock();
            if let Some(unit) = unit {
                state.record_echo(unit);
            }
            if let Step::Assignment {
                op,
                incident_id,
                unit_id,
            } = step
            {
                state.cache.record_assignment(*op, incident_id, unit_id);
            }
        }
        if let Some(promoted) = envelope.promoted() {
            dispatched.promoted = Some(promoted);
        }
        if let Some(created) = envelope.body.get("incidentId").and_then(Value::as_str) {
            dispatched.created = Some(IncidentId::new(created));
        }
        Ok(())
    }

    /// Settle a parked conflict; `Retry` hands back the plan to re-send.
    pub fn resolve_conflict(
        &self,
        unit_id: &UnitId,
        decision: ConflictDecision,
    ) -> Result<Option<Plan>, GuardError> {
        self.state.lock().guard.resolve(unit_id, decision)
    }
}

fn plan_assignment(
    op: AssignmentOp,
    incident_id: &IncidentId,
    unit_id: &UnitId,
    cache: &StateCache,
    projection: &mut Projection,
) -> Result<Plan, ValidationError> {
    projection.unit(cache, unit_id)?;
    known_incident(cache, incident_id)?;

    let stack = projection.board.stack(unit_id);
    let was_primary = stack.and_then(|s| s.primary()) == Some(incident_id);
    let queued_before: Vec<IncidentId> = stack.map(|s| s.queued().to_vec()).unwrap_or_default();
    let queued_at = queued_before.iter().position(|q| q == incident_id);
    let outcome = projection.board.apply(op, incident_id, unit_id)?;

    let step = |op: AssignmentOp, incident_id: &IncidentId| Step::Assignment {
        op,
        incident_id: incident_id.clone(),
        unit_id: unit_id.clone(),
    };
    // Re-queueing appends at the tail; cycling everything that sat behind
    // the incident puts it back in its old slot.
    let restore_slot = |mut steps: Vec<Step>| {
        if let Some(idx) = queued_at {
            for behind in &queued_before[idx + 1..] {
                steps.push(step(AssignmentOp::Clear, behind));
                steps.push(step(AssignmentOp::Queue, behind));
            }
        }
        steps
    };
    let inverse = match (op, &outcome) {
        (AssignmentOp::Queue, _) => vec![step(AssignmentOp::Clear, incident_id)],
        (AssignmentOp::Assign, _) if was_primary => Vec::new(),
        (AssignmentOp::Assign, _) if queued_at.is_some() => restore_slot(vec![
            step(AssignmentOp::Clear, incident_id),
            step(AssignmentOp::Queue, incident_id),
        ]),
        (AssignmentOp::Assign, _) => vec![step(AssignmentOp::Clear, incident_id)],
        (
            AssignmentOp::Primary,
            StackOutcome::Promoted {
                demoted: Some(previous),
            },
        ) => restore_slot(vec![step(AssignmentOp::Primary, previous)]),
        (AssignmentOp::Primary, _) => Vec::new(),
        (AssignmentOp::Clear, _) if was_primary => vec![step(AssignmentOp::Assign, incident_id)],
        (AssignmentOp::Clear, _) => restore_slot(vec![step(AssignmentOp::Queue, incident_id)]),
    };

    Ok(Plan {
        description: format!("{} {incident_id} {unit_id}", op.keyword()),
        steps: vec![step(op, incident_id)],
        inverse,
    })
}

fn call_plan(mutation: &Mutation, call: RpcCall) -> Plan {
    Plan {
        description: mutation.to_string(),
        steps: vec![Step::Call(call)],
        inverse: Vec::new(),
    }
}

fn known_incident<'a>(cache: &'a StateCache, incident_id: &IncidentId) -> Result<&'a IncidentRecord, ValidationError> {
    cache
        .incident(incident_id)
        .ok_or_else(|| ValidationError::UnknownIncident(incident_id.clone()))
}

fn restore<T: Clone>(previous: &Option<T>) -> Patch<T> {
    match previous {
        Some(value) => Patch::Set(value.clone()),
        None => Patch::Clear,
    }
}

fn restore_tags(unit_id: &UnitId, tags: &NoteTags) -> Vec<Step> {
    vec![Step::Upsert {
        unit_id: unit_id.clone(),
        patch: UnitPatch {
            tags: Patch::Set(tags.clone()),
            ..UnitPatch::default()
        },
    }]
}

fn keyword(mutation: &Mutation) -> &'static str {
    match mutation {
        Mutation::Status(_) => "status",
        Mutation::Assignment { op, .. } => op.keyword(),
        Mutation::Logoff { .. } => "LOGOFF",
        Mutation::Touch { .. } => "OK",
        Mutation::Eta { .. } => "ETA",
        Mutation::Patient { .. } => "PAT",
        Mutation::NewIncident { .. } => "NEW",
        Mutation::IncidentNote { .. } => "NOTE",
        Mutation::CloseIncident { .. } => "CLOSE",
        Mutation::Message { .. } => "MSG",
        Mutation::Broadcast { .. } => "BCAST",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::clock::FixedClock;
    use chrono::{TimeZone, Utc};
    use dispatch_runtime::{CommandOptions, StatusCode};
    use pretty_assertions::assert_eq;

    struct Fixture {
        dispatcher: Dispatcher,
        backend: MemoryBackend,
        state: SharedState,
        session: SessionContext,
    }

    async fn fixture() -> Fixture {
        let clock = FixedClock::new(Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap());
        let backend = MemoryBackend::demo(Arc::new(clock)).as_actor("DISP1");
        let state = SyncedState::shared();
        let envelope = backend
            .call("tok", &RpcCall::GetState { since: None })
            .await
            .unwrap();
        state.lock().apply(envelope.decode_body().unwrap());
        let dispatcher = Dispatcher::new(
            Arc::new(backend.clone()),
            state.clone(),
            Arc::new(SyncMetrics::default()),
        );
        Fixture {
            dispatcher,
            backend,
            state,
            session: SessionContext::new("tok", "DISP1"),
        }
    }

    fn status(unit: &str, code: StatusCode, incident: Option<&str>) -> MutationRequest {
        MutationRequest::new(Mutation::Status(StatusChange {
            unit_id: UnitId::new(unit),
            status: code,
            incident: incident.map(IncidentId::new),
            destination: None,
            note: None,
        }))
    }

    fn assignment(op: AssignmentOp, incident: &str, unit: &str) -> MutationRequest {
        MutationRequest::new(Mutation::Assignment {
            op,
            incident_id: IncidentId::new(incident),
            unit_id: UnitId::new(unit),
        })
    }

    #[tokio::test]
    async fn status_with_incident_copies_its_destination() {
        let fx = fixture().await;
        let plan = fx
            .dispatcher
            .plan(
                &status("M1", StatusCode::Dispatched, Some("26-0023")),
                &fx.session,
            )
            .unwrap();
        insta::assert_snapshot!(plan.description, @"M1 D 26-0023 -> SCMC");

        fx.dispatcher.execute(&plan, "tok").await.unwrap();
        let m1 = fx.backend.unit(&UnitId::new("M1")).unwrap();
        assert_eq!(m1.status, StatusCode::Dispatched);
        assert_eq!(m1.incident, Some(IncidentId::new("26-0023")));
        assert_eq!(m1.destination.as_deref(), Some("SCMC"));
        assert_eq!(
            fx.state.lock().guard.observed(&UnitId::new("M1")),
            Some(&m1.revision)
        );
    }

    #[tokio::test]
    async fn status_inverse_restores_previous_fields() {
        let fx = fixture().await;
        let plan = fx
            .dispatcher
            .plan(
                &status("M1", StatusCode::Dispatched, Some("26-0023")),
                &fx.session,
            )
            .unwrap();
        assert_eq!(
            plan.inverse,
            vec![Step::Upsert {
                unit_id: UnitId::new("M1"),
                patch: UnitPatch {
                    status: Patch::Set(StatusCode::Available),
                    incident: Patch::Clear,
                    destination: Patch::Clear,
                    ..UnitPatch::default()
                },
            }]
        );
    }

    #[tokio::test]
    async fn unknown_unit_and_incident_fail_validation() {
        let fx = fixture().await;
        assert_eq!(
            fx.dispatcher
                .plan(&status("M99", StatusCode::Available, None), &fx.session)
                .unwrap_err(),
            ValidationError::UnknownUnit(UnitId::new("M99"))
        );
        assert_eq!(
            fx.dispatcher
                .plan(
                    &status("M1", StatusCode::Dispatched, Some("26-0999")),
                    &fx.session
                )
                .unwrap_err(),
            ValidationError::UnknownIncident(IncidentId::new("26-0999"))
        );
    }

    #[tokio::test]
    async fn chain_planning_sees_earlier_commands() {
        let fx = fixture().await;
        let plans = fx
            .dispatcher
            .plan_chain(
                &[
                    assignment(AssignmentOp::Queue, "26-0023", "M1"),
                    assignment(AssignmentOp::Queue, "26-0024", "M1"),
                    assignment(AssignmentOp::Primary, "26-0024", "M1"),
                ],
                &fx.session,
            )
            .unwrap();
        assert_eq!(plans.len(), 3);
        assert_eq!(
            plans[2].inverse,
            vec![Step::Assignment {
                op: AssignmentOp::Primary,
                incident_id: IncidentId::new("26-0023"),
                unit_id: UnitId::new("M1"),
            }]
        );

        let err = fx
            .dispatcher
            .plan_chain(
                &[
                    assignment(AssignmentOp::Queue, "26-0023", "M1"),
                    assignment(AssignmentOp::Primary, "26-0024", "M1"),
                ],
                &fx.session,
            )
            .unwrap_err();
        assert!(matches!(err, ValidationError::Stack(_)));
    }

    #[tokio::test]
    async fn clearing_a_primary_reports_the_promotion() {
        let fx = fixture().await;
        let plans = fx
            .dispatcher
            .plan_chain(
                &[
                    assignment(AssignmentOp::Queue, "26-0023", "E4"),
                    assignment(AssignmentOp::Queue, "26-0024", "E4"),
                ],
                &fx.session,
            )
            .unwrap();
        for plan in &plans {
            fx.dispatcher.execute(plan, "tok").await.unwrap();
        }

        let clear = fx
            .dispatcher
            .plan(&assignment(AssignmentOp::Clear, "26-0023", "E4"), &fx.session)
            .unwrap();
        assert_eq!(
            clear.inverse,
            vec![Step::Assignment {
                op: AssignmentOp::Assign,
                incident_id: IncidentId::new("26-0023"),
                unit_id: UnitId::new("E4"),
            }]
        );
        let done = fx.dispatcher.execute(&clear, "tok").await.unwrap();
        assert_eq!(done.promoted, Some(IncidentId::new("26-0024")));
        assert_eq!(
            fx.backend.unit(&UnitId::new("E4")).unwrap().incident,
            Some(IncidentId::new("26-0024"))
        );
        assert_eq!(
            fx.state.lock().cache.board().primary(&UnitId::new("E4")),
            Some(&IncidentId::new("26-0024"))
        );
    }

    #[tokio::test]
    async fn undo_of_primary_puts_the_queue_back_in_order() {
        let fx = fixture().await;
        let template = fx.backend.incident(&IncidentId::new("26-0024")).unwrap();
        for id in ["26-0025", "26-0026"] {
            fx.backend.seed_incident(IncidentRecord {
                incident_id: IncidentId::new(id),
                ..template.clone()
            });
        }
        let envelope = fx
            .backend
            .call("tok", &RpcCall::GetState { since: None })
            .await
            .unwrap();
        fx.state.lock().apply(envelope.decode_body().unwrap());

        let queue: Vec<_> = ["26-0023", "26-0024", "26-0025", "26-0026"]
            .into_iter()
            .map(|id| assignment(AssignmentOp::Queue, id, "E4"))
            .collect();
        for plan in fx.dispatcher.plan_chain(&queue, &fx.session).unwrap() {
            fx.dispatcher.execute(&plan, "tok").await.unwrap();
        }

        let promote = fx
            .dispatcher
            .plan(&assignment(AssignmentOp::Primary, "26-0024", "E4"), &fx.session)
            .unwrap();
        let ops: Vec<String> = promote
            .inverse
            .iter()
            .map(|step| match step {
                Step::Assignment { op, incident_id, .. } => format!("{} {incident_id}", op.keyword()),
                other => format!("{other:?}"),
            })
            .collect();
        assert_eq!(
            ops,
            vec![
                "PRIMARY 26-0023",
                "CLEAR 26-0025",
                "QUEUE 26-0025",
                "CLEAR 26-0026",
                "QUEUE 26-0026",
            ]
        );
        fx.dispatcher.execute(&promote, "tok").await.unwrap();

        let undo = Plan {
            description: format!("undo {}", promote.description),
            steps: promote.inverse.clone(),
            inverse: Vec::new(),
        };
        fx.dispatcher.execute(&undo, "tok").await.unwrap();

        let board = fx.backend.assignments();
        let stack = board.stack(&UnitId::new("E4")).unwrap();
        assert_eq!(stack.primary(), Some(&IncidentId::new("26-0023")));
        assert_eq!(
            stack.queued(),
            &[
                IncidentId::new("26-0024"),
                IncidentId::new("26-0025"),
                IncidentId::new("26-0026"),
            ]
        );
    }

    #[tokio::test]
    async fn stale_marker_parks_the_plan() {
        let fx = fixture().await;
        let other = fx.backend.as_actor("DISP2");
        let m1 = UnitId::new("M1");
        let t0 = fx.backend.unit(&m1).unwrap().revision;
        other
            .call(
                "tok",
                &RpcCall::UpsertUnit {
                    unit_id: m1.clone(),
                    patch: UnitPatch {
                        status: Patch::Set(StatusCode::Enroute),
                        ..UnitPatch::default()
                    },
                    expected: t0.clone(),
                },
            )
            .await
            .unwrap();

        let plan = fx
            .dispatcher
            .plan(&status("M1", StatusCode::OnScene, None), &fx.session)
            .unwrap();
        let record = match fx.dispatcher.execute(&plan, "tok").await {
            Err(DispatchError::Conflict(record)) => record,
            other => panic!("expected a conflict, got {other:?}"),
        };
        assert_eq!(record.attempted, t0);
        assert_eq!(record.current.status, StatusCode::Enroute);
        assert_eq!(record.current.updated_by, "DISP2");
        assert_eq!(fx.backend.unit(&m1).unwrap().status, StatusCode::Enroute);

        assert_eq!(
            fx.dispatcher
                .plan(&status("M1", StatusCode::Available, None), &fx.session)
                .unwrap_err(),
            ValidationError::Guard(GuardError::ConflictPending(m1.clone()))
        );

        let parked = fx
            .dispatcher
            .resolve_conflict(&m1, ConflictDecision::Retry)
            .unwrap()
            .unwrap();
        fx.dispatcher.execute(&parked, "tok").await.unwrap();
        assert_eq!(fx.backend.unit(&m1).unwrap().status, StatusCode::OnScene);
    }

    #[tokio::test]
    async fn force_is_only_for_privileged_logoff() {
        let fx = fixture().await;
        let forced = CommandOptions {
            force: true,
            urgent: false,
        };
        let status_force = MutationRequest::with_options(
            status("M1", StatusCode::Available, None).mutation,
            forced,
        );
        assert_eq!(
            fx.dispatcher.plan(&status_force, &fx.session).unwrap_err(),
            ValidationError::ForceNotAllowed { verb: "status" }
        );

        let logoff = MutationRequest::with_options(
            Mutation::Logoff {
                unit_id: UnitId::new("E4"),
            },
            forced,
        );
        assert_eq!(
            fx.dispatcher.plan(&logoff, &fx.session).unwrap_err(),
            ValidationError::ForceNotPermitted
        );

        let supervisor = fx.session.clone().with_override(true);
        let plan = fx.dispatcher.plan(&logoff, &supervisor).unwrap();
        assert!(plan.steps[0].bypasses_guard());
        assert_eq!(
            plan.steps[0].to_call(RevisionMarker::wildcard()),
            RpcCall::LogoffUnit {
                unit_id: UnitId::new("E4"),
                expected: RevisionMarker::wildcard(),
            }
        );
        fx.dispatcher.execute(&plan, "tok").await.unwrap();
        assert!(!fx.backend.unit(&UnitId::new("E4")).unwrap().active);
    }

    #[tokio::test]
    async fn urgent_is_only_for_messages() {
        let fx = fixture().await;
        let urgent = CommandOptions {
            force: false,
            urgent: true,
        };
        let status_urgent = MutationRequest::with_options(
            status("M1", StatusCode::Transporting, None).mutation,
            urgent,
        );
        assert_eq!(
            fx.dispatcher.plan(&status_urgent, &fx.session).unwrap_err(),
            ValidationError::UrgentNotAllowed { verb: "status" }
        );

        let broadcast = MutationRequest::with_options(
            Mutation::Broadcast {
                message: "ICE ON BRIDGES".into(),
            },
            urgent,
        );
        let plan = fx.dispatcher.plan(&broadcast, &fx.session).unwrap();
        assert!(!plan.is_reversible());
    }

    #[tokio::test]
    async fn legacy_mode_composes_tags_into_the_note() {
        let mut fx = fixture().await;
        fx.dispatcher = fx.dispatcher.with_legacy_tags(true);
        {
            let mut state = fx.state.lock();
            let mut m1 = state.cache.unit(&UnitId::new("M1")).unwrap().clone();
            m1.tags.eta_minutes = Some(7);
            state.cache.record_echo(m1);
        }
        let request = MutationRequest::new(Mutation::Status(StatusChange {
            unit_id: UnitId::new("M1"),
            status: StatusCode::Enroute,
            incident: None,
            destination: None,
            note: Some("2 pts".into()),
        }));
        let plan = fx.dispatcher.plan(&request, &fx.session).unwrap();
        let Step::Upsert { patch, .. } = &plan.steps[0] else {
            panic!("expected an upsert");
        };
        assert_eq!(patch.note, Patch::Set("2 pts [ETA:7]".to_string()));
    }

    #[tokio::test]
    async fn backend_failure_envelope_is_a_rejection() {
        let fx = fixture().await;
        let plan = Plan {
            description: "CLOSE 26-0999".into(),
            steps: vec![Step::Call(RpcCall::CloseIncident {
                incident_id: IncidentId::new("26-0999"),
                disposition: String::new(),
            })],
            inverse: Vec::new(),
        };
        let err = fx.dispatcher.execute(&plan, "tok").await.unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Rejected {
                verb: "closeIncident",
                ..
            }
        ));
    }
}
