use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Datelike;
use dispatch_runtime::{
    AssignmentOp, Banner, ConflictCurrent, Diversion, IncidentId, IncidentRecord, IncidentStatus,
    MessageRecord, NoteTags, Priority, ResultEnvelope, RevisionMarker, RpcCall, StageTimes,
    StatePayload, StatusCode, UnitId, UnitRecord,
};
use parking_lot::Mutex;
use serde_json::{Map, Value};

use super::{RemoteBackend, TransportError};
use crate::assignments::AssignmentBoard;
use crate::clock::Clock;

#[derive(Debug, Default)]
struct BoardState {
    units: BTreeMap<UnitId, UnitRecord>,
    incidents: BTreeMap<IncidentId, IncidentRecord>,
    assignments: AssignmentBoard,
    banners: Vec<Banner>,
    diversions: Vec<Diversion>,
    messages: Vec<MessageRecord>,
    revision: u64,
    next_message: u64,
    fail_next: usize,
    call_log: Vec<&'static str>,
}

impl BoardState {
    fn next_marker(&mut self) -> RevisionMarker {
        self.revision += 1;
        marker(self.revision)
    }

    fn current_marker(&self) -> RevisionMarker {
        marker(self.revision)
    }

    /// Reject a unit mutation whose expected marker is stale.
    fn check(&self, unit_id: &UnitId, expected: &RevisionMarker) -> Result<(), ResultEnvelope> {
        let Some(unit) = self.units.get(unit_id) else {
            return Err(ResultEnvelope::failure(format!("unit {unit_id} not found")));
        };
        if expected.is_wildcard() || *expected == unit.revision {
            return Ok(());
        }
        let mut extra = Map::new();
        if let Some(incident) = &unit.incident {
            extra.insert("incident".into(), incident.as_str().into());
        }
        Err(ResultEnvelope::conflict(
            format!("unit {unit_id} was changed by {}", unit.updated_by),
            ConflictCurrent {
                status: unit.status.clone(),
                revision: unit.revision.clone(),
                updated_by: unit.updated_by.clone(),
                extra,
            },
        ))
    }

    /// Stamp a new revision on the unit after `edit` runs.
    fn stamp<F>(&mut self, unit_id: &UnitId, actor: &str, edit: F) -> Option<UnitRecord>
    where
        F: FnOnce(&mut UnitRecord),
    {
        let marker = self.next_marker();
        let unit = self.units.get_mut(unit_id)?;
        edit(unit);
        unit.revision = marker;
        unit.updated_by = actor.to_string();
        Some(unit.clone())
    }
}

/// Fixed-width so lexical order matches issue order.
fn marker(revision: u64) -> RevisionMarker {
    RevisionMarker::new(format!("r{revision:012}"))
}

fn unit_envelope(unit: Option<UnitRecord>, promoted: Option<IncidentId>) -> ResultEnvelope {
    let mut body = Map::new();
    if let Some(unit) = unit {
        match serde_json::to_value(&unit) {
            Ok(value) => {
                body.insert("unit".into(), value);
            }
            Err(err) => return ResultEnvelope::failure(err.to_string()),
        }
    }
    if let Some(promoted) = promoted {
        body.insert("promoted".into(), promoted.as_str().into());
    }
    ResultEnvelope::success(body)
}

/// Shared in-process board implementing the full backend contract.
///
/// Handles made with [`MemoryBackend::as_actor`] share one board, which is
/// how tests model several dispatchers racing on the same unit.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<BoardState>>,
    actor: String,
    clock: Arc<dyn Clock>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(BoardState::default())),
            actor: "system".to_string(),
            clock,
        }
    }

    /// Small board used by the console's `--demo` mode.
    pub fn demo(clock: Arc<dyn Clock>) -> Self {
        let backend = Self::new(clock);
        let yy = backend.year_prefix();
        for (unit, status) in [
            ("M1", StatusCode::Available),
            ("M12", StatusCode::Available),
            ("E4", StatusCode::Available),
            ("BLS7", StatusCode::OutOfService),
        ] {
            backend.seed_unit(UnitId::new(unit), status);
        }
        backend.seed_incident(IncidentRecord {
            incident_id: IncidentId::new(format!("{yy}-0023")),
            status: IncidentStatus::Active,
            priority: Some(Priority(2)),
            incident_type: "MEDICAL".into(),
            scene_address: "1200 NW WALL ST".into(),
            destination: Some("SCMC".into()),
            note: String::new(),
            times: StageTimes::default(),
            related: Vec::new(),
        });
        backend.seed_incident(IncidentRecord {
            incident_id: IncidentId::new(format!("{yy}-0024")),
            status: IncidentStatus::Queued,
            priority: Some(Priority(1)),
            incident_type: "FALL".into(),
            scene_address: "61 SW FRANKLIN AVE".into(),
            destination: None,
            note: String::new(),
            times: StageTimes::default(),
            related: Vec::new(),
        });
        backend.add_diversion(Diversion {
            destination: "SCMC".into(),
            active: false,
        });
        backend
    }

    /// Another handle on the same board whose writes are attributed to
    /// `actor`.
    pub fn as_actor(&self, actor: impl Into<String>) -> Self {
        Self {
            state: Arc::clone(&self.state),
            actor: actor.into(),
            clock: Arc::clone(&self.clock),
        }
    }

    pub fn seed_unit(&self, unit_id: UnitId, status: StatusCode) -> UnitRecord {
        let mut state = self.state.lock();
        let revision = state.next_marker();
        let record = UnitRecord {
            unit_id: unit_id.clone(),
            status,
            incident: None,
            destination: None,
            note: String::new(),
            tags: NoteTags::default(),
            active: true,
            revision,
            updated_by: self.actor.clone(),
        };
        state.units.insert(unit_id, record.clone());
        record
    }

    pub fn seed_incident(&self, incident: IncidentRecord) {
        self.state
            .lock()
            .incidents
            .insert(incident.incident_id.clone(), incident);
    }

    pub fn add_banner(&self, banner: Banner) {
        self.state.lock().banners.push(banner);
    }

    pub fn add_diversion(&self, diversion: Diversion) {
        self.state.lock().diversions.push(diversion);
    }

    /// Fail the next `count` calls with a network error.
    pub fn fail_next(&self, count: usize) {
        self.state.lock().fail_next = count;
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<UnitRecord> {
        self.state.lock().units.get(unit_id).cloned()
    }

    pub fn incident(&self, incident_id: &IncidentId) -> Option<IncidentRecord> {
        self.state.lock().incidents.get(incident_id).cloned()
    }

    pub fn assignments(&self) -> AssignmentBoard {
        self.state.lock().assignments.clone()
    }

    pub fn messages(&self) -> Vec<MessageRecord> {
        self.state.lock().messages.clone()
    }

    /// Verbs received so far, injected failures excluded.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.state.lock().call_log.clone()
    }

    fn year_prefix(&self) -> String {
        format!("{:02}", self.clock.now().year().rem_euclid(100))
    }

    fn handle(&self, call: &RpcCall) -> ResultEnvelope {
        let actor = self.actor.as_str();
        let mut state = self.state.lock();
        state.call_log.push(call.verb());

        match call {
            RpcCall::GetState { since } => state_envelope(&state, since.as_ref()),
            RpcCall::UpsertUnit {
                unit_id,
                patch,
                expected,
            } => {
                if !state.units.contains_key(unit_id) && expected.is_wildcard() {
                    let revision = state.current_marker();
                    state.units.insert(unit_id.clone(), blank_unit(unit_id, revision));
                }
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                let unit = state.stamp(unit_id, actor, |unit| patch.apply(unit));
                unit_envelope(unit, None)
            }
            RpcCall::LogoffUnit { unit_id, expected } => {
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                let unit = state.stamp(unit_id, actor, |unit| unit.active = false);
                unit_envelope(unit, None)
            }
            RpcCall::TouchUnit { unit_id, expected } => {
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                let unit = state.stamp(unit_id, actor, |_| {});
                unit_envelope(unit, None)
            }
            RpcCall::SetUnitEta {
                unit_id,
                minutes,
                expected,
            } => {
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                let minutes = *minutes;
                let unit = state.stamp(unit_id, actor, |unit| unit.tags.eta_minutes = Some(minutes));
                unit_envelope(unit, None)
            }
            RpcCall::SetUnitPat {
                unit_id,
                text,
                expected,
            } => {
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                let unit = state.stamp(unit_id, actor, |unit| unit.tags.patient = Some(text.clone()));
                unit_envelope(unit, None)
            }
            RpcCall::Assignment {
                op,
                incident_id,
                unit_id,
                expected,
            } => {
                if let Err(rejected) = state.check(unit_id, expected) {
                    return rejected;
                }
                if !state.incidents.contains_key(incident_id) {
                    return ResultEnvelope::failure(format!("incident {incident_id} not found"));
                }
                let outcome = match state.assignments.apply(*op, incident_id, unit_id) {
                    Ok(outcome) => outcome,
                    Err(err) => return ResultEnvelope::failure(err.to_string()),
                };
                let primary = state.assignments.primary(unit_id).cloned();
                if matches!(op, AssignmentOp::Assign | AssignmentOp::Queue) {
                    if let Some(incident) = state.incidents.get_mut(incident_id) {
                        if incident.status == IncidentStatus::Queued {
                            incident.status = IncidentStatus::Active;
                        }
                    }
                }
                let unit = state.stamp(unit_id, actor, |unit| unit.incident = primary);
                unit_envelope(unit, outcome.promoted().cloned())
            }
            RpcCall::CreateQueuedIncident {
                scene_address,
                note,
                priority,
                incident_type,
            } => {
                let yy = self.year_prefix();
                let next = state
                    .incidents
                    .keys()
                    .filter(|key| key.year_prefix() == Some(yy.as_str()))
                    .filter_map(|key| key.sequence()?.parse::<u32>().ok())
                    .max()
                    .unwrap_or(0)
                    + 1;
                let incident_id = IncidentId::new(format!("{yy}-{next:04}"));
                state.incidents.insert(
                    incident_id.clone(),
                    IncidentRecord {
                        incident_id: incident_id.clone(),
                        status: IncidentStatus::Queued,
                        priority: *priority,
                        incident_type: incident_type.clone(),
                        scene_address: scene_address.clone(),
                        destination: None,
                        note: note.clone(),
                        times: StageTimes {
                            created: Some(self.clock.now()),
                            ..StageTimes::default()
                        },
                        related: Vec::new(),
                    },
                );
                let mut body = Map::new();
                body.insert("incidentId".into(), incident_id.as_str().into());
                ResultEnvelope::success(body)
            }
            RpcCall::AppendIncidentNote {
                incident_id,
                message,
            } => match state.incidents.get_mut(incident_id) {
                Some(incident) => {
                    if !incident.note.is_empty() {
                        incident.note.push('\n');
                    }
                    incident.note.push_str(message);
                    ResultEnvelope::success(Map::new())
                }
                None => ResultEnvelope::failure(format!("incident {incident_id} not found")),
            },
            RpcCall::CloseIncident {
                incident_id,
                disposition,
            } => self.close_incident(&mut state, incident_id, disposition),
            RpcCall::SendMessage {
                to_role,
                message,
                urgent,
            } => push_message(&mut state, actor, to_role, message, *urgent),
            RpcCall::SendBroadcast { message, urgent } => {
                push_message(&mut state, actor, "ALL", message, *urgent)
            }
        }
    }

    fn close_incident(
        &self,
        state: &mut BoardState,
        incident_id: &IncidentId,
        disposition: &str,
    ) -> ResultEnvelope {
        let now = self.clock.now();
        match state.incidents.get_mut(incident_id) {
            Some(incident) => {
                incident.status = IncidentStatus::Closed;
                incident.times.closed = Some(now);
                if !disposition.is_empty() {
                    if !incident.note.is_empty() {
                        incident.note.push('\n');
                    }
                    incident.note.push_str(&format!("CLOSED {disposition}"));
                }
            }
            None => return ResultEnvelope::failure(format!("incident {incident_id} not found")),
        }

        let stacked: Vec<UnitId> = state
            .units
            .keys()
            .filter(|unit| {
                state
                    .assignments
                    .stack(unit)
                    .is_some_and(|stack| stack.contains(incident_id))
            })
            .cloned()
            .collect();
        for unit_id in stacked {
            if state.assignments.clear(incident_id, &unit_id).is_ok() {
                let primary = state.assignments.primary(&unit_id).cloned();
                state.stamp(&unit_id, &self.actor, |unit| unit.incident = primary);
            }
        }
        ResultEnvelope::success(Map::new())
    }
}

fn blank_unit(unit_id: &UnitId, revision: RevisionMarker) -> UnitRecord {
    UnitRecord {
        unit_id: unit_id.clone(),
        status: StatusCode::Available,
        incident: None,
        destination: None,
        note: String::new(),
        tags: NoteTags::default(),
        active: true,
        revision,
        updated_by: String::new(),
    }
}

fn state_envelope(state: &BoardState, since: Option<&RevisionMarker>) -> ResultEnvelope {
    let since = since.filter(|marker| !marker.is_wildcard());
    let units = state
        .units
        .values()
        .filter(|unit| since.map_or(true, |since| unit.revision > *since))
        .cloned()
        .collect();
    let payload = StatePayload {
        delta: since.is_some(),
        units,
        incidents: state.incidents.values().cloned().collect(),
        assignments: state.assignments.records(),
        banners: state.banners.clone(),
        diversions: state.diversions.clone(),
        messages: state.messages.clone(),
        max_revision: Some(state.current_marker()),
    };
    match serde_json::to_value(&payload) {
        Ok(Value::Object(body)) => ResultEnvelope::success(body),
        Ok(_) => ResultEnvelope::failure("state payload is not an object"),
        Err(err) => ResultEnvelope::failure(err.to_string()),
    }
}

fn push_message(
    state: &mut BoardState,
    actor: &str,
    to: &str,
    body: &str,
    urgent: bool,
) -> ResultEnvelope {
    state.next_message += 1;
    let message_id = format!("MSG-{:05}", state.next_message);
    state.messages.push(MessageRecord {
        message_id: message_id.clone(),
        from: actor.to_string(),
        to: to.to_string(),
        body: body.to_string(),
        urgent,
        read: false,
    });
    let mut reply = Map::new();
    reply.insert("messageId".into(), message_id.into());
    ResultEnvelope::success(reply)
}

#[async_trait]
impl RemoteBackend for MemoryBackend {
    async fn call(&self, _token: &str, call: &RpcCall) -> Result<ResultEnvelope, TransportError> {
        {
            let mut state = self.state.lock();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                return Err(TransportError::Network("injected failure".into()));
            }
        }
        Ok(self.handle(call))
    }
}
