//! Data contracts shared between the dispatch board client and its backend.
//!
//! Everything in this crate is plain serde data: the records the backend owns
//! (units, incidents, assignments, banners, messages), the state payload
//! returned by `getState`, the result envelope every remote call returns, and
//! the typed [`RpcCall`] surface the client is allowed to invoke.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{json, Map, Value};

/// Canonical (uppercase) unit identifier, e.g. `M1`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UnitId(String);

impl UnitId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Incident key in `YY-NNNN` form.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IncidentId(String);

impl IncidentId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into().trim().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric segment after the year prefix, if the key has one.
    pub fn sequence(&self) -> Option<&str> {
        self.0.split_once('-').map(|(_, seq)| seq)
    }

    /// The two-digit year prefix, if the key has one.
    pub fn year_prefix(&self) -> Option<&str> {
        self.0.split_once('-').map(|(year, _)| year)
    }
}

impl fmt::Display for IncidentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opaque optimistic-concurrency marker issued by the backend.
///
/// Markers are fixed-width and sortable (the backend emits ISO-8601
/// timestamps), so the maximum marker seen doubles as the delta baseline.
/// The empty marker is the wildcard used by privileged override paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct RevisionMarker(String);

impl RevisionMarker {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    pub fn wildcard() -> Self {
        Self(String::new())
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RevisionMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_wildcard() {
            f.write_str("*")
        } else {
            f.write_str(&self.0)
        }
    }
}

/// Unit status codes recognised by the board.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StatusCode {
    Available,
    Dispatched,
    Enroute,
    OnScene,
    Transporting,
    AtDestination,
    OutOfService,
    Break,
    /// A code the backend sent that this client does not know about.
    Other(String),
}

impl StatusCode {
    pub const KNOWN: [StatusCode; 8] = [
        StatusCode::Available,
        StatusCode::Dispatched,
        StatusCode::Enroute,
        StatusCode::OnScene,
        StatusCode::Transporting,
        StatusCode::AtDestination,
        StatusCode::OutOfService,
        StatusCode::Break,
    ];

    pub fn code(&self) -> &str {
        match self {
            StatusCode::Available => "AV",
            StatusCode::Dispatched => "D",
            StatusCode::Enroute => "DE",
            StatusCode::OnScene => "OS",
            StatusCode::Transporting => "T",
            StatusCode::AtDestination => "AT",
            StatusCode::OutOfService => "OOS",
            StatusCode::Break => "BRK",
            StatusCode::Other(code) => code,
        }
    }

    /// Look up a known status code, ignoring case.
    pub fn from_code(code: &str) -> Option<Self> {
        let upper = code.trim().to_ascii_uppercase();
        Self::KNOWN.into_iter().find(|status| status.code() == upper)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, StatusCode::Other(_))
    }

    /// Statuses in which the unit is working an incident.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            StatusCode::Dispatched
                | StatusCode::Enroute
                | StatusCode::OnScene
                | StatusCode::Transporting
                | StatusCode::AtDestination
        )
    }
}

impl From<String> for StatusCode {
    fn from(value: String) -> Self {
        StatusCode::from_code(&value).unwrap_or(StatusCode::Other(value))
    }
}

impl From<StatusCode> for String {
    fn from(value: StatusCode) -> Self {
        value.code().to_string()
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Incident priority; `1` is the most urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Priority(pub u8);

impl Priority {
    pub fn most_urgent(self, other: Priority) -> Priority {
        if other.0 < self.0 {
            other
        } else {
            self
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IncidentStatus {
    Queued,
    Active,
    Closed,
}

/// Structured side-channel fields that older clients embedded in note text
/// as bracket tags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NoteTags {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eta_minutes: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disposition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub patient: Option<String>,
}

impl NoteTags {
    pub fn is_empty(&self) -> bool {
        self.eta_minutes.is_none()
            && self.location.is_none()
            && self.disposition.is_none()
            && self.patient.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitRecord {
    pub unit_id: UnitId,
    pub status: StatusCode,
    #[serde(default)]
    pub incident: Option<IncidentId>,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default, skip_serializing_if = "NoteTags::is_empty")]
    pub tags: NoteTags,
    #[serde(default = "default_active")]
    pub active: bool,
    #[serde(rename = "revisionMarker", alias = "updatedAt")]
    pub revision: RevisionMarker,
    #[serde(default)]
    pub updated_by: String,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimes {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dispatched: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enroute: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_scene: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transporting: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IncidentRecord {
    pub incident_id: IncidentId,
    pub status: IncidentStatus,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub incident_type: String,
    #[serde(default)]
    pub scene_address: String,
    #[serde(default)]
    pub destination: Option<String>,
    #[serde(default)]
    pub note: String,
    #[serde(default)]
    pub times: StageTimes,
    #[serde(default)]
    pub related: Vec<IncidentId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssignmentRole {
    Primary,
    Queued,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub incident_id: IncidentId,
    pub unit_id: UnitId,
    pub role: AssignmentRole,
    pub order: u32,
    #[serde(default)]
    pub cleared: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Banner {
    pub kind: String,
    pub message: String,
    #[serde(default)]
    pub acknowledged: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Diversion {
    pub destination: String,
    pub active: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    pub message_id: String,
    pub from: String,
    pub to: String,
    pub body: String,
    #[serde(default)]
    pub urgent: bool,
    #[serde(default)]
    pub read: bool,
}

/// Body of a `getState` response: either a full snapshot or a delta.
///
/// In a delta only `units` is partial; every other collection is always sent
/// whole.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StatePayload {
    pub delta: bool,
    pub units: Vec<UnitRecord>,
    pub incidents: Vec<IncidentRecord>,
    pub assignments: Vec<AssignmentRecord>,
    pub banners: Vec<Banner>,
    pub diversions: Vec<Diversion>,
    pub messages: Vec<MessageRecord>,
    pub max_revision: Option<RevisionMarker>,
}

/// A single field in a "send only changed fields" update.
///
/// `Keep` is omitted from the wire, `Clear` is sent as `null`, and `Set`
/// carries the new value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T> Default for Patch<T> {
    fn default() -> Self {
        Patch::Keep
    }
}

impl<T> Patch<T> {
    pub fn is_keep(&self) -> bool {
        matches!(self, Patch::Keep)
    }

    /// `None` keeps the field untouched.
    pub fn from_option(value: Option<T>) -> Self {
        match value {
            Some(value) => Patch::Set(value),
            None => Patch::Keep,
        }
    }

    pub fn apply_to(self, target: &mut Option<T>) {
        match self {
            Patch::Keep => {}
            Patch::Clear => *target = None,
            Patch::Set(value) => *target = Some(value),
        }
    }
}

impl<T: Serialize> Serialize for Patch<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Patch::Set(value) => value.serialize(serializer),
            Patch::Keep | Patch::Clear => serializer.serialize_none(),
        }
    }
}

impl<'de, T: Deserialize<'de>> Deserialize<'de> for Patch<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Option::<T>::deserialize(deserializer).map(|value| match value {
            Some(value) => Patch::Set(value),
            None => Patch::Clear,
        })
    }
}

/// Field-level update for a unit record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnitPatch {
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub status: Patch<StatusCode>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub incident: Patch<IncidentId>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub destination: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub note: Patch<String>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub tags: Patch<NoteTags>,
    #[serde(default, skip_serializing_if = "Patch::is_keep")]
    pub active: Patch<bool>,
}

impl UnitPatch {
    pub fn is_empty(&self) -> bool {
        self.status.is_keep()
            && self.incident.is_keep()
            && self.destination.is_keep()
            && self.note.is_keep()
            && self.tags.is_keep()
            && self.active.is_keep()
    }

    /// Apply the patch to a cached record. Revision and author are left to
    /// the caller.
    pub fn apply(&self, unit: &mut UnitRecord) {
        if let Patch::Set(status) = &self.status {
            unit.status = status.clone();
        }
        self.incident.clone().apply_to(&mut unit.incident);
        self.destination.clone().apply_to(&mut unit.destination);
        match &self.note {
            Patch::Set(note) => unit.note = note.clone(),
            Patch::Clear => unit.note.clear(),
            Patch::Keep => {}
        }
        match &self.tags {
            Patch::Set(tags) => unit.tags = tags.clone(),
            Patch::Clear => unit.tags = NoteTags::default(),
            Patch::Keep => {}
        }
        if let Patch::Set(active) = self.active {
            unit.active = active;
        }
    }
}

/// Authoritative record returned alongside a conflict.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictCurrent {
    pub status: StatusCode,
    #[serde(rename = "revisionMarker", alias = "updatedAt")]
    pub revision: RevisionMarker,
    #[serde(rename = "updatedBy", default)]
    pub updated_by: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Envelope returned by every remote call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEnvelope {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "is_false")]
    pub conflict: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current: Option<ConflictCurrent>,
    #[serde(flatten)]
    pub body: Map<String, Value>,
}

fn is_false(value: &bool) -> bool {
    !*value
}

impl ResultEnvelope {
    pub fn success(body: Map<String, Value>) -> Self {
        Self {
            ok: true,
            error: None,
            conflict: false,
            current: None,
            body,
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            conflict: false,
            current: None,
            body: Map::new(),
        }
    }

    pub fn conflict(message: impl Into<String>, current: ConflictCurrent) -> Self {
        Self {
            ok: false,
            error: Some(message.into()),
            conflict: true,
            current: Some(current),
            body: Map::new(),
        }
    }

    pub fn is_conflict(&self) -> bool {
        self.conflict && self.current.is_some()
    }

    /// Decode the non-envelope fields as `T`.
    pub fn decode_body<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_value(Value::Object(self.body.clone()))
    }

    /// Updated unit record echoed back by unit mutations, if present.
    pub fn unit(&self) -> serde_json::Result<Option<UnitRecord>> {
        match self.body.get("unit") {
            Some(Value::Null) | None => Ok(None),
            Some(value) => serde_json::from_value(value.clone()).map(Some),
        }
    }

    /// Incident auto-promoted by a `clearUnitAssignment` call, if any.
    pub fn promoted(&self) -> Option<IncidentId> {
        self.body
            .get("promoted")
            .and_then(Value::as_str)
            .map(IncidentId::new)
    }
}

/// Stack operations on a unit's assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AssignmentOp {
    /// Force the incident in as primary.
    Assign,
    /// Primary if the unit is free, otherwise queue behind existing work.
    Queue,
    /// Promote a queued incident to primary.
    Primary,
    /// Remove the assignment.
    Clear,
}

impl AssignmentOp {
    pub fn verb(self) -> &'static str {
        match self {
            AssignmentOp::Assign => "assignUnit",
            AssignmentOp::Queue => "queueUnit",
            AssignmentOp::Primary => "primaryUnit",
            AssignmentOp::Clear => "clearUnitAssignment",
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            AssignmentOp::Assign => "ASSIGN",
            AssignmentOp::Queue => "QUEUE",
            AssignmentOp::Primary => "PRIMARY",
            AssignmentOp::Clear => "CLEAR",
        }
    }

    pub fn from_keyword(keyword: &str) -> Option<Self> {
        match keyword.to_ascii_uppercase().as_str() {
            "ASSIGN" => Some(AssignmentOp::Assign),
            "QUEUE" => Some(AssignmentOp::Queue),
            "PRIMARY" => Some(AssignmentOp::Primary),
            "CLEAR" => Some(AssignmentOp::Clear),
            _ => None,
        }
    }
}

/// Every remote call the client may issue.
#[derive(Debug, Clone, PartialEq)]
pub enum RpcCall {
    GetState {
        since: Option<RevisionMarker>,
    },
    UpsertUnit {
        unit_id: UnitId,
        patch: UnitPatch,
        expected: RevisionMarker,
    },
    LogoffUnit {
        unit_id: UnitId,
        expected: RevisionMarker,
    },
    TouchUnit {
        unit_id: UnitId,
        expected: RevisionMarker,
    },
    SetUnitEta {
        unit_id: UnitId,
        minutes: u32,
        expected: RevisionMarker,
    },
    SetUnitPat {
        unit_id: UnitId,
        text: String,
        expected: RevisionMarker,
    },
    Assignment {
        op: AssignmentOp,
        incident_id: IncidentId,
        unit_id: UnitId,
        expected: RevisionMarker,
    },
    CreateQueuedIncident {
        scene_address: String,
        note: String,
        priority: Option<Priority>,
        incident_type: String,
    },
    AppendIncidentNote {
        incident_id: IncidentId,
        message: String,
    },
    CloseIncident {
        incident_id: IncidentId,
        disposition: String,
    },
    SendMessage {
        to_role: String,
        message: String,
        urgent: bool,
    },
    SendBroadcast {
        message: String,
        urgent: bool,
    },
}

impl RpcCall {
    pub fn verb(&self) -> &'static str {
        match self {
            RpcCall::GetState { .. } => "getState",
            RpcCall::UpsertUnit { .. } => "upsertUnit",
            RpcCall::LogoffUnit { .. } => "logoffUnit",
            RpcCall::TouchUnit { .. } => "touchUnit",
            RpcCall::SetUnitEta { .. } => "setUnitETA",
            RpcCall::SetUnitPat { .. } => "setUnitPAT",
            RpcCall::Assignment { op, .. } => op.verb(),
            RpcCall::CreateQueuedIncident { .. } => "createQueuedIncident",
            RpcCall::AppendIncidentNote { .. } => "appendIncidentNote",
            RpcCall::CloseIncident { .. } => "closeIncident",
            RpcCall::SendMessage { .. } => "sendMessage",
            RpcCall::SendBroadcast { .. } => "sendBroadcast",
        }
    }

    /// The unit this call mutates, if it is a unit mutation.
    pub fn unit_id(&self) -> Option<&UnitId> {
        match self {
            RpcCall::UpsertUnit { unit_id, .. }
            | RpcCall::LogoffUnit { unit_id, .. }
            | RpcCall::TouchUnit { unit_id, .. }
            | RpcCall::SetUnitEta { unit_id, .. }
            | RpcCall::SetUnitPat { unit_id, .. }
            | RpcCall::Assignment { unit_id, .. } => Some(unit_id),
            _ => None,
        }
    }

    /// Positional parameters, session token first.
    pub fn params(&self, token: &str) -> Vec<Value> {
        let mut params = vec![Value::from(token)];
        match self {
            RpcCall::GetState { since } => {
                params.push(since.as_ref().map_or(Value::Null, |m| m.as_str().into()));
            }
            RpcCall::UpsertUnit {
                unit_id,
                patch,
                expected,
            } => {
                params.push(unit_id.as_str().into());
                params.push(serde_json::to_value(patch).unwrap_or(Value::Null));
                params.push(expected.as_str().into());
            }
            RpcCall::LogoffUnit { unit_id, expected } | RpcCall::TouchUnit { unit_id, expected } => {
                params.push(unit_id.as_str().into());
                params.push(expected.as_str().into());
            }
            RpcCall::SetUnitEta {
                unit_id,
                minutes,
                expected,
            } => {
                params.push(unit_id.as_str().into());
                params.push((*minutes).into());
                params.push(expected.as_str().into());
            }
            RpcCall::SetUnitPat {
                unit_id,
                text,
                expected,
            } => {
                params.push(unit_id.as_str().into());
                params.push(text.as_str().into());
                params.push(expected.as_str().into());
            }
            RpcCall::Assignment {
                incident_id,
                unit_id,
                expected,
                ..
            } => params.push(json!({
                "incidentId": incident_id.as_str(),
                "unitId": unit_id.as_str(),
                "expectedUpdatedAt": expected.as_str(),
            })),
            RpcCall::CreateQueuedIncident {
                scene_address,
                note,
                priority,
                incident_type,
            } => {
                params.push(Value::Null);
                params.push(note.as_str().into());
                params.push(priority.map_or(Value::Null, |p| p.0.into()));
                params.push(Value::Null);
                params.push(incident_type.as_str().into());
                params.push(scene_address.as_str().into());
            }
            RpcCall::AppendIncidentNote {
                incident_id,
                message,
            } => {
                params.push(incident_id.as_str().into());
                params.push(message.as_str().into());
            }
            RpcCall::CloseIncident {
                incident_id,
                disposition,
            } => {
                params.push(incident_id.as_str().into());
                params.push(disposition.as_str().into());
            }
            RpcCall::SendMessage {
                to_role,
                message,
                urgent,
            } => {
                params.push(to_role.as_str().into());
                params.push(message.as_str().into());
                params.push((*urgent).into());
            }
            RpcCall::SendBroadcast { message, urgent } => {
                params.push(message.as_str().into());
                params.push((*urgent).into());
            }
        }
        params
    }
}

pub fn encode_state_json(payload: &StatePayload) -> serde_json::Result<String> {
    serde_json::to_string(payload)
}

pub fn decode_state_json(data: &str) -> serde_json::Result<StatePayload> {
    serde_json::from_str(data)
}

pub fn encode_envelope_json(envelope: &ResultEnvelope) -> serde_json::Result<String> {
    serde_json::to_string(envelope)
}

pub fn decode_envelope_json(data: &str) -> serde_json::Result<ResultEnvelope> {
    serde_json::from_str(data)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_parse_case_insensitively() {
        assert_eq!(StatusCode::from_code("os"), Some(StatusCode::OnScene));
        assert_eq!(StatusCode::from_code("OOS"), Some(StatusCode::OutOfService));
        assert_eq!(StatusCode::from_code("M1"), None);
    }

    #[test]
    fn unknown_status_survives_deserialization() {
        let status: StatusCode = serde_json::from_str("\"XR\"").expect("status should parse");
        assert_eq!(status, StatusCode::Other("XR".to_string()));
        assert!(!status.is_known());
        assert_eq!(serde_json::to_string(&status).unwrap(), "\"XR\"");
    }

    #[test]
    fn unit_patch_sends_only_changed_fields() {
        let patch = UnitPatch {
            status: Patch::Set(StatusCode::Dispatched),
            destination: Patch::Clear,
            ..UnitPatch::default()
        };
        let value = serde_json::to_value(&patch).unwrap();
        assert_eq!(value, json!({ "status": "D", "destination": null }));

        let back: UnitPatch = serde_json::from_value(value).unwrap();
        assert_eq!(back, patch);
    }

    #[test]
    fn conflict_envelope_decodes_current_record() {
        let raw = r#"{
            "ok": false,
            "conflict": true,
            "error": "STALE",
            "current": { "status": "OS", "updatedAt": "2026-06-15T10:00:00Z", "updatedBy": "DISP2" }
        }"#;
        let envelope = decode_envelope_json(raw).expect("envelope should parse");
        assert!(envelope.is_conflict());
        let current = envelope.current.unwrap();
        assert_eq!(current.status, StatusCode::OnScene);
        assert_eq!(current.updated_by, "DISP2");
        assert_eq!(current.revision.as_str(), "2026-06-15T10:00:00Z");
    }

    #[test]
    fn assignment_params_carry_expected_marker() {
        let call = RpcCall::Assignment {
            op: AssignmentOp::Queue,
            incident_id: IncidentId::new("26-0023"),
            unit_id: UnitId::new("m1"),
            expected: RevisionMarker::new("0007"),
        };
        assert_eq!(call.verb(), "queueUnit");
        assert_eq!(
            call.params("tok"),
            vec![
                json!("tok"),
                json!({ "incidentId": "26-0023", "unitId": "M1", "expectedUpdatedAt": "0007" })
            ]
        );
    }

    #[test]
    fn wildcard_marker_is_empty_on_the_wire() {
        let marker = RevisionMarker::wildcard();
        assert!(marker.is_wildcard());
        assert_eq!(serde_json::to_string(&marker).unwrap(), "\"\"");
    }
}
