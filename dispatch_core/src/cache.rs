use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use dispatch_runtime::{
    AssignmentOp, AssignmentRecord, Banner, Diversion, IncidentId, IncidentRecord, MessageRecord, Priority,
    RevisionMarker, StatePayload, UnitId, UnitRecord,
};

use crate::assignments::AssignmentBoard;
use crate::concurrency::ConcurrencyGuard;
use crate::notes::normalize_unit_note;

/// What a merge did to the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MergeSummary {
    pub full: bool,
    pub units_replaced: usize,
}

/// Client-side copy of the board, fed by reconciliation.
///
/// Unit records merge per key; every other collection is replaced whole on
/// each payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateCache {
    units: BTreeMap<UnitId, UnitRecord>,
    incidents: BTreeMap<IncidentId, IncidentRecord>,
    assignments: Vec<AssignmentRecord>,
    banners: Vec<Banner>,
    diversions: Vec<Diversion>,
    messages: Vec<MessageRecord>,
    max_revision: Option<RevisionMarker>,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// True once a full snapshot has been applied.
    pub fn has_baseline(&self) -> bool {
        self.max_revision.is_some()
    }

    pub fn max_revision(&self) -> Option<&RevisionMarker> {
        self.max_revision.as_ref()
    }

    pub fn apply(&mut self, payload: StatePayload) -> MergeSummary {
        let full = !payload.delta;
        if full {
            self.units.clear();
        }
        let units_replaced = payload.units.len();
        for unit in payload.units {
            self.merge_unit(unit);
        }

        self.incidents = payload
            .incidents
            .into_iter()
            .map(|incident| (incident.incident_id.clone(), incident))
            .collect();
        self.assignments = payload.assignments;
        self.banners = payload.banners;
        self.diversions = payload.diversions;
        self.messages = payload.messages;
        if let Some(marker) = payload.max_revision {
            self.bump_revision(&marker);
        }

        MergeSummary {
            full,
            units_replaced,
        }
    }

    /// Replace one unit record and advance the delta baseline past it.
    pub fn merge_unit(&mut self, mut unit: UnitRecord) {
        normalize_unit_note(&mut unit);
        self.bump_revision(&unit.revision);
        self.units.insert(unit.unit_id.clone(), unit);
    }

    /// Replace one unit record echoed back by a mutation.
    ///
    /// The baseline is left alone so the next delta still covers anything
    /// other actors changed in the meantime.
    pub fn record_echo(&mut self, mut unit: UnitRecord) {
        normalize_unit_note(&mut unit);
        self.units.insert(unit.unit_id.clone(), unit);
    }

    fn bump_revision(&mut self, marker: &RevisionMarker) {
        if marker.is_wildcard() {
            return;
        }
        match &self.max_revision {
            Some(current) if current >= marker => {}
            _ => self.max_revision = Some(marker.clone()),
        }
    }

    pub fn unit(&self, unit_id: &UnitId) -> Option<&UnitRecord> {
        self.units.get(unit_id)
    }

    pub fn units(&self) -> impl Iterator<Item = &UnitRecord> {
        self.units.values()
    }

    pub fn incident(&self, incident_id: &IncidentId) -> Option<&IncidentRecord> {
        self.incidents.get(incident_id)
    }

    pub fn incidents(&self) -> impl Iterator<Item = &IncidentRecord> {
        self.incidents.values()
    }

    pub fn known_incidents(&self) -> BTreeSet<IncidentId> {
        self.incidents.keys().cloned().collect()
    }

    pub fn assignments(&self) -> &[AssignmentRecord] {
        &self.assignments
    }

    pub fn banners(&self) -> &[Banner] {
        &self.banners
    }

    pub fn diversions(&self) -> &[Diversion] {
        &self.diversions
    }

    pub fn messages(&self) -> &[MessageRecord] {
        &self.messages
    }

    pub fn board(&self) -> AssignmentBoard {
        AssignmentBoard::from_records(&self.assignments)
    }

    /// Mirror an acknowledged stack operation until the next payload
    /// replaces the assignment list.
    pub fn record_assignment(&mut self, op: AssignmentOp, incident: &IncidentId, unit: &UnitId) {
        let mut board = self.board();
        match board.apply(op, incident, unit) {
            Ok(_) => self.assignments = board.records(),
            Err(err) => tracing::debug!(
                target: "dispatch::dispatch",
                error = %err,
                "cache.assignment_diverged"
            ),
        }
    }

    /// Most urgent priority across everything stacked on the unit.
    pub fn aggregate_priority(&self, unit_id: &UnitId) -> Option<Priority> {
        self.board().aggregate_priority(unit_id, |incident| {
            self.incidents.get(incident).and_then(|record| record.priority)
        })
    }
}

/// Cache plus the revision markers observed from it, shared by the
/// reconciler and the dispatcher.
#[derive(Debug, Default)]
pub struct SyncedState {
    pub cache: StateCache,
    pub guard: ConcurrencyGuard,
}

pub type SharedState = Arc<Mutex<SyncedState>>;

impl SyncedState {
    pub fn shared() -> SharedState {
        Arc::new(Mutex::new(Self::default()))
    }

    /// Merge a state payload and observe every unit marker it carried.
    pub fn apply(&mut self, payload: StatePayload) -> MergeSummary {
        for unit in &payload.units {
            self.guard.observe_record(unit);
        }
        self.cache.apply(payload)
    }

    /// Merge a unit record echoed by a successful mutation.
    pub fn record_echo(&mut self, unit: UnitRecord) {
        self.guard.observe_record(&unit);
        self.cache.record_echo(unit);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_runtime::{AssignmentRole, IncidentStatus, NoteTags, StageTimes, StatusCode};
    use pretty_assertions::assert_eq;

    fn unit(id: &str, status: StatusCode, revision: &str) -> UnitRecord {
        UnitRecord {
            unit_id: UnitId::new(id),
            status,
            incident: None,
            destination: None,
            note: String::new(),
            tags: NoteTags::default(),
            active: true,
            revision: RevisionMarker::new(revision),
            updated_by: "DISP1".into(),
        }
    }

    fn incident(id: &str, priority: u8) -> IncidentRecord {
        IncidentRecord {
            incident_id: IncidentId::new(id),
            status: IncidentStatus::Active,
            priority: Some(Priority(priority)),
            incident_type: String::new(),
            scene_address: String::new(),
            destination: None,
            note: String::new(),
            times: StageTimes::default(),
            related: Vec::new(),
        }
    }

    fn full() -> StatePayload {
        StatePayload {
            delta: false,
            units: vec![
                unit("M1", StatusCode::Available, "r001"),
                unit("E4", StatusCode::Available, "r002"),
            ],
            incidents: vec![incident("26-0023", 2)],
            max_revision: Some(RevisionMarker::new("r002")),
            ..StatePayload::default()
        }
    }

    fn delta() -> StatePayload {
        StatePayload {
            delta: true,
            units: vec![unit("M1", StatusCode::Dispatched, "r003")],
            incidents: vec![incident("26-0023", 2), incident("26-0024", 1)],
            max_revision: Some(RevisionMarker::new("r003")),
            ..StatePayload::default()
        }
    }

    #[test]
    fn delta_replaces_only_named_units() {
        let mut cache = StateCache::new();
        assert!(!cache.has_baseline());
        assert!(cache.apply(full()).full);

        let summary = cache.apply(delta());
        assert_eq!(
            summary,
            MergeSummary {
                full: false,
                units_replaced: 1
            }
        );
        assert_eq!(
            cache.unit(&UnitId::new("M1")).unwrap().status,
            StatusCode::Dispatched
        );
        assert_eq!(
            cache.unit(&UnitId::new("E4")).unwrap().revision,
            RevisionMarker::new("r002")
        );
        assert_eq!(cache.incidents().count(), 2);
        assert_eq!(cache.max_revision(), Some(&RevisionMarker::new("r003")));
    }

    #[test]
    fn applying_a_delta_twice_is_idempotent() {
        let mut once = StateCache::new();
        once.apply(full());
        once.apply(delta());

        let mut twice = once.clone();
        twice.apply(delta());
        assert_eq!(once, twice);
    }

    #[test]
    fn full_snapshot_drops_units_not_listed() {
        let mut cache = StateCache::new();
        cache.apply(full());
        cache.apply(StatePayload {
            units: vec![unit("M1", StatusCode::Available, "r009")],
            max_revision: Some(RevisionMarker::new("r009")),
            ..StatePayload::default()
        });
        assert!(cache.unit(&UnitId::new("E4")).is_none());
    }

    #[test]
    fn legacy_tags_are_split_on_merge() {
        let mut cache = StateCache::new();
        let mut record = unit("M1", StatusCode::Transporting, "r004");
        record.note = "2 pts [ETA:9]".into();
        cache.merge_unit(record);
        let cached = cache.unit(&UnitId::new("M1")).unwrap();
        assert_eq!(cached.note, "2 pts");
        assert_eq!(cached.tags.eta_minutes, Some(9));
    }

    #[test]
    fn aggregate_priority_uses_cached_assignments() {
        let mut cache = StateCache::new();
        let mut payload = delta();
        payload.delta = false;
        payload.assignments = vec![
            AssignmentRecord {
                incident_id: IncidentId::new("26-0023"),
                unit_id: UnitId::new("M1"),
                role: AssignmentRole::Primary,
                order: 0,
                cleared: false,
            },
            AssignmentRecord {
                incident_id: IncidentId::new("26-0024"),
                unit_id: UnitId::new("M1"),
                role: AssignmentRole::Queued,
                order: 1,
                cleared: false,
            },
        ];
        cache.apply(payload);
        assert_eq!(
            cache.aggregate_priority(&UnitId::new("M1")),
            Some(Priority(1))
        );
    }

    #[test]
    fn echo_leaves_the_delta_baseline_alone() {
        let mut state = SyncedState::default();
        state.apply(full());
        state.record_echo(unit("M1", StatusCode::Dispatched, "r007"));

        assert_eq!(state.cache.max_revision(), Some(&RevisionMarker::new("r002")));
        assert_eq!(
            state.guard.observed(&UnitId::new("M1")),
            Some(&RevisionMarker::new("r007"))
        );
        assert_eq!(
            state.cache.unit(&UnitId::new("M1")).unwrap().status,
            StatusCode::Dispatched
        );
    }
}
