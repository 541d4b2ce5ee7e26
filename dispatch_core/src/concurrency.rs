use std::collections::HashMap;
use std::fmt;

use dispatch_runtime::{ConflictCurrent, RevisionMarker, UnitId, UnitRecord};

use crate::dispatcher::Plan;

/// A mutation the backend rejected because the cited marker was stale.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictRecord {
    pub unit_id: UnitId,
    /// Marker the rejected call cited.
    pub attempted: RevisionMarker,
    /// Authoritative state as of the rejection.
    pub current: ConflictCurrent,
    pub message: String,
}

impl fmt::Display for ConflictRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} changed by {} (now {}, revision {})",
            self.unit_id,
            if self.current.updated_by.is_empty() {
                "another user"
            } else {
                self.current.updated_by.as_str()
            },
            self.current.status,
            self.current.revision
        )
    }
}

/// Operator decision on a parked conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictDecision {
    /// Re-send the parked calls citing the authoritative marker.
    Retry,
    /// Drop the parked calls and accept the current state.
    Abandon,
}

#[derive(Debug, Clone)]
pub struct PendingConflict {
    pub conflict: ConflictRecord,
    pub parked: Plan,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GuardError {
    #[error("unit {0} has an unresolved conflict; RETRY or ABANDON it first")]
    ConflictPending(UnitId),
    #[error("unit {0} has no pending conflict")]
    NoPendingConflict(UnitId),
    #[error("no revision observed for unit {0}; refresh first")]
    Unobserved(UnitId),
}

/// Tracks the last revision marker seen per unit and parks conflicts until
/// the operator decides what to do with them.
///
/// Markers only move forward: a late response carrying an older marker for a
/// unit never replaces a newer one.
#[derive(Debug, Default)]
pub struct ConcurrencyGuard {
    observed: HashMap<UnitId, RevisionMarker>,
    pending: HashMap<UnitId, PendingConflict>,
}

impl ConcurrencyGuard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, unit_id: &UnitId, marker: &RevisionMarker) {
        if marker.is_wildcard() {
            return;
        }
        match self.observed.get_mut(unit_id) {
            Some(current) if *current >= *marker => {}
            Some(current) => *current = marker.clone(),
            None => {
                self.observed.insert(unit_id.clone(), marker.clone());
            }
        }
    }

    pub fn observe_record(&mut self, unit: &UnitRecord) {
        self.observe(&unit.unit_id, &unit.revision);
    }

    pub fn observed(&self, unit_id: &UnitId) -> Option<&RevisionMarker> {
        self.observed.get(unit_id)
    }

    /// Fail if the unit has a parked conflict.
    pub fn ensure_clear(&self, unit_id: &UnitId) -> Result<(), GuardError> {
        if self.pending.contains_key(unit_id) {
            return Err(GuardError::ConflictPending(unit_id.clone()));
        }
        Ok(())
    }

    /// Marker a mutation on `unit_id` must cite.
    pub fn expected_for(&self, unit_id: &UnitId) -> Result<RevisionMarker, GuardError> {
        self.ensure_clear(unit_id)?;
        self.observed
            .get(unit_id)
            .cloned()
            .ok_or_else(|| GuardError::Unobserved(unit_id.clone()))
    }

    pub fn park(&mut self, conflict: ConflictRecord, parked: Plan) {
        tracing::warn!(
            target: "dispatch::dispatch",
            unit = %conflict.unit_id,
            attempted = %conflict.attempted,
            current = %conflict.current.revision,
            updated_by = %conflict.current.updated_by,
            "dispatch.conflict"
        );
        self.pending.insert(
            conflict.unit_id.clone(),
            PendingConflict { conflict, parked },
        );
    }

    pub fn pending(&self, unit_id: &UnitId) -> Option<&PendingConflict> {
        self.pending.get(unit_id)
    }

    pub fn pending_units(&self) -> Vec<UnitId> {
        let mut units: Vec<UnitId> = self.pending.keys().cloned().collect();
        units.sort();
        units
    }

    /// Apply the operator's decision. Either way the authoritative marker from
    /// the conflict becomes the observed one; `Retry` hands back the parked
    /// calls to re-send.
    pub fn resolve(
        &mut self,
        unit_id: &UnitId,
        decision: ConflictDecision,
    ) -> Result<Option<Plan>, GuardError> {
        let pending = self
            .pending
            .remove(unit_id)
            .ok_or_else(|| GuardError::NoPendingConflict(unit_id.clone()))?;
        self.observe(unit_id, &pending.conflict.current.revision);
        tracing::info!(
            target: "dispatch::dispatch",
            unit = %unit_id,
            decision = ?decision,
            "dispatch.conflict_resolved"
        );
        Ok(match decision {
            ConflictDecision::Retry => Some(pending.parked),
            ConflictDecision::Abandon => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_runtime::StatusCode;
    use serde_json::Map;

    fn conflict(unit: &str, attempted: &str, current: &str) -> ConflictRecord {
        ConflictRecord {
            unit_id: UnitId::new(unit),
            attempted: RevisionMarker::new(attempted),
            current: ConflictCurrent {
                status: StatusCode::Enroute,
                revision: RevisionMarker::new(current),
                updated_by: "DISP1".into(),
                extra: Map::new(),
            },
            message: "stale".into(),
        }
    }

    #[test]
    fn markers_only_move_forward() {
        let mut guard = ConcurrencyGuard::new();
        let m1 = UnitId::new("M1");
        guard.observe(&m1, &RevisionMarker::new("r002"));
        guard.observe(&m1, &RevisionMarker::new("r001"));
        guard.observe(&m1, &RevisionMarker::wildcard());
        assert_eq!(guard.expected_for(&m1), Ok(RevisionMarker::new("r002")));
    }

    #[test]
    fn unobserved_unit_is_an_error() {
        let guard = ConcurrencyGuard::new();
        assert_eq!(
            guard.expected_for(&UnitId::new("E4")),
            Err(GuardError::Unobserved(UnitId::new("E4")))
        );
    }

    #[test]
    fn parked_conflict_blocks_until_resolved() {
        let mut guard = ConcurrencyGuard::new();
        let m1 = UnitId::new("M1");
        guard.observe(&m1, &RevisionMarker::new("r001"));
        guard.park(conflict("M1", "r001", "r005"), Plan::default());

        assert_eq!(
            guard.expected_for(&m1),
            Err(GuardError::ConflictPending(m1.clone()))
        );
        assert_eq!(guard.pending_units(), vec![m1.clone()]);

        let parked = guard.resolve(&m1, ConflictDecision::Retry).unwrap();
        assert!(parked.is_some());
        assert_eq!(guard.expected_for(&m1), Ok(RevisionMarker::new("r005")));
    }

    #[test]
    fn abandon_drops_parked_calls() {
        let mut guard = ConcurrencyGuard::new();
        let m1 = UnitId::new("M1");
        guard.park(conflict("M1", "r001", "r003"), Plan::default());
        assert!(guard
            .resolve(&m1, ConflictDecision::Abandon)
            .unwrap()
            .is_none());
        assert_eq!(
            guard.resolve(&m1, ConflictDecision::Abandon).unwrap_err(),
            GuardError::NoPendingConflict(m1)
        );
    }

    #[test]
    fn conflict_display_names_the_other_actor() {
        let record = conflict("M1", "r001", "r005");
        insta::assert_snapshot!(record.to_string(), @"M1 changed by DISP1 (now DE, revision r005)");
    }
}
