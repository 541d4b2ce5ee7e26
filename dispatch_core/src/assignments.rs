use std::collections::BTreeMap;

use dispatch_runtime::{
    AssignmentOp, AssignmentRecord, AssignmentRole, IncidentId, Priority, UnitId,
};

/// One unit's assignment stack: the primary incident plus queued work in
/// order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitStack {
    primary: Option<IncidentId>,
    queued: Vec<IncidentId>,
    cleared: Vec<IncidentId>,
}

impl UnitStack {
    pub fn primary(&self) -> Option<&IncidentId> {
        self.primary.as_ref()
    }

    pub fn queued(&self) -> &[IncidentId] {
        &self.queued
    }

    pub fn is_empty(&self) -> bool {
        self.primary.is_none() && self.queued.is_empty()
    }

    pub fn contains(&self, incident: &IncidentId) -> bool {
        self.primary.as_ref() == Some(incident) || self.queued.contains(incident)
    }

    /// Primary first, then queued entries in order.
    pub fn incidents(&self) -> impl Iterator<Item = &IncidentId> {
        self.primary.iter().chain(self.queued.iter())
    }

    fn forget_cleared(&mut self, incident: &IncidentId) {
        self.cleared.retain(|c| c != incident);
    }
}

/// Result of a successful stack operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackOutcome {
    /// The unit was free, the incident became primary.
    Primary,
    /// Appended behind existing work at the given 1-based queue position.
    Queued { position: usize },
    /// A queued incident was promoted; the old primary went to the tail.
    Promoted { demoted: Option<IncidentId> },
    /// Force-installed as primary; the old primary went to the queue front.
    Assigned { displaced: Option<IncidentId> },
    /// The assignment was removed; the earliest queued entry may have been
    /// promoted in its place.
    Cleared { promoted: Option<IncidentId> },
}

impl StackOutcome {
    pub fn promoted(&self) -> Option<&IncidentId> {
        match self {
            StackOutcome::Cleared { promoted } => promoted.as_ref(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StackError {
    #[error("incident {incident} is already stacked on unit {unit}")]
    AlreadyAssigned { unit: UnitId, incident: IncidentId },
    #[error("incident {incident} is not queued on unit {unit}")]
    NotQueued { unit: UnitId, incident: IncidentId },
    #[error("incident {incident} is not assigned to unit {unit}")]
    NotAssigned { unit: UnitId, incident: IncidentId },
}

/// Per-unit primary/queued assignment state.
///
/// A unit holds at most one primary at all times; the representation makes a
/// second primary unrepresentable.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentBoard {
    stacks: BTreeMap<UnitId, UnitStack>,
}

impl AssignmentBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild stacks from assignment records. Cleared records are kept as
    /// history; should the records carry two primaries for one unit, the
    /// lower order index wins and the other is queued.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a AssignmentRecord>) -> Self {
        let mut sorted: Vec<&AssignmentRecord> = records.into_iter().collect();
        sorted.sort_by_key(|record| (record.unit_id.clone(), record.order));

        let mut board = Self::new();
        for record in sorted {
            let stack = board.stacks.entry(record.unit_id.clone()).or_default();
            if record.cleared {
                stack.cleared.push(record.incident_id.clone());
                continue;
            }
            if stack.contains(&record.incident_id) {
                continue;
            }
            match record.role {
                AssignmentRole::Primary if stack.primary.is_none() => {
                    stack.primary = Some(record.incident_id.clone());
                }
                _ => stack.queued.push(record.incident_id.clone()),
            }
        }
        board
    }

    pub fn stack(&self, unit: &UnitId) -> Option<&UnitStack> {
        self.stacks.get(unit)
    }

    pub fn primary(&self, unit: &UnitId) -> Option<&IncidentId> {
        self.stacks.get(unit).and_then(UnitStack::primary)
    }

    pub fn apply(
        &mut self,
        op: AssignmentOp,
        incident: &IncidentId,
        unit: &UnitId,
    ) -> Result<StackOutcome, StackError> {
        match op {
            AssignmentOp::Queue => self.queue(incident, unit),
            AssignmentOp::Primary => self.promote(incident, unit),
            AssignmentOp::Assign => self.assign(incident, unit),
            AssignmentOp::Clear => self.clear(incident, unit),
        }
    }

    pub fn queue(&mut self, incident: &IncidentId, unit: &UnitId) -> Result<StackOutcome, StackError> {
        let stack = self.stacks.entry(unit.clone()).or_default();
        if stack.contains(incident) {
            return Err(StackError::AlreadyAssigned {
                unit: unit.clone(),
                incident: incident.clone(),
            });
        }
        stack.forget_cleared(incident);
        if stack.primary.is_none() {
            stack.primary = Some(incident.clone());
            return Ok(StackOutcome::Primary);
        }
        stack.queued.push(incident.clone());
        Ok(StackOutcome::Queued {
            position: stack.queued.len(),
        })
    }

    pub fn promote(&mut self, incident: &IncidentId, unit: &UnitId) -> Result<StackOutcome, StackError> {
        let stack = self.stacks.entry(unit.clone()).or_default();
        if stack.primary.as_ref() == Some(incident) {
            return Ok(StackOutcome::Promoted { demoted: None });
        }
        let Some(idx) = stack.queued.iter().position(|q| q == incident) else {
            return Err(StackError::NotQueued {
                unit: unit.clone(),
                incident: incident.clone(),
            });
        };
        let promoted = stack.queued.remove(idx);
        let demoted = stack.primary.replace(promoted);
        if let Some(previous) = &demoted {
            stack.queued.push(previous.clone());
        }
        Ok(StackOutcome::Promoted { demoted })
    }

    pub fn assign(&mut self, incident: &IncidentId, unit: &UnitId) -> Result<StackOutcome, StackError> {
        let stack = self.stacks.entry(unit.clone()).or_default();
        if stack.primary.as_ref() == Some(incident) {
            return Ok(StackOutcome::Assigned { displaced: None });
        }
        stack.queued.retain(|q| q != incident);
        stack.forget_cleared(incident);
        let displaced = stack.primary.replace(incident.clone());
        if let Some(previous) = &displaced {
            stack.queued.insert(0, previous.clone());
        }
        Ok(StackOutcome::Assigned { displaced })
    }

    pub fn clear(&mut self, incident: &IncidentId, unit: &UnitId) -> Result<StackOutcome, StackError> {
        let not_assigned = || StackError::NotAssigned {
            unit: unit.clone(),
            incident: incident.clone(),
        };
        let stack = self.stacks.get_mut(unit).ok_or_else(not_assigned)?;

        if stack.primary.as_ref() == Some(incident) {
            stack.cleared.push(incident.clone());
            let promoted = if stack.queued.is_empty() {
                None
            } else {
                Some(stack.queued.remove(0))
            };
            stack.primary = promoted.clone();
            return Ok(StackOutcome::Cleared { promoted });
        }

        let idx = stack
            .queued
            .iter()
            .position(|q| q == incident)
            .ok_or_else(not_assigned)?;
        let removed = stack.queued.remove(idx);
        stack.cleared.push(removed);
        Ok(StackOutcome::Cleared { promoted: None })
    }

    /// Most urgent priority across every incident stacked on the unit.
    pub fn aggregate_priority<F>(&self, unit: &UnitId, mut priority_of: F) -> Option<Priority>
    where
        F: FnMut(&IncidentId) -> Option<Priority>,
    {
        self.stacks
            .get(unit)?
            .incidents()
            .filter_map(|incident| priority_of(incident))
            .reduce(Priority::most_urgent)
    }

    /// Records for one unit, cleared history included.
    pub fn records_for(&self, unit: &UnitId) -> Vec<AssignmentRecord> {
        let Some(stack) = self.stacks.get(unit) else {
            return Vec::new();
        };
        let live = stack.incidents().enumerate().map(|(order, incident)| AssignmentRecord {
            incident_id: incident.clone(),
            unit_id: unit.clone(),
            role: if order == 0 && stack.primary.is_some() {
                AssignmentRole::Primary
            } else {
                AssignmentRole::Queued
            },
            order: order as u32,
            cleared: false,
        });
        let offset = stack.incidents().count();
        let cleared = stack
            .cleared
            .iter()
            .enumerate()
            .map(|(idx, incident)| AssignmentRecord {
                incident_id: incident.clone(),
                unit_id: unit.clone(),
                role: AssignmentRole::Queued,
                order: (offset + idx) as u32,
                cleared: true,
            });
        live.chain(cleared).collect()
    }

    pub fn records(&self) -> Vec<AssignmentRecord> {
        self.stacks
            .keys()
            .flat_map(|unit| self.records_for(unit))
            .collect()
    }
}
