use std::fmt;

use crate::{AssignmentOp, IncidentId, Priority, StatusCode, UnitId};

/// Named options that used to ride along as trailing keywords.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommandOptions {
    /// Bypass the revision check. Only privileged operations honour it.
    pub force: bool,
    pub urgent: bool,
}

/// Normalized status mutation for one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub unit_id: UnitId,
    pub status: StatusCode,
    pub incident: Option<IncidentId>,
    pub destination: Option<String>,
    pub note: Option<String>,
}

/// State-changing operations the board supports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mutation {
    Status(StatusChange),
    Assignment {
        op: AssignmentOp,
        incident_id: IncidentId,
        unit_id: UnitId,
    },
    Logoff {
        unit_id: UnitId,
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
    NewIncident {
        scene_address: String,
        note: Option<String>,
        priority: Option<Priority>,
    },
    IncidentNote {
        incident_id: IncidentId,
        message: String,
    },
    CloseIncident {
        incident_id: IncidentId,
        disposition: String,
    },
    Message {
        to_role: String,
        message: String,
    },
    Broadcast {
        message: String,
    },
}

impl Mutation {
    pub fn unit_id(&self) -> Option<&UnitId> {
        match self {
            Mutation::Status(change) => Some(&change.unit_id),
            Mutation::Assignment { unit_id, .. }
            | Mutation::Logoff { unit_id }
            | Mutation::Touch { unit_id }
            | Mutation::Eta { unit_id, .. }
            | Mutation::Patient { unit_id, .. } => Some(unit_id),
            _ => None,
        }
    }

    pub fn incident_id(&self) -> Option<&IncidentId> {
        match self {
            Mutation::Status(change) => change.incident.as_ref(),
            Mutation::Assignment { incident_id, .. }
            | Mutation::IncidentNote { incident_id, .. }
            | Mutation::CloseIncident { incident_id, .. } => Some(incident_id),
            _ => None,
        }
    }
}

impl fmt::Display for Mutation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Mutation::Status(change) => {
                write!(f, "{} {}", change.unit_id, change.status)?;
                if let Some(incident) = &change.incident {
                    write!(f, " {incident}")?;
                }
                if let Some(destination) = &change.destination {
                    write!(f, " -> {destination}")?;
                }
                if let Some(note) = &change.note {
                    write!(f, " ; {note}")?;
                }
                Ok(())
            }
            Mutation::Assignment {
                op,
                incident_id,
                unit_id,
            } => write!(f, "{} {incident_id} {unit_id}", op.keyword()),
            Mutation::Logoff { unit_id } => write!(f, "LOGOFF {unit_id}"),
            Mutation::Touch { unit_id } => write!(f, "OK {unit_id}"),
            Mutation::Eta { unit_id, minutes } => write!(f, "ETA {unit_id} {minutes}"),
            Mutation::Patient { unit_id, text } => write!(f, "PAT {unit_id} {text}"),
            Mutation::NewIncident { scene_address, .. } => write!(f, "NEW {scene_address}"),
            Mutation::IncidentNote { incident_id, .. } => write!(f, "NOTE {incident_id}"),
            Mutation::CloseIncident { incident_id, .. } => write!(f, "CLOSE {incident_id}"),
            Mutation::Message { to_role, .. } => write!(f, "MSG {to_role}"),
            Mutation::Broadcast { .. } => write!(f, "BCAST"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRequest {
    pub mutation: Mutation,
    pub options: CommandOptions,
}

impl MutationRequest {
    pub fn new(mutation: Mutation) -> Self {
        Self {
            mutation,
            options: CommandOptions::default(),
        }
    }

    pub fn with_options(mutation: Mutation, options: CommandOptions) -> Self {
        Self { mutation, options }
    }
}

/// A non-mutating command handed to an external handler as typed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectAction {
    pub verb: String,
    pub argument: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlCommand {
    Undo,
    Refresh,
}

/// Result of interpreting one sub-command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParsedCommand {
    Mutate(MutationRequest),
    Direct(DirectAction),
    Control(ControlCommand),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_change_display_reads_like_the_board() {
        let mutation = Mutation::Status(StatusChange {
            unit_id: UnitId::new("M1"),
            status: StatusCode::Dispatched,
            incident: Some(IncidentId::new("26-0023")),
            destination: Some("SCMC".into()),
            note: None,
        });
        insta::assert_snapshot!(mutation.to_string(), @"M1 D 26-0023 -> SCMC");
    }

    #[test]
    fn unit_and_incident_accessors() {
        let mutation = Mutation::Assignment {
            op: AssignmentOp::Queue,
            incident_id: IncidentId::new("26-0001"),
            unit_id: UnitId::new("E4"),
        };
        assert_eq!(mutation.unit_id(), Some(&UnitId::new("E4")));
        assert_eq!(mutation.incident_id(), Some(&IncidentId::new("26-0001")));

        let broadcast = Mutation::Broadcast {
            message: "ALL UNITS".into(),
        };
        assert_eq!(broadcast.unit_id(), None);
    }
}
