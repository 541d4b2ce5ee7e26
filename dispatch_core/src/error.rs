use std::fmt;

use dispatch_runtime::{CommandParseError, IncidentId, UnitId};
use thiserror::Error;

use crate::assignments::StackError;
use crate::backend::TransportError;
use crate::concurrency::{ConflictRecord, GuardError};

/// Operator-facing failure categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Parse,
    Validation,
    Conflict,
    Transport,
    Expiry,
    /// The backend answered with a plain failure envelope.
    Rejected,
    /// An undo entry's inverse calls failed.
    UndoFailed,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::Parse => "parse",
            ErrorKind::Validation => "validation",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Transport => "transport",
            ErrorKind::Expiry => "expiry",
            ErrorKind::Rejected => "rejected",
            ErrorKind::UndoFailed => "undo_failed",
        })
    }
}

/// A well-formed command that does not fit the current board.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("unknown unit {0}")]
    UnknownUnit(UnitId),
    #[error("unknown incident {0}")]
    UnknownIncident(IncidentId),
    #[error("{verb} does not accept FORCE")]
    ForceNotAllowed { verb: &'static str },
    #[error("{verb} does not accept URGENT")]
    UrgentNotAllowed { verb: &'static str },
    #[error("FORCE requires the override privilege")]
    ForceNotPermitted,
    #[error(transparent)]
    Stack(#[from] StackError),
    #[error(transparent)]
    Guard(#[from] GuardError),
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Parse(#[from] CommandParseError),
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("conflict: {0}")]
    Conflict(ConflictRecord),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error("{verb} rejected: {message}")]
    Rejected { verb: &'static str, message: String },
    #[error("undo of '{description}' expired after {age_secs}s")]
    UndoExpired { description: String, age_secs: i64 },
    #[error("undo of '{description}' failed: {source}")]
    UndoFailed {
        description: String,
        #[source]
        source: Box<DispatchError>,
    },
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Parse(_) => ErrorKind::Parse,
            DispatchError::Validation(_) => ErrorKind::Validation,
            DispatchError::Conflict(_) => ErrorKind::Conflict,
            DispatchError::Transport(_) => ErrorKind::Transport,
            DispatchError::Rejected { .. } => ErrorKind::Rejected,
            DispatchError::UndoExpired { .. } => ErrorKind::Expiry,
            DispatchError::UndoFailed { .. } => ErrorKind::UndoFailed,
        }
    }
}

impl From<GuardError> for DispatchError {
    fn from(err: GuardError) -> Self {
        DispatchError::Validation(ValidationError::Guard(err))
    }
}
