//! Command interpretation for the dispatch board.
//!
//! This crate re-exports the data contracts from `dispatch_schema` and turns
//! operator-typed lines into normalized [`ParsedCommand`]s. It knows nothing
//! about the backend or the local state cache; resolution against the board
//! happens through the [`ParseContext`] the caller supplies.

pub mod command_text;
pub mod commands;
pub mod incidents;
pub mod units;

pub use dispatch_schema::*;

pub use command_text::{
    parse_command, parse_line, segment, split_chain, CommandParseError, Grammar, ParseContext,
    Segments,
};
pub use commands::{
    CommandOptions, ControlCommand, DirectAction, Mutation, MutationRequest, ParsedCommand,
    StatusChange,
};
pub use incidents::{looks_like_incident, resolve_incident_ref};
pub use units::{canonicalize, resolve_unit_exact, resolve_unit_prefix, UnitAliasTable};
