use std::collections::BTreeSet;
use std::num::ParseIntError;

use thiserror::Error;

use crate::commands::{
    CommandOptions, ControlCommand, DirectAction, Mutation, MutationRequest, ParsedCommand,
    StatusChange,
};
use crate::incidents::{looks_like_incident, resolve_incident_ref};
use crate::units::{canonicalize, resolve_unit_exact, resolve_unit_prefix, UnitAliasTable};
use crate::{AssignmentOp, IncidentId, Priority, StatusCode, UnitId};

pub const DEFAULT_CHAIN_SEPARATOR: char = '|';
pub const NOTE_SEPARATOR: char = ';';
pub const DEFAULT_WHOLE_LINE_VERBS: &[&str] = &["MSG", "BCAST", "NOTE", "SEARCH", "NEW"];
pub const DEFAULT_SINGLE_ARGUMENT_VERBS: &[&str] = &["BCAST", "SEARCH", "NEW", "HELP", "WHO"];

/// Verbs whose text keeps `;` as content instead of starting a note.
const FREE_TEXT_VERBS: &[&str] = &["MSG", "BCAST", "NOTE", "SEARCH"];

#[derive(Debug, Error)]
pub enum CommandParseError {
    #[error("empty command")]
    Empty,
    #[error("unrecognized command: {0}")]
    Unrecognized(String),
    #[error("{verb}: missing {argument}")]
    MissingArgument {
        verb: String,
        argument: &'static str,
    },
    #[error("{verb}: '{value}' is not a unit")]
    InvalidUnit { verb: String, value: String },
    #[error("{verb}: '{value}' is not an incident reference")]
    InvalidIncident { verb: String, value: String },
    #[error("invalid integer '{value}' for {context}: {source}")]
    InvalidInteger {
        value: String,
        context: &'static str,
        source: ParseIntError,
    },
    #[error("{verb}: unexpected '{value}'")]
    UnexpectedArgument { verb: String, value: String },
    #[error("command {position} ('{command}'): {source}")]
    InChain {
        position: usize,
        command: String,
        #[source]
        source: Box<CommandParseError>,
    },
}

impl CommandParseError {
    /// Innermost error, looking through chain positions.
    pub fn root(&self) -> &CommandParseError {
        match self {
            CommandParseError::InChain { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Configured command vocabulary.
#[derive(Debug, Clone)]
pub struct Grammar {
    chain_separator: char,
    whole_line_verbs: Vec<String>,
    single_argument_verbs: Vec<String>,
    aliases: UnitAliasTable,
}

impl Default for Grammar {
    fn default() -> Self {
        Self::new(
            DEFAULT_CHAIN_SEPARATOR,
            DEFAULT_WHOLE_LINE_VERBS.iter().copied(),
            DEFAULT_SINGLE_ARGUMENT_VERBS.iter().copied(),
            UnitAliasTable::default(),
        )
    }
}

impl Grammar {
    pub fn new<W, S, A, B>(
        chain_separator: char,
        whole_line_verbs: W,
        single_argument_verbs: S,
        aliases: UnitAliasTable,
    ) -> Self
    where
        W: IntoIterator<Item = A>,
        S: IntoIterator<Item = B>,
        A: AsRef<str>,
        B: AsRef<str>,
    {
        Self {
            chain_separator,
            whole_line_verbs: whole_line_verbs
                .into_iter()
                .map(|v| v.as_ref().to_ascii_uppercase())
                .collect(),
            single_argument_verbs: single_argument_verbs
                .into_iter()
                .map(|v| v.as_ref().to_ascii_uppercase())
                .collect(),
            aliases,
        }
    }

    pub fn with_aliases(mut self, aliases: UnitAliasTable) -> Self {
        self.aliases = aliases;
        self
    }

    pub fn chain_separator(&self) -> char {
        self.chain_separator
    }

    pub fn aliases(&self) -> &UnitAliasTable {
        &self.aliases
    }

    fn is_whole_line(&self, verb: &str) -> bool {
        self.whole_line_verbs
            .iter()
            .any(|v| v.eq_ignore_ascii_case(verb))
    }

    fn is_single_argument(&self, verb: &str) -> bool {
        self.single_argument_verbs
            .iter()
            .any(|v| v.eq_ignore_ascii_case(verb))
    }
}

/// What the interpreter needs to know about the board while parsing.
#[derive(Debug, Clone, Copy)]
pub struct ParseContext<'a> {
    pub grammar: &'a Grammar,
    pub known_incidents: &'a BTreeSet<IncidentId>,
    /// Full calendar year, used for incident key prefixes.
    pub year: i32,
    /// Unit a bare `<STATUS>` applies to.
    pub selected_unit: Option<&'a UnitId>,
}

/// Split a line into sub-commands on the chain separator.
///
/// When a sub-command starts with a whole-line verb the rest of the line,
/// separators included, belongs to it.
pub fn split_chain<'a>(line: &'a str, grammar: &Grammar) -> Vec<&'a str> {
    let separator = grammar.chain_separator;
    let mut parts = Vec::new();
    let mut rest = line.trim();
    while !rest.is_empty() {
        let verb = rest.split_whitespace().next().unwrap_or_default();
        if grammar.is_whole_line(verb) {
            parts.push(rest);
            break;
        }
        match rest.find(separator) {
            Some(idx) => {
                let head = rest[..idx].trim();
                if !head.is_empty() {
                    parts.push(head);
                }
                rest = rest[idx + separator.len_utf8()..].trim_start();
            }
            None => {
                parts.push(rest.trim_end());
                break;
            }
        }
    }
    parts
}

/// Verb, first argument, and untouched remainder of one sub-command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Segments<'a> {
    pub verb: &'a str,
    pub argument: Option<&'a str>,
    pub remainder: Option<&'a str>,
}

impl<'a> Segments<'a> {
    /// Argument and remainder joined back together.
    pub fn tail(&self) -> String {
        match (self.argument, self.remainder) {
            (Some(arg), Some(rest)) => format!("{arg} {rest}"),
            (Some(arg), None) => arg.to_string(),
            _ => String::new(),
        }
    }

    fn tokens(&self) -> Vec<&'a str> {
        let mut tokens = vec![self.verb];
        tokens.extend(self.argument);
        if let Some(rest) = self.remainder {
            tokens.extend(rest.split_whitespace());
        }
        tokens
    }
}

/// Split a sub-command into verb / argument / remainder.
///
/// Single-argument verbs take everything after the verb as their argument.
/// Otherwise the command is split at its first two whitespace boundaries only,
/// so the remainder keeps its inner spacing.
pub fn segment(command: &str, single_argument: bool) -> Segments<'_> {
    let command = command.trim();
    let Some((verb, rest)) = command.split_once(char::is_whitespace) else {
        return Segments {
            verb: command,
            argument: None,
            remainder: None,
        };
    };
    let rest = rest.trim();
    if rest.is_empty() {
        return Segments {
            verb,
            argument: None,
            remainder: None,
        };
    }
    if single_argument {
        return Segments {
            verb,
            argument: Some(rest),
            remainder: None,
        };
    }
    match rest.split_once(char::is_whitespace) {
        Some((argument, remainder)) => Segments {
            verb,
            argument: Some(argument),
            remainder: Some(remainder.trim_start()).filter(|r| !r.is_empty()),
        },
        None => Segments {
            verb,
            argument: Some(rest),
            remainder: None,
        },
    }
}

/// Parse a full input line, chains included. One bad sub-command fails the
/// whole line.
pub fn parse_line(
    line: &str,
    ctx: &ParseContext<'_>,
) -> Result<Vec<ParsedCommand>, CommandParseError> {
    let parts = split_chain(line, ctx.grammar);
    if parts.is_empty() {
        return Err(CommandParseError::Empty);
    }
    let chained = parts.len() > 1;
    parts
        .iter()
        .enumerate()
        .map(|(idx, part)| {
            parse_command(part, ctx).map_err(|source| {
                if chained {
                    CommandParseError::InChain {
                        position: idx + 1,
                        command: part.to_string(),
                        source: Box::new(source),
                    }
                } else {
                    source
                }
            })
        })
        .collect()
}

/// Parse a single sub-command.
pub fn parse_command(
    command: &str,
    ctx: &ParseContext<'_>,
) -> Result<ParsedCommand, CommandParseError> {
    let command = command.trim();
    let first = command.split_whitespace().next().ok_or(CommandParseError::Empty)?;
    let verb = first.to_ascii_uppercase();

    let (head, note) = if FREE_TEXT_VERBS.contains(&verb.as_str()) {
        (command, None)
    } else {
        split_note(command)
    };
    let segments = segment(head, ctx.grammar.is_single_argument(&verb));

    match verb.as_str() {
        "UNDO" => control(&verb, &segments, ControlCommand::Undo),
        "REFRESH" => control(&verb, &segments, ControlCommand::Refresh),
        "ASSIGN" | "QUEUE" | "PRIMARY" | "CLEAR" => {
            let op = AssignmentOp::from_keyword(&verb)
                .ok_or_else(|| CommandParseError::Unrecognized(command.to_string()))?;
            parse_assignment(op, &verb, &segments, ctx)
        }
        "LOGOFF" => {
            let (unit_id, options) = parse_unit_operand(&verb, &segments, ctx)?;
            Ok(mutate(Mutation::Logoff { unit_id }, options))
        }
        "OK" => {
            let (unit_id, options) = parse_unit_operand(&verb, &segments, ctx)?;
            Ok(mutate(Mutation::Touch { unit_id }, options))
        }
        "ETA" => parse_eta(&verb, &segments, ctx),
        "PAT" => parse_patient(&verb, &segments, ctx),
        "NEW" => parse_new_incident(&verb, &segments, note),
        "NOTE" => {
            let incident_id = required_incident(&verb, segments.argument, ctx)?;
            let message = segments
                .remainder
                .ok_or_else(|| missing(&verb, "note text"))?;
            Ok(mutate(
                Mutation::IncidentNote {
                    incident_id,
                    message: message.to_string(),
                },
                CommandOptions::default(),
            ))
        }
        "CLOSE" => {
            let incident_id = required_incident(&verb, segments.argument, ctx)?;
            let disposition = segments
                .remainder
                .map(|d| d.trim().to_ascii_uppercase())
                .unwrap_or_default();
            Ok(mutate(
                Mutation::CloseIncident {
                    incident_id,
                    disposition,
                },
                CommandOptions::default(),
            ))
        }
        "MSG" => parse_message(&verb, head),
        "BCAST" => parse_broadcast(&verb, &segments),
        "WHO" | "HELP" | "SEARCH" => direct(&verb, head, false),
        "INFO" | "HIST" => direct(&verb, head, true),
        _ => parse_status(&segments, note, ctx),
    }
}

fn split_note(command: &str) -> (&str, Option<String>) {
    match command.split_once(NOTE_SEPARATOR) {
        Some((head, note)) => {
            let note = note.trim();
            (
                head.trim_end(),
                (!note.is_empty()).then(|| note.to_string()),
            )
        }
        None => (command, None),
    }
}

fn mutate(mutation: Mutation, options: CommandOptions) -> ParsedCommand {
    ParsedCommand::Mutate(MutationRequest::with_options(mutation, options))
}

fn missing(verb: &str, argument: &'static str) -> CommandParseError {
    CommandParseError::MissingArgument {
        verb: verb.to_string(),
        argument,
    }
}

fn control(
    verb: &str,
    segments: &Segments<'_>,
    command: ControlCommand,
) -> Result<ParsedCommand, CommandParseError> {
    match segments.argument {
        Some(extra) => Err(CommandParseError::UnexpectedArgument {
            verb: verb.to_string(),
            value: extra.to_string(),
        }),
        None => Ok(ParsedCommand::Control(command)),
    }
}

fn direct(verb: &str, head: &str, needs_argument: bool) -> Result<ParsedCommand, CommandParseError> {
    let argument = rest_after_first(head).trim_end().to_string();
    if needs_argument && argument.is_empty() {
        return Err(missing(verb, "argument"));
    }
    Ok(ParsedCommand::Direct(DirectAction {
        verb: verb.to_string(),
        argument,
    }))
}

/// Pull trailing `FORCE` / `URGENT` keywords off a token list. The same
/// words anywhere else stay ordinary content.
fn take_options<'a>(tokens: impl IntoIterator<Item = &'a str>) -> (Vec<&'a str>, CommandOptions) {
    let mut options = CommandOptions::default();
    let mut kept: Vec<&str> = tokens.into_iter().collect();
    while let Some(last) = kept.last() {
        if last.eq_ignore_ascii_case("FORCE") {
            options.force = true;
        } else if last.eq_ignore_ascii_case("URGENT") {
            options.urgent = true;
        } else {
            break;
        }
        kept.pop();
    }
    (kept, options)
}

fn required_incident(
    verb: &str,
    token: Option<&str>,
    ctx: &ParseContext<'_>,
) -> Result<IncidentId, CommandParseError> {
    let token = token.ok_or_else(|| missing(verb, "incident"))?;
    resolve_incident_ref(token, ctx.known_incidents, ctx.year).ok_or_else(|| {
        CommandParseError::InvalidIncident {
            verb: verb.to_string(),
            value: token.to_string(),
        }
    })
}

fn parse_assignment(
    op: AssignmentOp,
    verb: &str,
    segments: &Segments<'_>,
    ctx: &ParseContext<'_>,
) -> Result<ParsedCommand, CommandParseError> {
    let incident_id = required_incident(verb, segments.argument, ctx)?;
    let remainder = segments.remainder.ok_or_else(|| missing(verb, "unit"))?;
    let (tokens, options) = take_options(remainder.split_whitespace());
    let unit_text = tokens.join(" ");
    let unit_id = resolve_unit_exact(&unit_text, ctx.grammar.aliases()).ok_or_else(|| {
        CommandParseError::InvalidUnit {
            verb: verb.to_string(),
            value: unit_text.clone(),
        }
    })?;
    Ok(mutate(
        Mutation::Assignment {
            op,
            incident_id,
            unit_id,
        },
        options,
    ))
}

fn parse_unit_operand(
    verb: &str,
    segments: &Segments<'_>,
    ctx: &ParseContext<'_>,
) -> Result<(UnitId, CommandOptions), CommandParseError> {
    let tail = segments.tail();
    let (tokens, options) = take_options(tail.split_whitespace());
    if tokens.is_empty() {
        return Err(missing(verb, "unit"));
    }
    let unit_text = tokens.join(" ");
    let unit_id = resolve_unit_exact(&unit_text, ctx.grammar.aliases()).ok_or_else(|| {
        CommandParseError::InvalidUnit {
            verb: verb.to_string(),
            value: unit_text.clone(),
        }
    })?;
    Ok((unit_id, options))
}

fn parse_eta(
    verb: &str,
    segments: &Segments<'_>,
    ctx: &ParseContext<'_>,
) -> Result<ParsedCommand, CommandParseError> {
    let tail = segments.tail();
    let mut tokens: Vec<&str> = tail.split_whitespace().collect();
    let minutes_str = tokens.pop().ok_or_else(|| missing(verb, "unit"))?;
    if tokens.is_empty() {
        return Err(missing(verb, "minutes"));
    }
    let minutes = parse_u32(minutes_str, "eta minutes")?;
    let unit_text = tokens.join(" ");
    let unit_id = resolve_unit_exact(&unit_text, ctx.grammar.aliases()).ok_or_else(|| {
        CommandParseError::InvalidUnit {
            verb: verb.to_string(),
            value: unit_text.clone(),
        }
    })?;
    Ok(mutate(
        Mutation::Eta { unit_id, minutes },
        CommandOptions::default(),
    ))
}

fn parse_patient(
    verb: &str,
    segments: &Segments<'_>,
    ctx: &ParseContext<'_>,
) -> Result<ParsedCommand, CommandParseError> {
    let tail = segments.tail();
    let (unit_id, consumed) = resolve_unit_prefix(&tail, ctx.grammar.aliases())
        .map(|(unit, rest)| {
            let consumed = canonicalize(&tail).split_whitespace().count()
                - rest.split_whitespace().count();
            (unit, consumed)
        })
        .ok_or_else(|| missing(verb, "unit"))?;
    let text = skip_canonical_tokens(&tail, consumed).trim();
    if text.is_empty() {
        return Err(missing(verb, "patient text"));
    }
    Ok(mutate(
        Mutation::Patient {
            unit_id,
            text: text.to_string(),
        },
        CommandOptions::default(),
    ))
}

/// Skip `count` raw tokens that survive canonicalization, returning the raw
/// text after them.
fn skip_canonical_tokens(raw: &str, count: usize) -> &str {
    let mut rest = raw.trim_start();
    let mut skipped = 0;
    while skipped < count && !rest.is_empty() {
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        if !canonicalize(&rest[..end]).is_empty() {
            skipped += 1;
        }
        rest = rest[end..].trim_start();
    }
    rest
}

fn parse_new_incident(
    verb: &str,
    segments: &Segments<'_>,
    note: Option<String>,
) -> Result<ParsedCommand, CommandParseError> {
    let address = segments
        .argument
        .ok_or_else(|| missing(verb, "scene address"))?;
    let (priority, address) = match address.split_once(char::is_whitespace) {
        Some((first, rest)) => match parse_priority(first) {
            Some(priority) => (Some(priority), rest.trim()),
            None => (None, address),
        },
        None => (None, address),
    };
    if address.is_empty() {
        return Err(missing(verb, "scene address"));
    }
    Ok(mutate(
        Mutation::NewIncident {
            scene_address: address.to_string(),
            note,
            priority,
        },
        CommandOptions::default(),
    ))
}

fn parse_priority(token: &str) -> Option<Priority> {
    let digits = token
        .strip_prefix('P')
        .or_else(|| token.strip_prefix('p'))?;
    match digits.parse::<u8>() {
        Ok(level @ 1..=9) if digits.len() == 1 => Some(Priority(level)),
        _ => None,
    }
}

fn parse_message(verb: &str, head: &str) -> Result<ParsedCommand, CommandParseError> {
    let mut options = CommandOptions::default();
    let mut rest = rest_after_first(head);
    if let Some((first, tail)) = rest.split_once(char::is_whitespace) {
        if first.eq_ignore_ascii_case("URGENT") {
            options.urgent = true;
            rest = tail.trim_start();
        }
    }
    let (role, message) = match rest.split_once(char::is_whitespace) {
        Some((role, message)) => (role, message.trim()),
        None => (rest, ""),
    };
    if role.is_empty() {
        return Err(missing(verb, "recipient"));
    }
    if message.is_empty() {
        return Err(missing(verb, "message text"));
    }
    Ok(mutate(
        Mutation::Message {
            to_role: role.to_ascii_uppercase(),
            message: message.to_string(),
        },
        options,
    ))
}

fn rest_after_first(text: &str) -> &str {
    text.trim()
        .split_once(char::is_whitespace)
        .map(|(_, rest)| rest.trim_start())
        .unwrap_or_default()
}

fn parse_broadcast(verb: &str, segments: &Segments<'_>) -> Result<ParsedCommand, CommandParseError> {
    let text = segments
        .argument
        .ok_or_else(|| missing(verb, "message text"))?;
    let mut options = CommandOptions::default();
    let message = match text.split_once(char::is_whitespace) {
        Some((first, rest)) if first.eq_ignore_ascii_case("URGENT") => {
            options.urgent = true;
            rest.trim()
        }
        _ => text,
    };
    if message.is_empty() || message.eq_ignore_ascii_case("URGENT") {
        return Err(missing(verb, "message text"));
    }
    Ok(mutate(
        Mutation::Broadcast {
            message: message.to_string(),
        },
        options,
    ))
}

/// `<STATUS> <UNIT> ...` or `<UNIT> <STATUS>`.
///
/// A leading status code wins; otherwise a trailing one. With two tokens that
/// are both status codes the first is the status.
fn parse_status(
    segments: &Segments<'_>,
    note: Option<String>,
    ctx: &ParseContext<'_>,
) -> Result<ParsedCommand, CommandParseError> {
    let (tokens, options) = take_options(segments.tokens());
    let unrecognized = || CommandParseError::Unrecognized(segments.tokens().join(" "));
    let Some(first) = tokens.first() else {
        return Err(unrecognized());
    };

    if let Some(status) = StatusCode::from_code(first) {
        if tokens.len() == 1 {
            let unit_id = ctx
                .selected_unit
                .cloned()
                .ok_or_else(|| missing(status.code(), "unit"))?;
            return Ok(status_change(unit_id, status, None, None, note, options));
        }
        let rest = tokens[1..].join(" ");
        let (unit_id, leftover) = resolve_unit_prefix(&rest, ctx.grammar.aliases()).ok_or_else(
            || CommandParseError::InvalidUnit {
                verb: status.code().to_string(),
                value: rest.clone(),
            },
        )?;
        let (incident, destination) = parse_status_tail(&leftover, ctx);
        return Ok(status_change(
            unit_id,
            status,
            incident,
            destination,
            note,
            options,
        ));
    }

    if tokens.len() >= 2 {
        if let Some(status) = tokens.last().and_then(|t| StatusCode::from_code(t)) {
            let unit_text = tokens[..tokens.len() - 1].join(" ");
            let unit_id = resolve_unit_exact(&unit_text, ctx.grammar.aliases()).ok_or_else(|| {
                CommandParseError::InvalidUnit {
                    verb: status.code().to_string(),
                    value: unit_text.clone(),
                }
            })?;
            return Ok(status_change(unit_id, status, None, None, note, options));
        }
    }

    Err(unrecognized())
}

/// Whatever follows the unit in a status-first command: an optional incident
/// reference, then an optional destination.
fn parse_status_tail(leftover: &str, ctx: &ParseContext<'_>) -> (Option<IncidentId>, Option<String>) {
    let mut tokens = leftover.split_whitespace().peekable();
    let incident = match tokens.peek() {
        Some(token) if looks_like_incident(token) => {
            let incident = resolve_incident_ref(token, ctx.known_incidents, ctx.year);
            tokens.next();
            incident
        }
        _ => None,
    };
    let destination = tokens.collect::<Vec<_>>().join(" ");
    (incident, (!destination.is_empty()).then_some(destination))
}

fn status_change(
    unit_id: UnitId,
    status: StatusCode,
    incident: Option<IncidentId>,
    destination: Option<String>,
    note: Option<String>,
    options: CommandOptions,
) -> ParsedCommand {
    mutate(
        Mutation::Status(StatusChange {
            unit_id,
            status,
            incident,
            destination,
            note,
        }),
        options,
    )
}

fn parse_u32(value: &str, context: &'static str) -> Result<u32, CommandParseError> {
    value
        .parse::<u32>()
        .map_err(|source| CommandParseError::InvalidInteger {
            value: value.to_string(),
            context,
            source,
        })
}
