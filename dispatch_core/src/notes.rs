//! Compatibility shim for bracket tags embedded in unit notes.
//!
//! Older clients stored ETA, location, disposition, and patient text inline
//! (`"pt stable [ETA:12] [LOC:HWY 97]"`). Incoming notes are split into
//! [`NoteTags`]; outgoing notes are only recombined when legacy tags are
//! enabled in configuration.

use dispatch_runtime::{NoteTags, UnitRecord};

const ETA: &str = "ETA";
const LOCATION: &str = "LOC";
const DISPOSITION: &str = "DISPO";
const PATIENT: &str = "PAT";

/// Split recognised `[KEY:value]` markers out of a note.
///
/// Unknown or malformed markers stay in the text untouched.
pub fn split_legacy_tags(note: &str) -> (String, NoteTags) {
    let mut tags = NoteTags::default();
    let mut text = String::with_capacity(note.len());
    let mut rest = note;

    while let Some(open) = rest.find('[') {
        text.push_str(&rest[..open]);
        let candidate = &rest[open..];
        let Some(close) = candidate.find(']') else {
            text.push_str(candidate);
            rest = "";
            break;
        };
        let inner = &candidate[1..close];
        if !take_tag(inner, &mut tags) {
            text.push_str(&candidate[..=close]);
        }
        rest = &candidate[close + 1..];
    }
    text.push_str(rest);

    let text = text.split_whitespace().collect::<Vec<_>>().join(" ");
    (text, tags)
}

fn take_tag(inner: &str, tags: &mut NoteTags) -> bool {
    let Some((key, value)) = inner.split_once(':') else {
        return false;
    };
    let value = value.trim();
    if value.is_empty() {
        return false;
    }
    match key.trim().to_ascii_uppercase().as_str() {
        ETA => match value.parse::<u32>() {
            Ok(minutes) => {
                tags.eta_minutes = Some(minutes);
                true
            }
            Err(_) => false,
        },
        LOCATION => {
            tags.location = Some(value.to_string());
            true
        }
        DISPOSITION => {
            tags.disposition = Some(value.to_string());
            true
        }
        PATIENT => {
            tags.patient = Some(value.to_string());
            true
        }
        _ => false,
    }
}

/// Render text plus tags in the combined legacy format.
pub fn compose_legacy_note(text: &str, tags: &NoteTags) -> String {
    let mut parts: Vec<String> = Vec::new();
    let text = text.trim();
    if !text.is_empty() {
        parts.push(text.to_string());
    }
    if let Some(minutes) = tags.eta_minutes {
        parts.push(format!("[{ETA}:{minutes}]"));
    }
    if let Some(location) = &tags.location {
        parts.push(format!("[{LOCATION}:{location}]"));
    }
    if let Some(disposition) = &tags.disposition {
        parts.push(format!("[{DISPOSITION}:{disposition}]"));
    }
    if let Some(patient) = &tags.patient {
        parts.push(format!("[{PATIENT}:{patient}]"));
    }
    parts.join(" ")
}

/// Move inline markers on a cached unit into its structured tags.
///
/// Structured fields the backend already sent take precedence over inline
/// markers. Running this twice is a no-op.
pub fn normalize_unit_note(unit: &mut UnitRecord) {
    if !unit.note.contains('[') {
        return;
    }
    let (text, inline) = split_legacy_tags(&unit.note);
    unit.note = text;
    let tags = &mut unit.tags;
    tags.eta_minutes = tags.eta_minutes.or(inline.eta_minutes);
    tags.location = tags.location.take().or(inline.location);
    tags.disposition = tags.disposition.take().or(inline.disposition);
    tags.patient = tags.patient.take().or(inline.patient);
}
