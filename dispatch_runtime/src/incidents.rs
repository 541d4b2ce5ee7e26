use std::collections::BTreeSet;

use dispatch_schema::IncidentId;

/// A bare incident number: three or four digits.
pub fn is_bare_incident_number(token: &str) -> bool {
    (3..=4).contains(&token.len()) && token.bytes().all(|b| b.is_ascii_digit())
}

/// A fully qualified key: two-digit year, hyphen, one to four digits.
pub fn is_qualified_incident_key(token: &str) -> bool {
    match token.split_once('-') {
        Some((year, seq)) => {
            year.len() == 2
                && year.bytes().all(|b| b.is_ascii_digit())
                && (1..=4).contains(&seq.len())
                && seq.bytes().all(|b| b.is_ascii_digit())
        }
        None => false,
    }
}

pub fn looks_like_incident(token: &str) -> bool {
    is_bare_incident_number(token) || is_qualified_incident_key(token)
}

/// Resolve an operator-typed incident reference to a key.
///
/// A qualified `YY-N` key is normalized to four digits. A bare number is
/// matched against known keys by numeric segment, preferring the current
/// year and then the newest key; with no match a current-year key is
/// synthesized. Returns `None` when the token is not an incident reference.
pub fn resolve_incident_ref(
    token: &str,
    known: &BTreeSet<IncidentId>,
    year: i32,
) -> Option<IncidentId> {
    let token = token.trim();
    if is_qualified_incident_key(token) {
        let (prefix, seq) = token.split_once('-')?;
        return Some(IncidentId::new(format!("{prefix}-{seq:0>4}")));
    }
    if !is_bare_incident_number(token) {
        return None;
    }

    let padded = format!("{token:0>4}");
    let year_prefix = format!("{:02}", year.rem_euclid(100));
    let matches = known
        .iter()
        .filter(|key| key.sequence() == Some(padded.as_str()));

    // BTreeSet iterates ascending, so the last match is the newest key
    let mut newest = None;
    for key in matches {
        if key.year_prefix() == Some(year_prefix.as_str()) {
            return Some(key.clone());
        }
        newest = Some(key);
    }
    if let Some(key) = newest {
        return Some(key.clone());
    }
    Some(IncidentId::new(format!("{year_prefix}-{padded}")))
}
