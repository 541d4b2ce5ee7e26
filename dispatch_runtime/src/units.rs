use dispatch_schema::UnitId;

/// Uppercase, strip punctuation other than `-`, and collapse whitespace.
pub fn canonicalize(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' {
                c.to_ascii_uppercase()
            } else if c.is_whitespace() {
                ' '
            } else {
                // punctuation separates nothing, it just disappears
                '\0'
            }
        })
        .filter(|c| *c != '\0')
        .collect();
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Whether a canonical token can stand as a unit id on its own.
pub fn is_unit_token(token: &str) -> bool {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphanumeric() => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '-')
        }
        _ => false,
    }
}

/// Shorthand labels operators type for units ("MED 1" for `M1`).
///
/// Labels are kept longest-first so a multi-word alias wins over any shorter
/// label that happens to prefix it.
#[derive(Debug, Clone, Default)]
pub struct UnitAliasTable {
    entries: Vec<(String, UnitId)>,
}

impl UnitAliasTable {
    pub fn new<I, L>(aliases: I) -> Self
    where
        I: IntoIterator<Item = (L, UnitId)>,
        L: AsRef<str>,
    {
        let mut entries: Vec<(String, UnitId)> = aliases
            .into_iter()
            .map(|(label, unit)| (canonicalize(label.as_ref()), unit))
            .filter(|(label, _)| !label.is_empty())
            .collect();
        entries.sort_by(|a, b| b.0.len().cmp(&a.0.len()).then_with(|| a.0.cmp(&b.0)));
        entries.dedup_by(|a, b| a.0 == b.0);
        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match an alias at the start of already-canonical text, returning the
    /// unit and whatever follows the label.
    pub fn match_prefix<'a>(&self, canonical: &'a str) -> Option<(UnitId, &'a str)> {
        self.entries.iter().find_map(|(label, unit)| {
            let rest = canonical.strip_prefix(label.as_str())?;
            if rest.is_empty() {
                Some((unit.clone(), rest))
            } else {
                rest.strip_prefix(' ').map(|rest| (unit.clone(), rest))
            }
        })
    }
}

/// Resolve the unit at the start of `text`.
///
/// The alias table is consulted first; otherwise the first canonical token is
/// taken verbatim as the unit id. Returns the unit and the canonical leftover.
pub fn resolve_unit_prefix(text: &str, aliases: &UnitAliasTable) -> Option<(UnitId, String)> {
    let canonical = canonicalize(text);
    if canonical.is_empty() {
        return None;
    }
    if let Some((unit, rest)) = aliases.match_prefix(&canonical) {
        return Some((unit, rest.to_string()));
    }
    let (first, rest) = match canonical.split_once(' ') {
        Some((first, rest)) => (first, rest),
        None => (canonical.as_str(), ""),
    };
    if !is_unit_token(first) {
        return None;
    }
    Some((UnitId::new(first), rest.to_string()))
}

/// Resolve text that must name exactly one unit and nothing else.
pub fn resolve_unit_exact(text: &str, aliases: &UnitAliasTable) -> Option<UnitId> {
    match resolve_unit_prefix(text, aliases) {
        Some((unit, rest)) if rest.is_empty() => Some(unit),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aliases() -> UnitAliasTable {
        UnitAliasTable::new([
            ("MED", UnitId::new("M")),
            ("MED 1", UnitId::new("M1")),
            ("MED 12", UnitId::new("M12")),
            ("ENGINE 4", UnitId::new("E4")),
        ])
    }

    #[test]
    fn canonicalize_strips_punctuation_but_keeps_hyphen() {
        assert_eq!(canonicalize("  m-1, (north)  "), "M-1 NORTH");
        assert_eq!(canonicalize("med\t 1."), "MED 1");
    }

    #[test]
    fn longest_alias_wins() {
        let table = aliases();
        assert_eq!(
            resolve_unit_prefix("med 12 0023", &table),
            Some((UnitId::new("M12"), "0023".to_string()))
        );
        assert_eq!(
            resolve_unit_prefix("Med 1", &table),
            Some((UnitId::new("M1"), String::new()))
        );
    }

    #[test]
    fn alias_must_end_on_a_word_boundary() {
        let table = UnitAliasTable::new([("MED 1", UnitId::new("M1"))]);
        assert_eq!(
            resolve_unit_prefix("MED 15", &table),
            Some((UnitId::new("MED"), "15".to_string()))
        );
    }

    #[test]
    fn bare_token_is_taken_verbatim() {
        let table = aliases();
        assert_eq!(resolve_unit_exact("e-12", &table), Some(UnitId::new("E-12")));
        assert_eq!(resolve_unit_exact("E12 extra", &table), None);
        assert_eq!(resolve_unit_exact("--", &table), None);
    }
}
