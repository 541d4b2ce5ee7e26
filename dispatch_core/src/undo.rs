use std::collections::VecDeque;

use chrono::{DateTime, Duration, Utc};

use crate::dispatcher::Step;

pub const DEFAULT_UNDO_CAPACITY: usize = 3;
pub const DEFAULT_UNDO_TTL_SECS: i64 = 300;

/// A reversible command: the calls that put things back, as data.
#[derive(Debug, Clone, PartialEq)]
pub struct UndoEntry {
    pub description: String,
    pub inverse: Vec<Step>,
    pub created_at: DateTime<Utc>,
}

impl UndoEntry {
    pub fn new(description: impl Into<String>, inverse: Vec<Step>, created_at: DateTime<Utc>) -> Self {
        Self {
            description: description.into(),
            inverse,
            created_at,
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.created_at
    }
}

/// Result of popping the registry.
#[derive(Debug, Clone, PartialEq)]
pub enum UndoPop {
    Empty,
    /// The newest entry was too old; it has been discarded unexecuted.
    Expired(UndoEntry),
    Ready(UndoEntry),
}

/// Bounded, time-limited stack of inverse actions.
#[derive(Debug, Clone)]
pub struct UndoRegistry {
    entries: VecDeque<UndoEntry>,
    capacity: usize,
    ttl: Duration,
}

impl Default for UndoRegistry {
    fn default() -> Self {
        Self::new(
            DEFAULT_UNDO_CAPACITY,
            Duration::seconds(DEFAULT_UNDO_TTL_SECS),
        )
    }
}

impl UndoRegistry {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
            ttl,
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Newest first.
    pub fn descriptions(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().rev().map(|entry| entry.description.as_str())
    }

    /// Push an entry, evicting and returning the oldest one when full.
    pub fn push(&mut self, entry: UndoEntry) -> Option<UndoEntry> {
        let evicted = if self.entries.len() >= self.capacity {
            self.entries.pop_front()
        } else {
            None
        };
        if let Some(evicted) = &evicted {
            tracing::debug!(
                target: "dispatch::engine",
                description = %evicted.description,
                "undo.evicted"
            );
        }
        self.entries.push_back(entry);
        evicted
    }

    /// Remove the newest entry. It is handed back for execution only if it is
    /// still within the validity window.
    pub fn pop(&mut self, now: DateTime<Utc>) -> UndoPop {
        let Some(entry) = self.entries.pop_back() else {
            return UndoPop::Empty;
        };
        if entry.age(now) > self.ttl {
            tracing::info!(
                target: "dispatch::engine",
                description = %entry.description,
                age_secs = entry.age(now).num_seconds(),
                "undo.expired"
            );
            return UndoPop::Expired(entry);
        }
        UndoPop::Ready(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn entry(name: &str, at: DateTime<Utc>) -> UndoEntry {
        UndoEntry::new(name, Vec::new(), at)
    }

    #[test]
    fn fourth_push_evicts_exactly_the_oldest() {
        let mut registry = UndoRegistry::default();
        for name in ["a", "b", "c"] {
            assert_eq!(registry.push(entry(name, t0())), None);
        }
        let evicted = registry.push(entry("d", t0())).unwrap();
        assert_eq!(evicted.description, "a");
        assert_eq!(registry.descriptions().collect::<Vec<_>>(), ["d", "c", "b"]);
    }

    #[test]
    fn pop_returns_newest_first() {
        let mut registry = UndoRegistry::default();
        registry.push(entry("a", t0()));
        registry.push(entry("b", t0()));
        assert!(matches!(registry.pop(t0()), UndoPop::Ready(e) if e.description == "b"));
        assert!(matches!(registry.pop(t0()), UndoPop::Ready(e) if e.description == "a"));
        assert_eq!(registry.pop(t0()), UndoPop::Empty);
    }

    #[test]
    fn stale_entry_is_discarded_not_executed() {
        let mut registry = UndoRegistry::default();
        registry.push(entry("old", t0()));
        let later = t0() + Duration::seconds(DEFAULT_UNDO_TTL_SECS + 1);
        assert!(matches!(registry.pop(later), UndoPop::Expired(e) if e.description == "old"));
        assert!(registry.is_empty());
    }

    #[test]
    fn entry_at_exactly_the_limit_is_still_valid() {
        let mut registry = UndoRegistry::default();
        registry.push(entry("edge", t0()));
        let later = t0() + Duration::seconds(DEFAULT_UNDO_TTL_SECS);
        assert!(matches!(registry.pop(later), UndoPop::Ready(_)));
    }
}
