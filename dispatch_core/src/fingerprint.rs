//! Per-section change detection.
//!
//! Each section's fingerprint hashes only the fields that affect what
//! consumers show or decide, in cache order. Revision markers and authorship
//! are not hashed, so a touch that only bumps the marker is not a change.
//! Distinct states hashing alike is possible in principle.

use std::fmt;

use dispatch_runtime::StageTimes;

use crate::cache::StateCache;
use crate::hashing::FnvHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Section {
    Units,
    Incidents,
    Banners,
    Messages,
}

impl Section {
    pub const ALL: [Section; 4] = [
        Section::Units,
        Section::Incidents,
        Section::Banners,
        Section::Messages,
    ];
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Units => "units",
            Section::Incidents => "incidents",
            Section::Banners => "banners",
            Section::Messages => "messages",
        })
    }
}

/// One short digest per section.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fingerprints {
    pub units: String,
    pub incidents: String,
    pub banners: String,
    pub messages: String,
}

impl Fingerprints {
    pub fn compute(cache: &StateCache) -> Self {
        Self {
            units: units_fingerprint(cache),
            incidents: incidents_fingerprint(cache),
            banners: banners_fingerprint(cache),
            messages: messages_fingerprint(cache),
        }
    }

    pub fn get(&self, section: Section) -> &str {
        match section {
            Section::Units => &self.units,
            Section::Incidents => &self.incidents,
            Section::Banners => &self.banners,
            Section::Messages => &self.messages,
        }
    }
}

/// Changed/unchanged flag per section.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SectionChanges {
    pub units: bool,
    pub incidents: bool,
    pub banners: bool,
    pub messages: bool,
}

impl SectionChanges {
    pub fn all() -> Self {
        Self {
            units: true,
            incidents: true,
            banners: true,
            messages: true,
        }
    }

    pub fn any(&self) -> bool {
        self.units || self.incidents || self.banners || self.messages
    }

    pub fn get(&self, section: Section) -> bool {
        match section {
            Section::Units => self.units,
            Section::Incidents => self.incidents,
            Section::Banners => self.banners,
            Section::Messages => self.messages,
        }
    }

    /// Union of two change sets.
    pub fn merge(&mut self, other: SectionChanges) {
        self.units |= other.units;
        self.incidents |= other.incidents;
        self.banners |= other.banners;
        self.messages |= other.messages;
    }

    pub fn changed_sections(&self) -> Vec<Section> {
        Section::ALL
            .into_iter()
            .filter(|section| self.get(*section))
            .collect()
    }
}

/// Remembers the previous cycle's fingerprints.
#[derive(Debug, Default)]
pub struct ChangeDetector {
    previous: Option<Fingerprints>,
}

impl ChangeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Compare the cache against the previous cycle. The first call reports
    /// every section as changed.
    pub fn detect(&mut self, cache: &StateCache) -> SectionChanges {
        let current = Fingerprints::compute(cache);
        let changes = match &self.previous {
            None => SectionChanges::all(),
            Some(previous) => SectionChanges {
                units: previous.units != current.units,
                incidents: previous.incidents != current.incidents,
                banners: previous.banners != current.banners,
                messages: previous.messages != current.messages,
            },
        };
        self.previous = Some(current);
        changes
    }

    pub fn previous(&self) -> Option<&Fingerprints> {
        self.previous.as_ref()
    }
}

fn opt(value: Option<&str>) -> &str {
    value.unwrap_or("")
}

fn flag(value: bool) -> &'static str {
    if value {
        "1"
    } else {
        "0"
    }
}

fn units_fingerprint(cache: &StateCache) -> String {
    let mut hasher = FnvHasher::new();
    for unit in cache.units() {
        let eta = unit.tags.eta_minutes.map(|m| m.to_string()).unwrap_or_default();
        hasher
            .field(unit.unit_id.as_str())
            .field(unit.status.code())
            .field(opt(unit.incident.as_ref().map(|i| i.as_str())))
            .field(opt(unit.destination.as_deref()))
            .field(&unit.note)
            .field(&eta)
            .field(opt(unit.tags.location.as_deref()))
            .field(opt(unit.tags.disposition.as_deref()))
            .field(opt(unit.tags.patient.as_deref()))
            .field(flag(unit.active))
            .end_record();
    }
    hasher.hex()
}

fn stage_times(hasher: &mut FnvHasher, times: &StageTimes) {
    for stamp in [
        times.created,
        times.dispatched,
        times.enroute,
        times.on_scene,
        times.transporting,
        times.closed,
    ] {
        let value = stamp.map(|t| t.timestamp().to_string()).unwrap_or_default();
        hasher.field(&value);
    }
}

fn incidents_fingerprint(cache: &StateCache) -> String {
    let mut hasher = FnvHasher::new();
    for incident in cache.incidents() {
        let priority = incident.priority.map(|p| p.to_string()).unwrap_or_default();
        let status = format!("{:?}", incident.status);
        hasher
            .field(incident.incident_id.as_str())
            .field(&status)
            .field(&priority)
            .field(&incident.incident_type)
            .field(&incident.scene_address)
            .field(opt(incident.destination.as_deref()))
            .field(&incident.note);
        stage_times(&mut hasher, &incident.times);
        for related in &incident.related {
            hasher.field(related.as_str());
        }
        hasher.end_record();
    }
    // stacks change what the incident section shows, so they hash here
    for assignment in cache.assignments() {
        let order = assignment.order.to_string();
        let role = format!("{:?}", assignment.role);
        hasher
            .field(assignment.incident_id.as_str())
            .field(assignment.unit_id.as_str())
            .field(&role)
            .field(&order)
            .field(flag(assignment.cleared))
            .end_record();
    }
    hasher.hex()
}

fn banners_fingerprint(cache: &StateCache) -> String {
    let mut hasher = FnvHasher::new();
    for banner in cache.banners() {
        hasher
            .field(&banner.kind)
            .field(&banner.message)
            .field(flag(banner.acknowledged))
            .end_record();
    }
    for diversion in cache.diversions() {
        hasher
            .field(&diversion.destination)
            .field(flag(diversion.active))
            .end_record();
    }
    hasher.hex()
}

fn messages_fingerprint(cache: &StateCache) -> String {
    let mut hasher = FnvHasher::new();
    for message in cache.messages() {
        hasher
            .field(&message.message_id)
            .field(&message.from)
            .field(flag(message.urgent))
            .field(flag(message.read))
            .end_record();
    }
    hasher.hex()
}
