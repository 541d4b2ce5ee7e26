use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::ViewPreferences;

pub const DEFAULT_ADDRESS_HISTORY_LIMIT: usize = 50;

#[derive(Debug, Error)]
pub enum LocalStoreError {
    #[error("failed to read local store {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write local store {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse local store {path:?}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to encode local store: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Recently entered scene addresses, newest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AddressHistory {
    entries: Vec<String>,
}

impl AddressHistory {
    /// Uppercase with inner whitespace collapsed, so `12 main st` and
    /// `12  MAIN ST` are the same entry.
    pub fn normalize(address: &str) -> String {
        address
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_ascii_uppercase()
    }

    /// Move `address` to the front, dropping duplicates and anything past
    /// `limit`.
    pub fn record(&mut self, address: &str, limit: usize) {
        let normalized = Self::normalize(address);
        if normalized.is_empty() {
            return;
        }
        self.entries.retain(|entry| *entry != normalized);
        self.entries.insert(0, normalized);
        self.entries.truncate(limit);
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn matching<'a>(&'a self, prefix: &str) -> impl Iterator<Item = &'a str> + 'a {
        let prefix = Self::normalize(prefix);
        self.entries
            .iter()
            .filter(move |entry| entry.starts_with(&prefix))
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OperatorProfile {
    pub preferences: ViewPreferences,
    pub addresses: AddressHistory,
}

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(default)]
struct StoreFile {
    profiles: BTreeMap<String, OperatorProfile>,
}

/// Small per-operator key-value store kept in one JSON file.
#[derive(Debug)]
pub struct LocalStore {
    path: Option<PathBuf>,
    limit: usize,
    file: StoreFile,
}

impl LocalStore {
    /// A store that never touches disk.
    pub fn in_memory(limit: usize) -> Self {
        Self {
            path: None,
            limit,
            file: StoreFile::default(),
        }
    }

    /// Load the store at `path`; a missing file starts empty.
    pub fn open(path: impl Into<PathBuf>, limit: usize) -> Result<Self, LocalStoreError> {
        let path = path.into();
        let file = match fs::read_to_string(&path) {
            Ok(contents) => {
                let mut file: StoreFile =
                    serde_json::from_str(&contents).map_err(|source| LocalStoreError::Parse {
                        path: path.clone(),
                        source,
                    })?;
                for profile in file.profiles.values_mut() {
                    profile.addresses.entries.truncate(limit);
                }
                file
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => StoreFile::default(),
            Err(source) => return Err(LocalStoreError::Read { path, source }),
        };
        Ok(Self {
            path: Some(path),
            limit,
            file,
        })
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn profile(&self, operator: &str) -> OperatorProfile {
        self.file
            .profiles
            .get(&profile_key(operator))
            .cloned()
            .unwrap_or_default()
    }

    pub fn record_address(&mut self, operator: &str, address: &str) {
        let limit = self.limit;
        self.profile_mut(operator).addresses.record(address, limit);
    }

    pub fn set_preferences(&mut self, operator: &str, preferences: ViewPreferences) {
        self.profile_mut(operator).preferences = preferences;
    }

    fn profile_mut(&mut self, operator: &str) -> &mut OperatorProfile {
        self.file.profiles.entry(profile_key(operator)).or_default()
    }

    pub fn save(&self) -> Result<(), LocalStoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let encoded = serde_json::to_string_pretty(&self.file)?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| LocalStoreError::Write {
                path: path.clone(),
                source,
            })?;
        }
        fs::write(path, encoded).map_err(|source| LocalStoreError::Write {
            path: path.clone(),
            source,
        })?;
        tracing::debug!(target: "dispatch::engine", path = %path.display(), "local_store.saved");
        Ok(())
    }
}

fn profile_key(operator: &str) -> String {
    operator.trim().to_ascii_uppercase()
}
