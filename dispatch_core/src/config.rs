use std::{
    collections::BTreeMap,
    env, fs, io,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use dispatch_runtime::{Grammar, UnitAliasTable, UnitId};
use serde::Deserialize;
use thiserror::Error;

use crate::reconciler::{LivenessThresholds, PollSchedule};
use crate::undo::UndoRegistry;

pub const BUILTIN_DISPATCH_CONFIG: &str = include_str!("data/dispatch_config.json");
pub const DISPATCH_CONFIG_ENV: &str = "DISPATCH_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    poll: PollConfig,
    undo: UndoConfig,
    liveness: LivenessConfig,
    commands: CommandConfig,
    local_store: LocalStoreConfig,
    notes: NotesConfig,
    backend: BackendConfig,
}

impl DispatchConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_DISPATCH_CONFIG)
                .expect("builtin dispatch config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> Result<Self, DispatchConfigError> {
        let contents =
            fs::read_to_string(path).map_err(|source| DispatchConfigError::ReadFailed {
                path: path.to_path_buf(),
                source,
            })?;
        let config = DispatchConfig::from_json_str(&contents)?;
        Ok(config)
    }

    pub fn poll(&self) -> &PollConfig {
        &self.poll
    }

    pub fn undo(&self) -> &UndoConfig {
        &self.undo
    }

    pub fn liveness(&self) -> &LivenessConfig {
        &self.liveness
    }

    pub fn commands(&self) -> &CommandConfig {
        &self.commands
    }

    pub fn local_store(&self) -> &LocalStoreConfig {
        &self.local_store
    }

    pub fn notes(&self) -> &NotesConfig {
        &self.notes
    }

    pub fn backend(&self) -> &BackendConfig {
        &self.backend
    }

    pub fn set_backend(&mut self, backend: BackendConfig) {
        self.backend = backend;
    }
}

#[derive(Debug, Error)]
pub enum DispatchConfigError {
    #[error("failed to parse dispatch config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read dispatch config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    foreground_interval_ms: u64,
    background_interval_ms: u64,
}

impl PollConfig {
    pub fn schedule(&self) -> PollSchedule {
        PollSchedule {
            foreground: Duration::from_millis(self.foreground_interval_ms.max(1)),
            background: Duration::from_millis(
                self.background_interval_ms.max(self.foreground_interval_ms).max(1),
            ),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            foreground_interval_ms: 4_000,
            background_interval_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UndoConfig {
    capacity: usize,
    ttl_secs: i64,
}

impl UndoConfig {
    pub fn registry(&self) -> UndoRegistry {
        UndoRegistry::new(self.capacity, chrono::Duration::seconds(self.ttl_secs.max(0)))
    }
}

impl Default for UndoConfig {
    fn default() -> Self {
        Self {
            capacity: crate::undo::DEFAULT_UNDO_CAPACITY,
            ttl_secs: crate::undo::DEFAULT_UNDO_TTL_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LivenessConfig {
    failures_before_stale: u32,
    failures_before_offline: u32,
}

impl LivenessConfig {
    pub fn thresholds(&self) -> LivenessThresholds {
        let stale = self.failures_before_stale.max(1);
        LivenessThresholds {
            stale,
            offline: self.failures_before_offline.max(stale),
        }
    }
}

impl Default for LivenessConfig {
    fn default() -> Self {
        Self {
            failures_before_stale: 1,
            failures_before_offline: 3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CommandConfig {
    chain_separator: char,
    whole_line_verbs: Vec<String>,
    single_argument_verbs: Vec<String>,
    unit_aliases: BTreeMap<String, String>,
}

impl CommandConfig {
    pub fn grammar(&self) -> Grammar {
        let aliases = UnitAliasTable::new(
            self.unit_aliases
                .iter()
                .map(|(label, unit)| (label.as_str(), UnitId::new(unit.as_str()))),
        );
        Grammar::new(
            self.chain_separator,
            &self.whole_line_verbs,
            &self.single_argument_verbs,
            aliases,
        )
    }
}

impl Default for CommandConfig {
    fn default() -> Self {
        Self {
            chain_separator: dispatch_runtime::command_text::DEFAULT_CHAIN_SEPARATOR,
            whole_line_verbs: dispatch_runtime::command_text::DEFAULT_WHOLE_LINE_VERBS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            single_argument_verbs: dispatch_runtime::command_text::DEFAULT_SINGLE_ARGUMENT_VERBS
                .iter()
                .map(|v| v.to_string())
                .collect(),
            unit_aliases: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalStoreConfig {
    address_history_limit: usize,
}

impl LocalStoreConfig {
    pub fn address_history_limit(&self) -> usize {
        self.address_history_limit
    }
}

impl Default for LocalStoreConfig {
    fn default() -> Self {
        Self {
            address_history_limit: crate::local_store::DEFAULT_ADDRESS_HISTORY_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct NotesConfig {
    legacy_tags: bool,
}

impl NotesConfig {
    pub fn legacy_tags(&self) -> bool {
        self.legacy_tags
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    pub endpoint: String,
    pub api_key: String,
}

pub fn load_dispatch_config_from_env() -> Arc<DispatchConfig> {
    let Some(path) = env::var(DISPATCH_CONFIG_ENV).ok().map(PathBuf::from) else {
        tracing::info!(target: "dispatch::config", "dispatch_config.loaded=builtin");
        return DispatchConfig::builtin();
    };
    load_dispatch_config(&path)
}

/// Load from `path`, falling back to the builtin config if it cannot be read.
pub fn load_dispatch_config(path: &Path) -> Arc<DispatchConfig> {
    match DispatchConfig::from_file(path) {
        Ok(config) => {
            tracing::info!(
                target: "dispatch::config",
                path = %path.display(),
                "dispatch_config.loaded=file"
            );
            Arc::new(config)
        }
        Err(err) => {
            tracing::warn!(
                target: "dispatch::config",
                path = %path.display(),
                error = %err,
                "dispatch_config.load_failed"
            );
            tracing::info!(target: "dispatch::config", "dispatch_config.loaded=builtin");
            DispatchConfig::builtin()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn builtin_config_matches_documented_defaults() {
        let config = DispatchConfig::builtin();
        assert_eq!(config.undo().registry().capacity(), 3);
        assert_eq!(
            config.liveness().thresholds(),
            LivenessThresholds {
                stale: 1,
                offline: 3
            }
        );
        assert_eq!(config.local_store().address_history_limit(), 50);
        assert!(!config.notes().legacy_tags());
        assert_eq!(config.commands().grammar().chain_separator(), '|');
        assert!(config.commands().grammar().aliases().len() >= 4);
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = DispatchConfig::from_json_str(r#"{ "notes": { "legacy_tags": true } }"#)
            .unwrap();
        assert!(config.notes().legacy_tags());
        assert_eq!(
            config.poll().schedule().foreground,
            Duration::from_millis(4_000)
        );
        assert_eq!(config.commands().grammar().chain_separator(), '|');
    }

    #[test]
    fn unreadable_file_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(b"{ not json").unwrap();

        assert!(matches!(
            DispatchConfig::from_file(&path),
            Err(DispatchConfigError::Parse(_))
        ));
        let config = load_dispatch_config(&path);
        assert_eq!(config.undo().registry().capacity(), 3);
    }
}
