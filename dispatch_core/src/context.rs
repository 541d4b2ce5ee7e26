use dispatch_runtime::UnitId;
use serde::{Deserialize, Serialize};

/// Per-operator display settings persisted in the local store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewPreferences {
    pub show_inactive: bool,
    pub compact: bool,
    /// Board column the unit list is sorted by.
    pub sort_by: String,
}

impl Default for ViewPreferences {
    fn default() -> Self {
        Self {
            show_inactive: false,
            compact: false,
            sort_by: "status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Privileges {
    /// May cite the wildcard marker on privileged operations (`LOGOFF ... FORCE`).
    pub override_guard: bool,
}

/// Everything about the signed-in operator that commands depend on.
///
/// Owned by the engine and passed down explicitly; nothing here is global.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub token: String,
    pub operator: String,
    pub role: String,
    pub privileges: Privileges,
    pub selected_unit: Option<UnitId>,
    pub preferences: ViewPreferences,
}

impl SessionContext {
    pub fn new(token: impl Into<String>, operator: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            operator: operator.into(),
            ..Self::default()
        }
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = role.into();
        self
    }

    pub fn with_override(mut self, allowed: bool) -> Self {
        self.privileges.override_guard = allowed;
        self
    }

    pub fn select_unit(&mut self, unit: Option<UnitId>) {
        self.selected_unit = unit;
    }
}
