use serde::{Deserialize, Serialize};

/// Whether the link and the persisted environment describe the same target.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SwitchStatus {
    #[default]
    Consistent,
    /// The link moved to `installation_id` but the environment apply failed.
    /// Cleared by a successful environment sync.
    LinkSwitchedEnvStale { installation_id: String },
}

/// Engine state persisted alongside the registry in `registry.json`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CurrentState {
    pub current_installation_id: Option<String>,
    pub last_applied_snapshot_id: Option<String>,
    /// PATH entries this engine inserted. Only these are ever removed.
    #[serde(default)]
    pub managed_segments: Vec<String>,
    #[serde(default)]
    pub status: SwitchStatus,
}
