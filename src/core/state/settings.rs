use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::env::EnvAnchor;
use crate::core::error::JvmanResult;
use crate::core::java::AppPaths;
use crate::core::platform::EnvScope;
use crate::core::storage;

pub const DEFAULT_BACKUP_RETENTION: usize = 20;

/// User-tunable knobs, persisted as `settings.json` in the data directory.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SwitcherSettings {
    /// Where the stable link lives. Defaults to `<data_dir>/current`.
    pub link_path: Option<PathBuf>,
    pub env_scope: EnvScope,
    pub env_anchor: EnvAnchor,
    /// Unpinned snapshots kept before the oldest is evicted.
    pub backup_retention: usize,
    /// Managed CLASSPATH value; left untouched when unset.
    pub classpath: Option<String>,
    /// Explicit rc files to manage instead of auto-detecting them (POSIX).
    pub shell_config_files: Vec<PathBuf>,
}

impl Default for SwitcherSettings {
    fn default() -> Self {
        Self {
            link_path: None,
            env_scope: EnvScope::User,
            env_anchor: EnvAnchor::Link,
            backup_retention: DEFAULT_BACKUP_RETENTION,
            classpath: None,
            shell_config_files: Vec::new(),
        }
    }
}

impl SwitcherSettings {
    /// Load from disk. A missing file means defaults; a corrupt one is
    /// reported and replaced by defaults in memory.
    pub fn load(path: &Path) -> Self {
        match storage::read_json::<SwitcherSettings>(path) {
            Ok(Some(settings)) => settings,
            Ok(None) => Self::default(),
            Err(err) => {
                warn!("Ignoring unreadable settings at {:?}: {}", path, err);
                Self::default()
            }
        }
    }

    /// `load`, writing the defaults out when no file exists yet so there is
    /// something to edit. An unreadable file is never overwritten.
    pub fn load_or_init(path: &Path) -> Self {
        let settings = Self::load(path);
        if !path.exists() {
            match settings.save(path) {
                Ok(()) => info!("Wrote default settings to {:?}", path),
                Err(err) => warn!("Could not write default settings: {}", err),
            }
        }
        settings
    }

    pub fn save(&self, path: &Path) -> JvmanResult<()> {
        storage::write_json_atomic(path, self)
    }

    pub fn resolved_link_path(&self, paths: &AppPaths) -> PathBuf {
        self.link_path
            .clone()
            .unwrap_or_else(|| paths.default_link_path())
    }

    pub fn retention(&self) -> usize {
        self.backup_retention.max(1)
    }
}
