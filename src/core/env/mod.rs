//! Derives JAVA_HOME / PATH / CLASSPATH for the active JDK and applies them
//! through the platform adapter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::core::backup::{BackupStore, BackupTrigger};
use crate::core::error::JvmanResult;
use crate::core::platform::{EnvScope, PlatformAdapter};
use crate::core::registry::JdkInstallation;
use crate::core::state::CurrentState;

pub const JAVA_HOME: &str = "JAVA_HOME";
pub const PATH: &str = "PATH";
pub const CLASSPATH: &str = "CLASSPATH";

/// Every variable this engine may own. Snapshots capture all of them.
/// PATH comes last: once it is written, `managed_segments` must follow.
pub const MANAGED_VARS: [&str; 3] = [JAVA_HOME, CLASSPATH, PATH];

/// What JAVA_HOME and the managed PATH entry refer to.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvAnchor {
    /// The stable link path; switching never needs to touch the environment
    /// values themselves.
    #[default]
    Link,
    /// The resolved installation home.
    Home,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncMode {
    /// Snapshot, then persist and broadcast.
    Auto,
    /// Report the diff only.
    Manual,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct EnvVarChange {
    pub name: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

impl EnvVarChange {
    pub fn is_change(&self) -> bool {
        self.old_value != self.new_value
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Applied { snapshot_id: String },
    Preview(Vec<EnvVarChange>),
}

/// Values the persisted store should hold for one anchor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetVars {
    /// In write order.
    pub vars: Vec<(String, String)>,
    /// The PATH entry this engine owns after applying.
    pub managed_segment: String,
}

#[derive(Debug, Clone)]
pub struct EnvSyncEngine {
    scope: EnvScope,
    anchor: EnvAnchor,
    classpath: Option<String>,
}

impl EnvSyncEngine {
    pub fn new(scope: EnvScope, anchor: EnvAnchor, classpath: Option<String>) -> Self {
        Self {
            scope,
            anchor,
            classpath,
        }
    }

    pub fn scope(&self) -> EnvScope {
        self.scope
    }

    /// Path JAVA_HOME should name for `installation` reached through `link_path`.
    pub fn anchor_path(&self, link_path: &Path, installation: &JdkInstallation) -> PathBuf {
        match self.anchor {
            EnvAnchor::Link => link_path.to_path_buf(),
            EnvAnchor::Home => installation.home_path.clone(),
        }
    }

    /// JAVA_HOME is the anchor. PATH loses exactly the segments recorded in
    /// `state.managed_segments` and gains `<anchor>/bin` at the front; every
    /// other entry keeps its relative order.
    pub fn compute_target_vars(
        &self,
        platform: &dyn PlatformAdapter,
        state: &CurrentState,
        anchor: &Path,
    ) -> JvmanResult<TargetVars> {
        let segment = anchor.join("bin").to_string_lossy().to_string();
        let current_path = platform
            .read_env_var(self.scope, PATH)?
            .or_else(|| platform.inherited_path().map(str::to_string))
            .unwrap_or_default();
        let path = rebuild_path(
            &current_path,
            platform.path_separator(),
            &state.managed_segments,
            &segment,
        );

        let mut vars = vec![(JAVA_HOME.to_string(), anchor.to_string_lossy().to_string())];
        if let Some(classpath) = &self.classpath {
            vars.push((CLASSPATH.to_string(), classpath.clone()));
        }
        vars.push((PATH.to_string(), path));

        Ok(TargetVars {
            vars,
            managed_segment: segment,
        })
    }

    /// Old and new value of every variable the target touches.
    pub fn diff(
        &self,
        platform: &dyn PlatformAdapter,
        target: &TargetVars,
    ) -> JvmanResult<Vec<EnvVarChange>> {
        target
            .vars
            .iter()
            .map(|(name, value)| {
                Ok(EnvVarChange {
                    name: name.clone(),
                    old_value: platform.read_env_var(self.scope, name)?,
                    new_value: Some(value.clone()),
                })
            })
            .collect()
    }

    #[instrument(skip(self, platform, backups, state))]
    pub fn sync(
        &self,
        mode: SyncMode,
        platform: &dyn PlatformAdapter,
        backups: &mut BackupStore,
        state: &mut CurrentState,
        anchor: &Path,
    ) -> JvmanResult<SyncOutcome> {
        let target = self.compute_target_vars(platform, state, anchor)?;
        match mode {
            SyncMode::Manual => Ok(SyncOutcome::Preview(self.diff(platform, &target)?)),
            SyncMode::Auto => {
                let snapshot_id = self.apply(platform, backups, state, target)?;
                Ok(SyncOutcome::Applied { snapshot_id })
            }
        }
    }

    /// Snapshot the pre-change values, then persist `target`. Returns the
    /// snapshot id.
    pub fn apply(
        &self,
        platform: &dyn PlatformAdapter,
        backups: &mut BackupStore,
        state: &mut CurrentState,
        target: TargetVars,
    ) -> JvmanResult<String> {
        let snapshot = backups.create_snapshot(
            platform,
            self.scope,
            &state.managed_segments,
            BackupTrigger::Auto,
        )?;

        for change in self.diff(platform, &target)? {
            if !change.is_change() {
                continue;
            }
            if let Some(value) = &change.new_value {
                debug!("Persisting {} ({} scope)", change.name, self.scope);
                platform.persist_env_var(self.scope, &change.name, value)?;
            }
        }
        if let Err(err) = platform.broadcast_env_change() {
            warn!("Environment change broadcast failed: {}", err);
        }

        state.managed_segments = vec![target.managed_segment];
        state.last_applied_snapshot_id = Some(snapshot.id.clone());
        info!("Environment synced, previous values saved as {}", snapshot.id);
        Ok(snapshot.id)
    }
}

fn rebuild_path(current: &str, separator: char, managed: &[String], segment: &str) -> String {
    let mut entries = vec![segment.to_string()];
    if !current.is_empty() {
        entries.extend(
            current
                .split(separator)
                .filter(|entry| *entry != segment && !managed.iter().any(|m| m == entry))
                .map(str::to_string),
        );
    }
    entries.join(&separator.to_string())
}
