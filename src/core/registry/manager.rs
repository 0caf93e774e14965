use std::path::{Path, PathBuf};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};
use uuid::Uuid;

use super::model::{JdkInstallation, Origin};
use crate::core::error::{JvmanError, JvmanResult};
use crate::core::java::{self, JdkVersion};
use crate::core::state::CurrentState;
use crate::core::storage;

/// On-disk shape of `registry.json`.
#[derive(Debug, Default, Serialize, Deserialize)]
struct RegistryRecord {
    #[serde(default)]
    installations: Vec<JdkInstallation>,
    #[serde(default)]
    state: CurrentState,
}

/// Durable catalog of known JDK installations, in insertion order.
pub struct VersionRegistry {
    file: PathBuf,
    installations: Vec<JdkInstallation>,
}

impl VersionRegistry {
    /// Load the catalog together with the persisted `CurrentState`.
    pub fn load(file: PathBuf) -> JvmanResult<(Self, CurrentState)> {
        let record: RegistryRecord = storage::read_json(&file)?.unwrap_or_default();
        let registry = Self {
            file,
            installations: record.installations,
        };
        Ok((registry, record.state))
    }

    /// Write the catalog and `state` as one record.
    pub fn persist(&self, state: &CurrentState) -> JvmanResult<()> {
        let record = RegistryRecord {
            installations: self.installations.clone(),
            state: state.clone(),
        };
        storage::write_json_atomic(&self.file, &record)
    }

    /// Import a JDK the user already has on disk.
    #[instrument(skip(self))]
    pub fn add_local(&mut self, path: &Path) -> JvmanResult<JdkInstallation> {
        let meta = java::inspect_jdk_home(path)?;
        self.insert(meta.home, meta.vendor, meta.version, Origin::Local)
    }

    /// Register a JDK the download collaborator has already unpacked.
    /// Catalog labels win over what the home reports about itself.
    #[instrument(skip(self))]
    pub fn register_downloaded(
        &mut self,
        vendor: &str,
        version: &str,
        path: &Path,
    ) -> JvmanResult<JdkInstallation> {
        let meta = java::inspect_jdk_home(path)?;
        let vendor = if vendor.trim().is_empty() {
            meta.vendor
        } else {
            vendor.trim().to_string()
        };
        let version = JdkVersion::parse(version).unwrap_or(meta.version);
        self.insert(meta.home, vendor, version, Origin::Downloaded)
    }

    /// Drop a catalog entry. Files on disk are left alone.
    pub fn remove(&mut self, id: &str, state: &CurrentState) -> JvmanResult<JdkInstallation> {
        if state.current_installation_id.as_deref() == Some(id) {
            return Err(JvmanError::InUse(id.to_string()));
        }
        let index = self
            .installations
            .iter()
            .position(|inst| inst.id == id)
            .ok_or_else(|| JvmanError::NotFound(id.to_string()))?;
        let removed = self.installations.remove(index);
        info!("Removed installation {} ({:?})", removed.id, removed.home_path);
        Ok(removed)
    }

    pub fn list(&self) -> &[JdkInstallation] {
        &self.installations
    }

    pub fn get(&self, id: &str) -> JvmanResult<&JdkInstallation> {
        self.installations
            .iter()
            .find(|inst| inst.id == id)
            .ok_or_else(|| JvmanError::NotFound(id.to_string()))
    }

    /// Find the installation whose home is `path`, comparing canonical paths.
    pub fn find_by_home(&self, path: &Path) -> Option<&JdkInstallation> {
        let wanted = canonical(path);
        self.installations
            .iter()
            .find(|inst| canonical(&inst.home_path) == wanted)
    }

    fn insert(
        &mut self,
        home: PathBuf,
        vendor: String,
        version: JdkVersion,
        origin: Origin,
    ) -> JvmanResult<JdkInstallation> {
        if let Some(existing) = self.find_by_home(&home) {
            return Err(JvmanError::AlreadyRegistered(existing.id.clone()));
        }

        let installation = JdkInstallation {
            id: self.unique_id(&vendor, &version),
            vendor,
            version,
            home_path: canonical(&home),
            origin,
            added_at: Utc::now(),
        };
        info!(
            "Registered {} installation '{}' at {:?}",
            installation.origin, installation.id, installation.home_path
        );
        self.installations.push(installation.clone());
        Ok(installation)
    }

    fn unique_id(&self, vendor: &str, version: &JdkVersion) -> String {
        let base = format!(
            "jdk{}-{}-{}",
            version.major,
            normalize_for_id(vendor),
            normalize_for_id(&version.full)
        );
        if self.installations.iter().all(|inst| inst.id != base) {
            return base;
        }
        let suffix = Uuid::new_v4().simple().to_string();
        format!("{}-{}", base, &suffix[..6])
    }
}

fn normalize_for_id(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
