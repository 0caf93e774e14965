use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::core::java::JdkVersion;

/// Provenance of a catalog entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Origin {
    /// Imported from a directory the user already had.
    Local,
    /// Materialized on disk by the download collaborator.
    Downloaded,
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Origin::Local => write!(f, "local"),
            Origin::Downloaded => write!(f, "downloaded"),
        }
    }
}

/// A known JDK installation, persisted in `registry.json`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JdkInstallation {
    pub id: String,
    pub vendor: String,
    pub version: JdkVersion,
    pub home_path: PathBuf,
    pub origin: Origin,
    pub added_at: DateTime<Utc>,
}

impl JdkInstallation {
    pub fn bin_dir(&self) -> PathBuf {
        self.home_path.join("bin")
    }
}
