use std::path::{Path, PathBuf};

use crate::core::error::{JvmanError, JvmanResult};

const APP_DIR_NAME: &str = "jvman";
const DATA_DIR_ENV: &str = "JVMAN_HOME";

/// Filesystem locations owned by the switch engine.
#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    /// Resolve from `$JVMAN_HOME`, falling back to the platform data directory.
    pub fn resolve() -> JvmanResult<Self> {
        let data_dir = match std::env::var_os(DATA_DIR_ENV) {
            Some(dir) if !dir.is_empty() => PathBuf::from(dir),
            _ => dirs::data_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(APP_DIR_NAME),
        };
        Self::at(data_dir)
    }

    pub fn at(data_dir: impl Into<PathBuf>) -> JvmanResult<Self> {
        let data_dir = canonical_or_create_dir(&data_dir.into())?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn registry_file(&self) -> PathBuf {
        self.data_dir.join("registry.json")
    }

    pub fn settings_file(&self) -> PathBuf {
        self.data_dir.join("settings.json")
    }

    pub fn backups_dir(&self) -> PathBuf {
        self.data_dir.join("backups")
    }

    pub fn default_link_path(&self) -> PathBuf {
        self.data_dir.join("current")
    }
}

fn canonical_or_create_dir(path: &Path) -> JvmanResult<PathBuf> {
    std::fs::create_dir_all(path).map_err(|source| JvmanError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    std::fs::canonicalize(path).map_err(|source| JvmanError::Io {
        path: path.to_path_buf(),
        source,
    })
}
