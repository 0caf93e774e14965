//! OS-specific link creation and persistent environment storage.
//!
//! One concrete adapter is selected per target OS at startup
//! ([`select_platform`]); everything above this layer talks to the
//! [`PlatformAdapter`] trait only.

pub mod shell_block;

#[cfg(unix)]
pub mod posix;
#[cfg(windows)]
pub mod win;

#[cfg(all(test, unix))]
pub(crate) mod testing;

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::error::JvmanError;

/// Which persistent environment store a variable lives in.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EnvScope {
    #[default]
    User,
    System,
}

impl std::fmt::Display for EnvScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EnvScope::User => write!(f, "user"),
            EnvScope::System => write!(f, "system"),
        }
    }
}

/// The only failure kinds the platform layer reports.
#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("permission denied at {path:?}: {detail}")]
    PermissionDenied { path: PathBuf, detail: String },
    #[error("unsupported operation at {path:?}: {detail}")]
    UnsupportedFilesystem { path: PathBuf, detail: String },
}

pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    pub fn unsupported(path: impl Into<PathBuf>, detail: impl Into<String>) -> Self {
        PlatformError::UnsupportedFilesystem {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// Classify an IO failure into one of the two platform error kinds.
    pub fn from_io(path: &Path, source: std::io::Error) -> Self {
        let denied = source.kind() == std::io::ErrorKind::PermissionDenied
            || (cfg!(windows) && matches!(source.raw_os_error(), Some(5 | 1314)));
        if denied {
            PlatformError::PermissionDenied {
                path: path.to_path_buf(),
                detail: source.to_string(),
            }
        } else {
            PlatformError::UnsupportedFilesystem {
                path: path.to_path_buf(),
                detail: source.to_string(),
            }
        }
    }
}

impl From<PlatformError> for JvmanError {
    fn from(value: PlatformError) -> Self {
        match value {
            PlatformError::PermissionDenied { path, detail } => {
                JvmanError::PermissionDenied(format!("{}: {}", path.display(), detail))
            }
            PlatformError::UnsupportedFilesystem { path, detail } => {
                JvmanError::UnsupportedFilesystem(format!("{}: {}", path.display(), detail))
            }
        }
    }
}

/// Capability set over link creation and persistent environment variables.
pub trait PlatformAdapter: Send + Sync {
    /// Point `link_path` at `target`. Implementations stage the new link next
    /// to `link_path` and rename it into place, so the old link stays intact
    /// until the replacement exists.
    fn create_link(&self, link_path: &Path, target: &Path) -> PlatformResult<()>;

    fn remove_link(&self, link_path: &Path) -> PlatformResult<()>;

    /// Raw target of the link, `None` when nothing exists at `link_path`.
    fn read_link(&self, link_path: &Path) -> PlatformResult<Option<PathBuf>>;

    fn read_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<Option<String>>;

    fn persist_env_var(&self, scope: EnvScope, name: &str, value: &str) -> PlatformResult<()>;

    fn remove_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<()>;

    /// Tell running shells/processes that persisted variables changed.
    fn broadcast_env_change(&self) -> PlatformResult<()>;

    /// Separator between PATH entries in persisted values.
    fn path_separator(&self) -> char;

    /// Reference to the inherited PATH used when the store has no PATH yet.
    fn inherited_path(&self) -> Option<&'static str>;
}

/// Staging name for a replacement link, in the same directory as `link_path`
/// so the final rename never crosses filesystems.
pub(crate) fn staging_link_path(link_path: &Path) -> PathBuf {
    let name = link_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "current".to_string());
    let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
    link_path.with_file_name(format!(".{}.tmp.{}.{}", name, std::process::id(), nanos))
}

/// Adapter for the running OS.
#[cfg(unix)]
pub fn select_platform(shell_config_files: &[PathBuf]) -> Box<dyn PlatformAdapter> {
    Box::new(posix::PosixPlatform::detect(shell_config_files))
}

/// Adapter for the running OS.
#[cfg(windows)]
pub fn select_platform(_shell_config_files: &[PathBuf]) -> Box<dyn PlatformAdapter> {
    Box::new(win::WindowsPlatform::new())
}
