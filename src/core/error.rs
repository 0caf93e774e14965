use std::path::PathBuf;
use thiserror::Error;

/// Central error type for the version-switch engine.
/// Every module returns `Result<T, JvmanError>`.
#[derive(Debug, Error)]
pub enum JvmanError {
    // ── IO ──────────────────────────────────────────────
    #[error("IO error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    // ── JSON ────────────────────────────────────────────
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ── Validation ──────────────────────────────────────
    #[error("Invalid JDK home {path:?}: {reason}")]
    InvalidJdkHome { path: PathBuf, reason: String },

    #[error("JDK home already registered as {0}")]
    AlreadyRegistered(String),

    #[error("Installation not found: {0}")]
    NotFound(String),

    #[error("Installation {0} is the active target and cannot be removed")]
    InUse(String),

    // ── Link / platform ─────────────────────────────────
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    #[error("Unsupported filesystem: {0}")]
    UnsupportedFilesystem(String),

    #[error("Path missing: {0:?}")]
    PathMissing(PathBuf),

    #[error("Link verification failed: expected {expected:?}, resolved {actual:?}")]
    SwitchFailed {
        expected: PathBuf,
        actual: Option<PathBuf>,
    },

    // ── Environment ─────────────────────────────────────
    /// The link now points at `installation_id` but the persisted
    /// environment still describes the previous target.
    #[error("Link switched to {installation_id} but environment sync failed: {source}")]
    EnvStale {
        installation_id: String,
        source: Box<JvmanError>,
    },

    // ── Startup ─────────────────────────────────────────
    #[error("Link/registry mismatch: {0}")]
    Consistency(String),

    // ── Concurrency ─────────────────────────────────────
    #[error("Another switch or restore is in progress")]
    Busy,

    // ── Backups ─────────────────────────────────────────
    #[error("Snapshot not found: {0}")]
    SnapshotNotFound(String),

    // ── Generic ─────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

/// Convenience alias used throughout the crate.
pub type JvmanResult<T> = Result<T, JvmanError>;

impl JvmanError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        JvmanError::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_home(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        JvmanError::InvalidJdkHome {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

impl From<std::io::Error> for JvmanError {
    fn from(source: std::io::Error) -> Self {
        JvmanError::Io {
            path: PathBuf::new(),
            source,
        }
    }
}

// ── Serialization for GUI / IPC collaborators ───────────
// Collaborators receive errors as plain strings.
impl serde::Serialize for JvmanError {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}
