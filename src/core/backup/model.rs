use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::core::error::JvmanResult;
use crate::core::platform::EnvScope;

/// Full captured values of the managed variables at one instant.
/// Variables absent from the store at capture time are absent from `vars`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EnvVarSnapshot {
    pub timestamp: DateTime<Utc>,
    pub scope: EnvScope,
    pub vars: BTreeMap<String, String>,
    /// PATH segments owned by the engine when the snapshot was taken.
    pub managed_keys: Vec<String>,
}

impl EnvVarSnapshot {
    /// SHA-256 over the serialized snapshot, hex encoded.
    pub fn digest(&self) -> JvmanResult<String> {
        let bytes = serde_json::to_vec(self)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BackupTrigger {
    Auto,
    Manual,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BackupEntry {
    pub id: String,
    /// Monotonic creation order; breaks ties between equal timestamps.
    pub sequence: u64,
    pub snapshot: EnvVarSnapshot,
    pub trigger: BackupTrigger,
    pub pinned: bool,
    pub digest: String,
}

impl BackupEntry {
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}.json",
            self.snapshot.timestamp.format("%Y%m%d_%H%M%S_%3f"),
            self.id
        )
    }

    pub fn verify(&self) -> bool {
        self.snapshot
            .digest()
            .map(|digest| digest == self.digest)
            .unwrap_or(false)
    }
}
