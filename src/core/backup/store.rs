use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use super::model::{BackupEntry, BackupTrigger, EnvVarSnapshot};
use crate::core::env::{MANAGED_VARS, PATH};
use crate::core::error::{JvmanError, JvmanResult};
use crate::core::platform::{EnvScope, PlatformAdapter};
use crate::core::state::CurrentState;
use crate::core::storage;

struct StoredEntry {
    path: PathBuf,
    entry: BackupEntry,
}

/// Snapshot history, one JSON file per entry under `backups/`.
///
/// Entries are kept oldest first; `pinned` indexes the ids exempt from
/// eviction.
pub struct BackupStore {
    dir: PathBuf,
    retention: usize,
    entries: Vec<StoredEntry>,
    pinned: HashSet<String>,
    next_sequence: u64,
}

impl BackupStore {
    /// Load every intact entry from `dir`. Entries that fail to parse or
    /// whose digest does not match are skipped with a warning.
    pub fn open(dir: PathBuf, retention: usize) -> JvmanResult<Self> {
        std::fs::create_dir_all(&dir).map_err(|source| JvmanError::io(&dir, source))?;

        let mut entries = Vec::new();
        let listing = std::fs::read_dir(&dir).map_err(|source| JvmanError::io(&dir, source))?;
        for item in listing {
            let path = item.map_err(|source| JvmanError::io(&dir, source))?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match storage::read_json::<BackupEntry>(&path) {
                Ok(Some(entry)) if entry.verify() => entries.push(StoredEntry { path, entry }),
                Ok(Some(entry)) => warn!("Skipping backup {} with mismatched digest", entry.id),
                Ok(None) => {}
                Err(err) => warn!("Skipping unreadable backup {:?}: {}", path, err),
            }
        }
        entries.sort_by_key(|stored| stored.entry.sequence);

        let pinned = entries
            .iter()
            .filter(|stored| stored.entry.pinned)
            .map(|stored| stored.entry.id.clone())
            .collect();
        let next_sequence = entries
            .last()
            .map(|stored| stored.entry.sequence + 1)
            .unwrap_or(1);
        debug!("Loaded {} backups from {:?}", entries.len(), dir);

        Ok(Self {
            dir,
            retention: retention.max(1),
            entries,
            pinned,
            next_sequence,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Capture the current full values of every managed variable in `scope`.
    /// Manual snapshots are pinned.
    #[instrument(skip(self, platform, managed_keys))]
    pub fn create_snapshot(
        &mut self,
        platform: &dyn PlatformAdapter,
        scope: EnvScope,
        managed_keys: &[String],
        trigger: BackupTrigger,
    ) -> JvmanResult<BackupEntry> {
        let mut vars = BTreeMap::new();
        for name in MANAGED_VARS {
            if let Some(value) = platform.read_env_var(scope, name)? {
                vars.insert(name.to_string(), value);
            }
        }
        let snapshot = EnvVarSnapshot {
            timestamp: Utc::now(),
            scope,
            vars,
            managed_keys: managed_keys.to_vec(),
        };
        let entry = BackupEntry {
            id: Uuid::new_v4().to_string(),
            sequence: self.next_sequence,
            digest: snapshot.digest()?,
            snapshot,
            trigger,
            pinned: trigger == BackupTrigger::Manual,
        };

        let path = self.dir.join(entry.file_name());
        storage::write_json_atomic(&path, &entry)?;
        self.next_sequence += 1;
        if entry.pinned {
            self.pinned.insert(entry.id.clone());
        }
        self.entries.push(StoredEntry {
            path,
            entry: entry.clone(),
        });
        info!("Created {:?} backup {}", trigger, entry.id);

        self.evict()?;
        Ok(entry)
    }

    /// Newest first.
    pub fn list(&self) -> Vec<BackupEntry> {
        self.entries
            .iter()
            .rev()
            .map(|stored| stored.entry.clone())
            .collect()
    }

    pub fn get(&self, id: &str) -> JvmanResult<&BackupEntry> {
        self.entries
            .iter()
            .find(|stored| stored.entry.id == id)
            .map(|stored| &stored.entry)
            .ok_or_else(|| JvmanError::SnapshotNotFound(id.to_string()))
    }

    /// Remove an entry regardless of pinning.
    pub fn delete(&mut self, id: &str) -> JvmanResult<()> {
        let index = self
            .entries
            .iter()
            .position(|stored| stored.entry.id == id)
            .ok_or_else(|| JvmanError::SnapshotNotFound(id.to_string()))?;
        self.remove_at(index)
    }

    /// Write the snapshot's values back. The pre-restore state is captured
    /// first, so every restore can itself be undone. Returns that capture.
    #[instrument(skip(self, platform, state))]
    pub fn restore(
        &mut self,
        platform: &dyn PlatformAdapter,
        state: &mut CurrentState,
        id: &str,
    ) -> JvmanResult<BackupEntry> {
        let target = self.get(id)?.snapshot.clone();
        let before = self.create_snapshot(
            platform,
            target.scope,
            &state.managed_segments,
            BackupTrigger::Auto,
        )?;

        state.last_applied_snapshot_id = Some(before.id.clone());
        for name in MANAGED_VARS {
            match target.vars.get(name) {
                Some(value) => platform.persist_env_var(target.scope, name, value)?,
                None => platform.remove_env_var(target.scope, name)?,
            }
            if name == PATH {
                state.managed_segments = target.managed_keys.clone();
            }
        }
        if let Err(err) = platform.broadcast_env_change() {
            warn!("Environment change broadcast failed: {}", err);
        }

        info!("Restored backup {}", id);
        Ok(before)
    }

    fn evict(&mut self) -> JvmanResult<()> {
        loop {
            let unpinned = self
                .entries
                .iter()
                .filter(|stored| !self.pinned.contains(&stored.entry.id))
                .count();
            if unpinned <= self.retention {
                return Ok(());
            }
            let Some(oldest) = self
                .entries
                .iter()
                .position(|stored| !self.pinned.contains(&stored.entry.id))
            else {
                return Ok(());
            };
            debug!("Evicting backup {}", self.entries[oldest].entry.id);
            self.remove_at(oldest)?;
        }
    }

    fn remove_at(&mut self, index: usize) -> JvmanResult<()> {
        let stored = &self.entries[index];
        match std::fs::remove_file(&stored.path) {
            Ok(()) => {}
            Err(source) if source.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => return Err(JvmanError::io(&stored.path, source)),
        }
        let removed = self.entries.remove(index);
        self.pinned.remove(&removed.entry.id);
        Ok(())
    }
}
