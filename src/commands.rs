use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{error, info};

use crate::core::backup::BackupEntry;
use crate::core::env::EnvVarChange;
use crate::core::error::{JvmanError, JvmanResult};
use crate::core::java::AppPaths;
use crate::core::registry::JdkInstallation;
use crate::core::state::{SwitchReport, SwitchStatus, SwitcherState};

/// Collaborator-facing handle (GUI, tray, CLI, startup routine).
///
/// Mutating calls never queue: if another one holds the lock they fail with
/// `Busy`. Once a mutation has the lock it runs on the blocking pool and
/// finishes even if the caller stops waiting.
#[derive(Clone)]
pub struct JdkSwitcher {
    inner: Arc<Mutex<SwitcherState>>,
}

impl JdkSwitcher {
    pub fn new(state: SwitcherState) -> Self {
        Self {
            inner: Arc::new(Mutex::new(state)),
        }
    }

    /// Open the engine at `$JVMAN_HOME` or the platform data directory.
    pub fn open_default() -> JvmanResult<Self> {
        let paths = AppPaths::resolve()?;
        info!("Using data directory {:?}", paths.data_dir());
        Ok(Self::new(SwitcherState::open(paths)?))
    }

    async fn exclusive<T, F>(&self, op: F) -> JvmanResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SwitcherState) -> JvmanResult<T> + Send + 'static,
    {
        let mut guard = self
            .inner
            .clone()
            .try_lock_owned()
            .map_err(|_| JvmanError::Busy)?;
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(|e| {
                error!("Switch worker failed: {}", e);
                JvmanError::Other(format!("worker task failed: {e}"))
            })?
    }

    /// Waits for the lock instead of failing with `Busy`. Only for calls
    /// that leave the link and the environment store untouched.
    async fn queued<T, F>(&self, op: F) -> JvmanResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SwitcherState) -> JvmanResult<T> + Send + 'static,
    {
        let mut guard = self.inner.clone().lock_owned().await;
        tokio::task::spawn_blocking(move || op(&mut guard))
            .await
            .map_err(|e| JvmanError::Other(format!("worker task failed: {e}")))?
    }

    pub async fn switch_version(&self, id: &str) -> JvmanResult<SwitchReport> {
        let id = id.to_string();
        self.exclusive(move |state| state.switch_version(&id)).await
    }

    pub async fn list_installations(&self) -> Vec<JdkInstallation> {
        self.inner.lock().await.list_installations().to_vec()
    }

    pub async fn get_current(&self) -> Option<JdkInstallation> {
        self.inner.lock().await.get_current().cloned()
    }

    pub async fn add_local_jdk(&self, path: PathBuf) -> JvmanResult<JdkInstallation> {
        self.exclusive(move |state| state.add_local_jdk(&path)).await
    }

    pub async fn register_downloaded(
        &self,
        vendor: String,
        version: String,
        path: PathBuf,
    ) -> JvmanResult<JdkInstallation> {
        self.exclusive(move |state| state.register_downloaded(&vendor, &version, &path))
            .await
    }

    pub async fn remove_installation(&self, id: &str) -> JvmanResult<()> {
        let id = id.to_string();
        self.exclusive(move |state| state.remove_installation(&id)).await
    }

    pub async fn preview_env_diff(&self) -> JvmanResult<Vec<EnvVarChange>> {
        self.queued(|state| state.preview_env_diff()).await
    }

    pub async fn sync_env(&self) -> JvmanResult<Option<String>> {
        self.exclusive(|state| state.sync_env()).await
    }

    pub async fn switch_status(&self) -> SwitchStatus {
        self.inner.lock().await.switch_status().clone()
    }

    pub async fn consistency_issue(&self) -> Option<JvmanError> {
        self.inner.lock().await.consistency_issue()
    }

    pub async fn list_backups(&self) -> Vec<BackupEntry> {
        self.inner.lock().await.list_backups()
    }

    pub async fn create_backup(&self) -> JvmanResult<BackupEntry> {
        self.exclusive(|state| state.create_backup()).await
    }

    pub async fn delete_backup(&self, id: &str) -> JvmanResult<()> {
        let id = id.to_string();
        self.exclusive(move |state| state.delete_backup(&id)).await
    }

    pub async fn restore_backup(&self, id: &str) -> JvmanResult<()> {
        let id = id.to_string();
        self.exclusive(move |state| state.restore_backup(&id)).await
    }

    pub async fn link_path(&self) -> PathBuf {
        self.inner.lock().await.link_path().to_path_buf()
    }
}
