use std::path::Path;

use serde::Serialize;
use tracing::{info, instrument, warn};

use super::current::{CurrentState, SwitchStatus};
use super::settings::SwitcherSettings;
use crate::core::backup::{BackupEntry, BackupStore, BackupTrigger};
use crate::core::env::{EnvSyncEngine, EnvVarChange, SyncMode, SyncOutcome};
use crate::core::error::{JvmanError, JvmanResult};
use crate::core::java::AppPaths;
use crate::core::link::{LinkManager, LinkResolution};
use crate::core::platform::{self, PlatformAdapter};
use crate::core::registry::{JdkInstallation, VersionRegistry};

/// Result of a completed switch.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SwitchReport {
    pub installation_id: String,
    /// Backup holding the environment as it was before the switch.
    pub snapshot_id: String,
}

/// Owns every component plus the persisted `CurrentState`. All mutation of
/// the link and the environment store goes through here.
pub struct SwitcherState {
    platform: Box<dyn PlatformAdapter>,
    registry: VersionRegistry,
    links: LinkManager,
    env: EnvSyncEngine,
    backups: BackupStore,
    state: CurrentState,
    consistency_issue: Option<String>,
}

impl SwitcherState {
    /// Open with settings from disk and the adapter for the running OS.
    pub fn open(paths: AppPaths) -> JvmanResult<Self> {
        let settings = SwitcherSettings::load_or_init(&paths.settings_file());
        let platform = platform::select_platform(&settings.shell_config_files);
        Self::open_with(paths, settings, platform)
    }

    pub fn open_with(
        paths: AppPaths,
        settings: SwitcherSettings,
        platform: Box<dyn PlatformAdapter>,
    ) -> JvmanResult<Self> {
        let (registry, state) = VersionRegistry::load(paths.registry_file())?;
        let backups = BackupStore::open(paths.backups_dir(), settings.retention())?;
        let links = LinkManager::new(settings.resolved_link_path(&paths));
        let env = EnvSyncEngine::new(
            settings.env_scope,
            settings.env_anchor,
            settings.classpath.clone(),
        );

        let mut switcher = Self {
            platform,
            registry,
            links,
            env,
            backups,
            state,
            consistency_issue: None,
        };
        switcher.reconcile();
        info!(
            "Switcher ready: {} installations, link at {:?}",
            switcher.registry.list().len(),
            switcher.links.link_path()
        );
        Ok(switcher)
    }

    /// Derive the current installation from what the link actually points
    /// at. Problems are reported, never repaired.
    fn reconcile(&mut self) {
        let recorded = self.state.current_installation_id.take();
        let issue = match self.links.resolve(self.platform.as_ref()) {
            Err(err) => Some(format!(
                "{} cannot be used as the current link: {}",
                self.links.link_path().display(),
                err
            )),
            Ok(LinkResolution::Absent) => recorded.as_ref().map(|id| {
                format!("{} was recorded as current but no link exists", id)
            }),
            Ok(LinkResolution::Dangling(target)) => Some(format!(
                "current link points at missing directory {}",
                target.display()
            )),
            Ok(LinkResolution::Resolved(target)) => match self.registry.find_by_home(&target) {
                None => Some(format!(
                    "current link points at unregistered directory {}",
                    target.display()
                )),
                Some(installation) => {
                    let linked = installation.id.clone();
                    self.state.current_installation_id = Some(linked.clone());
                    match recorded {
                        Some(id) if id != linked => Some(format!(
                            "{} was recorded as current but the link points at {}",
                            id, linked
                        )),
                        _ => None,
                    }
                }
            },
        };

        if let Some(message) = &issue {
            warn!("Startup consistency check: {}", message);
        }
        self.consistency_issue = issue;
    }

    #[instrument(skip(self))]
    pub fn switch_version(&mut self, id: &str) -> JvmanResult<SwitchReport> {
        let installation =
            self.links
                .switch(self.platform.as_ref(), &self.registry, &mut self.state, id)?;
        self.consistency_issue = None;

        // The link is committed; anything failing from here on leaves a
        // named partial state instead of a bare error.
        let committed = self.apply_env(&installation).and_then(|snapshot_id| {
            self.state.status = SwitchStatus::Consistent;
            self.registry.persist(&self.state)?;
            Ok(snapshot_id)
        });
        match committed {
            Ok(snapshot_id) => Ok(SwitchReport {
                installation_id: installation.id,
                snapshot_id,
            }),
            Err(err) => {
                warn!("Link switched to {} but the switch did not complete: {}", id, err);
                self.state.status = SwitchStatus::LinkSwitchedEnvStale {
                    installation_id: installation.id.clone(),
                };
                if let Err(persist_err) = self.registry.persist(&self.state) {
                    warn!("Could not record stale environment state: {}", persist_err);
                }
                Err(JvmanError::EnvStale {
                    installation_id: installation.id,
                    source: Box::new(err),
                })
            }
        }
    }

    /// Re-apply the environment for the current installation. Clears a
    /// stale status left by a failed switch. `None` when nothing is active.
    #[instrument(skip(self))]
    pub fn sync_env(&mut self) -> JvmanResult<Option<String>> {
        let Some(installation) = self.get_current().cloned() else {
            info!("No active installation, nothing to sync");
            return Ok(None);
        };
        let snapshot_id = self.apply_env(&installation)?;
        let previous = std::mem::replace(&mut self.state.status, SwitchStatus::Consistent);
        if let Err(err) = self.registry.persist(&self.state) {
            self.state.status = previous;
            return Err(err);
        }
        Ok(Some(snapshot_id))
    }

    fn run_sync(
        &mut self,
        mode: SyncMode,
        installation: &JdkInstallation,
    ) -> JvmanResult<SyncOutcome> {
        let anchor = self.env.anchor_path(self.links.link_path(), installation);
        self.env.sync(
            mode,
            self.platform.as_ref(),
            &mut self.backups,
            &mut self.state,
            &anchor,
        )
    }

    fn apply_env(&mut self, installation: &JdkInstallation) -> JvmanResult<String> {
        match self.run_sync(SyncMode::Auto, installation)? {
            SyncOutcome::Applied { snapshot_id } => Ok(snapshot_id),
            SyncOutcome::Preview(_) => Err(JvmanError::Other(
                "automatic sync returned a preview".to_string(),
            )),
        }
    }

    /// What an automatic sync would write, without writing it.
    pub fn preview_env_diff(&mut self) -> JvmanResult<Vec<EnvVarChange>> {
        let Some(installation) = self.get_current().cloned() else {
            return Ok(Vec::new());
        };
        match self.run_sync(SyncMode::Manual, &installation)? {
            SyncOutcome::Preview(changes) => Ok(changes),
            SyncOutcome::Applied { .. } => Err(JvmanError::Other(
                "manual sync applied changes".to_string(),
            )),
        }
    }

    pub fn list_installations(&self) -> &[JdkInstallation] {
        self.registry.list()
    }

    pub fn get_current(&self) -> Option<&JdkInstallation> {
        let id = self.state.current_installation_id.as_deref()?;
        self.registry.get(id).ok()
    }

    pub fn add_local_jdk(&mut self, path: &Path) -> JvmanResult<JdkInstallation> {
        let installation = self.registry.add_local(path)?;
        self.registry.persist(&self.state)?;
        Ok(installation)
    }

    pub fn register_downloaded(
        &mut self,
        vendor: &str,
        version: &str,
        path: &Path,
    ) -> JvmanResult<JdkInstallation> {
        let installation = self.registry.register_downloaded(vendor, version, path)?;
        self.registry.persist(&self.state)?;
        Ok(installation)
    }

    pub fn remove_installation(&mut self, id: &str) -> JvmanResult<()> {
        self.registry.remove(id, &self.state)?;
        self.registry.persist(&self.state)
    }

    pub fn list_backups(&self) -> Vec<BackupEntry> {
        self.backups.list()
    }

    /// Pinned manual snapshot of the current environment.
    pub fn create_backup(&mut self) -> JvmanResult<BackupEntry> {
        self.backups.create_snapshot(
            self.platform.as_ref(),
            self.env.scope(),
            &self.state.managed_segments,
            BackupTrigger::Manual,
        )
    }

    pub fn delete_backup(&mut self, id: &str) -> JvmanResult<()> {
        self.backups.delete(id)
    }

    #[instrument(skip(self))]
    pub fn restore_backup(&mut self, id: &str) -> JvmanResult<()> {
        let restored = self
            .backups
            .restore(self.platform.as_ref(), &mut self.state, id);
        // Partial restores still move `managed_segments`; record them either way.
        let persisted = self.registry.persist(&self.state);
        restored?;
        persisted
    }

    pub fn switch_status(&self) -> &SwitchStatus {
        &self.state.status
    }

    /// Problem found by the startup check, if any.
    pub fn consistency_issue(&self) -> Option<JvmanError> {
        self.consistency_issue
            .as_ref()
            .map(|message| JvmanError::Consistency(message.clone()))
    }

    pub fn current_state(&self) -> &CurrentState {
        &self.state
    }

    pub fn link_path(&self) -> &Path {
        self.links.link_path()
    }
}

#[cfg(all(test, unix))]
pub(crate) mod tests {
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    use super::*;
    use crate::core::env::EnvAnchor;
    use crate::core::java::runtime::tests::fake_jdk;
    use crate::core::platform::testing::TestPlatform;
    use crate::core::platform::EnvScope;

    /// Forwards to a shared `TestPlatform` so tests can keep a handle on it.
    pub(crate) struct Shared(pub Arc<TestPlatform>);

    impl PlatformAdapter for Shared {
        fn create_link(&self, link: &Path, target: &Path) -> platform::PlatformResult<()> {
            self.0.create_link(link, target)
        }
        fn remove_link(&self, link: &Path) -> platform::PlatformResult<()> {
            self.0.remove_link(link)
        }
        fn read_link(&self, link: &Path) -> platform::PlatformResult<Option<std::path::PathBuf>> {
            self.0.read_link(link)
        }
        fn read_env_var(&self, scope: EnvScope, name: &str) -> platform::PlatformResult<Option<String>> {
            self.0.read_env_var(scope, name)
        }
        fn persist_env_var(&self, scope: EnvScope, name: &str, value: &str) -> platform::PlatformResult<()> {
            self.0.persist_env_var(scope, name, value)
        }
        fn remove_env_var(&self, scope: EnvScope, name: &str) -> platform::PlatformResult<()> {
            self.0.remove_env_var(scope, name)
        }
        fn broadcast_env_change(&self) -> platform::PlatformResult<()> {
            self.0.broadcast_env_change()
        }
        fn path_separator(&self) -> char {
            self.0.path_separator()
        }
        fn inherited_path(&self) -> Option<&'static str> {
            self.0.inherited_path()
        }
    }

    pub(crate) struct World {
        pub temp: tempfile::TempDir,
        pub platform: Arc<TestPlatform>,
        pub settings: SwitcherSettings,
    }

    impl World {
        pub fn new(anchor: EnvAnchor) -> Self {
            let temp = tempfile::tempdir().unwrap();
            let platform = Arc::new(TestPlatform::in_dir(temp.path()));
            let settings = SwitcherSettings {
                env_anchor: anchor,
                ..SwitcherSettings::default()
            };
            Self {
                temp,
                platform,
                settings,
            }
        }

        pub fn open(&self) -> SwitcherState {
            let paths = AppPaths::at(self.temp.path().join("data")).unwrap();
            SwitcherState::open_with(
                paths,
                self.settings.clone(),
                Box::new(Shared(self.platform.clone())),
            )
            .unwrap()
        }

        pub fn jdk(&self, name: &str, version: &str) -> std::path::PathBuf {
            fake_jdk(&self.temp.path().join("jdks"), name, version, "Eclipse Adoptium")
        }

        pub fn env(&self, name: &str) -> Option<String> {
            self.platform.read_env_var(EnvScope::User, name).unwrap()
        }
    }

    #[test]
    fn switching_two_versions_and_restoring() {
        let world = World::new(EnvAnchor::Home);
        world
            .platform
            .persist_env_var(EnvScope::User, "PATH", "/usr/local/bin:/usr/bin")
            .unwrap();
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        let b = switcher.add_local_jdk(&world.jdk("b", "21.0.0")).unwrap();
        assert!(switcher.get_current().is_none());

        switcher.switch_version(&a.id).unwrap();
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(a.id.clone()));
        let a_bin = a.bin_dir().to_string_lossy().to_string();
        let path_after_a = world.env("PATH").unwrap();
        assert!(path_after_a.starts_with(&format!("{a_bin}:")));
        let java_home_after_a = world.env("JAVA_HOME");

        let report = switcher.switch_version(&b.id).unwrap();
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(b.id.clone()));
        let path = world.env("PATH").unwrap();
        let b_bin = b.bin_dir().to_string_lossy().to_string();
        assert!(!path.split(':').any(|s| s == a_bin));
        assert_eq!(path.split(':').filter(|s| *s == b_bin).count(), 1);
        assert_eq!(path, format!("{b_bin}:/usr/local/bin:/usr/bin"));

        switcher.restore_backup(&report.snapshot_id).unwrap();
        assert_eq!(world.env("PATH").unwrap(), path_after_a);
        assert_eq!(world.env("JAVA_HOME"), java_home_after_a);
        assert_eq!(
            switcher.current_state().managed_segments,
            vec![a_bin]
        );
    }

    #[test]
    fn unknown_switch_leaves_current_alone() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        switcher.switch_version(&a.id).unwrap();

        let err = switcher.switch_version("jdk8-nobody-1.8.0").unwrap_err();
        assert!(matches!(err, JvmanError::NotFound(_)));
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(a.id));
    }

    #[test]
    fn link_anchor_points_env_at_the_stable_link() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        switcher.switch_version(&a.id).unwrap();

        let link = switcher.link_path().to_string_lossy().to_string();
        assert_eq!(world.env("JAVA_HOME"), Some(link.clone()));
        assert_eq!(world.env("PATH"), Some(format!("{link}/bin:$PATH")));
        let backups = switcher.list_backups().len();
        assert!(switcher.preview_env_diff().unwrap().iter().all(|c| !c.is_change()));
        assert_eq!(switcher.list_backups().len(), backups);
    }

    #[test]
    fn remove_guards_the_active_installation() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        let b = switcher.add_local_jdk(&world.jdk("b", "21.0.0")).unwrap();
        switcher.switch_version(&a.id).unwrap();

        assert!(matches!(
            switcher.remove_installation(&a.id),
            Err(JvmanError::InUse(_))
        ));
        switcher.remove_installation(&b.id).unwrap();
        let ids: Vec<_> = switcher.list_installations().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ids, vec![a.id]);
    }

    #[test]
    fn env_failure_after_link_swap_is_a_named_partial_state() {
        let world = World::new(EnvAnchor::Home);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();

        world.platform.fail_env_writes.store(true, Ordering::SeqCst);
        let err = switcher.switch_version(&a.id).unwrap_err();
        assert!(matches!(
            &err,
            JvmanError::EnvStale { installation_id, .. } if *installation_id == a.id
        ));
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(a.id.clone()));
        assert_eq!(
            switcher.switch_status(),
            &SwitchStatus::LinkSwitchedEnvStale {
                installation_id: a.id.clone()
            }
        );
        assert_eq!(world.env("JAVA_HOME"), None);

        // The stale status survives a restart.
        drop(switcher);
        let mut switcher = world.open();
        assert!(matches!(
            switcher.switch_status(),
            SwitchStatus::LinkSwitchedEnvStale { .. }
        ));

        world.platform.fail_env_writes.store(false, Ordering::SeqCst);
        assert!(switcher.sync_env().unwrap().is_some());
        assert_eq!(switcher.switch_status(), &SwitchStatus::Consistent);
        assert_eq!(
            world.env("JAVA_HOME"),
            Some(a.home_path.to_string_lossy().to_string())
        );
    }

    #[test]
    fn unsaved_record_after_link_swap_is_a_named_partial_state() {
        let world = World::new(EnvAnchor::Home);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        let registry_file = AppPaths::at(world.temp.path().join("data"))
            .unwrap()
            .registry_file();
        std::fs::remove_file(&registry_file).unwrap();
        std::fs::create_dir(&registry_file).unwrap();

        let err = switcher.switch_version(&a.id).unwrap_err();
        assert!(matches!(
            &err,
            JvmanError::EnvStale { installation_id, .. } if *installation_id == a.id
        ));
        assert_eq!(
            switcher.switch_status(),
            &SwitchStatus::LinkSwitchedEnvStale {
                installation_id: a.id.clone()
            }
        );
        assert!(switcher.sync_env().is_err());
        assert!(matches!(
            switcher.switch_status(),
            SwitchStatus::LinkSwitchedEnvStale { .. }
        ));

        std::fs::remove_dir(&registry_file).unwrap();
        assert!(switcher.sync_env().unwrap().is_some());
        assert_eq!(switcher.switch_status(), &SwitchStatus::Consistent);
        drop(switcher);

        let switcher = world.open();
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(a.id));
        assert_eq!(switcher.switch_status(), &SwitchStatus::Consistent);
    }

    #[test]
    fn failed_restore_keeps_one_jdk_entry_on_path() {
        let world = World::new(EnvAnchor::Home);
        world
            .platform
            .persist_env_var(EnvScope::User, "PATH", "/usr/bin")
            .unwrap();
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        let b = switcher.add_local_jdk(&world.jdk("b", "21.0.0")).unwrap();
        switcher.switch_version(&a.id).unwrap();
        let report = switcher.switch_version(&b.id).unwrap();

        world.platform.fail_only("CLASSPATH");
        assert!(switcher.restore_backup(&report.snapshot_id).is_err());
        world.platform.clear_faults();
        switcher.switch_version(&b.id).unwrap();

        let path = world.env("PATH").unwrap();
        assert_eq!(path.split(':').filter(|s| *s != "/usr/bin").count(), 1);
        assert_eq!(path, format!("{}:/usr/bin", b.bin_dir().to_string_lossy()));
    }

    #[test]
    fn manual_backups_are_pinned_and_deletable() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let entry = switcher.create_backup().unwrap();
        assert!(entry.pinned);
        assert_eq!(switcher.list_backups().len(), 1);
        switcher.delete_backup(&entry.id).unwrap();
        assert!(switcher.list_backups().is_empty());
        assert!(matches!(
            switcher.restore_backup(&entry.id),
            Err(JvmanError::SnapshotNotFound(_))
        ));
    }

    #[test]
    fn startup_adopts_link_target_and_flags_mismatch() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let a = switcher.add_local_jdk(&world.jdk("a", "17.0.2")).unwrap();
        let b = switcher.add_local_jdk(&world.jdk("b", "21.0.0")).unwrap();
        switcher.switch_version(&a.id).unwrap();
        let link = switcher.link_path().to_path_buf();
        drop(switcher);

        let switcher = world.open();
        assert!(switcher.consistency_issue().is_none());
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(a.id.clone()));
        drop(switcher);

        // Repoint the link behind the engine's back.
        world.platform.create_link(&link, &b.home_path).unwrap();
        let switcher = world.open();
        assert_eq!(switcher.get_current().map(|i| i.id.clone()), Some(b.id));
        assert!(matches!(
            switcher.consistency_issue(),
            Some(JvmanError::Consistency(_))
        ));
    }

    #[test]
    fn startup_never_repairs_a_dangling_link() {
        let world = World::new(EnvAnchor::Link);
        let mut switcher = world.open();
        let home = world.jdk("a", "17.0.2");
        let a = switcher.add_local_jdk(&home).unwrap();
        switcher.switch_version(&a.id).unwrap();
        let link = switcher.link_path().to_path_buf();
        drop(switcher);

        std::fs::remove_dir_all(&home).unwrap();
        let switcher = world.open();
        assert!(switcher.get_current().is_none());
        assert!(switcher.consistency_issue().is_some());
        assert!(std::fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    }

    #[test]
    fn startup_flags_unregistered_link_targets() {
        let world = World::new(EnvAnchor::Link);
        let switcher = world.open();
        let stray = world.jdk("stray", "11.0.20");
        let link = switcher.link_path().to_path_buf();
        drop(switcher);

        world.platform.create_link(&link, &stray).unwrap();
        let switcher = world.open();
        assert!(switcher.get_current().is_none());
        let message = switcher.consistency_issue().unwrap().to_string();
        assert!(message.contains("unregistered"));
    }
}
