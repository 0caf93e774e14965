//! Owner of the single "current" link and its swap state machine.

use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::core::error::{JvmanError, JvmanResult};
use crate::core::java;
use crate::core::platform::PlatformAdapter;
use crate::core::registry::{JdkInstallation, VersionRegistry};
use crate::core::state::CurrentState;

/// Progress of one switch request.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SwitchPhase {
    Idle,
    Validating,
    Linking,
    Verifying,
    Committed,
    RolledBack,
}

/// What the link path currently holds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResolution {
    Absent,
    /// A link whose target no longer exists; carries the raw target.
    Dangling(PathBuf),
    /// Canonical path of the link target.
    Resolved(PathBuf),
}

pub struct LinkManager {
    link_path: PathBuf,
    phase: SwitchPhase,
}

impl LinkManager {
    pub fn new(link_path: PathBuf) -> Self {
        Self {
            link_path,
            phase: SwitchPhase::Idle,
        }
    }

    pub fn link_path(&self) -> &Path {
        &self.link_path
    }

    /// Phase reached by the most recent switch.
    pub fn phase(&self) -> SwitchPhase {
        self.phase
    }

    /// Repoint the link at installation `id` and record it in `state`.
    ///
    /// Validation failures leave everything untouched. Failures once the
    /// link has been touched restore the previous link before returning.
    #[instrument(skip(self, platform, registry, state))]
    pub fn switch(
        &mut self,
        platform: &dyn PlatformAdapter,
        registry: &VersionRegistry,
        state: &mut CurrentState,
        id: &str,
    ) -> JvmanResult<JdkInstallation> {
        self.phase = SwitchPhase::Validating;
        let prepared = self.validate(registry, id).and_then(|installation| {
            self.ensure_link_parent()?;
            let previous = platform.read_link(&self.link_path)?;
            Ok((installation, previous))
        });
        let (installation, previous) = match prepared {
            Ok(prepared) => prepared,
            Err(err) => {
                self.phase = SwitchPhase::Idle;
                return Err(err);
            }
        };

        self.phase = SwitchPhase::Linking;
        debug!("Linking {:?} -> {:?}", self.link_path, installation.home_path);
        if let Err(err) = platform.create_link(&self.link_path, &installation.home_path) {
            // The staged link never replaced the old one.
            self.phase = SwitchPhase::RolledBack;
            return Err(err.into());
        }

        self.phase = SwitchPhase::Verifying;
        let expected = canonical(&installation.home_path);
        let failure = match std::fs::canonicalize(&self.link_path) {
            Ok(actual) if actual == expected => None,
            Ok(actual) => Some(JvmanError::SwitchFailed {
                expected: expected.clone(),
                actual: Some(actual),
            }),
            Err(_) => Some(JvmanError::PathMissing(installation.home_path.clone())),
        };
        if let Some(err) = failure {
            warn!("Link verification failed for {}: {}", id, err);
            self.rollback(platform, previous.as_deref());
            self.phase = SwitchPhase::RolledBack;
            return Err(err);
        }

        state.current_installation_id = Some(installation.id.clone());
        self.phase = SwitchPhase::Committed;
        info!("Link now points at {} ({:?})", installation.id, installation.home_path);
        Ok(installation)
    }

    /// Inspect the link without changing it.
    pub fn resolve(&self, platform: &dyn PlatformAdapter) -> JvmanResult<LinkResolution> {
        let Some(raw) = platform.read_link(&self.link_path)? else {
            return Ok(LinkResolution::Absent);
        };
        match std::fs::canonicalize(&self.link_path) {
            Ok(resolved) => Ok(LinkResolution::Resolved(resolved)),
            Err(_) => Ok(LinkResolution::Dangling(raw)),
        }
    }

    fn validate(&self, registry: &VersionRegistry, id: &str) -> JvmanResult<JdkInstallation> {
        let installation = registry.get(id)?;
        if !installation.home_path.is_dir() {
            return Err(JvmanError::invalid_home(
                &installation.home_path,
                "home directory no longer exists",
            ));
        }
        if !java::has_java_executable(&installation.home_path) {
            return Err(JvmanError::invalid_home(
                &installation.home_path,
                "java executable is missing",
            ));
        }
        Ok(installation.clone())
    }

    fn ensure_link_parent(&self) -> JvmanResult<()> {
        let Some(parent) = self.link_path.parent() else {
            return Ok(());
        };
        std::fs::create_dir_all(parent).map_err(|source| match source.kind() {
            std::io::ErrorKind::PermissionDenied => {
                JvmanError::PermissionDenied(format!("{}: {}", parent.display(), source))
            }
            _ => JvmanError::PathMissing(parent.to_path_buf()),
        })
    }

    fn rollback(&self, platform: &dyn PlatformAdapter, previous: Option<&Path>) {
        let restored = match previous {
            Some(target) => platform.create_link(&self.link_path, target),
            None => platform.remove_link(&self.link_path),
        };
        match restored {
            Ok(()) => info!("Restored previous link {:?}", previous),
            Err(err) => warn!("Rollback of {:?} failed: {}", self.link_path, err),
        }
    }
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::core::java::runtime::tests::fake_jdk;
    use crate::core::platform::testing::TestPlatform;

    struct Fixture {
        _temp: tempfile::TempDir,
        platform: TestPlatform,
        registry: VersionRegistry,
        state: CurrentState,
        manager: LinkManager,
        a: JdkInstallation,
        b: JdkInstallation,
    }

    fn fixture() -> Fixture {
        let temp = tempfile::tempdir().unwrap();
        let root = temp.path().to_path_buf();
        let (mut registry, state) = VersionRegistry::load(root.join("registry.json")).unwrap();
        let a = registry
            .add_local(&fake_jdk(&root, "jdk-17", "17.0.2", "Eclipse Adoptium"))
            .unwrap();
        let b = registry
            .add_local(&fake_jdk(&root, "jdk-21", "21.0.0", "Eclipse Adoptium"))
            .unwrap();
        Fixture {
            platform: TestPlatform::in_dir(&root),
            manager: LinkManager::new(root.join("links").join("current")),
            registry,
            state,
            a,
            b,
            _temp: temp,
        }
    }

    #[test]
    fn switch_commits_and_records_current() {
        let mut f = fixture();
        let inst = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.a.id)
            .unwrap();
        assert_eq!(inst.id, f.a.id);
        assert_eq!(f.manager.phase(), SwitchPhase::Committed);
        assert_eq!(f.state.current_installation_id.as_deref(), Some(f.a.id.as_str()));
        assert_eq!(
            f.manager.resolve(&f.platform).unwrap(),
            LinkResolution::Resolved(f.a.home_path.clone())
        );

        f.manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.b.id)
            .unwrap();
        assert_eq!(
            f.manager.resolve(&f.platform).unwrap(),
            LinkResolution::Resolved(f.b.home_path.clone())
        );
    }

    #[test]
    fn unknown_id_changes_nothing() {
        let mut f = fixture();
        let err = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, "jdk99-nope")
            .unwrap_err();
        assert!(matches!(err, JvmanError::NotFound(_)));
        assert_eq!(f.manager.phase(), SwitchPhase::Idle);
        assert_eq!(f.state, CurrentState::default());
        assert_eq!(f.manager.resolve(&f.platform).unwrap(), LinkResolution::Absent);
    }

    #[test]
    fn broken_home_is_rejected_before_linking() {
        let mut f = fixture();
        std::fs::remove_file(java::java_binary(&f.b.home_path)).unwrap();
        let err = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.b.id)
            .unwrap_err();
        assert!(matches!(err, JvmanError::InvalidJdkHome { .. }));
        assert_eq!(f.manager.resolve(&f.platform).unwrap(), LinkResolution::Absent);
    }

    #[test]
    fn verification_mismatch_restores_previous_link() {
        let mut f = fixture();
        f.manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.a.id)
            .unwrap();

        let decoy = f.a.home_path.parent().unwrap().join("decoy");
        std::fs::create_dir_all(&decoy).unwrap();
        f.platform.misdirect(&f.b.home_path, &decoy);

        let err = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.b.id)
            .unwrap_err();
        assert!(matches!(err, JvmanError::SwitchFailed { actual: Some(_), .. }));
        assert_eq!(f.manager.phase(), SwitchPhase::RolledBack);
        assert_eq!(f.state.current_installation_id.as_deref(), Some(f.a.id.as_str()));
        assert_eq!(
            f.manager.resolve(&f.platform).unwrap(),
            LinkResolution::Resolved(f.a.home_path.clone())
        );
    }

    #[test]
    fn dangling_result_without_previous_link_removes_it() {
        let mut f = fixture();
        let missing = f.a.home_path.parent().unwrap().join("vanished");
        f.platform.misdirect(&f.a.home_path, &missing);

        let err = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.a.id)
            .unwrap_err();
        assert!(matches!(err, JvmanError::PathMissing(_)));
        assert_eq!(f.manager.resolve(&f.platform).unwrap(), LinkResolution::Absent);
        assert!(f.state.current_installation_id.is_none());
    }

    #[test]
    fn non_link_at_link_path_is_unsupported() {
        let mut f = fixture();
        std::fs::create_dir_all(f.manager.link_path()).unwrap();
        let err = f
            .manager
            .switch(&f.platform, &f.registry, &mut f.state, &f.a.id)
            .unwrap_err();
        assert!(matches!(err, JvmanError::UnsupportedFilesystem(_)));
        assert_eq!(f.manager.phase(), SwitchPhase::Idle);
    }
}
