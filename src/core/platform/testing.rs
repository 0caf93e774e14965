//! Test double wrapping the POSIX adapter with fault injection.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{Receiver, Sender};
use std::sync::Mutex;

use super::posix::PosixPlatform;
use super::{EnvScope, PlatformAdapter, PlatformError, PlatformResult};

/// Pauses the next `create_link` until released.
pub(crate) struct LinkGate {
    pub entered: Sender<()>,
    pub release: Receiver<()>,
}

pub(crate) struct TestPlatform {
    inner: PosixPlatform,
    rc_file: PathBuf,
    /// When asked to link to `.0`, link to `.1` instead.
    pub redirect: Mutex<Option<(PathBuf, PathBuf)>>,
    pub fail_env_writes: AtomicBool,
    /// Fail writes of this one variable only.
    pub fail_var: Mutex<Option<String>>,
    pub fail_broadcast: AtomicBool,
    pub broadcasts: AtomicUsize,
    pub gate: Mutex<Option<LinkGate>>,
}

impl TestPlatform {
    /// Adapter whose user scope is a single `.bashrc` inside `dir`.
    pub fn in_dir(dir: &Path) -> Self {
        let rc_file = dir.join(".bashrc");
        Self {
            inner: PosixPlatform::with_files(
                vec![rc_file.clone()],
                vec![dir.join("profile.d").join("jvman.sh")],
            ),
            rc_file,
            redirect: Mutex::new(None),
            fail_env_writes: AtomicBool::new(false),
            fail_var: Mutex::new(None),
            fail_broadcast: AtomicBool::new(false),
            broadcasts: AtomicUsize::new(0),
            gate: Mutex::new(None),
        }
    }

    pub fn rc_contents(&self) -> String {
        std::fs::read_to_string(&self.rc_file).unwrap_or_default()
    }

    pub fn misdirect(&self, wanted: &Path, actual: &Path) {
        *self.redirect.lock().unwrap() = Some((wanted.to_path_buf(), actual.to_path_buf()));
    }

    pub fn fail_only(&self, name: &str) {
        *self.fail_var.lock().unwrap() = Some(name.to_string());
    }

    pub fn clear_faults(&self) {
        self.fail_env_writes.store(false, Ordering::SeqCst);
        *self.fail_var.lock().unwrap() = None;
    }

    fn env_write_guard(&self, name: &str) -> PlatformResult<()> {
        let targeted = self.fail_var.lock().unwrap().as_deref() == Some(name);
        if targeted || self.fail_env_writes.load(Ordering::SeqCst) {
            return Err(PlatformError::PermissionDenied {
                path: self.rc_file.clone(),
                detail: format!("injected failure writing {name}"),
            });
        }
        Ok(())
    }
}

impl PlatformAdapter for TestPlatform {
    fn create_link(&self, link_path: &Path, target: &Path) -> PlatformResult<()> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.entered.send(());
            let _ = gate.release.recv();
        }
        let redirected = match self.redirect.lock().unwrap().as_ref() {
            Some((wanted, actual)) if wanted == target => actual.clone(),
            _ => target.to_path_buf(),
        };
        self.inner.create_link(link_path, &redirected)
    }

    fn remove_link(&self, link_path: &Path) -> PlatformResult<()> {
        self.inner.remove_link(link_path)
    }

    fn read_link(&self, link_path: &Path) -> PlatformResult<Option<PathBuf>> {
        self.inner.read_link(link_path)
    }

    fn read_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<Option<String>> {
        self.inner.read_env_var(scope, name)
    }

    fn persist_env_var(&self, scope: EnvScope, name: &str, value: &str) -> PlatformResult<()> {
        self.env_write_guard(name)?;
        self.inner.persist_env_var(scope, name, value)
    }

    fn remove_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<()> {
        self.env_write_guard(name)?;
        self.inner.remove_env_var(scope, name)
    }

    fn broadcast_env_change(&self) -> PlatformResult<()> {
        self.broadcasts.fetch_add(1, Ordering::SeqCst);
        if self.fail_broadcast.load(Ordering::SeqCst) {
            return Err(PlatformError::unsupported("broadcast", "injected failure"));
        }
        self.inner.broadcast_env_change()
    }

    fn path_separator(&self) -> char {
        self.inner.path_separator()
    }

    fn inherited_path(&self) -> Option<&'static str> {
        self.inner.inherited_path()
    }
}
