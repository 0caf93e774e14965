use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, warn};
use windows::core::PCWSTR;
use windows::Win32::Foundation::{ERROR_ACCESS_DENIED, ERROR_FILE_NOT_FOUND, ERROR_SUCCESS, LPARAM, WIN32_ERROR, WPARAM};
use windows::Win32::System::Registry::{
    RegCloseKey, RegDeleteValueW, RegGetValueW, RegOpenKeyExW, RegSetValueExW, HKEY,
    HKEY_CURRENT_USER, HKEY_LOCAL_MACHINE, KEY_QUERY_VALUE, KEY_SET_VALUE, REG_EXPAND_SZ, REG_SZ,
    REG_SAM_FLAGS, REG_VALUE_TYPE, RRF_NOEXPAND, RRF_RT_REG_EXPAND_SZ, RRF_RT_REG_SZ,
};
use windows::Win32::UI::WindowsAndMessaging::{
    SendMessageTimeoutW, HWND_BROADCAST, SMTO_ABORTIFHUNG, WM_SETTINGCHANGE,
};

use super::{staging_link_path, EnvScope, PlatformAdapter, PlatformError, PlatformResult};

const USER_ENV_KEY: &str = "Environment";
const SYSTEM_ENV_KEY: &str = r"System\CurrentControlSet\Control\Session Manager\Environment";
const ERROR_PRIVILEGE_NOT_HELD: i32 = 1314;
const BROADCAST_TIMEOUT_MS: u32 = 5000;

/// Directory symlinks (junctions without Developer Mode) for the link,
/// the registry environment keys for variables.
#[derive(Debug, Default)]
pub struct WindowsPlatform;

impl WindowsPlatform {
    pub fn new() -> Self {
        Self
    }
}

fn to_wide(value: &str) -> Vec<u16> {
    value.encode_utf16().chain(std::iter::once(0)).collect()
}

fn env_key(scope: EnvScope) -> (HKEY, &'static str) {
    match scope {
        EnvScope::User => (HKEY_CURRENT_USER, USER_ENV_KEY),
        EnvScope::System => (HKEY_LOCAL_MACHINE, SYSTEM_ENV_KEY),
    }
}

fn registry_error(scope: EnvScope, action: &str, name: &str, status: WIN32_ERROR) -> PlatformError {
    let (_, sub_key) = env_key(scope);
    let path = PathBuf::from(sub_key);
    if status == ERROR_ACCESS_DENIED {
        PlatformError::PermissionDenied {
            path,
            detail: format!("{action} {name} in {scope} environment"),
        }
    } else {
        PlatformError::UnsupportedFilesystem {
            path,
            detail: format!("{action} {name} failed: status={}", status.0),
        }
    }
}

/// Open handle closed on drop.
struct EnvKey(HKEY);

impl EnvKey {
    fn open(scope: EnvScope, sam: REG_SAM_FLAGS) -> PlatformResult<Self> {
        let (root, sub_key) = env_key(scope);
        let wide = to_wide(sub_key);
        let mut key = HKEY::default();
        let status = unsafe { RegOpenKeyExW(root, PCWSTR(wide.as_ptr()), Some(0), sam, &mut key) };
        if status != ERROR_SUCCESS {
            return Err(registry_error(scope, "open", sub_key, status));
        }
        Ok(Self(key))
    }
}

impl Drop for EnvKey {
    fn drop(&mut self) {
        let _ = unsafe { RegCloseKey(self.0) };
    }
}

fn existing_value_type(key: &EnvKey, wide_name: &[u16]) -> Option<REG_VALUE_TYPE> {
    let mut value_type = REG_VALUE_TYPE(0);
    let status = unsafe {
        RegGetValueW(
            key.0,
            PCWSTR::null(),
            PCWSTR(wide_name.as_ptr()),
            RRF_RT_REG_SZ | RRF_RT_REG_EXPAND_SZ | RRF_NOEXPAND,
            Some(&mut value_type),
            None,
            None,
        )
    };
    (status == ERROR_SUCCESS).then_some(value_type)
}

fn replace_link(staging: &Path, link_path: &Path) -> PlatformResult<()> {
    let err = match std::fs::rename(staging, link_path) {
        Ok(()) => return Ok(()),
        Err(err) => err,
    };
    if std::fs::symlink_metadata(link_path).is_err() {
        return Err(PlatformError::from_io(link_path, err));
    }

    // Directory links cannot always be renamed over; swap the old one aside.
    warn!("Replacing {:?} non-atomically", link_path);
    let aside = staging.with_extension("old");
    std::fs::rename(link_path, &aside).map_err(|e| PlatformError::from_io(link_path, e))?;
    if let Err(err) = std::fs::rename(staging, link_path) {
        let _ = std::fs::rename(&aside, link_path);
        return Err(PlatformError::from_io(link_path, err));
    }
    let _ = std::fs::remove_dir(&aside);
    Ok(())
}

// cmd re-parses its own command line after std quotes the arguments, so
// metacharacters in either path cannot be passed through safely. Its stderr
// is localized and only ever used as error detail.
fn create_junction(link: &Path, target: &Path) -> PlatformResult<()> {
    for path in [link, target] {
        if path.to_string_lossy().contains(['&', '^', '%', '|', '<', '>', '"']) {
            return Err(PlatformError::unsupported(
                path,
                "cannot create a junction for a path containing shell metacharacters",
            ));
        }
    }
    let output = Command::new("cmd")
        .arg("/C")
        .arg("mklink")
        .arg("/J")
        .arg(link)
        .arg(target)
        .output()
        .map_err(|e| PlatformError::from_io(link, e))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(PlatformError::unsupported(
            link,
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        ))
    }
}

impl PlatformAdapter for WindowsPlatform {
    fn create_link(&self, link_path: &Path, target: &Path) -> PlatformResult<()> {
        if let Ok(meta) = std::fs::symlink_metadata(link_path) {
            if !meta.file_type().is_symlink() {
                return Err(PlatformError::unsupported(
                    link_path,
                    "existing entry is not a link",
                ));
            }
        }

        let staging = staging_link_path(link_path);
        match std::os::windows::fs::symlink_dir(target, &staging) {
            Ok(()) => {}
            Err(err) if err.raw_os_error() == Some(ERROR_PRIVILEGE_NOT_HELD) => {
                debug!("Symlink privilege not held, falling back to a junction");
                create_junction(&staging, target)?;
            }
            Err(err) => return Err(PlatformError::from_io(link_path, err)),
        }

        replace_link(&staging, link_path).inspect_err(|_| {
            let _ = std::fs::remove_dir(&staging);
        })
    }

    fn remove_link(&self, link_path: &Path) -> PlatformResult<()> {
        match std::fs::symlink_metadata(link_path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PlatformError::from_io(link_path, err)),
            // remove_dir deletes the reparse point, never the target's contents.
            Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_dir(link_path)
                .map_err(|e| PlatformError::from_io(link_path, e)),
            Ok(_) => Err(PlatformError::unsupported(
                link_path,
                "refusing to remove an entry that is not a link",
            )),
        }
    }

    fn read_link(&self, link_path: &Path) -> PlatformResult<Option<PathBuf>> {
        match std::fs::symlink_metadata(link_path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PlatformError::from_io(link_path, err)),
            Ok(meta) if meta.file_type().is_symlink() => std::fs::read_link(link_path)
                .map(Some)
                .map_err(|e| PlatformError::from_io(link_path, e)),
            Ok(_) => Err(PlatformError::unsupported(
                link_path,
                "entry exists but is not a link",
            )),
        }
    }

    fn read_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<Option<String>> {
        let key = EnvKey::open(scope, KEY_QUERY_VALUE)?;
        let wide_name = to_wide(name);
        let flags = RRF_RT_REG_SZ | RRF_RT_REG_EXPAND_SZ | RRF_NOEXPAND;
        let mut value_type = REG_VALUE_TYPE(0);
        let mut size_bytes: u32 = 0;

        let status = unsafe {
            RegGetValueW(
                key.0,
                PCWSTR::null(),
                PCWSTR(wide_name.as_ptr()),
                flags,
                Some(&mut value_type),
                None,
                Some(&mut size_bytes),
            )
        };
        if status == ERROR_FILE_NOT_FOUND {
            return Ok(None);
        }
        if status != ERROR_SUCCESS {
            return Err(registry_error(scope, "read", name, status));
        }

        let mut buffer: Vec<u16> = vec![0u16; (size_bytes as usize / 2).max(1)];
        let status = unsafe {
            RegGetValueW(
                key.0,
                PCWSTR::null(),
                PCWSTR(wide_name.as_ptr()),
                flags,
                Some(&mut value_type),
                Some(buffer.as_mut_ptr() as *mut _),
                Some(&mut size_bytes),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error(scope, "read", name, status));
        }
        // size_bytes includes the terminating null.
        buffer.truncate((size_bytes as usize / 2).saturating_sub(1));
        Ok(Some(String::from_utf16_lossy(&buffer)))
    }

    fn persist_env_var(&self, scope: EnvScope, name: &str, value: &str) -> PlatformResult<()> {
        let key = EnvKey::open(scope, KEY_QUERY_VALUE | KEY_SET_VALUE)?;
        let wide_name = to_wide(name);
        let data = to_wide(value);
        // Overwrites keep the existing type; new values are REG_EXPAND_SZ so
        // %VAR% references in PATH stay live.
        let value_type = match existing_value_type(&key, &wide_name) {
            Some(existing) if existing == REG_SZ => REG_SZ,
            _ => REG_EXPAND_SZ,
        };
        let status = unsafe {
            RegSetValueExW(
                key.0,
                PCWSTR(wide_name.as_ptr()),
                Some(0),
                value_type,
                Some(std::slice::from_raw_parts(
                    data.as_ptr() as *const u8,
                    data.len() * 2,
                )),
            )
        };
        if status != ERROR_SUCCESS {
            return Err(registry_error(scope, "write", name, status));
        }
        Ok(())
    }

    fn remove_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<()> {
        let key = EnvKey::open(scope, KEY_SET_VALUE)?;
        let wide_name = to_wide(name);
        let status = unsafe { RegDeleteValueW(key.0, PCWSTR(wide_name.as_ptr())) };
        if status == ERROR_SUCCESS || status == ERROR_FILE_NOT_FOUND {
            return Ok(());
        }
        Err(registry_error(scope, "delete", name, status))
    }

    fn broadcast_env_change(&self) -> PlatformResult<()> {
        let param = to_wide("Environment");
        let mut result: usize = 0;
        let sent = unsafe {
            SendMessageTimeoutW(
                HWND_BROADCAST,
                WM_SETTINGCHANGE,
                WPARAM(0),
                LPARAM(param.as_ptr() as isize),
                SMTO_ABORTIFHUNG,
                BROADCAST_TIMEOUT_MS,
                Some(&mut result),
            )
        };
        if sent.0 == 0 {
            return Err(PlatformError::unsupported(
                "HWND_BROADCAST",
                "WM_SETTINGCHANGE broadcast timed out",
            ));
        }
        Ok(())
    }

    fn path_separator(&self) -> char {
        ';'
    }

    fn inherited_path(&self) -> Option<&'static str> {
        None
    }
}
