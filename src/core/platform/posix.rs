use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::shell_block::{self, ShellSyntax};
use super::{staging_link_path, EnvScope, PlatformAdapter, PlatformError, PlatformResult};

const SYSTEM_PROFILE: &str = "/etc/profile.d/jvman.sh";

/// Symlinks for the link, rc-file managed blocks for the environment.
#[derive(Debug, Clone)]
pub struct PosixPlatform {
    user_files: Vec<PathBuf>,
    system_files: Vec<PathBuf>,
}

impl PosixPlatform {
    /// Detect the user's rc files unless `overrides` names them explicitly.
    pub fn detect(overrides: &[PathBuf]) -> Self {
        let user_files = if overrides.is_empty() {
            let home = dirs::home_dir().unwrap_or_else(|| PathBuf::from("."));
            let shell = std::env::var("SHELL").ok();
            detect_rc_files(&home, shell.as_deref())
        } else {
            overrides.to_vec()
        };
        debug!("Shell config files: {:?}", user_files);
        Self {
            user_files,
            system_files: vec![PathBuf::from(SYSTEM_PROFILE)],
        }
    }

    /// Explicit rc files for both scopes.
    pub fn with_files(user_files: Vec<PathBuf>, system_files: Vec<PathBuf>) -> Self {
        Self {
            user_files,
            system_files,
        }
    }

    fn files(&self, scope: EnvScope) -> &[PathBuf] {
        match scope {
            EnvScope::User => &self.user_files,
            EnvScope::System => &self.system_files,
        }
    }

    fn edit_blocks<F>(&self, scope: EnvScope, mut edit: F) -> PlatformResult<()>
    where
        F: FnMut(&mut shell_block::ManagedBlock),
    {
        for file in self.files(scope) {
            let target = resolve_rc_target(file);
            let content = read_rc(&target)?;
            let syntax = ShellSyntax::for_file(file);
            let mut block = shell_block::parse(&content, syntax);
            edit(&mut block);
            let updated = shell_block::render_into(&content, &block, syntax);
            if updated != content {
                write_rc_atomic(&target, &updated)?;
                debug!("Updated managed block in {:?}", target);
            }
        }
        Ok(())
    }
}

/// rc files the user's shells actually read. Existing files win; with none
/// present the login shell decides, falling back to `~/.profile`.
pub fn detect_rc_files(home: &Path, shell: Option<&str>) -> Vec<PathBuf> {
    let bash = if home.join(".bashrc").exists() {
        Some(home.join(".bashrc"))
    } else if home.join(".bash_profile").exists() {
        Some(home.join(".bash_profile"))
    } else {
        None
    };
    let zsh = home.join(".zshrc");
    let fish = home.join(".config").join("fish").join("config.fish");

    let mut found: Vec<PathBuf> = bash.into_iter().collect();
    if zsh.exists() {
        found.push(zsh.clone());
    }
    if fish.exists() {
        found.push(fish.clone());
    }
    if !found.is_empty() {
        return found;
    }

    let shell_name = shell
        .and_then(|s| Path::new(s).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();
    let fallback = match shell_name {
        "bash" => home.join(".bashrc"),
        "zsh" => zsh,
        "fish" => fish,
        _ => home.join(".profile"),
    };
    vec![fallback]
}

// Dotfile managers symlink rc files; edit the file behind the link.
fn resolve_rc_target(file: &Path) -> PathBuf {
    match std::fs::symlink_metadata(file) {
        Ok(meta) if meta.file_type().is_symlink() => {
            std::fs::canonicalize(file).unwrap_or_else(|_| file.to_path_buf())
        }
        _ => file.to_path_buf(),
    }
}

fn read_rc(path: &Path) -> PlatformResult<String> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(content),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(PlatformError::from_io(path, err)),
    }
}

fn write_rc_atomic(path: &Path, content: &str) -> PlatformResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| PlatformError::from_io(parent, e))?;
    }
    let staging = staging_link_path(path);
    let permissions = std::fs::metadata(path).ok().map(|m| m.permissions());

    let result = std::fs::File::create(&staging)
        .and_then(|mut f| {
            f.write_all(content.as_bytes())?;
            f.sync_all()
        })
        .and_then(|_| match permissions {
            Some(perms) => std::fs::set_permissions(&staging, perms),
            None => Ok(()),
        })
        .and_then(|_| std::fs::rename(&staging, path));

    result.map_err(|e| {
        let _ = std::fs::remove_file(&staging);
        PlatformError::from_io(path, e)
    })
}

impl PlatformAdapter for PosixPlatform {
    fn create_link(&self, link_path: &Path, target: &Path) -> PlatformResult<()> {
        if let Ok(meta) = std::fs::symlink_metadata(link_path) {
            if !meta.file_type().is_symlink() {
                return Err(PlatformError::unsupported(
                    link_path,
                    "existing entry is not a symbolic link",
                ));
            }
        }

        let staging = staging_link_path(link_path);
        std::os::unix::fs::symlink(target, &staging)
            .map_err(|e| PlatformError::from_io(link_path, e))?;
        std::fs::rename(&staging, link_path).map_err(|e| {
            let _ = std::fs::remove_file(&staging);
            PlatformError::from_io(link_path, e)
        })
    }

    fn remove_link(&self, link_path: &Path) -> PlatformResult<()> {
        match std::fs::symlink_metadata(link_path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(PlatformError::from_io(link_path, err)),
            Ok(meta) if meta.file_type().is_symlink() => std::fs::remove_file(link_path)
                .map_err(|e| PlatformError::from_io(link_path, e)),
            Ok(_) => Err(PlatformError::unsupported(
                link_path,
                "refusing to remove an entry that is not a symbolic link",
            )),
        }
    }

    fn read_link(&self, link_path: &Path) -> PlatformResult<Option<PathBuf>> {
        match std::fs::symlink_metadata(link_path) {
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(PlatformError::from_io(link_path, err)),
            Ok(meta) if meta.file_type().is_symlink() => {
                let raw = std::fs::read_link(link_path)
                    .map_err(|e| PlatformError::from_io(link_path, e))?;
                if raw.is_absolute() {
                    Ok(Some(raw))
                } else {
                    let base = link_path.parent().unwrap_or_else(|| Path::new("."));
                    Ok(Some(base.join(raw)))
                }
            }
            Ok(_) => Err(PlatformError::unsupported(
                link_path,
                "entry exists but is not a symbolic link",
            )),
        }
    }

    fn read_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<Option<String>> {
        for file in self.files(scope) {
            let content = read_rc(&resolve_rc_target(file))?;
            if shell_block::has_block(&content) {
                let block = shell_block::parse(&content, ShellSyntax::for_file(file));
                return Ok(block.get(name).map(str::to_string));
            }
        }
        Ok(None)
    }

    fn persist_env_var(&self, scope: EnvScope, name: &str, value: &str) -> PlatformResult<()> {
        self.edit_blocks(scope, |block| block.set(name, value))
    }

    fn remove_env_var(&self, scope: EnvScope, name: &str) -> PlatformResult<()> {
        self.edit_blocks(scope, |block| block.remove(name))
    }

    fn broadcast_env_change(&self) -> PlatformResult<()> {
        // No IPC exists for shells; new ones pick the block up on start.
        for scope in [EnvScope::User, EnvScope::System] {
            for file in self.files(scope) {
                if file.exists() {
                    info!("Environment updated; run `source {}` or open a new shell", file.display());
                }
            }
        }
        Ok(())
    }

    fn path_separator(&self) -> char {
        ':'
    }

    fn inherited_path(&self) -> Option<&'static str> {
        Some("$PATH")
    }
}
