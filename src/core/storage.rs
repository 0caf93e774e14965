use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::core::error::{JvmanError, JvmanResult};

/// Serialize `value` next to `path` and rename it into place.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> JvmanResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|source| JvmanError::io(parent, source))?;
    }

    let payload = serde_json::to_vec_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "record".to_string());
    let temp_path = path.with_file_name(format!(".{}.tmp.{}", file_name, std::process::id()));

    let mut file =
        std::fs::File::create(&temp_path).map_err(|source| JvmanError::io(&temp_path, source))?;
    file.write_all(&payload)
        .and_then(|_| file.sync_all())
        .map_err(|source| JvmanError::io(&temp_path, source))?;
    drop(file);

    std::fs::rename(&temp_path, path).map_err(|source| {
        let _ = std::fs::remove_file(&temp_path);
        JvmanError::io(path, source)
    })
}

/// Read a JSON record, returning `None` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> JvmanResult<Option<T>> {
    let raw = match std::fs::read(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => return Err(JvmanError::io(path, source)),
    };
    Ok(Some(serde_json::from_slice(&raw)?))
}
