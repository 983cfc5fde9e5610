//! Filesystem helpers for crash-safe JSON documents.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::GroveResult;

/// Write data to a file atomically using temp-file-then-rename.
///
/// Readers see either the old document or the new one, never a torn
/// write. The temp file is fsynced before the rename.
pub fn atomic_write(path: &Path, data: &[u8]) -> GroveResult<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("tmp");
    let mut file = File::create(&tmp)?;
    file.write_all(data)?;
    file.sync_data()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Serialize `value` as pretty JSON and write it atomically.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> GroveResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    atomic_write(path, &json)
}

/// Read a JSON document, or `None` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> GroveResult<Option<T>> {
    if !path.exists() {
        return Ok(None);
    }
    let data = fs::read(path)?;
    Ok(Some(serde_json::from_slice(&data)?))
}
