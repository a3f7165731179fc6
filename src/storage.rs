//! JSON state files shared by the credential cache and the throttle ledger.

use crate::error::PersistenceError;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::Path;

/// Read a JSON state file
///
/// Returns `Ok(None)` when the file does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, PersistenceError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(PersistenceError::io(path, e)),
    };

    serde_json::from_str(&contents)
        .map(Some)
        .map_err(|source| PersistenceError::Corrupt {
            path: path.display().to_string(),
            source,
        })
}

/// Replace a JSON state file without ever exposing a partial write
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<(), PersistenceError> {
    let json = serde_json::to_string(value)?;
    let tmp_path = path.with_extension("json.tmp");

    std::fs::write(&tmp_path, json).map_err(|e| PersistenceError::io(&tmp_path, e))?;
    std::fs::rename(&tmp_path, path).map_err(|e| PersistenceError::io(path, e))
}
