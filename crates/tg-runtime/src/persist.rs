//! Atomic JSON file persistence shared by settings, statistics, the
//! filter-list registry and the installed artifact manifest.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{Error, Result};

/// Write `value` as JSON next to `path`, then rename over it.
pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::persistence(parent, e))?;
    }

    let bytes = serde_json::to_vec_pretty(value).map_err(|e| Error::encoding(path, e))?;
    let tmp = path.with_extension("json.tmp");
    {
        let mut file = fs::File::create(&tmp).map_err(|e| Error::persistence(&tmp, e))?;
        file.write_all(&bytes).map_err(|e| Error::persistence(&tmp, e))?;
        file.sync_all().map_err(|e| Error::persistence(&tmp, e))?;
    }
    fs::rename(&tmp, path).map_err(|e| Error::persistence(path, e))?;
    Ok(())
}

/// Read a JSON file. `Ok(None)` when it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(Error::persistence(path, e)),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::encoding(path, e))
}
