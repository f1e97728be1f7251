//! File helpers. Every replacement goes through a temp file in the target
//! directory followed by a rename, so a reader never sees a half-written file.

use std::fs;
use std::io::{ErrorKind, Write};
use std::path::Path;

use tracing::error;

use crate::errors::StoreError;

pub fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

/// Replace `path` with `data`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp = stage(path, data)?;
    temp.persist(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Write `data` to `path`, failing if the file already exists.
pub fn write_new(path: &Path, data: &[u8]) -> Result<(), StoreError> {
    let temp = stage(path, data)?;
    temp.persist_noclobber(path)
        .map_err(|e| StoreError::io(path, e.error))?;
    Ok(())
}

/// Replace `path` with `data`, then run `commit`.
///
/// If `commit` fails, the previous contents of `path` are put back (or the
/// file is removed if there were none) and `commit`'s error is returned.
pub fn replace_then<F>(path: &Path, data: &[u8], commit: F) -> Result<(), StoreError>
where
    F: FnOnce() -> Result<(), StoreError>,
{
    let previous = read_optional(path)?;
    atomic_write(path, data)?;
    if let Err(err) = commit() {
        let restored = match &previous {
            Some(old) => atomic_write(path, old),
            None => remove_if_exists(path),
        };
        if let Err(restore_err) = restored {
            error!(
                path = %path.display(),
                error = %restore_err,
                "failed to restore file after a failed follow-up write"
            );
        }
        return Err(err);
    }
    Ok(())
}

pub fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StoreError::io(path, e)),
    }
}

fn stage(path: &Path, data: &[u8]) -> Result<tempfile::NamedTempFile, StoreError> {
    let dir = path.parent().ok_or_else(|| {
        StoreError::invalid("path", format!("'{}' has no parent directory", path.display()))
    })?;
    fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))?;
    let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(|e| StoreError::io(dir, e))?;
    temp.write_all(data)
        .and_then(|()| temp.as_file().sync_all())
        .map_err(|e| StoreError::io(temp.path(), e))?;
    Ok(temp)
}
