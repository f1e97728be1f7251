//! Document keys and where their files live under the store root.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};

use crate::errors::StoreError;

const METADATA_SUFFIX: &str = ".meta.json";
/// A final key segment ending in this could name another key's side-car.
const RESERVED_SEGMENT_SUFFIX: &str = ".meta";
const ARTIFACT_TIMESTAMP: &str = "%Y%m%dT%H%M%S%9fZ";

/// Normalize a caller-supplied document path into a store key.
///
/// Keys are relative, `/`-separated, and free of `.`/`..` segments.
/// Backslashes are accepted as separators. A final segment ending in
/// `.meta` (any case) is rejected: its document file could coincide with
/// the metadata side-car of a shorter key.
pub fn normalize_key(raw: &str) -> Result<String, StoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(StoreError::invalid("path", "must not be empty"));
    }
    let unified = trimmed.replace('\\', "/");
    if unified.starts_with('/') || Path::new(trimmed).is_absolute() {
        return Err(StoreError::invalid(
            "path",
            format!("'{raw}' must be relative to the store root"),
        ));
    }

    let mut segments = Vec::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(StoreError::invalid(
                    "path",
                    format!("'{raw}' must not contain '..'"),
                ))
            }
            s => segments.push(s),
        }
    }
    let Some(last) = segments.last() else {
        return Err(StoreError::invalid("path", format!("'{raw}' names no document")));
    };
    if last.to_ascii_lowercase().ends_with(RESERVED_SEGMENT_SUFFIX) {
        return Err(StoreError::invalid(
            "path",
            format!("'{raw}' must not end in '{RESERVED_SEGMENT_SUFFIX}'"),
        ));
    }
    Ok(segments.join("/"))
}

/// Reject keys that live inside the conflict artifact directory.
pub fn check_outside(key: &str, conflict_dir: &str) -> Result<(), StoreError> {
    let first = key.split('/').next().unwrap_or(key);
    if first.eq_ignore_ascii_case(conflict_dir) {
        return Err(StoreError::invalid(
            "path",
            format!("'{key}' is inside the conflict directory '{conflict_dir}'"),
        ));
    }
    Ok(())
}

/// The files belonging to one document key.
#[derive(Debug, Clone)]
pub struct DocumentPaths {
    pub key: String,
    pub document: PathBuf,
    pub metadata: PathBuf,
}

impl DocumentPaths {
    /// `key` must already be normalized.
    pub fn new(root: &Path, key: &str, extension: &str) -> Self {
        let mut dir = root.to_path_buf();
        let mut segments: Vec<&str> = key.split('/').collect();
        let name = segments.pop().unwrap_or(key);
        for segment in segments {
            dir.push(segment);
        }
        let doc_name = format!("{name}.{extension}");
        Self {
            key: key.to_string(),
            metadata: dir.join(format!("{doc_name}{METADATA_SUFFIX}")),
            document: dir.join(doc_name),
        }
    }
}

/// Flattened key used as the artifact file-name prefix. `%` is escaped
/// before `/` so distinct keys never share a stem.
fn artifact_stem(key: &str) -> String {
    key.replace('%', "%25").replace('/', "%2F")
}

/// Deterministic artifact file name for `key` at `at`.
pub fn artifact_file_name(key: &str, at: DateTime<Utc>, extension: &str) -> String {
    format!(
        "{}.{}.{}",
        artifact_stem(key),
        at.format(ARTIFACT_TIMESTAMP),
        extension
    )
}

/// Does `file_name` look like an artifact written for `key`?
pub fn is_artifact_for(file_name: &str, key: &str, extension: &str) -> bool {
    let Some(rest) = file_name.strip_prefix(&format!("{}.", artifact_stem(key))) else {
        return false;
    };
    let Some(stamp) = rest.strip_suffix(&format!(".{extension}")) else {
        return false;
    };
    !stamp.contains('.')
        && stamp
            .get(..8)
            .is_some_and(|date| date.bytes().all(|b| b.is_ascii_digit()))
}
