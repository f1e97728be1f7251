//! Error types for the docvault core library.
//!
//! Each subsystem has its own error type derived with `thiserror`, and a
//! top-level [`CoreError`] enum unifies them all for callers that want a
//! single error type.
//!
//! Version and merge conflicts are *not* errors: they are reported as
//! structured [`SaveOutcome`](crate::store::SaveOutcome) variants so callers
//! can inspect the competing models and decide what to do.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Top-level error
// ---------------------------------------------------------------------------

/// Unified error type for the entire core library.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Merge(#[from] MergeError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

// ---------------------------------------------------------------------------
// Store errors
// ---------------------------------------------------------------------------

/// Errors from the versioned store, the soft-lock protocol, and edit sessions.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No document exists at the given path.
    #[error("document not found: {0}")]
    NotFound(String),

    /// A caller-supplied argument was rejected before any I/O happened.
    #[error("invalid argument '{field}': {detail}")]
    InvalidArgument { field: String, detail: String },

    /// An unexpired soft lock is held by a different actor.
    #[error("document '{path}' is locked by '{holder}' until {expires_at}")]
    LockContention {
        path: String,
        holder: String,
        expires_at: DateTime<Utc>,
    },

    /// Reading or writing the underlying file failed.
    #[error("storage I/O error at '{}': {source}", path.display())]
    StorageIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The codec could not encode or decode a document.
    #[error("codec error for '{path}': {source}")]
    Codec {
        path: String,
        #[source]
        source: CodecError,
    },

    /// The metadata side-car exists but cannot be parsed.
    #[error("corrupt metadata at '{}': {detail}", path.display())]
    CorruptMetadata { path: PathBuf, detail: String },

    /// The operation was cancelled before it touched disk.
    #[error("operation cancelled")]
    Cancelled,

    /// The merge engine failed to canonicalize a snapshot.
    #[error("store merge error: {0}")]
    Merge(#[from] MergeError),
}

impl StoreError {
    /// Shorthand for [`StoreError::InvalidArgument`].
    pub fn invalid(field: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            detail: detail.into(),
        }
    }

    /// Wrap an I/O error with the path it occurred at.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::StorageIo {
            path: path.into(),
            source,
        }
    }
}

// ---------------------------------------------------------------------------
// Codec errors
// ---------------------------------------------------------------------------

/// Errors from encoding or decoding document payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML encode error: {0}")]
    TomlEncode(#[from] toml::ser::Error),

    #[error("TOML decode error: {0}")]
    TomlDecode(#[from] toml::de::Error),

    /// TOML documents must be valid UTF-8.
    #[error("document is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),
}

// ---------------------------------------------------------------------------
// Merge errors
// ---------------------------------------------------------------------------

/// Errors from the three-way merge engine.
#[derive(Debug, Error)]
pub enum MergeError {
    /// A snapshot could not be turned into its canonical form.
    #[error("failed to canonicalize {side} snapshot: {detail}")]
    Canonicalize { side: &'static str, detail: String },

    /// Applying remote values for undeclared keys produced JSON the
    /// document type no longer accepts.
    #[error("merged document no longer deserializes: {0}")]
    Rebuild(#[source] serde_json::Error),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
