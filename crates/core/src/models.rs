//! Domain model types shared by the store, the lock protocol, and the CLI.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

// ---------------------------------------------------------------------------
// Version tokens
// ---------------------------------------------------------------------------

/// Opaque identifier bound to exactly one successful write of a document.
///
/// Tokens are `"{sequence:010}-{digest}"` where the digest chains the previous
/// token and the new content hash. They never depend on the wall clock, so
/// clock adjustments cannot produce duplicates or reorderings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VersionToken(String);

impl VersionToken {
    /// Derive the token that follows `previous` for content with `content_hash`.
    pub fn next(previous: Option<&FileMetadata>, content_hash: &str) -> (Self, u64) {
        let sequence = previous.map_or(1, |m| m.sequence + 1);
        let mut hasher = Sha256::new();
        if let Some(prev) = previous {
            hasher.update(prev.version.as_str().as_bytes());
        }
        hasher.update(b"\0");
        hasher.update(content_hash.as_bytes());
        hasher.update(sequence.to_be_bytes());
        let digest = hex::encode(hasher.finalize());
        (Self(format!("{:010}-{}", sequence, &digest[..12])), sequence)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for VersionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VersionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl std::fmt::Display for VersionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// What a conditional save expects the stored version to be.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Only write if the stored version is exactly this token.
    Exact(VersionToken),
    /// Create-or-overwrite: skip conflict detection entirely.
    Any,
}

impl From<VersionToken> for ExpectedVersion {
    fn from(v: VersionToken) -> Self {
        Self::Exact(v)
    }
}

/// SHA-256 hex digest of encoded document bytes.
pub fn content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

// ---------------------------------------------------------------------------
// File metadata
// ---------------------------------------------------------------------------

/// The side-car record kept next to every document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub version: VersionToken,
    /// Write counter the version token is derived from.
    #[serde(default)]
    pub sequence: u64,
    pub last_modified: DateTime<Utc>,
    pub last_modified_by: String,
    pub content_hash: String,
    #[serde(default)]
    pub is_locked: bool,
    #[serde(default)]
    pub locked_by: Option<String>,
    #[serde(default)]
    pub lock_expiry: Option<DateTime<Utc>>,
    /// Version the write that produced this record started from.
    #[serde(default)]
    pub base_version: Option<VersionToken>,
}

impl FileMetadata {
    /// The live lock at `now`, if any. Expired locks read as `None`.
    pub fn active_lock(&self, now: DateTime<Utc>) -> Option<LockInfo> {
        if !self.is_locked {
            return None;
        }
        let holder = self.locked_by.clone()?;
        let expires_at = self.lock_expiry?;
        if expires_at <= now {
            return None;
        }
        Some(LockInfo { holder, expires_at })
    }

    /// True if the record still carries lock fields that have run out.
    pub fn has_expired_lock(&self, now: DateTime<Utc>) -> bool {
        self.is_locked && self.active_lock(now).is_none()
    }

    pub fn set_lock(&mut self, holder: &str, expires_at: DateTime<Utc>) {
        self.is_locked = true;
        self.locked_by = Some(holder.to_string());
        self.lock_expiry = Some(expires_at);
    }

    pub fn clear_lock(&mut self) {
        self.is_locked = false;
        self.locked_by = None;
        self.lock_expiry = None;
    }
}

/// A held soft lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockInfo {
    pub holder: String,
    pub expires_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Integrity
// ---------------------------------------------------------------------------

/// Result of re-hashing a document and comparing against its metadata.
#[derive(Debug, Clone, Serialize)]
pub struct IntegrityReport {
    pub path: String,
    pub version: VersionToken,
    pub expected_hash: String,
    pub actual_hash: String,
}

impl IntegrityReport {
    pub fn is_intact(&self) -> bool {
        self.expected_hash == self.actual_hash
    }
}

// ---------------------------------------------------------------------------
// Conflict artifacts
// ---------------------------------------------------------------------------

/// Side-car written by the create-conflict-file strategy. Write-once; the
/// store never reads these back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConflictArtifact<T> {
    pub id: String,
    pub path: String,
    pub actor: String,
    pub timestamp: DateTime<Utc>,
    pub current_version: VersionToken,
    pub expected_version: VersionToken,
    pub base_model: T,
    pub local_model: T,
    pub remote_model: T,
}

/// Where an artifact landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLocation {
    pub id: String,
    pub file: PathBuf,
}
