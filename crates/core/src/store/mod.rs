//! The versioned document store.
//!
//! Each document lives in its own file next to a JSON metadata side-car
//! that records the current [`VersionToken`], content hash, last writer, and
//! soft-lock state. Every operation on a document runs under that
//! document's in-process path mutex, and content and metadata are written
//! together inside it, so readers in this process never see one without the
//! other.
//!
//! Nothing here takes OS-level file locks. Another process that writes the
//! files directly bypasses all of this; [`VersionedStore::verify`] can detect
//! the damage afterwards but not prevent it.

mod cancel;
mod fsio;
pub mod layout;

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{Codec, JsonCodec};
use crate::conflict::resolver::{
    ConflictResolver, ConflictStrategy, MergeConflictReport, Mismatch, Resolution,
    VersionConflict,
};
use crate::document::Document;
use crate::errors::StoreError;
use crate::lock::{soft, PathLockRegistry};
use crate::models::{
    content_hash, ArtifactLocation, ConflictArtifact, ExpectedVersion, FileMetadata,
    IntegrityReport, LockInfo, VersionToken,
};

pub use cancel::CancelToken;
use layout::DocumentPaths;

/// Default directory (under the root) for conflict artifacts.
pub const DEFAULT_CONFLICT_DIR: &str = ".conflicts";

// ---------------------------------------------------------------------------
// Results
// ---------------------------------------------------------------------------

/// A document as read from disk.
#[derive(Debug, Clone)]
pub struct Snapshot<T> {
    pub model: T,
    pub version: VersionToken,
    pub metadata: FileMetadata,
}

/// What a conditional save did.
#[derive(Debug)]
pub enum SaveOutcome<T> {
    /// The document was written and now has `version`.
    Saved { version: VersionToken, merged: bool },
    /// Abort strategy: the stored version moved on; nothing was written.
    VersionConflict(VersionConflict<T>),
    /// Auto-merge strategy: some fields could not be reconciled; nothing
    /// was written.
    MergeConflict(MergeConflictReport<T>),
    /// Conflict-file strategy: the artifact was written; the document was
    /// not.
    ConflictFileCreated(ArtifactLocation),
}

impl<T> SaveOutcome<T> {
    pub fn is_saved(&self) -> bool {
        matches!(self, Self::Saved { .. })
    }

    /// The new version, if the document was written.
    pub fn version(&self) -> Option<&VersionToken> {
        match self {
            Self::Saved { version, .. } => Some(version),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// A directory of versioned documents encoded with `C`.
///
/// `VersionedStore` is `Sync`; share it across threads by reference or in an
/// `Arc`.
pub struct VersionedStore<C = JsonCodec> {
    root: PathBuf,
    conflict_dir: String,
    codec: C,
    registry: PathLockRegistry,
    clock: Arc<dyn Clock>,
    cancel: Option<CancelToken>,
    default_strategy: ConflictStrategy,
}

impl<C> std::fmt::Debug for VersionedStore<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VersionedStore")
            .field("root", &self.root)
            .field("conflict_dir", &self.conflict_dir)
            .field("default_strategy", &self.default_strategy)
            .field("tracked_paths", &self.registry.len())
            .finish_non_exhaustive()
    }
}

impl<C: Codec> VersionedStore<C> {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open<P: AsRef<Path>>(root: P, codec: C) -> Result<Self, StoreError> {
        let root = root.as_ref();
        info!(root = %root.display(), extension = codec.extension(), "opening document store");
        fs::create_dir_all(root).map_err(|e| StoreError::io(root, e))?;
        Ok(Self {
            root: root.to_path_buf(),
            conflict_dir: DEFAULT_CONFLICT_DIR.to_string(),
            codec,
            registry: PathLockRegistry::new(),
            clock: Arc::new(SystemClock),
            cancel: None,
            default_strategy: ConflictStrategy::default(),
        })
    }

    /// Put conflict artifacts in `<root>/<dir>` instead of the default.
    pub fn with_conflict_dir(mut self, dir: impl Into<String>) -> Self {
        self.conflict_dir = dir.into();
        self
    }

    /// Strategy used by saves that don't name one, such as
    /// [`EditSession::commit`](crate::session::EditSession::commit).
    pub fn with_default_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Make every operation check `token` on entry.
    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn default_strategy(&self) -> ConflictStrategy {
        self.default_strategy
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Whether a document exists at `path`.
    pub fn exists(&self, path: &str) -> Result<bool, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        Ok(paths.document.exists())
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Read the document at `path` with its current version and metadata.
    pub fn read_model<T: Document>(&self, path: &str) -> Result<Snapshot<T>, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        self.registry.with_lock(&paths.key, || -> Result<Snapshot<T>, StoreError> {
            let bytes = fsio::read_optional(&paths.document)?
                .ok_or_else(|| StoreError::NotFound(paths.key.clone()))?;
            let metadata = self.require_metadata(&paths)?;

            let actual = content_hash(&bytes);
            if actual != metadata.content_hash {
                warn!(
                    path = %paths.key,
                    expected = %metadata.content_hash,
                    actual = %actual,
                    "document content does not match its metadata hash"
                );
            }

            let model = self.decode(&paths, &bytes)?;
            debug!(path = %paths.key, version = %metadata.version, "document read");
            Ok(Snapshot {
                model,
                version: metadata.version.clone(),
                metadata,
            })
        })
    }

    /// Read only the metadata record for `path`.
    pub fn read_metadata(&self, path: &str) -> Result<FileMetadata, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        self.registry.with_lock(&paths.key, || -> Result<FileMetadata, StoreError> {
            if !paths.document.exists() {
                return Err(StoreError::NotFound(paths.key.clone()));
            }
            self.require_metadata(&paths)
        })
    }

    /// Re-hash the stored document and compare with its metadata.
    pub fn verify(&self, path: &str) -> Result<IntegrityReport, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        self.registry.with_lock(&paths.key, || -> Result<IntegrityReport, StoreError> {
            let bytes = fsio::read_optional(&paths.document)?
                .ok_or_else(|| StoreError::NotFound(paths.key.clone()))?;
            let metadata = self.require_metadata(&paths)?;
            let report = IntegrityReport {
                path: paths.key.clone(),
                version: metadata.version,
                expected_hash: metadata.content_hash,
                actual_hash: content_hash(&bytes),
            };
            if !report.is_intact() {
                warn!(path = %paths.key, "integrity check failed");
            }
            Ok(report)
        })
    }

    /// Conflict artifacts written for `path`, oldest first.
    pub fn list_conflict_artifacts(&self, path: &str) -> Result<Vec<PathBuf>, StoreError> {
        self.check_cancelled()?;
        let key = layout::normalize_key(path)?;
        let dir = self.root.join(&self.conflict_dir);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::io(&dir, e)),
        };

        let extension = self.codec.extension();
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&dir, e))?;
            let name = entry.file_name();
            if let Some(name) = name.to_str() {
                if layout::is_artifact_for(name, &key, extension) {
                    found.push(entry.path());
                }
            }
        }
        found.sort();
        Ok(found)
    }

    // -----------------------------------------------------------------------
    // Writes
    // -----------------------------------------------------------------------

    /// Write `model` unconditionally. Used for first-time creation.
    ///
    /// Fails with [`StoreError::LockContention`] if another actor holds an
    /// unexpired soft lock on the document.
    pub fn save_model<T: Document>(
        &self,
        path: &str,
        model: &T,
        actor: &str,
    ) -> Result<VersionToken, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        validate_actor(actor)?;
        self.registry.with_lock(&paths.key, || -> Result<VersionToken, StoreError> {
            let previous = self.admit_writer(&paths, actor)?;
            self.write_document(&paths, model, actor, previous, None)
        })
    }

    /// Write `model` only if the stored version is still `expected`;
    /// otherwise let `strategy` decide.
    ///
    /// `base` is the snapshot the caller started editing from. It is the
    /// common ancestor for auto-merge and is carried into conflict reports.
    ///
    /// A missing document is created regardless of `expected`.
    pub fn save_model_conditional<T: Document>(
        &self,
        path: &str,
        model: &T,
        base: &T,
        actor: &str,
        expected: ExpectedVersion,
        strategy: ConflictStrategy,
    ) -> Result<SaveOutcome<T>, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        validate_actor(actor)?;

        self.registry.with_lock(&paths.key, || -> Result<SaveOutcome<T>, StoreError> {
            let existed = paths.document.exists();
            let previous = self.admit_writer(&paths, actor)?;

            if !existed {
                info!(path = %paths.key, actor, "no document yet, first writer wins");
                let version = self.write_document(&paths, model, actor, previous, None)?;
                return Ok(SaveOutcome::Saved {
                    version,
                    merged: false,
                });
            }

            let current_meta = previous.ok_or_else(|| missing_metadata(&paths))?;
            let expected = match expected {
                ExpectedVersion::Any => {
                    debug!(path = %paths.key, "no expected version, overwriting");
                    let version =
                        self.write_document(&paths, model, actor, Some(current_meta), None)?;
                    return Ok(SaveOutcome::Saved {
                        version,
                        merged: false,
                    });
                }
                ExpectedVersion::Exact(v) => v,
            };

            if expected == current_meta.version {
                let version = self.write_document(
                    &paths,
                    model,
                    actor,
                    Some(current_meta),
                    Some(expected),
                )?;
                return Ok(SaveOutcome::Saved {
                    version,
                    merged: false,
                });
            }

            info!(
                path = %paths.key,
                actor,
                expected = %expected,
                current = %current_meta.version,
                "concurrent modification detected"
            );
            let bytes = fsio::read_optional(&paths.document)?
                .ok_or_else(|| StoreError::NotFound(paths.key.clone()))?;
            let current: T = self.decode(&paths, &bytes)?;

            let resolution = ConflictResolver::resolve(
                strategy,
                Mismatch {
                    path: &paths.key,
                    actor,
                    now: self.clock.now(),
                    current_version: &current_meta.version,
                    expected_version: &expected,
                    current: &current,
                    base,
                    incoming: model,
                },
            )?;

            match resolution {
                Resolution::Write { model, merged } => {
                    let version = self.write_document(
                        &paths,
                        &model,
                        actor,
                        Some(current_meta),
                        Some(expected),
                    )?;
                    Ok(SaveOutcome::Saved { version, merged })
                }
                Resolution::VersionConflict(conflict) => Ok(SaveOutcome::VersionConflict(conflict)),
                Resolution::MergeConflict(report) => Ok(SaveOutcome::MergeConflict(report)),
                Resolution::Artifact(artifact) => {
                    let location = self.write_artifact(&paths, &artifact)?;
                    Ok(SaveOutcome::ConflictFileCreated(location))
                }
            }
        })
    }

    // -----------------------------------------------------------------------
    // Soft locks
    // -----------------------------------------------------------------------

    /// Take (or extend) the soft lock on `path` for `actor` for `ttl`.
    pub fn lock_file(&self, path: &str, actor: &str, ttl: Duration) -> Result<LockInfo, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        validate_actor(actor)?;
        if ttl <= Duration::zero() {
            return Err(StoreError::invalid("ttl", "must be positive"));
        }

        self.registry.with_lock(&paths.key, || -> Result<LockInfo, StoreError> {
            let mut meta = self.existing_metadata(&paths)?;
            let info = soft::acquire(&mut meta, actor, ttl, self.clock.now())
                .map_err(|held| contention(&paths, held))?;
            self.write_metadata(&paths, &meta)?;
            info!(path = %paths.key, actor, expires_at = %info.expires_at, "soft lock acquired");
            Ok(info)
        })
    }

    /// Take the soft lock on `path` for an edit session.
    ///
    /// Returns `false` without touching the record when `actor` already
    /// holds a live lock: that lock belongs to whoever took it, not to the
    /// session, and must outlive it.
    pub(crate) fn lock_for_session(
        &self,
        path: &str,
        actor: &str,
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        validate_actor(actor)?;
        if ttl <= Duration::zero() {
            return Err(StoreError::invalid("ttl", "must be positive"));
        }

        self.registry.with_lock(&paths.key, || -> Result<bool, StoreError> {
            let mut meta = self.existing_metadata(&paths)?;
            let now = self.clock.now();
            if meta.active_lock(now).is_some_and(|held| held.holder == actor) {
                debug!(path = %paths.key, actor, "actor already holds the lock, session borrows it");
                return Ok(false);
            }
            let info = soft::acquire(&mut meta, actor, ttl, now)
                .map_err(|held| contention(&paths, held))?;
            self.write_metadata(&paths, &meta)?;
            info!(path = %paths.key, actor, expires_at = %info.expires_at, "session lock acquired");
            Ok(true)
        })
    }

    /// Release `actor`'s soft lock on `path`. Releasing an unlocked document
    /// is a no-op.
    pub fn unlock_file(&self, path: &str, actor: &str) -> Result<(), StoreError> {
        self.check_cancelled()?;
        let paths = self.paths(path)?;
        validate_actor(actor)?;

        self.registry.with_lock(&paths.key, || -> Result<(), StoreError> {
            let mut meta = self.existing_metadata(&paths)?;
            let changed = soft::release(&mut meta, actor, self.clock.now())
                .map_err(|held| contention(&paths, held))?;
            if changed {
                self.write_metadata(&paths, &meta)?;
                info!(path = %paths.key, actor, "soft lock released");
            }
            Ok(())
        })
    }

    // -----------------------------------------------------------------------
    // Internals (all called with the path mutex held)
    // -----------------------------------------------------------------------

    fn check_cancelled(&self) -> Result<(), StoreError> {
        match &self.cancel {
            Some(token) if token.is_cancelled() => Err(StoreError::Cancelled),
            _ => Ok(()),
        }
    }

    fn paths(&self, path: &str) -> Result<DocumentPaths, StoreError> {
        let key = layout::normalize_key(path)?;
        layout::check_outside(&key, &self.conflict_dir)?;
        Ok(DocumentPaths::new(&self.root, &key, self.codec.extension()))
    }

    fn decode<T: Document>(&self, paths: &DocumentPaths, bytes: &[u8]) -> Result<T, StoreError> {
        self.codec.decode(bytes).map_err(|source| StoreError::Codec {
            path: paths.key.clone(),
            source,
        })
    }

    fn load_metadata(&self, paths: &DocumentPaths) -> Result<Option<FileMetadata>, StoreError> {
        let Some(bytes) = fsio::read_optional(&paths.metadata)? else {
            return Ok(None);
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::CorruptMetadata {
                path: paths.metadata.clone(),
                detail: e.to_string(),
            })
    }

    fn require_metadata(&self, paths: &DocumentPaths) -> Result<FileMetadata, StoreError> {
        self.load_metadata(paths)?
            .ok_or_else(|| missing_metadata(paths))
    }

    /// Metadata of a document that must exist.
    fn existing_metadata(&self, paths: &DocumentPaths) -> Result<FileMetadata, StoreError> {
        if !paths.document.exists() {
            return Err(StoreError::NotFound(paths.key.clone()));
        }
        self.require_metadata(paths)
    }

    /// Load metadata and check the soft lock lets `actor` write.
    fn admit_writer(
        &self,
        paths: &DocumentPaths,
        actor: &str,
    ) -> Result<Option<FileMetadata>, StoreError> {
        let Some(mut meta) = self.load_metadata(paths)? else {
            return Ok(None);
        };
        soft::admit_writer(&mut meta, actor, self.clock.now())
            .map_err(|held| contention(paths, held))?;
        Ok(Some(meta))
    }

    fn write_metadata(&self, paths: &DocumentPaths, meta: &FileMetadata) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(meta).map_err(|e| StoreError::CorruptMetadata {
            path: paths.metadata.clone(),
            detail: e.to_string(),
        })?;
        fsio::atomic_write(&paths.metadata, &json)
    }

    /// Encode and persist `model` plus a fresh metadata record.
    ///
    /// If the metadata write fails, the previous document bytes are put back
    /// so content and metadata keep describing the same version.
    fn write_document<T: Document>(
        &self,
        paths: &DocumentPaths,
        model: &T,
        actor: &str,
        previous: Option<FileMetadata>,
        base_version: Option<VersionToken>,
    ) -> Result<VersionToken, StoreError> {
        let bytes = self.codec.encode(model).map_err(|source| StoreError::Codec {
            path: paths.key.clone(),
            source,
        })?;
        let hash = content_hash(&bytes);
        let (version, sequence) = VersionToken::next(previous.as_ref(), &hash);

        let mut meta = FileMetadata {
            version: version.clone(),
            sequence,
            last_modified: self.clock.now(),
            last_modified_by: actor.to_string(),
            content_hash: hash,
            is_locked: false,
            locked_by: None,
            lock_expiry: None,
            base_version,
        };
        if let Some(prev) = &previous {
            meta.is_locked = prev.is_locked;
            meta.locked_by = prev.locked_by.clone();
            meta.lock_expiry = prev.lock_expiry;
        }

        fsio::replace_then(&paths.document, &bytes, || self.write_metadata(paths, &meta))?;

        info!(path = %paths.key, actor, version = %version, "document written");
        Ok(version)
    }

    fn write_artifact<T: Document>(
        &self,
        paths: &DocumentPaths,
        artifact: &ConflictArtifact<T>,
    ) -> Result<ArtifactLocation, StoreError> {
        let bytes = self.codec.encode(artifact).map_err(|source| StoreError::Codec {
            path: paths.key.clone(),
            source,
        })?;
        let dir = self.root.join(&self.conflict_dir);
        let extension = self.codec.extension();
        let mut at = artifact.timestamp;
        let mut file = dir.join(layout::artifact_file_name(&paths.key, at, extension));
        // Two artifacts in the same nanosecond: nudge the name forward.
        while file.exists() {
            at += Duration::nanoseconds(1);
            file = dir.join(layout::artifact_file_name(&paths.key, at, extension));
        }
        fsio::write_new(&file, &bytes)?;
        info!(
            path = %paths.key,
            artifact = %file.display(),
            "conflict artifact created, document left untouched"
        );
        Ok(ArtifactLocation {
            id: artifact.id.clone(),
            file,
        })
    }
}

fn validate_actor(actor: &str) -> Result<(), StoreError> {
    if actor.trim().is_empty() {
        return Err(StoreError::invalid("actor", "must not be empty"));
    }
    Ok(())
}

fn missing_metadata(paths: &DocumentPaths) -> StoreError {
    StoreError::CorruptMetadata {
        path: paths.metadata.clone(),
        detail: "metadata side-car is missing".to_string(),
    }
}

fn contention(paths: &DocumentPaths, held: LockInfo) -> StoreError {
    StoreError::LockContention {
        path: paths.key.clone(),
        holder: held.holder,
        expires_at: held.expires_at,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::TomlCodec;
    use crate::document::FieldAccessor;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Settings {
        theme: String,
        retries: u32,
    }

    impl Document for Settings {
        fn fields() -> Vec<FieldAccessor<Self>> {
            vec![crate::field!(Settings, theme), crate::field!(Settings, retries)]
        }
    }

    fn settings(theme: &str, retries: u32) -> Settings {
        Settings {
            theme: theme.into(),
            retries,
        }
    }

    fn store() -> (tempfile::TempDir, VersionedStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(dir.path(), JsonCodec).unwrap();
        (dir, store)
    }

    #[test]
    fn test_round_trip() {
        let (_dir, store) = store();
        let model = settings("dark", 3);
        let v1 = store.save_model("app", &model, "alice").unwrap();

        let snap: Snapshot<Settings> = store.read_model("app").unwrap();
        assert_eq!(snap.model, model);
        assert_eq!(snap.version, v1);
        assert_eq!(snap.metadata.last_modified_by, "alice");
        assert_eq!(snap.metadata.sequence, 1);
        assert!(snap.metadata.base_version.is_none());

        let outcome = store
            .save_model_conditional(
                "app",
                &settings("light", 3),
                &model,
                "alice",
                ExpectedVersion::Exact(v1.clone()),
                ConflictStrategy::Abort,
            )
            .unwrap();
        assert!(outcome.is_saved());
        let meta = store.read_metadata("app").unwrap();
        assert_eq!(meta.base_version, Some(v1));
    }

    #[test]
    fn test_read_missing_is_not_found() {
        let (_dir, store) = store();
        let result: Result<Snapshot<Settings>, _> = store.read_model("nope");
        assert!(matches!(result, Err(StoreError::NotFound(_))));
        assert!(matches!(
            store.read_metadata("nope"),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_invalid_arguments() {
        let (_dir, store) = store();
        let m = settings("x", 1);
        assert!(matches!(
            store.save_model("", &m, "alice"),
            Err(StoreError::InvalidArgument { .. })
        ));
        assert!(matches!(
            store.save_model("app", &m, "  "),
            Err(StoreError::InvalidArgument { .. })
        ));
        store.save_model("app", &m, "alice").unwrap();
        assert!(matches!(
            store.lock_file("app", "alice", Duration::zero()),
            Err(StoreError::InvalidArgument { .. })
        ));
    }

    #[test]
    fn test_conditional_on_missing_document_creates_it() {
        let (_dir, store) = store();
        let m = settings("x", 1);
        let outcome = store
            .save_model_conditional(
                "fresh",
                &m,
                &m,
                "alice",
                ExpectedVersion::Exact(VersionToken::from("bogus")),
                ConflictStrategy::Abort,
            )
            .unwrap();
        assert!(outcome.is_saved());
        assert!(store.exists("fresh").unwrap());
    }

    #[test]
    fn test_expected_any_overwrites() {
        let (_dir, store) = store();
        let base = settings("x", 1);
        store.save_model("app", &base, "alice").unwrap();
        store.save_model("app", &settings("y", 2), "bob").unwrap();

        let outcome = store
            .save_model_conditional(
                "app",
                &settings("z", 3),
                &base,
                "carol",
                ExpectedVersion::Any,
                ConflictStrategy::Abort,
            )
            .unwrap();
        assert!(outcome.is_saved());
        let snap: Snapshot<Settings> = store.read_model("app").unwrap();
        assert_eq!(snap.model, settings("z", 3));
    }

    #[test]
    fn test_overwrite_strategy_is_last_writer_wins() {
        let (_dir, store) = store();
        let base = settings("x", 1);
        let v0 = store.save_model("app", &base, "alice").unwrap();
        store.save_model("app", &settings("y", 1), "bob").unwrap();

        let outcome = store
            .save_model_conditional(
                "app",
                &settings("mine", 1),
                &base,
                "alice",
                ExpectedVersion::Exact(v0),
                ConflictStrategy::Overwrite,
            )
            .unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { merged: false, .. }));
        let snap: Snapshot<Settings> = store.read_model("app").unwrap();
        assert_eq!(snap.model.theme, "mine");
    }

    #[test]
    fn test_lock_blocks_other_writers_until_expiry() {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = VersionedStore::open(dir.path(), JsonCodec)
            .unwrap()
            .with_clock(clock.clone());
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        store.lock_file("app", "alice", Duration::minutes(5)).unwrap();

        // Holder may still write, and keeps the lock.
        store.save_model("app", &settings("y", 1), "alice").unwrap();
        assert!(store.read_metadata("app").unwrap().is_locked);

        let err = store.save_model("app", &settings("z", 1), "bob").unwrap_err();
        assert!(matches!(err, StoreError::LockContention { ref holder, .. } if holder == "alice"));

        clock.advance(Duration::minutes(6));
        store.save_model("app", &settings("z", 1), "bob").unwrap();
        let meta = store.read_metadata("app").unwrap();
        assert!(!meta.is_locked);
        assert!(meta.locked_by.is_none());
    }

    #[test]
    fn test_lock_missing_document() {
        let (_dir, store) = store();
        assert!(matches!(
            store.lock_file("ghost", "alice", Duration::minutes(1)),
            Err(StoreError::NotFound(_))
        ));
    }

    #[test]
    fn test_unlock_by_other_actor_fails() {
        let (_dir, store) = store();
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        store.lock_file("app", "alice", Duration::minutes(5)).unwrap();
        assert!(matches!(
            store.unlock_file("app", "bob"),
            Err(StoreError::LockContention { .. })
        ));
        store.unlock_file("app", "alice").unwrap();
        store.unlock_file("app", "alice").unwrap();
        store.lock_file("app", "bob", Duration::minutes(5)).unwrap();
    }

    #[test]
    fn test_lock_does_not_change_version() {
        let (_dir, store) = store();
        let v = store.save_model("app", &settings("x", 1), "alice").unwrap();
        store.lock_file("app", "alice", Duration::minutes(5)).unwrap();
        store.unlock_file("app", "alice").unwrap();
        assert_eq!(store.read_metadata("app").unwrap().version, v);
    }

    #[test]
    fn test_cancelled_store_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let token = CancelToken::new();
        let store = VersionedStore::open(dir.path(), JsonCodec)
            .unwrap()
            .with_cancel_token(token.clone());
        let v = store.save_model("app", &settings("x", 1), "alice").unwrap();

        token.cancel();
        let m = settings("y", 2);
        assert!(matches!(
            store.save_model("app", &m, "alice"),
            Err(StoreError::Cancelled)
        ));
        assert!(matches!(
            store.save_model_conditional(
                "app",
                &m,
                &m,
                "alice",
                ExpectedVersion::Exact(v.clone()),
                ConflictStrategy::Overwrite
            ),
            Err(StoreError::Cancelled)
        ));
        assert!(matches!(
            store.lock_file("app", "alice", Duration::minutes(1)),
            Err(StoreError::Cancelled)
        ));

        let reopened = VersionedStore::open(dir.path(), JsonCodec).unwrap();
        let snap: Snapshot<Settings> = reopened.read_model("app").unwrap();
        assert_eq!(snap.version, v);
        assert_eq!(snap.model, settings("x", 1));
        assert!(!snap.metadata.is_locked);
    }

    #[test]
    fn test_verify_detects_external_edit() {
        let (dir, store) = store();
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        assert!(store.verify("app").unwrap().is_intact());

        std::fs::write(dir.path().join("app.json"), br#"{"theme":"evil","retries":1}"#).unwrap();
        let report = store.verify("app").unwrap();
        assert!(!report.is_intact());

        // Reads still succeed; the mismatch is only logged.
        let snap: Snapshot<Settings> = store.read_model("app").unwrap();
        assert_eq!(snap.model.theme, "evil");
    }

    #[test]
    fn test_corrupt_metadata_surfaces() {
        let (dir, store) = store();
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        std::fs::write(dir.path().join("app.json.meta.json"), b"not json").unwrap();
        assert!(matches!(
            store.read_metadata("app"),
            Err(StoreError::CorruptMetadata { .. })
        ));
    }

    #[test]
    fn test_toml_codec_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(dir.path(), TomlCodec).unwrap();
        store
            .save_model("nested/app", &settings("x", 1), "alice")
            .unwrap();
        assert!(dir.path().join("nested/app.toml").exists());
        assert!(dir.path().join("nested/app.toml.meta.json").exists());
        let snap: Snapshot<Settings> = store.read_model("nested/app").unwrap();
        assert_eq!(snap.model, settings("x", 1));
    }

    #[test]
    fn test_paths_are_normalized_to_one_document() {
        let (_dir, store) = store();
        let v = store.save_model("teams/alpha", &settings("x", 1), "alice").unwrap();
        let meta = store.read_metadata("./teams//alpha").unwrap();
        assert_eq!(meta.version, v);
    }

    #[test]
    fn test_side_car_names_are_not_document_keys() {
        let (_dir, store) = store();
        let v = store.save_model("x", &settings("x", 1), "alice").unwrap();

        let clash = store.save_model("x.json.meta", &settings("y", 2), "bob");
        assert!(matches!(clash, Err(StoreError::InvalidArgument { .. })));
        assert_eq!(store.read_metadata("x").unwrap().version, v);
        assert_eq!(store.read_model::<Settings>("x").unwrap().model, settings("x", 1));
    }

    #[test]
    fn test_conflict_dir_is_not_a_document_namespace() {
        let (_dir, store) = store();
        for key in [".conflicts/app", ".Conflicts/nested/app"] {
            assert!(
                matches!(
                    store.save_model(key, &settings("x", 1), "alice"),
                    Err(StoreError::InvalidArgument { .. })
                ),
                "{key} should be rejected"
            );
        }

        let custom = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(custom.path(), JsonCodec)
            .unwrap()
            .with_conflict_dir("clashes");
        assert!(store.save_model("clashes/app", &settings("x", 1), "alice").is_err());
        store.save_model(".conflicts/app", &settings("x", 1), "alice").unwrap();
    }

    #[test]
    fn test_non_ascii_stray_file_in_conflict_dir() {
        let (dir, store) = store();
        let conflicts = dir.path().join(DEFAULT_CONFLICT_DIR);
        std::fs::create_dir_all(&conflicts).unwrap();
        std::fs::write(conflicts.join("app.日本語x.json"), b"{}").unwrap();
        std::fs::write(conflicts.join("app.é.json"), b"{}").unwrap();

        assert!(store.list_conflict_artifacts("app").unwrap().is_empty());
    }

    #[test]
    fn test_artifacts_for_similar_keys_stay_apart() {
        let (_dir, store) = store();
        let stale = ExpectedVersion::Exact(VersionToken::from("0000000000-000000000000"));
        for key in ["a/b", "a__b"] {
            let base = settings("x", 1);
            store.save_model(key, &base, "alice").unwrap();
            let outcome = store
                .save_model_conditional(
                    key,
                    &settings("y", 2),
                    &base,
                    "bob",
                    stale.clone(),
                    ConflictStrategy::CreateConflictFile,
                )
                .unwrap();
            assert!(matches!(outcome, SaveOutcome::ConflictFileCreated(_)));
        }

        let nested = store.list_conflict_artifacts("a/b").unwrap();
        let flat = store.list_conflict_artifacts("a__b").unwrap();
        assert_eq!(nested.len(), 1);
        assert_eq!(flat.len(), 1);
        assert_ne!(nested, flat);
    }

    #[test]
    fn test_failed_save_leaves_document_alone() {
        let (dir, store) = store();
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        let document = dir.path().join("app.json");
        let before = std::fs::read(&document).unwrap();

        let meta = dir.path().join("app.json.meta.json");
        std::fs::remove_file(&meta).unwrap();
        std::fs::create_dir(&meta).unwrap();

        let result = store.save_model("app", &settings("y", 2), "alice");
        assert!(matches!(result, Err(StoreError::StorageIo { .. })));
        assert_eq!(std::fs::read(&document).unwrap(), before);
    }

    #[test]
    fn test_codec_error_keeps_its_source() {
        let (dir, store) = store();
        store.save_model("app", &settings("x", 1), "alice").unwrap();
        std::fs::write(dir.path().join("app.json"), b"{\"theme\": 3}").unwrap();

        let err = store.read_model::<Settings>("app").unwrap_err();
        match &err {
            StoreError::Codec { path, source } => {
                assert_eq!(path, "app");
                assert!(matches!(source, crate::errors::CodecError::Json(_)));
            }
            other => panic!("expected codec error, got {other:?}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }
}
