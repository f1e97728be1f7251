//! Checkout/commit edit sessions.
//!
//! An [`EditSession`] captures a document and its version, hands out working
//! copies to mutate, and commits exactly one of them with
//! [`EditSession::save`], which runs a conditional save against the captured
//! version, or with [`EditSession::commit`], which does the same using the
//! store's default strategy. Both consume the session, so a second commit
//! does not compile.
//!
//! If the session took a soft lock, dropping it releases that lock once,
//! whether `save` succeeded, failed, or was never called.

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::conflict::resolver::ConflictStrategy;
use crate::document::Document;
use crate::errors::StoreError;
use crate::models::{ExpectedVersion, VersionToken};
use crate::store::{SaveOutcome, VersionedStore};

/// Lock settings for [`EditSession::start`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionLock {
    /// Don't take a soft lock.
    None,
    /// Take a soft lock for this long before reading.
    For(Duration),
}

/// An in-flight edit of one document by one actor.
pub struct EditSession<'s, T, C: Codec> {
    store: &'s VersionedStore<C>,
    path: String,
    actor: String,
    captured_version: VersionToken,
    base: T,
    started_at: DateTime<Utc>,
    lock_held: bool,
}

impl<'s, T: Document, C: Codec> EditSession<'s, T, C> {
    /// Check out `path` for `actor`, optionally locking it first.
    ///
    /// If the read fails after the lock was taken, the lock is released
    /// before the error is returned. A lock `actor` already held before the
    /// session started is left alone, both here and on drop.
    pub fn start(
        store: &'s VersionedStore<C>,
        path: &str,
        actor: &str,
        lock: SessionLock,
    ) -> Result<Self, StoreError> {
        let lock_held = match lock {
            SessionLock::None => false,
            SessionLock::For(ttl) => store.lock_for_session(path, actor, ttl)?,
        };

        let snapshot = match store.read_model::<T>(path) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                if lock_held {
                    if let Err(unlock_err) = store.unlock_file(path, actor) {
                        warn!(path, actor, error = %unlock_err, "failed to release lock after aborted checkout");
                    }
                }
                return Err(err);
            }
        };

        info!(path, actor, version = %snapshot.version, lock_held, "edit session started");
        Ok(Self {
            store,
            path: path.to_string(),
            actor: actor.to_string(),
            captured_version: snapshot.version,
            base: snapshot.model,
            started_at: store.now(),
            lock_held,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn captured_version(&self) -> &VersionToken {
        &self.captured_version
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// Whether the session took (and will release) a soft lock.
    pub fn lock_held(&self) -> bool {
        self.lock_held
    }

    /// The snapshot taken at checkout.
    pub fn base(&self) -> &T {
        &self.base
    }

    /// A deep copy of the checkout snapshot to edit.
    pub fn working_copy(&self) -> T {
        self.base.clone()
    }

    /// Commit `model` against the captured version, then end the session.
    pub fn save(self, model: &T, strategy: ConflictStrategy) -> Result<SaveOutcome<T>, StoreError> {
        debug!(path = %self.path, actor = %self.actor, %strategy, "committing edit session");
        self.store.save_model_conditional(
            &self.path,
            model,
            &self.base,
            &self.actor,
            ExpectedVersion::Exact(self.captured_version.clone()),
            strategy,
        )
    }

    /// [`save`](Self::save) with the store's default strategy.
    pub fn commit(self, model: &T) -> Result<SaveOutcome<T>, StoreError> {
        let strategy = self.store.default_strategy();
        self.save(model, strategy)
    }

    /// End the session without saving. Same as dropping it.
    pub fn dispose(self) {}
}

impl<T, C: Codec> EditSession<'_, T, C> {
    /// Release the session's lock, at most once.
    fn release(&mut self) {
        if !self.lock_held {
            return;
        }
        self.lock_held = false;
        match self.store.unlock_file(&self.path, &self.actor) {
            Ok(()) => debug!(path = %self.path, actor = %self.actor, "session lock released"),
            // Our lock expired and another actor took it; nothing of ours to release.
            Err(StoreError::LockContention { holder, .. }) => {
                debug!(path = %self.path, actor = %self.actor, %holder, "session lock already taken over");
            }
            Err(err) => {
                warn!(path = %self.path, actor = %self.actor, error = %err, "failed to release session lock");
            }
        }
    }
}

impl<T, C: Codec> Drop for EditSession<'_, T, C> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde::{Deserialize, Serialize};

    use super::*;
    use crate::clock::ManualClock;
    use crate::codec::JsonCodec;
    use crate::document::FieldAccessor;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Note {
        title: String,
        revision: u32,
    }

    impl Document for Note {
        fn fields() -> Vec<FieldAccessor<Self>> {
            vec![crate::field!(Note, title), crate::field!(Note, revision)]
        }
    }

    fn note(title: &str, revision: u32) -> Note {
        Note {
            title: title.into(),
            revision,
        }
    }

    fn seeded() -> (tempfile::TempDir, Arc<ManualClock>, VersionedStore) {
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let store = VersionedStore::open(dir.path(), JsonCodec)
            .unwrap()
            .with_clock(clock.clone());
        store.save_model("notes/today", &note("draft", 1), "seed").unwrap();
        (dir, clock, store)
    }

    fn lock_holder(store: &VersionedStore, path: &str) -> Option<String> {
        let meta = store.read_metadata(path).unwrap();
        meta.active_lock(store.now()).map(|l| l.holder)
    }

    #[test]
    fn test_save_commits_and_releases_lock() {
        let (_dir, _clock, store) = seeded();
        let session: EditSession<'_, Note, _> =
            EditSession::start(&store, "notes/today", "alice", SessionLock::For(Duration::minutes(5)))
                .unwrap();
        assert!(session.lock_held());
        assert_eq!(lock_holder(&store, "notes/today").as_deref(), Some("alice"));

        let mut draft = session.working_copy();
        draft.revision = 2;
        let outcome = session.save(&draft, ConflictStrategy::Abort).unwrap();
        assert!(outcome.is_saved());

        assert_eq!(store.read_model::<Note>("notes/today").unwrap().model, draft);
        assert_eq!(lock_holder(&store, "notes/today"), None);
    }

    #[test]
    fn test_drop_without_save_releases_lock() {
        let (_dir, _clock, store) = seeded();
        {
            let _session: EditSession<'_, Note, _> = EditSession::start(
                &store,
                "notes/today",
                "alice",
                SessionLock::For(Duration::minutes(5)),
            )
            .unwrap();
            assert!(store
                .lock_file("notes/today", "bob", Duration::minutes(1))
                .is_err());
        }
        assert_eq!(lock_holder(&store, "notes/today"), None);
        store.lock_file("notes/today", "bob", Duration::minutes(1)).unwrap();
    }

    #[test]
    fn test_conflicting_save_still_releases_lock() {
        let (_dir, clock, store) = seeded();
        let session: EditSession<'_, Note, _> = EditSession::start(
            &store,
            "notes/today",
            "alice",
            SessionLock::For(Duration::seconds(10)),
        )
        .unwrap();

        // alice's lock lapses and bob gets a write in.
        clock.advance(Duration::seconds(11));
        store.save_model("notes/today", &note("bob's", 7), "bob").unwrap();

        let outcome = session
            .save(&note("alice's", 2), ConflictStrategy::Abort)
            .unwrap();
        assert!(matches!(outcome, SaveOutcome::VersionConflict(_)));
        assert_eq!(store.read_model::<Note>("notes/today").unwrap().model.title, "bob's");
        assert_eq!(lock_holder(&store, "notes/today"), None);
    }

    #[test]
    fn test_release_leaves_takeover_lock_alone() {
        let (_dir, clock, store) = seeded();
        let session: EditSession<'_, Note, _> = EditSession::start(
            &store,
            "notes/today",
            "alice",
            SessionLock::For(Duration::seconds(10)),
        )
        .unwrap();

        clock.advance(Duration::seconds(11));
        store.lock_file("notes/today", "bob", Duration::minutes(5)).unwrap();

        session.dispose();
        assert_eq!(lock_holder(&store, "notes/today").as_deref(), Some("bob"));
    }

    #[test]
    fn test_unlocked_session_takes_no_lock() {
        let (_dir, _clock, store) = seeded();
        let session: EditSession<'_, Note, _> =
            EditSession::start(&store, "notes/today", "alice", SessionLock::None).unwrap();
        assert!(!session.lock_held());
        assert_eq!(lock_holder(&store, "notes/today"), None);
        assert_eq!(session.base(), &note("draft", 1));
        assert_eq!(session.path(), "notes/today");
        assert_eq!(session.actor(), "alice");
        drop(session);
        assert_eq!(lock_holder(&store, "notes/today"), None);
    }

    #[test]
    fn test_start_on_missing_document() {
        let (_dir, _clock, store) = seeded();
        let result: Result<EditSession<'_, Note, _>, _> =
            EditSession::start(&store, "notes/absent", "alice", SessionLock::None);
        assert!(matches!(result, Err(StoreError::NotFound(_))));

        let locked: Result<EditSession<'_, Note, _>, _> = EditSession::start(
            &store,
            "notes/absent",
            "alice",
            SessionLock::For(Duration::minutes(1)),
        );
        assert!(matches!(locked, Err(StoreError::NotFound(_))));
    }

    #[test]
    fn test_working_copy_is_independent_of_base() {
        let (_dir, _clock, store) = seeded();
        let session: EditSession<'_, Note, _> =
            EditSession::start(&store, "notes/today", "alice", SessionLock::None).unwrap();
        let mut copy = session.working_copy();
        copy.title.push_str(" v2");
        assert_eq!(session.base().title, "draft");
        assert_eq!(session.captured_version(), &store.read_metadata("notes/today").unwrap().version);
    }

    #[test]
    fn test_preexisting_lock_survives_session() {
        let (_dir, _clock, store) = seeded();
        let held = store.lock_file("notes/today", "alice", Duration::hours(1)).unwrap();

        let session: EditSession<'_, Note, _> = EditSession::start(
            &store,
            "notes/today",
            "alice",
            SessionLock::For(Duration::minutes(5)),
        )
        .unwrap();
        assert!(!session.lock_held());
        let mut draft = session.working_copy();
        draft.revision = 2;
        assert!(session.save(&draft, ConflictStrategy::Abort).unwrap().is_saved());

        let meta = store.read_metadata("notes/today").unwrap();
        let lock = meta.active_lock(store.now()).expect("alice's lock should remain");
        assert_eq!(lock.holder, "alice");
        assert_eq!(lock.expires_at, held.expires_at);
    }

    #[test]
    fn test_preexisting_lock_survives_dropped_session() {
        let (_dir, _clock, store) = seeded();
        store.lock_file("notes/today", "alice", Duration::hours(1)).unwrap();
        {
            let _session: EditSession<'_, Note, _> = EditSession::start(
                &store,
                "notes/today",
                "alice",
                SessionLock::For(Duration::minutes(5)),
            )
            .unwrap();
        }
        assert_eq!(lock_holder(&store, "notes/today").as_deref(), Some("alice"));
    }

    #[test]
    fn test_expired_own_lock_is_retaken_by_session() {
        let (_dir, clock, store) = seeded();
        store.lock_file("notes/today", "alice", Duration::seconds(5)).unwrap();
        clock.advance(Duration::seconds(6));

        let session: EditSession<'_, Note, _> = EditSession::start(
            &store,
            "notes/today",
            "alice",
            SessionLock::For(Duration::minutes(5)),
        )
        .unwrap();
        assert!(session.lock_held());
        drop(session);
        assert_eq!(lock_holder(&store, "notes/today"), None);
    }

    #[test]
    fn test_commit_uses_store_default_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let store = VersionedStore::open(dir.path(), JsonCodec)
            .unwrap()
            .with_default_strategy(ConflictStrategy::AutoMerge);
        store.save_model("notes/today", &note("draft", 1), "seed").unwrap();

        let session: EditSession<'_, Note, _> =
            EditSession::start(&store, "notes/today", "alice", SessionLock::None).unwrap();
        // bob bumps the revision while alice retitles.
        store.save_model("notes/today", &note("draft", 2), "bob").unwrap();

        let mut draft = session.working_copy();
        draft.title = "final".into();
        let outcome = session.commit(&draft).unwrap();
        assert!(matches!(outcome, SaveOutcome::Saved { merged: true, .. }));
        assert_eq!(store.read_model::<Note>("notes/today").unwrap().model, note("final", 2));
    }

    #[test]
    fn test_commit_aborts_by_default() {
        let (_dir, _clock, store) = seeded();
        assert_eq!(store.default_strategy(), ConflictStrategy::Abort);
        let session: EditSession<'_, Note, _> =
            EditSession::start(&store, "notes/today", "alice", SessionLock::None).unwrap();
        store.save_model("notes/today", &note("draft", 2), "bob").unwrap();

        let outcome = session.commit(&note("final", 1)).unwrap();
        assert!(matches!(outcome, SaveOutcome::VersionConflict(_)));
        assert_eq!(store.read_model::<Note>("notes/today").unwrap().model, note("draft", 2));
    }
}
