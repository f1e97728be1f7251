//! The cooperative soft-lock state machine.
//!
//! ```text
//! Unlocked --acquire--> Locked(actor, expiry) --release / expiry--> Unlocked
//! ```
//!
//! These functions only mutate a [`FileMetadata`] in memory; the store
//! persists the result while holding the document's path mutex.

use chrono::{DateTime, Duration, Utc};
use tracing::debug;

use crate::models::{FileMetadata, LockInfo};

/// Take or extend the lock for `actor`.
///
/// Fails with the current holder if an unexpired lock belongs to someone
/// else. An expired lock is simply replaced.
pub fn acquire(
    meta: &mut FileMetadata,
    actor: &str,
    ttl: Duration,
    now: DateTime<Utc>,
) -> Result<LockInfo, LockInfo> {
    if let Some(held) = meta.active_lock(now) {
        if held.holder != actor {
            return Err(held);
        }
    } else if meta.has_expired_lock(now) {
        debug!(previous = ?meta.locked_by, "replacing expired lock");
    }
    let expires_at = now + ttl;
    meta.set_lock(actor, expires_at);
    Ok(LockInfo {
        holder: actor.to_string(),
        expires_at,
    })
}

/// Clear the lock on behalf of `actor`.
///
/// Returns whether the record changed. Fails with the current holder if an
/// unexpired lock belongs to someone else.
pub fn release(meta: &mut FileMetadata, actor: &str, now: DateTime<Utc>) -> Result<bool, LockInfo> {
    if let Some(held) = meta.active_lock(now) {
        if held.holder != actor {
            return Err(held);
        }
    }
    if !meta.is_locked && meta.locked_by.is_none() && meta.lock_expiry.is_none() {
        return Ok(false);
    }
    meta.clear_lock();
    Ok(true)
}

/// Check that `actor` may write, clearing an expired lock on the way.
///
/// A lock held by `actor` itself is left in place.
pub fn admit_writer(
    meta: &mut FileMetadata,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<(), LockInfo> {
    match meta.active_lock(now) {
        Some(held) if held.holder != actor => Err(held),
        Some(_) => Ok(()),
        None => {
            if meta.has_expired_lock(now) {
                debug!(previous = ?meta.locked_by, "write observed expired lock, clearing");
                meta.clear_lock();
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{content_hash, VersionToken};

    fn meta() -> FileMetadata {
        FileMetadata {
            version: VersionToken::from("0000000001-000000000000"),
            sequence: 1,
            last_modified: Utc::now(),
            last_modified_by: "seed".into(),
            content_hash: content_hash(b""),
            is_locked: false,
            locked_by: None,
            lock_expiry: None,
            base_version: None,
        }
    }

    #[test]
    fn test_acquire_then_contend() {
        let now = Utc::now();
        let mut m = meta();
        let info = acquire(&mut m, "alice", Duration::minutes(5), now).unwrap();
        assert_eq!(info.holder, "alice");
        assert_eq!(info.expires_at, now + Duration::minutes(5));

        let err = acquire(&mut m, "bob", Duration::minutes(5), now).unwrap_err();
        assert_eq!(err.holder, "alice");
        assert_eq!(m.locked_by.as_deref(), Some("alice"));
    }

    #[test]
    fn test_reacquire_extends() {
        let now = Utc::now();
        let mut m = meta();
        acquire(&mut m, "alice", Duration::minutes(1), now).unwrap();
        let later = now + Duration::seconds(30);
        let info = acquire(&mut m, "alice", Duration::minutes(1), later).unwrap();
        assert_eq!(info.expires_at, later + Duration::minutes(1));
    }

    #[test]
    fn test_expired_lock_is_replaced() {
        let now = Utc::now();
        let mut m = meta();
        acquire(&mut m, "alice", Duration::minutes(5), now).unwrap();
        let later = now + Duration::minutes(6);
        let info = acquire(&mut m, "bob", Duration::minutes(5), later).unwrap();
        assert_eq!(info.holder, "bob");
    }

    #[test]
    fn test_release_rules() {
        let now = Utc::now();
        let mut m = meta();
        assert!(!release(&mut m, "alice", now).unwrap());

        acquire(&mut m, "alice", Duration::minutes(5), now).unwrap();
        assert_eq!(release(&mut m, "bob", now).unwrap_err().holder, "alice");
        assert!(release(&mut m, "alice", now).unwrap());
        assert!(!m.is_locked);

        acquire(&mut m, "alice", Duration::minutes(5), now).unwrap();
        let later = now + Duration::minutes(10);
        assert!(release(&mut m, "bob", later).unwrap());
    }

    #[test]
    fn test_admit_writer() {
        let now = Utc::now();
        let mut m = meta();
        admit_writer(&mut m, "anyone", now).unwrap();

        acquire(&mut m, "alice", Duration::minutes(5), now).unwrap();
        admit_writer(&mut m, "alice", now).unwrap();
        assert!(m.is_locked);
        assert_eq!(admit_writer(&mut m, "bob", now).unwrap_err().holder, "alice");

        let later = now + Duration::minutes(6);
        admit_writer(&mut m, "bob", later).unwrap();
        assert!(!m.is_locked);
        assert!(m.lock_expiry.is_none());
    }
}
