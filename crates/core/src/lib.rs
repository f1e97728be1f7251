//! docvault core library.
//!
//! A file-backed document store with optimistic concurrency: every document
//! carries a version token, conditional saves detect concurrent writers, and
//! a mismatch is settled by a pluggable strategy (abort, overwrite,
//! three-way auto-merge, or a conflict file). Soft locks with a TTL and
//! checkout/commit edit sessions sit on top.

pub mod clock;
pub mod codec;
pub mod config;
pub mod conflict;
pub mod document;
pub mod errors;
pub mod lock;
pub mod models;
pub mod session;
pub mod store;

// Re-exports for convenience.
pub use codec::{DocumentFormat, JsonCodec, TomlCodec};
pub use config::VaultConfig;
pub use conflict::{ConflictStrategy, Merger};
pub use document::{Document, FieldAccessor, FieldValue};
pub use errors::{CoreError, StoreError};
pub use models::{ExpectedVersion, FileMetadata, VersionToken};
pub use session::{EditSession, SessionLock};
pub use store::{CancelToken, SaveOutcome, Snapshot, VersionedStore};
