//! Locking: in-process path mutexes and the persisted soft-lock record.
//!
//! Soft locks are advisory. They coordinate cooperating callers that go
//! through the store; they do not stop a process that writes the files
//! directly, and they expire on their own so a crashed holder cannot wedge a
//! document.

pub mod registry;
pub mod soft;

pub use registry::PathLockRegistry;
