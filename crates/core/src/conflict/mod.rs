//! Conflict handling: three-way merging and strategy dispatch.
//!
//! 1. **Merging** -- reconciling base/local/remote snapshots field by field.
//! 2. **Resolution** -- deciding what a conditional save does on a version
//!    mismatch (abort, overwrite, auto-merge, or write a conflict file).

pub mod merger;
pub mod resolver;

pub use merger::{MergeConflict, MergeResult, Merger};
pub use resolver::{
    ConflictResolver, ConflictStrategy, MergeConflictReport, Mismatch, Resolution,
    VersionConflict,
};
