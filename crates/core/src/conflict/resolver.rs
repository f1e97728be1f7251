//! Conflict strategy dispatch.
//!
//! When a conditional save finds that the stored version moved on, the store
//! hands the competing snapshots to [`ConflictResolver::resolve`], which
//! decides what should happen under the caller's [`ConflictStrategy`]. The
//! resolver performs no I/O; the store carries out the returned
//! [`Resolution`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::conflict::merger::{MergeConflict, Merger};
use crate::document::Document;
use crate::errors::MergeError;
use crate::models::{ConflictArtifact, VersionToken};

/// What to do when the stored version differs from the expected one.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    /// Refuse the write and report the conflict.
    #[default]
    Abort,
    /// Last writer wins.
    Overwrite,
    /// Three-way merge; write only if every field resolves.
    AutoMerge,
    /// Leave the document alone and write all three snapshots to a side-car.
    CreateConflictFile,
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Abort => write!(f, "abort"),
            Self::Overwrite => write!(f, "overwrite"),
            Self::AutoMerge => write!(f, "auto_merge"),
            Self::CreateConflictFile => write!(f, "create_conflict_file"),
        }
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "abort" => Ok(Self::Abort),
            "overwrite" => Ok(Self::Overwrite),
            "auto_merge" | "auto-merge" => Ok(Self::AutoMerge),
            "create_conflict_file" | "create-conflict-file" => Ok(Self::CreateConflictFile),
            other => Err(format!("unknown conflict strategy '{other}'")),
        }
    }
}

/// Everything known about a detected version mismatch.
#[derive(Debug)]
pub struct Mismatch<'a, T> {
    pub path: &'a str,
    pub actor: &'a str,
    pub now: DateTime<Utc>,
    pub current_version: &'a VersionToken,
    pub expected_version: &'a VersionToken,
    /// What is on disk right now (the "remote" side).
    pub current: &'a T,
    /// What the caller started editing from.
    pub base: &'a T,
    /// What the caller wants to write (the "local" side).
    pub incoming: &'a T,
}

/// Abort-strategy rejection: the write did not happen.
#[derive(Debug, Clone)]
pub struct VersionConflict<T> {
    pub current_version: VersionToken,
    pub expected_version: VersionToken,
    pub current_model: T,
    pub base_model: T,
    pub incoming_model: T,
}

/// Auto-merge rejection: some fields could not be reconciled.
#[derive(Debug, Clone)]
pub struct MergeConflictReport<T> {
    pub current_version: VersionToken,
    pub expected_version: VersionToken,
    pub conflicts: Vec<MergeConflict>,
    /// The merge with local values in conflicting fields. Not persisted.
    pub provisional_model: T,
    pub current_model: T,
    pub base_model: T,
    pub incoming_model: T,
}

/// The decision the store must carry out.
#[derive(Debug)]
pub enum Resolution<T> {
    /// Persist `model`. `merged` is true when it came out of the merge engine.
    Write { model: T, merged: bool },
    VersionConflict(VersionConflict<T>),
    MergeConflict(MergeConflictReport<T>),
    /// Persist this artifact and leave the document untouched.
    Artifact(ConflictArtifact<T>),
}

/// Stateless strategy dispatcher.
pub struct ConflictResolver;

impl ConflictResolver {
    pub fn resolve<T: Document>(
        strategy: ConflictStrategy,
        mismatch: Mismatch<'_, T>,
    ) -> Result<Resolution<T>, MergeError> {
        info!(
            path = mismatch.path,
            actor = mismatch.actor,
            %strategy,
            current = %mismatch.current_version,
            expected = %mismatch.expected_version,
            "resolving version mismatch"
        );

        let resolution = match strategy {
            ConflictStrategy::Abort => Resolution::VersionConflict(VersionConflict {
                current_version: mismatch.current_version.clone(),
                expected_version: mismatch.expected_version.clone(),
                current_model: mismatch.current.clone(),
                base_model: mismatch.base.clone(),
                incoming_model: mismatch.incoming.clone(),
            }),
            ConflictStrategy::Overwrite => Resolution::Write {
                model: mismatch.incoming.clone(),
                merged: false,
            },
            ConflictStrategy::AutoMerge => {
                let result =
                    Merger::three_way_merge(mismatch.base, mismatch.incoming, mismatch.current)?;
                if result.success {
                    debug!(path = mismatch.path, "auto-merge succeeded");
                    Resolution::Write {
                        model: result.merged,
                        merged: true,
                    }
                } else {
                    debug!(
                        path = mismatch.path,
                        conflicts = result.conflicts.len(),
                        "auto-merge left unresolved fields"
                    );
                    Resolution::MergeConflict(MergeConflictReport {
                        current_version: mismatch.current_version.clone(),
                        expected_version: mismatch.expected_version.clone(),
                        conflicts: result.conflicts,
                        provisional_model: result.merged,
                        current_model: mismatch.current.clone(),
                        base_model: mismatch.base.clone(),
                        incoming_model: mismatch.incoming.clone(),
                    })
                }
            }
            ConflictStrategy::CreateConflictFile => Resolution::Artifact(ConflictArtifact {
                id: Uuid::new_v4().to_string(),
                path: mismatch.path.to_string(),
                actor: mismatch.actor.to_string(),
                timestamp: mismatch.now,
                current_version: mismatch.current_version.clone(),
                expected_version: mismatch.expected_version.clone(),
                base_model: mismatch.base.clone(),
                local_model: mismatch.incoming.clone(),
                remote_model: mismatch.current.clone(),
            }),
        };

        Ok(resolution)
    }
}
