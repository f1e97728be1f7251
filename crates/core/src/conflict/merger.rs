//! Three-way merge engine.
//!
//! Reconciles a `base` snapshot with a `local` and a `remote` descendant,
//! field by field, using the accessors each [`Document`] declares. Snapshots
//! are compared through their canonical `serde_json::Value` form.
//!
//! Top-level keys of that form which no accessor names are still merged,
//! on their raw JSON values, so a partially declared type never drops a
//! change the other side made.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::document::{Document, FieldAccessor, FieldKind, FieldValue};
use crate::errors::MergeError;

/// Field name reported when a document declares no fields and all three
/// snapshots differ.
pub const WHOLE_DOCUMENT: &str = "<document>";

/// The result of a three-way merge attempt.
#[derive(Debug, Clone)]
pub struct MergeResult<T> {
    /// `true` iff `conflicts` is empty. Never persist `merged` otherwise.
    pub success: bool,
    /// The merged document. Conflicting fields hold local's value.
    pub merged: T,
    /// Fields no rule or heuristic could settle.
    pub conflicts: Vec<MergeConflict>,
}

/// A single unresolved field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergeConflict {
    pub field_name: String,
    pub base_value: FieldValue,
    pub local_value: FieldValue,
    pub remote_value: FieldValue,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Side {
    Local,
    Remote,
}

/// Stateless three-way merge engine.
pub struct Merger;

impl Merger {
    /// Merge `local` and `remote`, both descended from `base`.
    ///
    /// Whole-document fast paths are tried first. Otherwise each declared
    /// field is taken from whichever side changed it; when both changed it
    /// differently a type heuristic applies (numeric max, later timestamp,
    /// longer string). Fields nothing settles become [`MergeConflict`]s.
    ///
    /// The heuristics are a deliberate simplification and do not capture
    /// business intent.
    pub fn three_way_merge<T: Document>(
        base: &T,
        local: &T,
        remote: &T,
    ) -> Result<MergeResult<T>, MergeError> {
        info!("performing three-way merge");

        let base_c = canonical("base", base)?;
        let local_c = canonical("local", local)?;
        let remote_c = canonical("remote", remote)?;

        if base_c == local_c {
            debug!("local == base, remote wins cleanly");
            return Ok(clean(remote.clone()));
        }
        if base_c == remote_c {
            debug!("remote == base, local wins cleanly");
            return Ok(clean(local.clone()));
        }
        if local_c == remote_c {
            debug!("local == remote, identical changes");
            return Ok(clean(local.clone()));
        }

        let fields = T::fields();
        if fields.is_empty() {
            debug!("document declares no fields, whole-document conflict");
            return Ok(MergeResult {
                success: false,
                merged: local.clone(),
                conflicts: vec![MergeConflict {
                    field_name: WHOLE_DOCUMENT.to_string(),
                    base_value: FieldValue::Opaque(base_c),
                    local_value: FieldValue::Opaque(local_c),
                    remote_value: FieldValue::Opaque(remote_c),
                    description: "document has no declared fields and both sides changed it"
                        .to_string(),
                }],
            });
        }

        let mut merged = local.clone();
        let mut conflicts = Vec::new();

        for field in &fields {
            let b = field.get(base);
            let l = field.get(local);
            let r = field.get(remote);

            let pick = if l == r || b == r {
                Some(Side::Local)
            } else if b == l {
                Some(Side::Remote)
            } else {
                heuristic(&l, &r)
            };

            match pick {
                Some(Side::Local) => {}
                Some(Side::Remote) => {
                    debug!(field = field.name(), "taking remote value");
                    field.take(&mut merged, remote);
                }
                None => {
                    debug!(field = field.name(), "unresolvable field conflict");
                    let description = format!(
                        "both sides changed '{}' ({} -> {} locally, {} remotely)",
                        field.name(),
                        b,
                        l,
                        r
                    );
                    conflicts.push(MergeConflict {
                        field_name: field.name().to_string(),
                        base_value: b,
                        local_value: l,
                        remote_value: r,
                        description,
                    });
                }
            }
        }

        let merged = merge_undeclared(
            &fields,
            (&base_c, &local_c, &remote_c),
            merged,
            &mut conflicts,
        )?;

        info!(conflicts = conflicts.len(), "three-way merge complete");
        Ok(MergeResult {
            success: conflicts.is_empty(),
            merged,
            conflicts,
        })
    }

    /// Quick check: would [`three_way_merge`](Self::three_way_merge) succeed?
    pub fn can_auto_merge<T: Document>(base: &T, local: &T, remote: &T) -> bool {
        Self::three_way_merge(base, local, remote).is_ok_and(|r| r.success)
    }
}

fn clean<T>(merged: T) -> MergeResult<T> {
    MergeResult {
        success: true,
        merged,
        conflicts: Vec::new(),
    }
}

fn canonical<T: Serialize>(side: &'static str, doc: &T) -> Result<serde_json::Value, MergeError> {
    serde_json::to_value(doc).map_err(|e| MergeError::Canonicalize {
        side,
        detail: e.to_string(),
    })
}

/// Merge top-level keys that no accessor covers.
///
/// The side that changed a key wins; a key both sides changed differently
/// becomes a conflict. Heuristics don't apply since the key has no declared
/// kind.
fn merge_undeclared<T: Document>(
    declared: &[FieldAccessor<T>],
    (base, local, remote): (&Value, &Value, &Value),
    merged: T,
    conflicts: &mut Vec<MergeConflict>,
) -> Result<T, MergeError> {
    let (Value::Object(b), Value::Object(l), Value::Object(r)) = (base, local, remote) else {
        return Ok(merged);
    };

    let keys: BTreeSet<&String> = b
        .keys()
        .chain(l.keys())
        .chain(r.keys())
        .filter(|key| !declared.iter().any(|f| f.name() == key.as_str()))
        .collect();

    let mut take_remote = Vec::new();
    for key in keys {
        let (bv, lv, rv) = (b.get(key), l.get(key), r.get(key));
        if lv == rv || bv == rv {
            continue;
        }
        if bv == lv {
            debug!(field = %key, "taking remote value for undeclared key");
            take_remote.push((key.clone(), rv.cloned()));
            continue;
        }
        debug!(field = %key, "undeclared key changed on both sides");
        let (base_value, local_value, remote_value) =
            (json_field(bv), json_field(lv), json_field(rv));
        conflicts.push(MergeConflict {
            description: format!(
                "both sides changed undeclared key '{key}' ({base_value} -> {local_value} locally, {remote_value} remotely)"
            ),
            field_name: key.clone(),
            base_value,
            local_value,
            remote_value,
        });
    }

    if take_remote.is_empty() {
        return Ok(merged);
    }
    let mut value = canonical("merged", &merged)?;
    if let Value::Object(map) = &mut value {
        for (key, remote_value) in take_remote {
            match remote_value {
                Some(v) => {
                    map.insert(key, v);
                }
                None => {
                    map.remove(&key);
                }
            }
        }
    }
    serde_json::from_value(value).map_err(MergeError::Rebuild)
}

fn json_field(value: Option<&Value>) -> FieldValue {
    value.map_or(FieldValue::Null, FieldValue::opaque)
}

/// Pick a winner when both sides changed a field differently.
fn heuristic(local: &FieldValue, remote: &FieldValue) -> Option<Side> {
    if local.kind() != remote.kind() {
        return None;
    }
    let larger = |ord: Ordering| match ord {
        Ordering::Less => Some(Side::Remote),
        Ordering::Greater => Some(Side::Local),
        Ordering::Equal => None,
    };
    match local.kind() {
        FieldKind::Numeric => numeric_cmp(local, remote).and_then(larger),
        FieldKind::Temporal => match (local, remote) {
            (FieldValue::Timestamp(l), FieldValue::Timestamp(r)) => larger(l.cmp(r)),
            _ => None,
        },
        FieldKind::Text => match (local, remote) {
            (FieldValue::Text(l), FieldValue::Text(r)) => {
                larger(l.chars().count().cmp(&r.chars().count()))
            }
            _ => None,
        },
        FieldKind::Opaque => None,
    }
}

fn numeric_cmp(a: &FieldValue, b: &FieldValue) -> Option<Ordering> {
    use FieldValue::{Float, Integer, Unsigned};
    match (a, b) {
        (Integer(x), Integer(y)) => Some(x.cmp(y)),
        (Unsigned(x), Unsigned(y)) => Some(x.cmp(y)),
        (Integer(x), Unsigned(y)) => Some(i128::from(*x).cmp(&i128::from(*y))),
        (Unsigned(x), Integer(y)) => Some(i128::from(*x).cmp(&i128::from(*y))),
        (Float(x), Float(y)) => x.partial_cmp(y),
        (Float(x), Integer(y)) => x.partial_cmp(&(*y as f64)),
        (Integer(x), Float(y)) => (*x as f64).partial_cmp(y),
        (Float(x), Unsigned(y)) => x.partial_cmp(&(*y as f64)),
        (Unsigned(x), Float(y)) => (*x as f64).partial_cmp(y),
        _ => None,
    }
}
