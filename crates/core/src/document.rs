//! The contract a payload type must meet to live in the store.
//!
//! A document is plain data with value semantics: `Clone` is the deep copy
//! the store takes at checkout and again at merge time. Instead of inspecting
//! the type at runtime, each document declares its mergeable fields up front
//! as a list of [`FieldAccessor`]s, usually with the [`field!`](crate::field)
//! macro:
//!
//! ```
//! use docvault_core::document::{Document, FieldAccessor};
//! use docvault_core::field;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Clone, Serialize, Deserialize)]
//! struct Settings {
//!     theme: String,
//!     retries: u32,
//!     tags: Vec<String>,
//! }
//!
//! impl Document for Settings {
//!     fn fields() -> Vec<FieldAccessor<Self>> {
//!         vec![
//!             field!(Settings, theme),
//!             field!(Settings, retries),
//!             field!(Settings, tags, opaque),
//!         ]
//!     }
//! }
//! ```

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

/// A storable, mergeable payload.
pub trait Document: Clone + Serialize + DeserializeOwned + Send + Sync {
    /// Every field the merge engine should reconcile independently.
    ///
    /// A type that returns an empty list is merged as a single opaque value.
    fn fields() -> Vec<FieldAccessor<Self>>;
}

// ---------------------------------------------------------------------------
// Field values
// ---------------------------------------------------------------------------

/// Coarse type class used to pick a merge heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Numeric,
    Temporal,
    Text,
    Opaque,
}

/// A typed projection of one field, as seen by the merge engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum FieldValue {
    Null,
    Bool(bool),
    Integer(i64),
    Unsigned(u64),
    Float(f64),
    Timestamp(DateTime<Utc>),
    Text(String),
    Opaque(serde_json::Value),
}

impl FieldValue {
    /// Project any serializable value as an opaque field.
    pub fn opaque<V: Serialize>(value: &V) -> Self {
        match serde_json::to_value(value) {
            Ok(serde_json::Value::Null) => Self::Null,
            Ok(v) => Self::Opaque(v),
            Err(e) => Self::Opaque(serde_json::Value::String(format!("<unserializable: {e}>"))),
        }
    }

    pub fn kind(&self) -> FieldKind {
        match self {
            Self::Integer(_) | Self::Unsigned(_) | Self::Float(_) => FieldKind::Numeric,
            Self::Timestamp(_) => FieldKind::Temporal,
            Self::Text(_) => FieldKind::Text,
            Self::Null | Self::Bool(_) | Self::Opaque(_) => FieldKind::Opaque,
        }
    }
}

impl std::fmt::Display for FieldValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Integer(i) => write!(f, "{i}"),
            Self::Unsigned(u) => write!(f, "{u}"),
            Self::Float(x) => write!(f, "{x}"),
            Self::Timestamp(t) => write!(f, "{}", t.to_rfc3339()),
            Self::Text(s) => write!(f, "{s:?}"),
            Self::Opaque(v) => write!(f, "{v}"),
        }
    }
}

macro_rules! field_value_from {
    ($($ty:ty => $variant:ident as $cast:ty),* $(,)?) => {
        $(
            impl From<$ty> for FieldValue {
                fn from(v: $ty) -> Self {
                    Self::$variant(v as $cast)
                }
            }
        )*
    };
}

field_value_from! {
    i8 => Integer as i64,
    i16 => Integer as i64,
    i32 => Integer as i64,
    i64 => Integer as i64,
    u8 => Unsigned as u64,
    u16 => Unsigned as u64,
    u32 => Unsigned as u64,
    u64 => Unsigned as u64,
    usize => Unsigned as u64,
    f32 => Float as f64,
    f64 => Float as f64,
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<DateTime<Utc>> for FieldValue {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Timestamp(v)
    }
}

impl<V: Into<FieldValue>> From<Option<V>> for FieldValue {
    fn from(v: Option<V>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

// ---------------------------------------------------------------------------
// Accessors
// ---------------------------------------------------------------------------

/// Declared access to one field of a document type.
pub struct FieldAccessor<T> {
    name: &'static str,
    get: fn(&T) -> FieldValue,
    take: fn(&mut T, &T),
}

impl<T> FieldAccessor<T> {
    /// `get` projects the field; `take` copies the field from the second
    /// argument into the first.
    pub fn new(name: &'static str, get: fn(&T) -> FieldValue, take: fn(&mut T, &T)) -> Self {
        Self { name, get, take }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn get(&self, doc: &T) -> FieldValue {
        (self.get)(doc)
    }

    /// Overwrite this field of `dst` with the value it has in `src`.
    pub fn take(&self, dst: &mut T, src: &T) {
        (self.take)(dst, src)
    }
}

impl<T> std::fmt::Debug for FieldAccessor<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FieldAccessor")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Build a [`FieldAccessor`] for a struct field.
///
/// `field!(Type, name)` needs `FieldValue: From<FieldType>`;
/// `field!(Type, name, opaque)` works for any `Serialize + Clone` field and
/// is only ever merged by "who changed it" rules, never by heuristic.
#[macro_export]
macro_rules! field {
    ($ty:ty, $name:ident) => {
        $crate::document::FieldAccessor::<$ty>::new(
            stringify!($name),
            |doc: &$ty| $crate::document::FieldValue::from(doc.$name.clone()),
            |dst: &mut $ty, src: &$ty| dst.$name = src.$name.clone(),
        )
    };
    ($ty:ty, $name:ident, opaque) => {
        $crate::document::FieldAccessor::<$ty>::new(
            stringify!($name),
            |doc: &$ty| $crate::document::FieldValue::opaque(&doc.$name),
            |dst: &mut $ty, src: &$ty| dst.$name = src.$name.clone(),
        )
    };
}
