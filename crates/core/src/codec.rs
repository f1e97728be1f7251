//! Pluggable document encodings.
//!
//! The store never interprets document bytes itself; it hands models to a
//! [`Codec`] and hashes whatever comes back. Metadata side-cars are always
//! JSON regardless of the codec.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::errors::CodecError;

/// An encode/decode pair for document payloads.
pub trait Codec: Send + Sync {
    /// File extension (without the dot) used for documents and conflict
    /// artifacts written with this codec.
    fn extension(&self) -> &'static str;

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError>;

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError>;
}

/// Pretty-printed JSON.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonCodec;

impl Codec for JsonCodec {
    fn extension(&self) -> &'static str {
        "json"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(serde_json::to_vec_pretty(value)?)
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// TOML, for documents that are meant to be hand-edited.
///
/// TOML cannot represent a bare `None`, so optional fields should carry
/// `#[serde(skip_serializing_if = "Option::is_none")]`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TomlCodec;

impl Codec for TomlCodec {
    fn extension(&self) -> &'static str {
        "toml"
    }

    fn encode<T: Serialize>(&self, value: &T) -> Result<Vec<u8>, CodecError> {
        Ok(toml::to_string_pretty(value)?.into_bytes())
    }

    fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T, CodecError> {
        let text = std::str::from_utf8(bytes)?;
        Ok(toml::from_str(text)?)
    }
}

/// On-disk format selector used by configuration.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DocumentFormat {
    #[default]
    Json,
    Toml,
}

impl DocumentFormat {
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => JsonCodec.extension(),
            Self::Toml => TomlCodec.extension(),
        }
    }
}

impl std::fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}
