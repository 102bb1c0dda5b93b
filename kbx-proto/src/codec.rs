//! Content-type keyed serializers.
//!
//! A [`CodecRegistry`] is assembled once and shared; it maps media types to
//! a [`Serializer`]. Media-type parameters (`; charset=utf-8`) are ignored
//! during lookup.

use std::any::type_name;
use std::collections::HashMap;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::{Result, SerializationError};

/// `application/json`.
pub const JSON: &str = "application/json";
/// `application/yaml`.
pub const YAML: &str = "application/yaml";
/// JSON merge patch (RFC 7386).
pub const MERGE_PATCH: &str = "application/merge-patch+json";
/// Kubernetes strategic merge patch.
pub const STRATEGIC_MERGE_PATCH: &str = "application/strategic-merge-patch+json";
/// JSON patch (RFC 6902).
pub const JSON_PATCH: &str = "application/json-patch+json";
/// Server-side apply patch.
pub const APPLY_PATCH: &str = "application/apply-patch+yaml";

/// Concrete encoding behind a content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Format {
    /// Structured text (`serde_json`).
    Json,
    /// Human-readable text (`serde_yaml`).
    Yaml,
}

/// Bytes tagged with the content type that produced them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    /// Media type of `bytes`.
    pub content_type: String,
    /// Encoded payload.
    pub bytes: Vec<u8>,
}

/// Encodes and decodes values for one content type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serializer {
    content_type: String,
    format: Format,
}

impl Serializer {
    /// Creates a serializer for `content_type` using `format`.
    pub fn new(content_type: impl Into<String>, format: Format) -> Self {
        Self {
            content_type: content_type.into(),
            format,
        }
    }

    /// Media type this serializer was resolved for.
    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    /// Underlying encoding.
    pub const fn format(&self) -> Format {
        self.format
    }

    /// Encodes `value`.
    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        let encoded = match self.format {
            Format::Json => serde_json::to_vec(value).map_err(|e| e.to_string()),
            Format::Yaml => serde_yaml::to_string(value)
                .map(String::into_bytes)
                .map_err(|e| e.to_string()),
        };
        encoded.map_err(|message| SerializationError::Encode {
            content_type: self.content_type.clone(),
            source_type: type_name::<T>(),
            message,
        })
    }

    /// Encodes `value` into a [`Document`] tagged with this content type.
    pub fn document<T: Serialize + ?Sized>(&self, value: &T) -> Result<Document> {
        Ok(Document {
            content_type: self.content_type.clone(),
            bytes: self.encode(value)?,
        })
    }

    /// Decodes `bytes` as `T`.
    ///
    /// An empty or `null` payload yields `Ok(None)`.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<Option<T>> {
        if is_null_payload(bytes) {
            return Ok(None);
        }
        match self.format {
            Format::Json => serde_json::from_slice(bytes).map(Some).map_err(|e| {
                let offset = json_offset(bytes, e.line(), e.column());
                SerializationError::decode(&self.content_type, type_name::<T>(), bytes, offset, e)
            }),
            Format::Yaml => serde_yaml::from_slice(bytes).map(Some).map_err(|e| {
                let offset = e.location().map_or(bytes.len(), |l| l.index());
                SerializationError::decode(&self.content_type, type_name::<T>(), bytes, offset, e)
            }),
        }
    }
}

/// Maps media types to serializers.
#[derive(Debug, Clone)]
pub struct CodecRegistry {
    formats: HashMap<String, Format>,
    default: String,
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl CodecRegistry {
    /// Starts a registry pre-populated with the JSON, YAML and patch media types.
    pub fn builder() -> CodecRegistryBuilder {
        CodecRegistryBuilder::default()
    }

    /// Resolves the serializer for `content_type`.
    pub fn serializer_for(&self, content_type: &str) -> Result<Serializer> {
        let media = media_type(content_type);
        self.formats
            .get(&media)
            .map(|&format| Serializer::new(media.clone(), format))
            .ok_or(SerializationError::UnsupportedContentType(media))
    }

    /// Serializer for the negotiated default content type.
    pub fn default_serializer(&self) -> Serializer {
        let format = self.formats.get(&self.default).copied().unwrap_or(Format::Json);
        Serializer::new(self.default.clone(), format)
    }

    /// The negotiated default content type.
    pub fn default_content_type(&self) -> &str {
        &self.default
    }
}

/// Builder for [`CodecRegistry`].
#[derive(Debug)]
pub struct CodecRegistryBuilder {
    formats: HashMap<String, Format>,
    default: String,
}

impl Default for CodecRegistryBuilder {
    fn default() -> Self {
        let formats = [
            (JSON, Format::Json),
            (MERGE_PATCH, Format::Json),
            (STRATEGIC_MERGE_PATCH, Format::Json),
            (JSON_PATCH, Format::Json),
            (YAML, Format::Yaml),
            (APPLY_PATCH, Format::Yaml),
        ]
        .into_iter()
        .map(|(ct, f)| (ct.to_owned(), f))
        .collect();
        Self {
            formats,
            default: JSON.to_owned(),
        }
    }
}

impl CodecRegistryBuilder {
    /// Registers `content_type` as an alias for `format`.
    #[must_use]
    pub fn register(mut self, content_type: &str, format: Format) -> Self {
        self.formats.insert(media_type(content_type), format);
        self
    }

    /// Sets the content type used for request bodies and `Accept`.
    #[must_use]
    pub fn default_content_type(mut self, content_type: &str) -> Self {
        self.default = media_type(content_type);
        self
    }

    /// Finalizes the registry.
    ///
    /// A default content type that was never registered falls back to JSON.
    pub fn build(self) -> CodecRegistry {
        let default = if self.formats.contains_key(&self.default) {
            self.default
        } else {
            JSON.to_owned()
        };
        CodecRegistry {
            formats: self.formats,
            default,
        }
    }
}

/// Lower-cased media type with parameters stripped.
fn media_type(content_type: &str) -> String {
    content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase()
}

fn is_null_payload(bytes: &[u8]) -> bool {
    let trimmed = bytes.trim_ascii();
    trimmed.is_empty() || trimmed == b"null"
}

/// Converts serde_json's 1-based line/column into a byte offset.
fn json_offset(bytes: &[u8], line: usize, column: usize) -> usize {
    if line == 0 {
        return bytes.len();
    }
    let line_start: usize = bytes
        .split(|&b| b == b'\n')
        .take(line - 1)
        .map(|l| l.len() + 1)
        .sum();
    line_start + column.saturating_sub(1)
}
