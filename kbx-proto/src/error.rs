//! Error types for the wire layer.

use std::fmt;

/// Alias for `Result<T, kbx_proto::SerializationError>`.
pub type Result<T> = std::result::Result<T, SerializationError>;

/// Number of bytes shown on each side of a decode failure.
const SNIPPET_RADIUS: usize = 24;

/// A payload could not be translated to or from its wire form.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum SerializationError {
    /// The bytes did not match the shape of the target type.
    #[error("cannot decode {content_type} into {target} at byte {offset}: {message} (near `{snippet}`)")]
    Decode {
        /// Content type the bytes were decoded as.
        content_type: String,
        /// Rust type name of the decode target.
        target: &'static str,
        /// Byte offset where the decoder gave up.
        offset: usize,
        /// Lossy text around `offset`.
        snippet: String,
        /// Decoder message.
        message: String,
    },

    /// A value could not be rendered in the requested encoding.
    #[error("cannot encode {source_type} as {content_type}: {message}")]
    Encode {
        /// Content type that was requested.
        content_type: String,
        /// Rust type name of the value.
        source_type: &'static str,
        /// Encoder message.
        message: String,
    },

    /// No serializer is registered for the content type.
    #[error("unsupported content type: {0}")]
    UnsupportedContentType(String),
}

impl SerializationError {
    /// Builds a [`SerializationError::Decode`] pointing at `offset` in `bytes`.
    pub fn decode(
        content_type: &str,
        target: &'static str,
        bytes: &[u8],
        offset: usize,
        message: impl fmt::Display,
    ) -> Self {
        let offset = offset.min(bytes.len());
        let start = offset.saturating_sub(SNIPPET_RADIUS);
        let end = (offset + SNIPPET_RADIUS).min(bytes.len());
        Self::Decode {
            content_type: content_type.to_owned(),
            target,
            offset,
            snippet: String::from_utf8_lossy(&bytes[start..end]).into_owned(),
            message: message.to_string(),
        }
    }

    /// Byte offset of a decode failure.
    pub const fn offset(&self) -> Option<usize> {
        match self {
            Self::Decode { offset, .. } => Some(*offset),
            _ => None,
        }
    }
}

/// A scalar's wire text was rejected by its codec.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind} `{input}`: {reason}")]
pub struct ScalarError {
    /// Name of the scalar kind (e.g. `quantity`).
    pub kind: &'static str,
    /// The rejected input.
    pub input: String,
    /// Why it was rejected.
    pub reason: String,
}

impl ScalarError {
    /// Creates a new scalar error.
    pub fn new(kind: &'static str, input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            kind,
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// A multiplexed exec frame was malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum FrameError {
    /// The frame carried no channel byte.
    #[error("empty frame")]
    Empty,
    /// The channel byte is not one of the known channels.
    #[error("unknown channel id {0}")]
    UnknownChannel(u8),
}
