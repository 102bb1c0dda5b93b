//! Watch events and newline framing of watch streams.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::{Result, Serializer, Status};

crate::wire_enum! {
    /// The `type` field of a watch event.
    pub enum WatchEventType {
        /// An object was added.
        Added => "ADDED",
        /// An object was modified.
        Modified => "MODIFIED",
        /// An object was deleted.
        Deleted => "DELETED",
        /// A progress marker carrying only a resource version.
        Bookmark => "BOOKMARK",
        /// The watch failed; the object is a `Status`.
        Error => "ERROR",
    }
}

/// A single decoded watch notification.
#[derive(Debug, Clone, PartialEq)]
#[non_exhaustive]
pub enum WatchEvent<T> {
    /// An object was added.
    Added(T),
    /// An object was modified.
    Modified(T),
    /// An object was deleted; carries its last known state.
    Deleted(T),
    /// A progress marker.
    Bookmark(Bookmark),
    /// The server ended the watch with an error.
    Error(Status),
}

impl<T> WatchEvent<T> {
    /// Event type tag.
    pub const fn event_type(&self) -> WatchEventType {
        match self {
            Self::Added(_) => WatchEventType::Added,
            Self::Modified(_) => WatchEventType::Modified,
            Self::Deleted(_) => WatchEventType::Deleted,
            Self::Bookmark(_) => WatchEventType::Bookmark,
            Self::Error(_) => WatchEventType::Error,
        }
    }

    /// Whether this event ends the stream.
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}

/// Object payload of a `BOOKMARK` event.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Bookmark {
    /// Bookmark metadata.
    pub metadata: BookmarkMeta,
}

/// Metadata of a bookmark.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookmarkMeta {
    /// Resume point for a subsequent watch.
    pub resource_version: String,
    /// Bookmark annotations (e.g. `k8s.io/initial-events-end`).
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

#[derive(Deserialize)]
struct Header {
    #[serde(rename = "type")]
    kind: WatchEventType,
}

#[derive(Deserialize)]
struct Envelope<O> {
    object: O,
}

/// Decodes one framed unit of a watch stream.
///
/// The event type is read first so that `ERROR` payloads decode as
/// [`Status`] and `BOOKMARK` payloads as [`Bookmark`] rather than `T`.
/// Blank units yield `Ok(None)`.
pub fn decode_event<T: DeserializeOwned>(
    serializer: &Serializer,
    unit: &[u8],
) -> Result<Option<WatchEvent<T>>> {
    let Some(header) = serializer.decode::<Header>(unit)? else {
        return Ok(None);
    };
    let event = match header.kind {
        WatchEventType::Added => object(serializer, unit)?.map(WatchEvent::Added),
        WatchEventType::Modified => object(serializer, unit)?.map(WatchEvent::Modified),
        WatchEventType::Deleted => object(serializer, unit)?.map(WatchEvent::Deleted),
        WatchEventType::Bookmark => object(serializer, unit)?.map(WatchEvent::Bookmark),
        WatchEventType::Error => object(serializer, unit)?.map(WatchEvent::Error),
    };
    Ok(event)
}

fn object<O: DeserializeOwned>(serializer: &Serializer, unit: &[u8]) -> Result<Option<O>> {
    Ok(serializer.decode::<Envelope<O>>(unit)?.map(|e| e.object))
}

/// Accumulates transport chunks and yields complete newline-terminated units.
///
/// A unit may span any number of pushes; blank lines are skipped and a
/// trailing `\r` is stripped.
#[derive(Debug, Default)]
pub struct LineBuffer {
    buf: Vec<u8>,
    scanned: usize,
}

impl LineBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a chunk.
    pub fn push(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Takes the next complete unit, if its terminator has arrived.
    pub fn next_line(&mut self) -> Option<Vec<u8>> {
        loop {
            let Some(pos) = self.buf[self.scanned..].iter().position(|&b| b == b'\n') else {
                self.scanned = self.buf.len();
                return None;
            };
            let end = self.scanned + pos;
            let mut line: Vec<u8> = self.buf.drain(..=end).collect();
            self.scanned = 0;
            line.pop();
            if line.last() == Some(&b'\r') {
                line.pop();
            }
            if !line.trim_ascii().is_empty() {
                return Some(line);
            }
        }
    }

    /// Takes whatever unterminated data remains, once the stream has ended.
    pub fn finish(&mut self) -> Option<Vec<u8>> {
        self.scanned = 0;
        let rest = std::mem::take(&mut self.buf);
        (!rest.trim_ascii().is_empty()).then_some(rest)
    }

    /// Bytes held that do not yet form a complete unit.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::{CodecRegistry, ObjectMeta, SerializationError};

    #[derive(Debug, PartialEq, Deserialize)]
    struct Pod {
        metadata: ObjectMeta,
    }

    fn json() -> Serializer {
        CodecRegistry::default().default_serializer()
    }

    #[test]
    fn lines_split_across_chunks() {
        let mut lines = LineBuffer::new();
        lines.push(b"{\"a\":");
        assert_eq!(lines.next_line(), None);
        lines.push(b"1}\n\n{\"b\"");
        assert_eq!(lines.next_line().as_deref(), Some(&b"{\"a\":1}"[..]));
        assert_eq!(lines.next_line(), None);
        lines.push(b":2}\r\n");
        assert_eq!(lines.next_line().as_deref(), Some(&b"{\"b\":2}"[..]));
        assert_eq!(lines.pending(), 0);
    }

    #[test]
    fn finish_returns_unterminated_tail() {
        let mut lines = LineBuffer::new();
        lines.push(b"{\"a\":1}\n{\"b\":2}");
        assert!(lines.next_line().is_some());
        assert_eq!(lines.next_line(), None);
        assert_eq!(lines.finish().as_deref(), Some(&b"{\"b\":2}"[..]));
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn typed_and_error_events() {
        let added = br#"{"type":"ADDED","object":{"metadata":{"name":"web","resourceVersion":"7"}}}"#;
        let event = decode_event::<Pod>(&json(), added).unwrap().unwrap();
        assert_eq!(event.event_type(), WatchEventType::Added);
        match event {
            WatchEvent::Added(pod) => assert_eq!(pod.metadata.name.as_deref(), Some("web")),
            other => panic!("expected Added, got {other:?}"),
        }

        let error = br#"{"type":"ERROR","object":{"kind":"Status","code":410,"reason":"Expired","message":"too old resource version"}}"#;
        let event = decode_event::<Pod>(&json(), error).unwrap().unwrap();
        assert!(event.is_terminal());
        match event {
            WatchEvent::Error(status) => assert_eq!(status.code, 410),
            other => panic!("expected Error, got {other:?}"),
        }
    }

    #[test]
    fn bookmark_carries_resource_version() {
        let unit = br#"{"type":"BOOKMARK","object":{"kind":"Pod","metadata":{"resourceVersion":"12345"}}}"#;
        match decode_event::<Pod>(&json(), unit).unwrap().unwrap() {
            WatchEvent::Bookmark(b) => assert_eq!(b.metadata.resource_version, "12345"),
            other => panic!("expected Bookmark, got {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_a_decode_error() {
        let unit = br#"{"type":"RENAMED","object":{}}"#;
        let err = decode_event::<Pod>(&json(), unit).unwrap_err();
        assert!(matches!(err, SerializationError::Decode { .. }));
    }
}
