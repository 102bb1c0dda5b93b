//! Wire layer for the kbx Kubernetes client.
//!
//! Everything here is pure: no sockets, files or processes.
//!
//! - [`CodecRegistry`] maps content types to [`Serializer`]s (JSON, YAML and
//!   the patch media types).
//! - Scalar types ([`IntOrString`], [`Quantity`], [`Time`], [`Duration`],
//!   and enums declared with [`wire_enum!`]) carry their own codecs, so they
//!   work with any serializer.
//! - [`Status`], [`ObjectMeta`] and [`ObjectList`] are the shared envelope.
//! - [`LineBuffer`] and [`decode_event`] frame and decode watch streams.
//! - [`channel`] frames exec/attach traffic.

pub mod channel;
mod codec;
mod error;
mod meta;
mod scalar;
mod watch;

#[doc(hidden)]
pub use serde as __serde;

pub use codec::{
    APPLY_PATCH, CodecRegistry, CodecRegistryBuilder, Document, Format, JSON, JSON_PATCH,
    MERGE_PATCH, STRATEGIC_MERGE_PATCH, Serializer, YAML,
};
pub use error::{FrameError, Result, ScalarError, SerializationError};
pub use meta::{
    ListMeta, ObjectList, ObjectMeta, Status, StatusCause, StatusDetails, StatusPhase, TypeMeta,
    reason_for_code,
};
pub use scalar::{Duration, IntOrString, MicroTime, Quantity, QuantityFormat, ScalarCodec, Time};
pub use watch::{Bookmark, BookmarkMeta, LineBuffer, WatchEvent, WatchEventType, decode_event};
