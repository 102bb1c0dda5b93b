//! Kubernetes scalar value shapes and their wire codecs.
//!
//! Every scalar that travels as a string implements [`ScalarCodec`]; its
//! serde impls are derived from that codec via [`scalar_serde!`], so the same
//! type works with any registered serializer.
//!
//! [`scalar_serde!`]: crate::scalar_serde

mod duration;
mod enums;
mod int_or_string;
mod quantity;
mod time;

use std::borrow::Cow;

pub use duration::Duration;
pub use int_or_string::IntOrString;
pub use quantity::{Quantity, QuantityFormat};
pub use time::{MicroTime, Time};

use crate::ScalarError;

/// Pure bidirectional mapping between a scalar and its wire text.
///
/// `decode_wire(&x.encode_wire()) == x` holds for every representable `x`.
pub trait ScalarCodec: Sized {
    /// Human-readable kind used in error messages.
    const KIND: &'static str;

    /// Parses wire text.
    fn decode_wire(input: &str) -> Result<Self, ScalarError>;

    /// Renders wire text.
    fn encode_wire(&self) -> Cow<'_, str>;
}

/// Implements `Serialize`/`Deserialize` for a [`ScalarCodec`] type as a string.
#[macro_export]
macro_rules! scalar_serde {
    ($ty:ty) => {
        impl $crate::__serde::Serialize for $ty {
            fn serialize<S: $crate::__serde::Serializer>(
                &self,
                serializer: S,
            ) -> ::std::result::Result<S::Ok, S::Error> {
                serializer.serialize_str(&$crate::ScalarCodec::encode_wire(self))
            }
        }

        impl<'de> $crate::__serde::Deserialize<'de> for $ty {
            fn deserialize<D: $crate::__serde::Deserializer<'de>>(
                deserializer: D,
            ) -> ::std::result::Result<Self, D::Error> {
                struct Visitor;

                impl $crate::__serde::de::Visitor<'_> for Visitor {
                    type Value = $ty;

                    fn expecting(
                        &self,
                        f: &mut ::std::fmt::Formatter<'_>,
                    ) -> ::std::fmt::Result {
                        write!(f, "a {} string", <$ty as $crate::ScalarCodec>::KIND)
                    }

                    fn visit_str<E: $crate::__serde::de::Error>(
                        self,
                        v: &str,
                    ) -> ::std::result::Result<$ty, E> {
                        <$ty as $crate::ScalarCodec>::decode_wire(v).map_err(E::custom)
                    }
                }

                deserializer.deserialize_str(Visitor)
            }
        }
    };
}
