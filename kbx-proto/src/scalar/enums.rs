//! Closed string enums.

/// Declares an enum whose variants map one-to-one onto wire tokens.
///
/// Decoding an unknown token fails instead of falling back to a default.
///
/// ```
/// kbx_proto::wire_enum! {
///     /// Image pull behavior.
///     pub enum PullPolicy {
///         /// Always pull.
///         Always => "Always",
///         /// Pull when missing.
///         IfNotPresent => "IfNotPresent",
///     }
/// }
///
/// let p: PullPolicy = "IfNotPresent".parse().unwrap();
/// assert_eq!(p.as_wire(), "IfNotPresent");
/// assert!("Sometimes".parse::<PullPolicy>().is_err());
/// ```
#[macro_export]
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $(
                $(#[$vmeta:meta])*
                $variant:ident => $wire:literal
            ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $(
                $(#[$vmeta])*
                $variant,
            )+
        }

        impl $name {
            /// Every variant, in declaration order.
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            /// The wire token for this variant.
            pub const fn as_wire(self) -> &'static str {
                match self {
                    $(Self::$variant => $wire,)+
                }
            }
        }

        impl $crate::ScalarCodec for $name {
            const KIND: &'static str = stringify!($name);

            fn decode_wire(input: &str) -> ::std::result::Result<Self, $crate::ScalarError> {
                match input {
                    $($wire => Ok(Self::$variant),)+
                    other => Err($crate::ScalarError::new(
                        stringify!($name),
                        other,
                        concat!("expected one of:" $(, " ", $wire)+),
                    )),
                }
            }

            fn encode_wire(&self) -> ::std::borrow::Cow<'_, str> {
                ::std::borrow::Cow::Borrowed(self.as_wire())
            }
        }

        impl ::std::fmt::Display for $name {
            fn fmt(&self, f: &mut ::std::fmt::Formatter<'_>) -> ::std::fmt::Result {
                f.write_str(self.as_wire())
            }
        }

        impl ::std::str::FromStr for $name {
            type Err = $crate::ScalarError;

            fn from_str(s: &str) -> ::std::result::Result<Self, Self::Err> {
                <Self as $crate::ScalarCodec>::decode_wire(s)
            }
        }

        $crate::scalar_serde!($name);
    };
}

#[cfg(test)]
mod tests {
    use crate::ScalarCodec;

    crate::wire_enum! {
        /// Restart policy.
        enum RestartPolicy {
            Always => "Always",
            OnFailure => "OnFailure",
            Never => "Never",
        }
    }

    #[test]
    fn tokens_round_trip() {
        for &p in RestartPolicy::ALL {
            assert_eq!(RestartPolicy::decode_wire(p.as_wire()).unwrap(), p);
        }
    }

    #[test]
    fn unknown_token_fails_fast() {
        let err = "Sometimes".parse::<RestartPolicy>().unwrap_err();
        assert_eq!(err.kind, "RestartPolicy");
        assert_eq!(err.input, "Sometimes");
        assert!(err.reason.contains("OnFailure"));

        let decoded: Result<RestartPolicy, _> = serde_json::from_str(r#""always""#);
        assert!(decoded.is_err());
    }

    #[test]
    fn serializes_as_string() {
        assert_eq!(
            serde_json::to_string(&RestartPolicy::OnFailure).unwrap(),
            r#""OnFailure""#
        );
    }
}
