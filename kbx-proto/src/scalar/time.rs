//! RFC 3339 timestamps.

use std::borrow::Cow;
use std::fmt;

use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};

use crate::{ScalarCodec, ScalarError};

/// An instant with second precision, always rendered in UTC.
///
/// Sub-second input is accepted and truncated; any offset is normalized
/// to UTC.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Time(DateTime<Utc>);

impl Time {
    /// Wraps `instant`, dropping sub-second precision.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant.trunc_subsecs(0))
    }

    /// The current instant.
    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    /// The wrapped instant.
    pub const fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for Time {
    fn from(instant: DateTime<Utc>) -> Self {
        Self::new(instant)
    }
}

impl ScalarCodec for Time {
    const KIND: &'static str = "timestamp";

    fn decode_wire(input: &str) -> Result<Self, ScalarError> {
        parse_rfc3339(Self::KIND, input).map(Self::new)
    }

    fn encode_wire(&self) -> Cow<'_, str> {
        Cow::Owned(self.0.to_rfc3339_opts(SecondsFormat::Secs, true))
    }
}

crate::scalar_serde!(Time);

impl fmt::Display for Time {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_wire())
    }
}

/// An instant with microsecond precision, used by events and leases.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MicroTime(DateTime<Utc>);

impl MicroTime {
    /// Wraps `instant`, dropping sub-microsecond precision.
    pub fn new(instant: DateTime<Utc>) -> Self {
        Self(instant.trunc_subsecs(6))
    }

    /// The wrapped instant.
    pub const fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl ScalarCodec for MicroTime {
    const KIND: &'static str = "micro timestamp";

    fn decode_wire(input: &str) -> Result<Self, ScalarError> {
        parse_rfc3339(Self::KIND, input).map(Self::new)
    }

    fn encode_wire(&self) -> Cow<'_, str> {
        Cow::Owned(self.0.to_rfc3339_opts(SecondsFormat::Micros, true))
    }
}

crate::scalar_serde!(MicroTime);

fn parse_rfc3339(kind: &'static str, input: &str) -> Result<DateTime<Utc>, ScalarError> {
    DateTime::parse_from_rfc3339(input)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| ScalarError::new(kind, input, e.to_string()))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn sub_second_precision_is_dropped_on_encode() {
        let t: Time = serde_json::from_str(r#""2024-01-01T00:00:00.500Z""#).unwrap();
        assert_eq!(
            serde_json::to_string(&t).unwrap(),
            r#""2024-01-01T00:00:00Z""#
        );
    }

    #[test]
    fn offsets_normalize_to_utc() {
        let t = Time::decode_wire("2024-03-10T12:30:45+02:00").unwrap();
        assert_eq!(t.encode_wire(), "2024-03-10T10:30:45Z");
        assert_eq!(
            t.instant(),
            Utc.with_ymd_and_hms(2024, 3, 10, 10, 30, 45).unwrap()
        );
    }

    #[test]
    fn encoded_time_decodes_to_itself() {
        let t = Time::now();
        assert_eq!(Time::decode_wire(&t.encode_wire()).unwrap(), t);
    }

    #[test]
    fn micro_time_keeps_six_digits() {
        let t = MicroTime::decode_wire("2024-01-01T00:00:00.123456789Z").unwrap();
        assert_eq!(t.encode_wire(), "2024-01-01T00:00:00.123456Z");
    }

    #[test]
    fn rejects_non_rfc3339() {
        assert!(Time::decode_wire("2024-01-01 00:00:00").is_err());
        assert!(Time::decode_wire("yesterday").is_err());
    }
}
