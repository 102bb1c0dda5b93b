//! Go-style duration strings (`1h30m`, `250ms`).

use std::borrow::Cow;
use std::fmt::{self, Write as _};

use crate::{ScalarCodec, ScalarError};

const NANOSECOND: u64 = 1;
const MICROSECOND: u64 = 1_000 * NANOSECOND;
const MILLISECOND: u64 = 1_000 * MICROSECOND;
const SECOND: u64 = 1_000 * MILLISECOND;
const MINUTE: u64 = 60 * SECOND;
const HOUR: u64 = 60 * MINUTE;

/// A signed span of nanoseconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Duration(i64);

impl Duration {
    /// Creates a duration from nanoseconds.
    pub const fn from_nanos(nanos: i64) -> Self {
        Self(nanos)
    }

    /// Length in nanoseconds.
    pub const fn as_nanos(&self) -> i64 {
        self.0
    }

    /// Converts to a `std::time::Duration`; negative spans yield `None`.
    pub fn to_std(&self) -> Option<std::time::Duration> {
        u64::try_from(self.0).ok().map(std::time::Duration::from_nanos)
    }
}

impl TryFrom<std::time::Duration> for Duration {
    type Error = ScalarError;

    fn try_from(d: std::time::Duration) -> Result<Self, Self::Error> {
        i64::try_from(d.as_nanos())
            .map(Self)
            .map_err(|_| ScalarError::new(Self::KIND, format!("{d:?}"), "exceeds i64 nanoseconds"))
    }
}

fn unit_scale(unit: &str) -> Option<u64> {
    match unit {
        "ns" => Some(NANOSECOND),
        "us" | "\u{b5}s" | "\u{3bc}s" => Some(MICROSECOND),
        "ms" => Some(MILLISECOND),
        "s" => Some(SECOND),
        "m" => Some(MINUTE),
        "h" => Some(HOUR),
        _ => None,
    }
}

impl ScalarCodec for Duration {
    const KIND: &'static str = "duration";

    fn decode_wire(input: &str) -> Result<Self, ScalarError> {
        let err = |reason: &str| ScalarError::new(Self::KIND, input, reason);

        let (negative, mut rest) = match input.as_bytes().first() {
            Some(b'-') => (true, &input[1..]),
            Some(b'+') => (false, &input[1..]),
            _ => (false, input),
        };
        if rest.is_empty() {
            return Err(err("empty duration"));
        }

        let mut total: u128 = 0;
        while !rest.is_empty() {
            let int_len = rest.find(|c: char| !c.is_ascii_digit()).unwrap_or(rest.len());
            let (int_digits, after) = rest.split_at(int_len);
            let (frac_digits, after) = match after.strip_prefix('.') {
                Some(tail) => {
                    let len = tail.find(|c: char| !c.is_ascii_digit()).unwrap_or(tail.len());
                    tail.split_at(len)
                }
                None => ("", after),
            };
            if int_digits.is_empty() && frac_digits.is_empty() {
                return Err(err("expected a number"));
            }

            let unit_len = after
                .find(|c: char| c.is_ascii_digit() || c == '.')
                .unwrap_or(after.len());
            let (unit, tail) = after.split_at(unit_len);
            if unit.is_empty() {
                return Err(err("missing unit"));
            }
            let scale = u128::from(unit_scale(unit).ok_or_else(|| err("unknown unit"))?);

            let whole: u128 = if int_digits.is_empty() {
                0
            } else {
                int_digits.parse().map_err(|_| err("value out of range"))?
            };
            let mut value = whole.checked_mul(scale).ok_or_else(|| err("value out of range"))?;

            // Fraction digits beyond nanosecond resolution cannot change the result.
            let mut place = scale;
            for d in frac_digits.bytes() {
                place /= 10;
                if place == 0 {
                    break;
                }
                value += u128::from(d - b'0') * place;
            }

            total = total.checked_add(value).ok_or_else(|| err("value out of range"))?;
            rest = tail;
        }

        let limit = if negative {
            u128::from(i64::MIN.unsigned_abs())
        } else {
            u128::from(i64::MAX.unsigned_abs())
        };
        if total > limit {
            return Err(err("value out of range"));
        }
        let nanos = if negative {
            i64::try_from(total).map_or(i64::MIN, |v| -v)
        } else {
            i64::try_from(total).map_err(|_| err("value out of range"))?
        };
        Ok(Self(nanos))
    }

    fn encode_wire(&self) -> Cow<'_, str> {
        if self.0 == 0 {
            return Cow::Borrowed("0s");
        }
        let mut out = String::new();
        if self.0 < 0 {
            out.push('-');
        }
        let u = self.0.unsigned_abs();

        if u < SECOND {
            let (scale, unit) = if u < MICROSECOND {
                (NANOSECOND, "ns")
            } else if u < MILLISECOND {
                (MICROSECOND, "\u{b5}s")
            } else {
                (MILLISECOND, "ms")
            };
            write_fixed(&mut out, u, scale);
            out.push_str(unit);
            return Cow::Owned(out);
        }

        let hours = u / HOUR;
        let minutes = (u % HOUR) / MINUTE;
        let seconds = u % MINUTE;
        if hours > 0 {
            let _ = write!(out, "{hours}h");
        }
        if hours > 0 || minutes > 0 {
            let _ = write!(out, "{minutes}m");
        }
        write_fixed(&mut out, seconds, SECOND);
        out.push('s');
        Cow::Owned(out)
    }
}

/// Writes `value / scale` with the remainder as trimmed decimal fraction.
fn write_fixed(out: &mut String, value: u64, scale: u64) {
    let _ = write!(out, "{}", value / scale);
    let frac = value % scale;
    if frac == 0 {
        return;
    }
    let width = scale.ilog10() as usize;
    let digits = format!("{frac:0width$}");
    out.push('.');
    out.push_str(digits.trim_end_matches('0'));
}

crate::scalar_serde!(Duration);

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_wire())
    }
}
