//! Suffixed resource amounts (`500m`, `1.5Gi`, `12e3`).

use std::borrow::Cow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use crate::{ScalarCodec, ScalarError};

/// Most digits accepted in a literal; keeps the significand inside `i128`.
const MAX_DIGITS: usize = 30;

const BINARY_SUFFIXES: [&str; 7] = ["", "Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Suffix family a quantity was written in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum QuantityFormat {
    /// Powers of 1024 (`Ki`, `Mi`, ...).
    BinarySI,
    /// Powers of 1000 (`m`, `k`, `M`, ...), and bare numbers.
    DecimalSI,
    /// Scientific notation (`12e3`).
    DecimalExponent,
}

/// A fixed-point amount `significand * 10^exponent` plus its suffix family.
///
/// Quantities parsed from text keep that text and re-emit it verbatim.
/// Quantities built with [`Quantity::from_parts`] are rendered canonically
/// in their own suffix family.
#[derive(Debug, Clone)]
pub struct Quantity {
    significand: i128,
    exponent: i32,
    format: QuantityFormat,
    text: Option<String>,
}

impl Quantity {
    /// Builds `significand * 10^exponent` in `format`.
    pub const fn from_parts(significand: i128, exponent: i32, format: QuantityFormat) -> Self {
        Self {
            significand,
            exponent,
            format,
            text: None,
        }
    }

    /// Parses a quantity literal.
    pub fn parse(input: &str) -> Result<Self, ScalarError> {
        let err = |reason: &str| ScalarError::new(Self::KIND, input, reason);

        let (negative, rest) = match input.as_bytes().first() {
            Some(b'-') => (true, &input[1..]),
            Some(b'+') => (false, &input[1..]),
            Some(_) => (false, input),
            None => return Err(err("empty quantity")),
        };

        let number_len = rest
            .find(|c: char| !c.is_ascii_digit() && c != '.')
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_len);
        let (int_part, frac_part) = number.split_once('.').unwrap_or((number, ""));
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(err("missing numeric part"));
        }
        if frac_part.contains('.') {
            return Err(err("more than one decimal point"));
        }
        let digits = int_part.trim_start_matches('0').len() + frac_part.len();
        if digits > MAX_DIGITS {
            return Err(err("too many digits"));
        }

        let mut significand: i128 = 0;
        for d in int_part.bytes().chain(frac_part.bytes()) {
            significand = significand * 10 + i128::from(d - b'0');
        }
        let frac_len = i32::try_from(frac_part.len()).map_err(|_| err("too many digits"))?;

        let (format, exponent) = parse_suffix(suffix).ok_or_else(|| err("unknown suffix"))?;
        let (significand, exponent) = match format {
            QuantityFormat::BinarySI => {
                let power = 1024_i128.pow(u32::try_from(exponent).unwrap_or(0));
                let scaled = significand
                    .checked_mul(power)
                    .ok_or_else(|| err("value out of range"))?;
                (scaled, -frac_len)
            }
            _ => (
                significand,
                exponent
                    .checked_sub(frac_len)
                    .ok_or_else(|| err("exponent out of range"))?,
            ),
        };

        Ok(Self {
            significand: if negative { -significand } else { significand },
            exponent,
            format,
            text: Some(input.to_owned()),
        })
    }

    /// Significand of `significand * 10^exponent`.
    pub const fn significand(&self) -> i128 {
        self.significand
    }

    /// Decimal exponent of `significand * 10^exponent`.
    pub const fn exponent(&self) -> i32 {
        self.exponent
    }

    /// Suffix family.
    pub const fn format(&self) -> QuantityFormat {
        self.format
    }

    /// Whether the amount is zero.
    pub const fn is_zero(&self) -> bool {
        self.significand == 0
    }

    /// Approximate value as `f64`.
    #[allow(clippy::cast_precision_loss)]
    pub fn as_f64(&self) -> f64 {
        if self.significand == 0 {
            return 0.0;
        }
        self.significand as f64 * 10f64.powi(self.exponent)
    }

    /// `(significand, exponent)` with trailing decimal zeros folded into the exponent.
    fn normalized(&self) -> (i128, i32) {
        let (mut sig, mut exp) = (self.significand, self.exponent);
        if sig == 0 {
            return (0, 0);
        }
        while sig % 10 == 0 {
            let Some(next) = exp.checked_add(1) else {
                break;
            };
            sig /= 10;
            exp = next;
        }
        (sig, exp)
    }

    /// Renders the value in its suffix family.
    fn canonical(&self) -> String {
        let (sig, exp) = self.normalized();
        if sig == 0 {
            return "0".to_owned();
        }
        match self.format {
            QuantityFormat::BinarySI => binary_si(sig, exp).unwrap_or_else(|| decimal_si(sig, exp)),
            QuantityFormat::DecimalSI => decimal_si(sig, exp),
            QuantityFormat::DecimalExponent => match scale_to_multiple_of_three(sig, exp) {
                Some((mantissa, 0)) => mantissa.to_string(),
                Some((mantissa, e3)) => format!("{mantissa}e{e3}"),
                None => format!("{sig}e{exp}"),
            },
        }
    }
}

/// Maps a suffix to its family and exponent (power of 1024 for binary, of 10 otherwise).
fn parse_suffix(suffix: &str) -> Option<(QuantityFormat, i32)> {
    if let Some(power) = BINARY_SUFFIXES.iter().skip(1).position(|&s| s == suffix) {
        return Some((QuantityFormat::BinarySI, i32::try_from(power).ok()? + 1));
    }
    let exp = match suffix {
        "n" => -9,
        "u" => -6,
        "m" => -3,
        "" => 0,
        "k" => 3,
        "M" => 6,
        "G" => 9,
        "T" => 12,
        "P" => 15,
        "E" => 18,
        _ => {
            let rest = suffix.strip_prefix(['e', 'E'])?;
            return rest
                .parse::<i32>()
                .ok()
                .map(|e| (QuantityFormat::DecimalExponent, e));
        }
    };
    Some((QuantityFormat::DecimalSI, exp))
}

fn decimal_suffix(e3: i32) -> &'static str {
    match e3 {
        -9 => "n",
        -6 => "u",
        -3 => "m",
        3 => "k",
        6 => "M",
        9 => "G",
        12 => "T",
        15 => "P",
        18 => "E",
        _ => "",
    }
}

/// Lowers `exp` to a multiple of three, growing the mantissa to compensate.
///
/// `None` when the mantissa or the exponent leaves its integer range.
fn scale_to_multiple_of_three(sig: i128, exp: i32) -> Option<(i128, i32)> {
    let e3 = exp.div_euclid(3).checked_mul(3)?;
    let shift = u32::try_from(exp - e3).ok()?;
    Some((sig.checked_mul(10_i128.pow(shift))?, e3))
}

fn decimal_si(sig: i128, exp: i32) -> String {
    if exp < -9 {
        // Sub-nano precision rounds away from zero to the nearest nano.
        let divisor = 10_i128.pow(u32::try_from(-9 - exp).unwrap_or(0).min(38));
        let mut nanos = sig / divisor;
        if sig % divisor != 0 {
            nanos += sig.signum();
        }
        return format!("{nanos}n");
    }
    let Some((mut mantissa, mut e3)) = scale_to_multiple_of_three(sig, exp) else {
        return format!("{sig}e{exp}");
    };
    while e3 > 18 {
        let Some(grown) = mantissa.checked_mul(1000) else {
            // Too large for any suffix; scientific notation keeps the value.
            return format!("{sig}e{exp}");
        };
        mantissa = grown;
        e3 -= 3;
    }
    format!("{mantissa}{}", decimal_suffix(e3))
}

/// Renders an integral value with the largest binary suffix that divides it.
fn binary_si(sig: i128, exp: i32) -> Option<String> {
    if exp < 0 {
        return None;
    }
    let value = sig.checked_mul(10_i128.checked_pow(u32::try_from(exp).ok()?)?)?;
    let (mut n, mut scaled) = (0, value);
    while n < BINARY_SUFFIXES.len() - 1 && scaled != 0 && scaled % 1024 == 0 {
        scaled /= 1024;
        n += 1;
    }
    Some(format!("{scaled}{}", BINARY_SUFFIXES[n]))
}

impl ScalarCodec for Quantity {
    const KIND: &'static str = "quantity";

    fn decode_wire(input: &str) -> Result<Self, ScalarError> {
        Self::parse(input)
    }

    fn encode_wire(&self) -> Cow<'_, str> {
        match &self.text {
            Some(text) => Cow::Borrowed(text),
            None => Cow::Owned(self.canonical()),
        }
    }
}

crate::scalar_serde!(Quantity);

impl FromStr for Quantity {
    type Err = ScalarError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode_wire())
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Quantity {}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, ea) = self.normalized();
        let (b, eb) = other.normalized();
        let min = ea.min(eb);
        let align = |sig: i128, exp: i32| {
            u32::try_from(i64::from(exp) - i64::from(min))
                .ok()
                .and_then(|shift| 10_i128.checked_pow(shift))
                .and_then(|p| sig.checked_mul(p))
        };
        match (align(a, ea), align(b, eb)) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => self.as_f64().total_cmp(&other.as_f64()),
        }
    }
}
