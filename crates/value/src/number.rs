//! Arbitrary precision decimal numbers as carried on the wire.

use std::fmt;
use std::str::FromStr;

use serde_json::Number;

use skyjet_core::{Error, Result};

/// Decimal number `(-1)^negative * digits * 10^exp`.
///
/// Kept canonical: `digits` has no leading or trailing zeros and zero is
/// represented by empty digits, so derived equality is numeric equality.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct BigNumber {
    negative: bool,
    digits: String,
    exp: i64,
}

impl BigNumber {
    pub fn zero() -> Self { Self::default() }

    pub fn is_zero(&self) -> bool { self.digits.is_empty() }

    pub fn is_negative(&self) -> bool { self.negative }

    pub fn from_i64(v: i64) -> Self {
        let negative = v < 0;
        // at most 19 trailing zeros on a zero exponent
        Self::canonical(negative, v.unsigned_abs().to_string(), 0).unwrap_or_default()
    }

    /// Returns `None` for NaN and infinities.
    pub fn from_f64(v: f64) -> Option<Self> {
        if !v.is_finite() { return None; }
        // `{:e}` yields the shortest round-tripping digits, e.g. `1.5e-3`
        Self::parse(&format!("{v:e}")).ok()
    }

    pub fn from_json_number(n: &Number) -> Result<Self> { Self::parse(&n.to_string()) }

    pub fn parse(s: &str) -> Result<Self> {
        let bad = || Error::conversion("number", format!("{s:?} is not a decimal number"));
        let overflow = || Error::NumberOverflow { path: "number".into(), value: s.to_string() };
        let underflow = || Error::NumberUnderflow { path: "number".into(), value: s.to_string() };
        let t = s.trim();
        let (negative, t) = match t.as_bytes().first() {
            Some(b'-') => (true, &t[1..]),
            Some(b'+') => (false, &t[1..]),
            _ => (false, t),
        };
        let (mantissa, exp_part) = match t.find(['e', 'E']) {
            Some(i) => (&t[..i], Some(&t[i + 1..])),
            None => (t, None),
        };
        let (int_part, frac_part) = match mantissa.split_once('.') {
            Some((a, b)) => (a, b),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() { return Err(bad()); }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) { return Err(bad()); }
        let exp: i64 = match exp_part {
            Some(e) if !e.is_empty() => match e.parse() {
                Ok(x) => x,
                Err(_) => {
                    let digits = e.strip_prefix(['-', '+']).unwrap_or(e);
                    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) { return Err(bad()); }
                    return Err(if e.starts_with('-') { underflow() } else { overflow() });
                }
            },
            Some(_) => return Err(bad()),
            None => 0,
        };
        let exp = i64::try_from(frac_part.len()).ok().and_then(|n| exp.checked_sub(n)).ok_or_else(underflow)?;
        Self::canonical(negative, format!("{int_part}{frac_part}"), exp).ok_or_else(overflow)
    }

    /// `None` when dropping trailing zeros pushes the exponent past `i64`.
    fn canonical(negative: bool, digits: String, exp: i64) -> Option<Self> {
        let trimmed = digits.trim_start_matches('0');
        let without_trailing = trimmed.trim_end_matches('0');
        if without_trailing.is_empty() {
            return Some(Self::zero());
        }
        let shift = i64::try_from(trimmed.len() - without_trailing.len()).ok()?;
        Some(Self { negative, digits: without_trailing.to_string(), exp: exp.checked_add(shift)? })
    }

    pub fn is_integer(&self) -> bool { self.exp >= 0 }

    /// Convert to a JSON number, preferring the exact integer form.
    ///
    /// Integers must fit into `i64`; fractional values go through `f64` and
    /// fail when they overflow to infinity or underflow to zero.
    pub fn to_json_number(&self, path: &str) -> Result<Number> {
        if self.is_zero() { return Ok(Number::from(0i64)); }
        let overflow = || Error::NumberOverflow { path: path.to_string(), value: self.to_string() };
        if self.is_integer() {
            // i64::MAX has 19 digits
            if self.digits.len() as i128 + self.exp as i128 > 19 { return Err(overflow()); }
            let zeros = usize::try_from(self.exp).map_err(|_| overflow())?;
            let text = format!("{}{}", self.digits, "0".repeat(zeros));
            let magnitude: i128 = text.parse().map_err(|_| overflow())?;
            let signed = if self.negative { -magnitude } else { magnitude };
            return i64::try_from(signed).map(Number::from).map_err(|_| overflow());
        }
        let f = self.to_f64();
        if f.is_infinite() { return Err(overflow()); }
        if f == 0.0 {
            return Err(Error::NumberUnderflow { path: path.to_string(), value: self.to_string() });
        }
        Number::from_f64(f).ok_or_else(overflow)
    }

    pub fn to_f64(&self) -> f64 {
        if self.is_zero() { return 0.0; }
        let sign = if self.negative { "-" } else { "" };
        format!("{sign}{}e{}", self.digits, self.exp).parse().unwrap_or(f64::NAN)
    }
}

impl fmt::Display for BigNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() { return f.write_str("0"); }
        if self.negative { f.write_str("-")?; }
        let len = self.digits.len() as i128;
        let exp = self.exp as i128;
        // position of the decimal point counted from the first digit
        let point = len + exp;
        if exp >= 0 && point <= 40 {
            write!(f, "{}{}", self.digits, "0".repeat(exp as usize))
        } else if exp < 0 && point > 0 {
            let (a, b) = self.digits.split_at(point as usize);
            write!(f, "{a}.{b}")
        } else if point <= 0 && point > -20 {
            write!(f, "0.{}{}", "0".repeat((-point) as usize), self.digits)
        } else {
            let (head, tail) = self.digits.split_at(1);
            if tail.is_empty() { write!(f, "{head}e{}", point - 1) } else { write!(f, "{head}.{tail}e{}", point - 1) }
        }
    }
}

impl FromStr for BigNumber {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self> { Self::parse(s) }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> BigNumber { BigNumber::parse(s).unwrap() }

    #[test]
    fn parse_is_canonical() {
        assert_eq!(n("1.50"), n("15e-1"));
        assert_eq!(n("0100"), n("1e2"));
        assert_eq!(n("-0.0"), BigNumber::zero());
        assert_eq!(n("3").to_string(), "3");
        assert_eq!(n("-12.5").to_string(), "-12.5");
        assert_eq!(n("0.001").to_string(), "0.001");
        assert_eq!(n("1e100").to_string(), "1e100");
        for bad in ["", "-", "1.2.3", "abc", "1e", "1e+x"] {
            assert!(BigNumber::parse(bad).is_err(), "{bad}");
        }
    }

    #[test]
    fn integers_stay_exact() {
        assert_eq!(n("9223372036854775807").to_json_number("a").unwrap().as_i64(), Some(i64::MAX));
        assert_eq!(n("-9223372036854775808").to_json_number("a").unwrap().as_i64(), Some(i64::MIN));
        assert_eq!(BigNumber::from_i64(-42).to_json_number("a").unwrap().as_i64(), Some(-42));
    }

    #[test]
    fn out_of_range_numbers_error() {
        assert!(matches!(n("9223372036854775808").to_json_number("a"), Err(Error::NumberOverflow { .. })));
        assert!(matches!(n("1e400").to_json_number("a"), Err(Error::NumberOverflow { .. })));
        assert!(matches!(n("1.5e400").to_json_number("a"), Err(Error::NumberOverflow { .. })));
        let err = n("1e-400").to_json_number("spec.size").unwrap_err();
        assert!(matches!(err, Error::NumberUnderflow { ref path, .. } if path == "spec.size"));
    }

    #[test]
    fn extreme_exponents_error_instead_of_wrapping() {
        assert!(matches!(BigNumber::parse("1.5e-9223372036854775808"), Err(Error::NumberUnderflow { .. })));
        assert!(matches!(BigNumber::parse("1e-99999999999999999999"), Err(Error::NumberUnderflow { .. })));
        assert!(matches!(BigNumber::parse("1e99999999999999999999"), Err(Error::NumberOverflow { .. })));
        assert!(matches!(BigNumber::parse("10e9223372036854775807"), Err(Error::NumberOverflow { .. })));

        let big = n("12e9223372036854775807");
        assert!(matches!(big.to_json_number("size"), Err(Error::NumberOverflow { ref path, .. }) if path == "size"));
        assert_eq!(big.to_string(), "1.2e9223372036854775808");
        let tiny = n("1.5e-9223372036854775807");
        assert!(matches!(tiny.to_json_number("size"), Err(Error::NumberUnderflow { .. })));
        assert_eq!(tiny.to_string(), "1.5e-9223372036854775807");
    }

    #[test]
    fn floats_convert_through_f64() {
        let x = BigNumber::from_f64(0.25).unwrap();
        assert_eq!(x.to_string(), "0.25");
        assert_eq!(x.to_json_number("a").unwrap().as_f64(), Some(0.25));
        assert!(BigNumber::from_f64(f64::INFINITY).is_none());
        let from_json = BigNumber::from_json_number(&serde_json::Number::from_f64(2.0).unwrap()).unwrap();
        assert_eq!(from_json, BigNumber::from_i64(2));
    }
}
