//! Fixed-point decimal measures (sizes, weights, areas).
//!
//! Handbook keys compare measures for equality, so they are stored as an exact
//! count of hundredths instead of floating point.

use core::fmt;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// A non-negative decimal with two fractional digits, stored as hundredths.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Measure(i64);

impl Measure {
    pub const SCALE: i64 = 100;

    pub fn from_hundredths(hundredths: i64) -> Result<Self, DomainError> {
        if hundredths < 0 {
            return Err(DomainError::invalid_measure(format!(
                "measure must not be negative, got {hundredths} hundredths"
            )));
        }
        Ok(Self(hundredths))
    }

    /// Whole units, e.g. `Measure::whole(30)` is `30.00`.
    pub fn whole(units: u32) -> Self {
        Self(i64::from(units) * Self::SCALE)
    }

    pub fn hundredths(&self) -> i64 {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == 0
    }
}

impl FromStr for Measure {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let raw = s.trim();
        let (int_part, frac_part) = match raw.split_once(['.', ',']) {
            Some((i, f)) => (i, f),
            None => (raw, ""),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_measure(format!("not a decimal: {raw:?}")));
        }
        if frac_part.len() > 2 || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(DomainError::invalid_measure(format!(
                "at most two fractional digits allowed: {raw:?}"
            )));
        }

        let units: i64 = int_part
            .parse()
            .map_err(|e| DomainError::invalid_measure(format!("{raw:?}: {e}")))?;
        let fraction = match frac_part.len() {
            0 => 0,
            1 => i64::from(frac_part.as_bytes()[0] - b'0') * 10,
            _ => frac_part
                .parse::<i64>()
                .map_err(|e| DomainError::invalid_measure(format!("{raw:?}: {e}")))?,
        };

        units
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(fraction))
            .map(Self)
            .ok_or_else(|| DomainError::invalid_measure(format!("out of range: {raw:?}")))
    }
}

impl fmt::Display for Measure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / Self::SCALE, self.0 % Self::SCALE)
    }
}

impl TryFrom<String> for Measure {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Measure> for String {
    fn from(value: Measure) -> Self {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_integer_and_fractional_forms() {
        assert_eq!("30".parse::<Measure>().unwrap().hundredths(), 3000);
        assert_eq!("30.5".parse::<Measure>().unwrap().hundredths(), 3050);
        assert_eq!("1,44".parse::<Measure>().unwrap().hundredths(), 144);
        assert_eq!("0.07".parse::<Measure>().unwrap().hundredths(), 7);
    }

    #[test]
    fn rejects_garbage_and_excess_precision() {
        assert!("".parse::<Measure>().is_err());
        assert!("-1".parse::<Measure>().is_err());
        assert!("1.234".parse::<Measure>().is_err());
        assert!("1.2x".parse::<Measure>().is_err());
        assert!(".5".parse::<Measure>().is_err());
    }

    #[test]
    fn displays_two_fraction_digits() {
        assert_eq!(Measure::whole(60).to_string(), "60.00");
        assert_eq!(Measure::from_hundredths(105).unwrap().to_string(), "1.05");
    }

    #[test]
    fn serializes_as_decimal_string() {
        let m: Measure = "22.4".parse().unwrap();
        let json = serde_json::to_string(&m).unwrap();
        assert_eq!(json, "\"22.40\"");
        let back: Measure = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
