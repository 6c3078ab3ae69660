//! Exact-decimal amounts
//!
//! Amounts cross every serialization boundary as decimal strings and are
//! held as [`rust_decimal::Decimal`] in memory. Binary floats are never
//! involved: parsing uses `from_str_exact`, so a value that cannot be
//! represented exactly is rejected rather than rounded.

use crate::{Result, TypesError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;

/// A non-negative exact-decimal amount
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Amount(Decimal);

impl Amount {
    /// Create a zero amount
    pub fn zero() -> Self {
        Self(Decimal::ZERO)
    }

    /// Parse a decimal string such as `"700"` or `"0.125"`
    pub fn parse(s: &str) -> Result<Self> {
        let value = Decimal::from_str_exact(s.trim())
            .map_err(|e| TypesError::InvalidAmount(format!("{}: {}", s, e)))?;
        Self::from_decimal(value)
    }

    /// Wrap a decimal, rejecting negative values
    pub fn from_decimal(value: Decimal) -> Result<Self> {
        if value.is_sign_negative() && !value.is_zero() {
            return Err(TypesError::InvalidAmount(format!("negative amount {}", value)));
        }
        Ok(Self(value))
    }

    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Checked addition
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.0
            .checked_add(other.0)
            .map(Self)
            .ok_or(TypesError::AmountOverflow)
    }

    /// Checked subtraction. Returns `None` when the result would be negative.
    pub fn checked_sub(self, other: Self) -> Option<Self> {
        if other.0 > self.0 {
            return None;
        }
        self.0.checked_sub(other.0).map(Self)
    }

    /// Subtraction clamped at zero
    pub fn saturating_sub(self, other: Self) -> Self {
        self.checked_sub(other).unwrap_or_default()
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl TryFrom<String> for Amount {
    type Error = TypesError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<Amount> for String {
    fn from(amount: Amount) -> Self {
        amount.to_string()
    }
}

impl std::str::FromStr for Amount {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Sum for Amount {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        Self(iter.map(|a| a.0).sum())
    }
}

impl<'a> Sum<&'a Amount> for Amount {
    fn sum<I: Iterator<Item = &'a Amount>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_parse_exact() {
        let a = Amount::parse("0.1").unwrap();
        let b = Amount::parse("0.2").unwrap();
        assert_eq!(a.checked_add(b).unwrap(), Amount::parse("0.3").unwrap());
    }

    #[test]
    fn test_rejects_negative_and_garbage() {
        assert!(Amount::parse("-1").is_err());
        assert!(Amount::parse("1e3x").is_err());
        assert!(Amount::parse("").is_err());
        assert!(Amount::from_decimal(dec!(-0.5)).is_err());
    }

    #[test]
    fn test_checked_sub_never_negative() {
        let a = Amount::parse("50").unwrap();
        let b = Amount::parse("100").unwrap();
        assert!(a.checked_sub(b).is_none());
        assert_eq!(b.checked_sub(a).unwrap(), a);
        assert_eq!(a.saturating_sub(b), Amount::zero());
    }

    #[test]
    fn test_display_is_normalized() {
        assert_eq!(Amount::parse("700.00").unwrap().to_string(), "700");
        assert_eq!(Amount::parse("0.1250").unwrap().to_string(), "0.125");
    }

    #[test]
    fn test_serde_as_string() {
        let a = Amount::parse("12.5").unwrap();
        assert_eq!(serde_json::to_string(&a).unwrap(), "\"12.5\"");
        let back: Amount = serde_json::from_str("\"12.50\"").unwrap();
        assert_eq!(back, a);
        // Floats never enter the system
        assert!(serde_json::from_str::<Amount>("12.5").is_err());
    }

    #[test]
    fn test_sum() {
        let total: Amount = ["1", "2.5", "3"]
            .iter()
            .map(|s| Amount::parse(s).unwrap())
            .sum();
        assert_eq!(total, Amount::parse("6.5").unwrap());
    }
}
