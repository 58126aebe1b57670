//! Value objects: equality by value, not identity.
//!
//! Value objects are domain objects that have **no identity** - they are defined entirely
//! by their attribute values. Two value objects with the same values are considered equal.

use core::fmt;
use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Total number of digits a monetary amount may carry (units + cents).
pub const MONEY_MAX_DIGITS: u32 = 10;

/// Number of fractional digits a monetary amount carries.
pub const MONEY_DECIMAL_PLACES: u32 = 2;

/// Smallest magnitude that no longer fits: `10^(MONEY_MAX_DIGITS - MONEY_DECIMAL_PLACES)`.
const MONEY_LIMIT: Decimal = Decimal::from_parts(100_000_000, 0, 0, false, 0);

/// Fixed-point monetary amount with two decimal places (`NUMERIC(10, 2)`).
///
/// Always held at scale 2, so it prints as `"1250.00"`. On the wire it is a
/// decimal string; numbers are also accepted when deserializing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Money(Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::from_parts(0, 0, 0, false, MONEY_DECIMAL_PLACES));

    /// Validate `amount` against the column's precision and scale.
    pub fn new(amount: Decimal) -> DomainResult<Self> {
        if amount.scale() > MONEY_DECIMAL_PLACES {
            return Err(DomainError::validation(
                "debt",
                format!("must have at most {MONEY_DECIMAL_PLACES} decimal places"),
            ));
        }
        if amount.abs() >= MONEY_LIMIT {
            return Err(DomainError::validation(
                "debt",
                format!("must have at most {MONEY_MAX_DIGITS} digits in total"),
            ));
        }
        let mut amount = amount;
        amount.rescale(MONEY_DECIMAL_PLACES);
        Ok(Self(amount))
    }

    pub fn from_cents(cents: i64) -> DomainResult<Self> {
        Self::new(Decimal::new(cents, MONEY_DECIMAL_PLACES))
    }

    pub fn amount(&self) -> Decimal {
        self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl FromStr for Money {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let amount = Decimal::from_str(s.trim())
            .map_err(|_| DomainError::validation("debt", "a valid decimal amount is required"))?;
        Money::new(amount)
    }
}

impl TryFrom<Decimal> for Money {
    type Error = DomainError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Money::new(value)
    }
}

impl From<Money> for Decimal {
    fn from(value: Money) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_decimal_strings() {
        assert_eq!("1250".parse::<Money>().unwrap(), Money::from_cents(125_000).unwrap());
        assert_eq!("1250.5".parse::<Money>().unwrap(), Money::from_cents(125_050).unwrap());
        assert_eq!("0.07".parse::<Money>().unwrap(), Money::from_cents(7).unwrap());
        assert_eq!("-3.10".parse::<Money>().unwrap(), Money::from_cents(-310).unwrap());
    }

    #[test]
    fn rejects_excess_precision() {
        let err = "1.005".parse::<Money>().unwrap_err();
        assert_eq!(err, DomainError::validation("debt", "must have at most 2 decimal places"));
    }

    #[test]
    fn rejects_more_than_ten_digits() {
        assert!("99999999.99".parse::<Money>().is_ok());
        assert!("100000000.00".parse::<Money>().is_err());
        assert!("-100000000".parse::<Money>().is_err());
        assert!(Money::from_cents(10_000_000_000).is_err());
    }

    #[test]
    fn rejects_garbage() {
        assert!("".parse::<Money>().is_err());
        assert!("12,50".parse::<Money>().is_err());
        assert!("-".parse::<Money>().is_err());
        assert!("abc".parse::<Money>().is_err());
    }

    #[test]
    fn displays_two_decimal_places() {
        assert_eq!(Money::ZERO.to_string(), "0.00");
        assert!(Money::ZERO.is_zero());
        assert_eq!(Money::from_cents(125_005).unwrap().to_string(), "1250.05");
        assert_eq!("7".parse::<Money>().unwrap().to_string(), "7.00");
        assert_eq!(Money::from_cents(-5).unwrap().to_string(), "-0.05");
    }

    #[test]
    fn deserializes_strings_and_numbers() {
        let from_str: Money = serde_json::from_str("\"12.30\"").unwrap();
        let from_int: Money = serde_json::from_str("12").unwrap();
        assert_eq!(from_str, Money::from_cents(1230).unwrap());
        assert_eq!(from_int, Money::from_cents(1200).unwrap());
        assert!(serde_json::from_str::<Money>("\"12.345\"").is_err());
        assert!(serde_json::from_str::<Money>("\"123456789\"").is_err());
    }

    #[test]
    fn serializes_as_decimal_string() {
        let json = serde_json::to_string(&Money::from_cents(4200).unwrap()).unwrap();
        assert_eq!(json, "\"42.00\"");
        let json = serde_json::to_string(&"3.5".parse::<Money>().unwrap()).unwrap();
        assert_eq!(json, "\"3.50\"");
    }

    #[cfg(test)]
    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        const MAX_CENTS: i64 = 9_999_999_999;

        proptest! {
            /// Property: every in-range amount prints with exactly two decimals
            /// and parses back to itself.
            #[test]
            fn display_is_canonical(cents in -MAX_CENTS..=MAX_CENTS) {
                let money = Money::from_cents(cents).unwrap();
                let text = money.to_string();
                let (_, fraction) = text.split_once('.').unwrap();
                prop_assert_eq!(fraction.len(), 2);
                prop_assert_eq!(text.parse::<Money>().unwrap(), money);
            }

            /// Property: a third decimal place is always rejected.
            #[test]
            fn three_decimals_rejected(units in 0u32..1_000_000, frac in 0u32..1000) {
                let text = format!("{units}.{frac:03}");
                prop_assert!(text.parse::<Money>().is_err());
            }
        }
    }
}
