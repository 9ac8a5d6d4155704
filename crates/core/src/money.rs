use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Amount in the receipt's currency, held as a decimal rounded to 2 places.
///
/// Yen receipts carry no fraction, but the type stays decimal so totals from
/// other currencies (or OCR output with a stray fraction) never round silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(Decimal);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Invalid amount: '{0}'")]
pub struct ParseMoneyError(pub String);

impl Money {
    /// Minor units are hundredths: `from_minor_units(120000)` is `1200`.
    pub fn from_minor_units(minor: i64) -> Self {
        Money(Decimal::new(minor, 2))
    }

    pub fn from_decimal(decimal: Decimal) -> Self {
        Money(decimal.round_dp(2))
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn is_zero(self) -> bool {
        self.0.is_zero()
    }

    pub fn is_negative(self) -> bool {
        self.0.is_sign_negative() && !self.0.is_zero()
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.normalize())
    }
}

impl FromStr for Money {
    type Err = ParseMoneyError;

    /// Accepts plain decimals with optional `,` thousands separators.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let clean = s.trim().replace(',', "");
        Decimal::from_str(&clean)
            .map(Money::from_decimal)
            .map_err(|_| ParseMoneyError(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minor_units_are_hundredths() {
        let m = Money::from_minor_units(120_000);
        assert_eq!(m, Money::from_decimal(Decimal::from(1200)));
    }

    #[test]
    fn display_drops_trailing_zeros() {
        assert_eq!(Money::from_decimal(Decimal::from(1200)).to_string(), "1200");
        assert_eq!(Money::from_minor_units(1250).to_string(), "12.5");
        assert_eq!(Money::zero().to_string(), "0");
    }

    #[test]
    fn parse_with_thousands_separator() {
        assert_eq!("1,200".parse::<Money>().unwrap(), Money::from_minor_units(120_000));
        assert_eq!("0.99".parse::<Money>().unwrap(), Money::from_minor_units(99));
        assert!("12a".parse::<Money>().is_err());
    }

    #[test]
    fn from_decimal_rounds_to_cents() {
        let m = Money::from_decimal(Decimal::from_str("1.005").unwrap());
        assert_eq!(m, Money::from_minor_units(100));
    }

    #[test]
    fn negativity() {
        assert!(Money::from_minor_units(-1).is_negative());
        assert!(!Money::zero().is_negative());
        assert!(!Money::from_minor_units(1).is_negative());
    }
}
