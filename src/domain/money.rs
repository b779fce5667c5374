use crate::error::CoreError;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest amount the gateway accepts for a single push, in KES.
pub const MIN_PUSH_AMOUNT: u32 = 1;
/// Largest amount the gateway accepts for a single push, in KES.
pub const MAX_PUSH_AMOUNT: u32 = 70_000;

/// A strictly positive monetary amount in KES.
///
/// Wraps `rust_decimal::Decimal` so prices and payment amounts can never be
/// zero or negative once constructed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, CoreError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(CoreError::validation("amount", "Amount must be positive"))
        }
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Rounds to whole shillings and checks the gateway's per-push bounds.
    pub fn to_push_units(&self) -> Result<u32, CoreError> {
        let rounded = self
            .0
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero);
        match rounded.to_u32() {
            Some(units) if (MIN_PUSH_AMOUNT..=MAX_PUSH_AMOUNT).contains(&units) => Ok(units),
            _ => Err(CoreError::validation(
                "amount",
                format!("Amount must be between KES {MIN_PUSH_AMOUNT} and KES {MAX_PUSH_AMOUNT}"),
            )),
        }
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = CoreError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KES {:.2}", self.0)
    }
}

/// A payer phone number normalised to the gateway's `254XXXXXXXXX` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct PhoneNumber(String);

impl PhoneNumber {
    /// Accepts local (`07..`), international (`+254..`) or bare forms and keeps
    /// the last nine digits behind the `254` country code.
    pub fn parse(raw: &str) -> Result<Self, CoreError> {
        let digits: String = raw
            .chars()
            .filter(|c| !c.is_whitespace() && *c != '-' && *c != '+')
            .collect();
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
            return Err(CoreError::validation(
                "phone_number",
                "Phone number must contain digits only",
            ));
        }
        if digits.len() < 9 || digits.len() > 12 {
            return Err(CoreError::validation(
                "phone_number",
                "Phone number must have between 9 and 12 digits",
            ));
        }
        let subscriber = &digits[digits.len() - 9..];
        Ok(Self(format!("254{subscriber}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for PhoneNumber {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<PhoneNumber> for String {
    fn from(phone: PhoneNumber) -> Self {
        phone.0
    }
}

impl fmt::Display for PhoneNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_amount_validation() {
        assert!(Amount::new(dec!(1.0)).is_ok());
        assert!(matches!(
            Amount::new(dec!(0.0)),
            Err(CoreError::Validation { .. })
        ));
        assert!(matches!(
            Amount::new(dec!(-1.0)),
            Err(CoreError::Validation { .. })
        ));
    }

    #[test]
    fn test_push_units_rounding_and_bounds() {
        assert_eq!(Amount::new(dec!(500)).unwrap().to_push_units().unwrap(), 500);
        assert_eq!(Amount::new(dec!(99.5)).unwrap().to_push_units().unwrap(), 100);
        assert!(Amount::new(dec!(0.4)).unwrap().to_push_units().is_err());
        assert!(Amount::new(dec!(70000.6)).unwrap().to_push_units().is_err());
    }

    #[test]
    fn test_amount_rejects_negative_json() {
        let result: Result<Amount, _> = serde_json::from_str("-5");
        assert!(result.is_err());
    }

    #[test]
    fn test_phone_normalisation() {
        assert_eq!(PhoneNumber::parse("0712345678").unwrap().as_str(), "254712345678");
        assert_eq!(PhoneNumber::parse("+254 712 345 678").unwrap().as_str(), "254712345678");
        assert_eq!(PhoneNumber::parse("254712345678").unwrap().as_str(), "254712345678");
        assert!(PhoneNumber::parse("07123abc78").is_err());
        assert!(PhoneNumber::parse("12345").is_err());
    }
}
