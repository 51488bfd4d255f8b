//! # Money Module
//!
//! Integer money, ISO currency codes and exchange rates used when prices
//! leave the store for the remote catalog.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Catalog prices arrive as decimal text ("19.9900") and leave as        │
//! │  decimal text ("19.99 USD"). In between they are integer cents.        │
//! │                                                                         │
//! │    "19.9900"  ──parse──►  1999  ──convert(rate)──►  1843               │
//! │                                        │                                │
//! │                                        ▼                                │
//! │                               "18.43 EUR" (to_feed_string)              │
//! │                                                                         │
//! │  No f64 ever touches a price, so "9.99 USD" is always "9.99 USD".      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ValidationError;

// =============================================================================
// Decimal Parsing
// =============================================================================

/// Parses decimal text into an integer scaled by `10^scale`.
///
/// Digits beyond `scale` are rounded half away from zero, so
/// `parse_scaled("15.0050", 2)` is `1501`.
///
/// ## Example
/// ```rust
/// use shopfeed_core::money::parse_scaled;
///
/// assert_eq!(parse_scaled("19.99", 2).unwrap(), 1999);
/// assert_eq!(parse_scaled("1.085", 6).unwrap(), 1_085_000);
/// assert!(parse_scaled("abc", 2).is_err());
/// ```
pub fn parse_scaled(input: &str, scale: u32) -> Result<i64, ValidationError> {
    let text = input.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };

    let (whole, fraction) = match digits.split_once('.') {
        Some((w, f)) => (w, f),
        None => (digits, ""),
    };

    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if whole.is_empty() || !all_digits(whole) || !all_digits(fraction) {
        return Err(ValidationError::invalid_format(
            "decimal",
            format!("'{}' is not a decimal number", input),
        ));
    }

    let overflow = || ValidationError::invalid_format("decimal", format!("'{}' is too large", input));

    let factor = 10i64.checked_pow(scale).ok_or_else(overflow)?;
    let mut value = whole
        .parse::<i64>()
        .map_err(|_| overflow())?
        .checked_mul(factor)
        .ok_or_else(overflow)?;

    let mut place = factor;
    let mut round_up = false;
    for (i, c) in fraction.chars().enumerate() {
        let digit = (c as u8 - b'0') as i64;
        if (i as u32) < scale {
            place /= 10;
            value += digit * place;
        } else {
            round_up = digit >= 5;
            break;
        }
    }
    if round_up {
        value = value.checked_add(1).ok_or_else(overflow)?;
    }

    Ok(if negative { -value } else { value })
}

/// Formats a hundredths value without trailing zeros ("15", "15.5", "15.25").
pub fn format_hundredths(value: i64) -> String {
    let sign = if value < 0 { "-" } else { "" };
    let abs = value.abs();
    match abs % 100 {
        0 => format!("{}{}", sign, abs / 100),
        rem if rem % 10 == 0 => format!("{}{}.{}", sign, abs / 100, rem / 10),
        rem => format!("{}{}.{:02}", sign, abs / 100, rem),
    }
}

// =============================================================================
// Currency Code
// =============================================================================

/// A validated ISO 4217 alphabetic currency code ("USD", "EUR").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CurrencyCode(String);

impl CurrencyCode {
    /// Parses a currency code. Lower-case input is accepted and normalized.
    pub fn parse(code: &str) -> Result<Self, ValidationError> {
        let code = code.trim();
        if code.len() != 3 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(ValidationError::invalid_format(
                "currency",
                format!("'{}' is not a 3-letter ISO code", code),
            ));
        }
        Ok(CurrencyCode(code.to_ascii_uppercase()))
    }

    /// Returns the code as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for CurrencyCode {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        CurrencyCode::parse(&value)
    }
}

impl From<CurrencyCode> for String {
    fn from(code: CurrencyCode) -> Self {
        code.0
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// Exchange Rate
// =============================================================================

/// Base-to-store currency rate in millionths (1.085 = 1_085_000).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExchangeRate(i64);

impl ExchangeRate {
    const SCALE: u32 = 6;
    const ONE: i64 = 1_000_000;

    /// A 1:1 rate, used when store and base currency are the same.
    pub const fn identity() -> Self {
        ExchangeRate(Self::ONE)
    }

    /// Creates a rate from millionths.
    pub const fn from_micros(micros: i64) -> Self {
        ExchangeRate(micros)
    }

    /// Parses a decimal rate ("1.0850").
    pub fn parse(rate: &str) -> Result<Self, ValidationError> {
        Ok(ExchangeRate(parse_scaled(rate, Self::SCALE)?))
    }

    /// Returns the rate in millionths.
    pub const fn micros(&self) -> i64 {
        self.0
    }

    /// Returns true if the rate can be used for conversion.
    pub const fn is_usable(&self) -> bool {
        self.0 > 0
    }
}

impl Default for ExchangeRate {
    fn default() -> Self {
        ExchangeRate::identity()
    }
}

// =============================================================================
// Money Type
// =============================================================================

/// A monetary value in the smallest currency unit (cents).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Creates a Money value from cents.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Parses decimal text from the catalog ("19.9900") into cents.
    ///
    /// ## Example
    /// ```rust
    /// use shopfeed_core::money::Money;
    ///
    /// assert_eq!(Money::parse("19.9900").unwrap().cents(), 1999);
    /// assert_eq!(Money::parse("0.005").unwrap().cents(), 1);
    /// ```
    pub fn parse(amount: &str) -> Result<Self, ValidationError> {
        Ok(Money(parse_scaled(amount, 2)?))
    }

    /// Returns the value in cents.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Returns zero money value.
    #[inline]
    pub const fn zero() -> Self {
        Money(0)
    }

    /// Converts into another currency, rounding half away from zero.
    ///
    /// Fails when the converted amount does not fit in cents.
    ///
    /// ## Example
    /// ```rust
    /// use shopfeed_core::money::{ExchangeRate, Money};
    ///
    /// let price = Money::from_cents(1000);
    /// let rate = ExchangeRate::parse("0.9215").unwrap();
    /// assert_eq!(price.convert(rate).unwrap().cents(), 922);
    /// ```
    pub fn convert(&self, rate: ExchangeRate) -> Result<Money, ValidationError> {
        Self::div_round(self.0 as i128 * rate.micros() as i128, ExchangeRate::ONE as i128)
            .map(Money)
            .ok_or_else(|| {
                ValidationError::invalid_format("price", format!("{} overflows after conversion", self))
            })
    }

    /// Divides the price by a quantity expressed in thousandths.
    ///
    /// Returns `None` for a zero or negative quantity, or when the result
    /// does not fit in cents.
    pub fn per_unit(&self, quantity_milli: i64) -> Option<Money> {
        if quantity_milli <= 0 {
            return None;
        }
        Self::div_round(self.0 as i128 * 1000, quantity_milli as i128).map(Money)
    }

    /// Formats as remote catalog price text: `"9.99 USD"`.
    pub fn to_feed_string(&self, currency: &CurrencyCode) -> String {
        format!("{} {}", self, currency)
    }

    fn div_round(numerator: i128, denominator: i128) -> Option<i64> {
        let half = denominator / 2;
        let rounded = if numerator >= 0 {
            (numerator + half) / denominator
        } else {
            (numerator - half) / denominator
        };
        i64::try_from(rounded).ok()
    }
}

/// Plain two-decimal text without a currency symbol ("9.99", "-5.50").
impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

impl Default for Money {
    fn default() -> Self {
        Money::zero()
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_scaled() {
        assert_eq!(parse_scaled("19.9900", 2).unwrap(), 1999);
        assert_eq!(parse_scaled("7", 2).unwrap(), 700);
        assert_eq!(parse_scaled("-5.5", 2).unwrap(), -550);
        assert_eq!(parse_scaled("15.005", 2).unwrap(), 1501);
        assert_eq!(parse_scaled("15.004", 2).unwrap(), 1500);
        assert_eq!(parse_scaled(" 0.5 ", 3).unwrap(), 500);
    }

    #[test]
    fn test_parse_scaled_rejects_garbage() {
        assert!(parse_scaled("", 2).is_err());
        assert!(parse_scaled(".5", 2).is_err());
        assert!(parse_scaled("1,5", 2).is_err());
        assert!(parse_scaled("1.2.3", 2).is_err());
        assert!(parse_scaled("99999999999999999999", 2).is_err());
    }

    #[test]
    fn test_format_hundredths() {
        assert_eq!(format_hundredths(1500), "15");
        assert_eq!(format_hundredths(1550), "15.5");
        assert_eq!(format_hundredths(1525), "15.25");
        assert_eq!(format_hundredths(5), "0.05");
    }

    #[test]
    fn test_currency_code() {
        assert_eq!(CurrencyCode::parse("usd").unwrap().as_str(), "USD");
        assert!(CurrencyCode::parse("US").is_err());
        assert!(CurrencyCode::parse("US1").is_err());
        assert!(CurrencyCode::parse("").is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::from_cents(999).to_string(), "9.99");
        assert_eq!(Money::from_cents(500).to_string(), "5.00");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(0).to_string(), "0.00");
    }

    #[test]
    fn test_feed_string() {
        let usd = CurrencyCode::parse("USD").unwrap();
        assert_eq!(Money::from_cents(999).to_feed_string(&usd), "9.99 USD");
    }

    #[test]
    fn test_convert() {
        let price = Money::from_cents(1999);
        assert_eq!(price.convert(ExchangeRate::identity()).unwrap(), price);
        assert_eq!(
            price.convert(ExchangeRate::parse("1.5").unwrap()).unwrap().cents(),
            2999 // 2998.5 rounds away from zero
        );
    }

    #[test]
    fn test_convert_overflow_is_an_error() {
        let huge = Money::from_cents(i64::MAX / 2);
        let rate = ExchangeRate::parse("3").unwrap();
        assert!(matches!(
            huge.convert(rate),
            Err(ValidationError::InvalidFormat { .. })
        ));
    }

    #[test]
    fn test_per_unit() {
        // 5.00 for 0.5 kg = 10.00 per kg
        let price = Money::from_cents(500);
        assert_eq!(price.per_unit(500).unwrap().cents(), 1000);
        assert!(price.per_unit(0).is_none());
        assert!(price.per_unit(-1).is_none());
    }
}
