//! Money Conversion Module
//!
//! Conversion between provider-native decimal strings and the arbitrary
//! precision integer amounts stored on canonical entities. Every fetch and
//! webhook translate function goes through this module.
//!
//! ## Internal Representation
//! - Amounts are `BigInt` in the smallest unit of the asset
//! - The scale factor is `10^precision` (e.g. 10^2 for EUR = cents)
//! - The precision travels with the amount in the asset tag `"EUR/2"`
//!
//! ## Usage
//! ```rust
//! use psp_bridge::money::{format_amount, parse_amount};
//!
//! let cents = parse_amount("1.50", 2).unwrap();
//! assert_eq!(cents, 150.into());
//! assert_eq!(format_amount(&cents, 2), "1.5");
//! ```

mod currency;

pub use currency::{CurrencyTable, format_asset, is_valid_asset, parse_asset};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, Zero};
use rust_decimal::Decimal;
use rust_decimal::prelude::FromPrimitive;
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MoneyError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Invalid asset: {0}")]
    InvalidAsset(String),

    /// The currency code parses fine but is absent from the supported table.
    #[error("Currency not supported: {0}")]
    CurrencyNotSupported(String),
}

// ============================================================================
// Parse: Provider → Internal (String → BigInt)
// ============================================================================

/// Convert a provider decimal string to an integer in the smallest unit.
///
/// The fractional part is truncated to `precision` digits, never rounded:
/// `parse_amount("1.239", 2) == 123`.
///
/// # Errors
/// * `InvalidFormat` - empty input, more than one decimal point, or a
///   non-digit character
pub fn parse_amount(amount_str: &str, precision: u32) -> Result<BigInt, MoneyError> {
    let amount_str = amount_str.trim();
    let (negative, unsigned) = match amount_str.as_bytes().first() {
        Some(b'-') => (true, &amount_str[1..]),
        Some(b'+') => (false, &amount_str[1..]),
        _ => (false, amount_str),
    };

    if unsigned.is_empty() {
        return Err(MoneyError::InvalidFormat("empty string".into()));
    }

    let mut parts = unsigned.split('.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next().unwrap_or_default();
    if parts.next().is_some() {
        return Err(MoneyError::InvalidFormat("multiple decimal points".into()));
    }
    if whole.is_empty() && frac.is_empty() {
        return Err(MoneyError::InvalidFormat("no digits".into()));
    }
    if !whole.bytes().all(|b| b.is_ascii_digit()) || !frac.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MoneyError::InvalidFormat(format!(
            "non-numeric amount: {}",
            amount_str
        )));
    }

    let width = precision as usize;
    let truncated = &frac[..frac.len().min(width)];
    let digits = format!("{}{:0<width$}", whole, truncated, width = width);
    let digits = digits.trim_start_matches('0');
    let digits = if digits.is_empty() { "0" } else { digits };

    let magnitude = BigInt::parse_bytes(digits.as_bytes(), 10)
        .ok_or_else(|| MoneyError::InvalidFormat(format!("non-numeric amount: {}", amount_str)))?;

    Ok(if negative { -magnitude } else { magnitude })
}

/// Convert a provider float (some APIs send JSON numbers) to an integer
/// amount without going through binary floating point formatting.
pub fn parse_f64_amount(value: f64, precision: u32) -> Result<BigInt, MoneyError> {
    let decimal = Decimal::from_f64(value)
        .ok_or_else(|| MoneyError::InvalidFormat(format!("not a finite amount: {}", value)))?;
    parse_decimal(decimal, precision)
}

pub fn parse_decimal(decimal: Decimal, precision: u32) -> Result<BigInt, MoneyError> {
    parse_amount(&decimal.normalize().to_string(), precision)
}

// ============================================================================
// Format: Internal → Display (BigInt → String)
// ============================================================================

/// Inverse of [`parse_amount`] with trailing fractional zeros stripped.
///
/// `format_amount(&150.into(), 2) == "1.5"` and `format_amount(&100.into(), 2) == "1"`.
pub fn format_amount(amount: &BigInt, precision: u32) -> String {
    let scale = BigInt::from(10u32).pow(precision);
    let (whole, frac) = amount.abs().div_rem(&scale);
    let sign = if amount.is_negative() { "-" } else { "" };

    if precision == 0 || frac.is_zero() {
        return format!("{}{}", sign, whole);
    }

    let frac = format!("{:0>width$}", frac.to_string(), width = precision as usize);
    format!("{}{}.{}", sign, whole, frac.trim_end_matches('0'))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn big(n: i64) -> BigInt {
        BigInt::from(n)
    }

    #[test]
    fn qa_parse_amount_variations() {
        assert_eq!(parse_amount("1.50", 2).unwrap(), big(150));
        assert_eq!(parse_amount("100", 2).unwrap(), big(10000));
        assert_eq!(parse_amount("0.01", 2).unwrap(), big(1));
        assert_eq!(parse_amount("0007.5", 2).unwrap(), big(750));
        assert_eq!(parse_amount("42", 0).unwrap(), big(42));
        assert_eq!(parse_amount(" 3.1 ", 3).unwrap(), big(3100));
        assert_eq!(parse_amount(".5", 2).unwrap(), big(50));
        assert_eq!(parse_amount("5.", 2).unwrap(), big(500));
    }

    #[test]
    fn qa_parse_amount_truncates() {
        assert_eq!(parse_amount("1.239", 2).unwrap(), big(123));
        assert_eq!(parse_amount("1.999", 0).unwrap(), big(1));
        assert_eq!(parse_amount("0.009", 2).unwrap(), big(0));
    }

    #[test]
    fn qa_parse_amount_signed() {
        assert_eq!(parse_amount("-12.34", 2).unwrap(), big(-1234));
        assert_eq!(parse_amount("+12.34", 2).unwrap(), big(1234));
    }

    #[test]
    fn qa_parse_amount_invalid_formats() {
        for bad in ["", "-", "abc", "1.2.3", "1,5", "1e5", ".", "12a.5"] {
            assert!(
                matches!(parse_amount(bad, 2), Err(MoneyError::InvalidFormat(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn qa_parse_amount_beyond_u64() {
        let amount = parse_amount("123456789012345678901234567890.12", 2).unwrap();
        assert_eq!(amount.to_string(), "12345678901234567890123456789012");
        assert_eq!(format_amount(&amount, 2), "123456789012345678901234567890.12");
    }

    #[test]
    fn qa_format_amount() {
        assert_eq!(format_amount(&big(150), 2), "1.5");
        assert_eq!(format_amount(&big(100), 2), "1");
        assert_eq!(format_amount(&big(1), 2), "0.01");
        assert_eq!(format_amount(&big(0), 2), "0");
        assert_eq!(format_amount(&big(-1234), 2), "-12.34");
        assert_eq!(format_amount(&big(-5), 2), "-0.05");
        assert_eq!(format_amount(&big(7), 0), "7");
    }

    #[test]
    fn qa_roundtrip_consistency() {
        for (input, precision, expected) in [
            ("1.50", 2, "1.5"),
            ("0.00000001", 8, "0.00000001"),
            ("10.10", 3, "10.1"),
            ("999", 2, "999"),
        ] {
            let parsed = parse_amount(input, precision).unwrap();
            assert_eq!(format_amount(&parsed, precision), expected);
        }
    }

    #[test]
    fn qa_parse_f64_amount() {
        assert_eq!(parse_f64_amount(12.3, 2).unwrap(), big(1230));
        assert_eq!(parse_f64_amount(-0.1, 2).unwrap(), big(-10));
        assert!(parse_f64_amount(f64::NAN, 2).is_err());
    }
}
