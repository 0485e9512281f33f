//! Supported currencies and the `"CODE/precision"` asset convention.

use std::collections::HashMap;

use num_bigint::BigInt;

use super::{MoneyError, parse_amount};

/// ISO 4217 codes with their minor-unit exponent.
const ISO4217: &[(&str, u32)] = &[
    ("AED", 2), ("ARS", 2), ("AUD", 2), ("BGN", 2), ("BHD", 3), ("BRL", 2),
    ("CAD", 2), ("CHF", 2), ("CLP", 0), ("CNY", 2), ("COP", 2), ("CZK", 2),
    ("DKK", 2), ("EGP", 2), ("EUR", 2), ("GBP", 2), ("HKD", 2), ("HUF", 2),
    ("IDR", 2), ("ILS", 2), ("INR", 2), ("ISK", 0), ("JOD", 3), ("JPY", 0),
    ("KES", 2), ("KRW", 0), ("KWD", 3), ("MAD", 2), ("MXN", 2), ("MYR", 2),
    ("NGN", 2), ("NOK", 2), ("NZD", 2), ("OMR", 3), ("PEN", 2), ("PHP", 2),
    ("PKR", 2), ("PLN", 2), ("QAR", 2), ("RON", 2), ("RSD", 2), ("SAR", 2),
    ("SEK", 2), ("SGD", 2), ("THB", 2), ("TND", 3), ("TRY", 2), ("TWD", 2),
    ("UAH", 2), ("UGX", 0), ("USD", 2), ("VND", 0), ("XAF", 0), ("XOF", 0),
    ("ZAR", 2),
];

pub fn format_asset(code: &str, precision: u32) -> String {
    format!("{}/{}", code, precision)
}

/// Split an asset tag into its code and precision.
pub fn parse_asset(asset: &str) -> Result<(String, u32), MoneyError> {
    let (code, precision) = asset
        .split_once('/')
        .ok_or_else(|| MoneyError::InvalidAsset(asset.to_string()))?;
    if code.is_empty() || !code.bytes().all(|b| b.is_ascii_alphanumeric()) {
        return Err(MoneyError::InvalidAsset(asset.to_string()));
    }
    let precision = precision
        .parse::<u32>()
        .map_err(|_| MoneyError::InvalidAsset(asset.to_string()))?;
    Ok((code.to_string(), precision))
}

pub fn is_valid_asset(asset: &str) -> bool {
    parse_asset(asset).is_ok()
}

/// Currency code → precision lookup used by translate functions.
///
/// Connectors start from [`CurrencyTable::iso4217`] and either restrict it
/// to what the provider supports or extend it with provider codes.
#[derive(Debug, Clone, Default)]
pub struct CurrencyTable {
    precisions: HashMap<String, u32>,
}

impl CurrencyTable {
    pub fn iso4217() -> Self {
        Self {
            precisions: ISO4217
                .iter()
                .map(|(code, precision)| (code.to_string(), *precision))
                .collect(),
        }
    }

    /// Keep only the listed codes. Codes absent from `self` are ignored.
    pub fn subset(&self, codes: &[&str]) -> Self {
        Self {
            precisions: codes
                .iter()
                .filter_map(|code| {
                    self.precisions
                        .get(*code)
                        .map(|precision| (code.to_string(), *precision))
                })
                .collect(),
        }
    }

    pub fn with(mut self, code: &str, precision: u32) -> Self {
        self.precisions.insert(code.to_uppercase(), precision);
        self
    }

    pub fn precision(&self, code: &str) -> Result<u32, MoneyError> {
        self.precisions
            .get(&code.to_uppercase())
            .copied()
            .ok_or_else(|| MoneyError::CurrencyNotSupported(code.to_string()))
    }

    pub fn format_asset(&self, code: &str) -> Result<String, MoneyError> {
        let precision = self.precision(code)?;
        Ok(format_asset(&code.to_uppercase(), precision))
    }

    /// Parse `amount` at the precision of `code`, returning the amount and
    /// its asset tag.
    pub fn parse_amount(&self, amount: &str, code: &str) -> Result<(BigInt, String), MoneyError> {
        let precision = self.precision(code)?;
        let value = parse_amount(amount, precision)?;
        Ok((value, format_asset(&code.to_uppercase(), precision)))
    }

    pub fn len(&self) -> usize {
        self.precisions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.precisions.is_empty()
    }
}
