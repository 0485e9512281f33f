//! Exchange `executionReport` frames → [`PspOrder`].

use chrono::{DateTime, Utc};
use num_traits::Signed;
use serde::Deserialize;
use serde_json::Value;

use crate::error::{PluginError, PluginResult};
use crate::models::{
    Metadata, OrderDirection, OrderStatus, OrderType, PspOrder, TimeInForce,
};
use crate::money::CurrencyTable;

const EXECUTION_REPORT: &str = "executionReport";

#[derive(Debug, Deserialize)]
struct Envelope {
    #[serde(rename = "e", default)]
    event_type: String,
}

#[derive(Debug, Deserialize)]
struct ExecutionReport {
    #[serde(rename = "s")]
    symbol: String,
    #[serde(rename = "S")]
    side: String,
    #[serde(rename = "o")]
    order_type: String,
    #[serde(rename = "f", default)]
    time_in_force: String,
    #[serde(rename = "q")]
    quantity: String,
    #[serde(rename = "p", default)]
    price: String,
    #[serde(rename = "X")]
    status: String,
    #[serde(rename = "i")]
    order_id: i64,
    #[serde(rename = "z", default)]
    cumulative_filled: String,
    #[serde(rename = "Z", default)]
    cumulative_quote: String,
    #[serde(rename = "n", default)]
    commission: String,
    #[serde(rename = "N", default)]
    commission_asset: Option<String>,
    #[serde(rename = "O")]
    created_ms: i64,
    #[serde(rename = "c", default)]
    client_order_id: String,
}

/// Turns order-update frames into canonical orders.
///
/// Symbols are split by the longest known quote-currency suffix, so
/// `BTCUSDT` is BTC against USDT.
#[derive(Debug, Clone)]
pub struct ExecutionReportTranslator {
    currencies: CurrencyTable,
    quotes: Vec<String>,
}

impl ExecutionReportTranslator {
    pub fn new(currencies: CurrencyTable, quotes: &[&str]) -> Self {
        let mut quotes: Vec<String> = quotes.iter().map(|q| q.to_uppercase()).collect();
        quotes.sort_by_key(|q| std::cmp::Reverse(q.len()));
        Self { currencies, quotes }
    }

    fn split_symbol(&self, symbol: &str) -> PluginResult<(String, String)> {
        let symbol = symbol.to_uppercase();
        self.quotes
            .iter()
            .find(|q| symbol.len() > q.len() && symbol.ends_with(q.as_str()))
            .map(|q| (symbol[..symbol.len() - q.len()].to_string(), q.clone()))
            .ok_or_else(|| PluginError::CurrencyNotSupported(symbol.clone()))
    }

    /// `Ok(None)` for frames that are not order updates.
    pub fn translate(&self, frame: &str) -> PluginResult<Option<PspOrder>> {
        let envelope: Envelope = serde_json::from_str(frame)?;
        if envelope.event_type != EXECUTION_REPORT {
            return Ok(None);
        }
        let raw: Value = serde_json::from_str(frame)?;
        let report: ExecutionReport = serde_json::from_value(raw.clone())?;
        let reference = report.order_id.to_string();

        let (base, quote) = self.split_symbol(&report.symbol)?;
        let (ordered, base_asset) = self.currencies.parse_amount(&report.quantity, &base)?;
        let (filled, _) = self
            .currencies
            .parse_amount(non_empty(&report.cumulative_filled), &base)?;
        let (_, quote_asset) = self.currencies.parse_amount("0", &quote)?;

        let direction = match report.side.as_str() {
            "BUY" => OrderDirection::Buy,
            "SELL" => OrderDirection::Sell,
            other => return Err(PluginError::malformed(&reference, format!("unknown side {}", other))),
        };
        let order_type = match report.order_type.as_str() {
            "MARKET" => OrderType::Market,
            "LIMIT" | "LIMIT_MAKER" => OrderType::Limit,
            other => {
                return Err(PluginError::malformed(&reference, format!("unsupported order type {}", other)));
            }
        };
        let limit_price = match order_type {
            OrderType::Limit => Some(self.currencies.parse_amount(&report.price, &quote)?.0),
            OrderType::Market => None,
        };
        let average_fill_price = if filled.is_positive() && !report.cumulative_quote.is_empty() {
            let quote_total = rust_decimal::Decimal::from_str_exact(&report.cumulative_quote)
                .map_err(|e| PluginError::malformed(&reference, e.to_string()))?;
            let base_total = rust_decimal::Decimal::from_str_exact(&report.cumulative_filled)
                .map_err(|e| PluginError::malformed(&reference, e.to_string()))?;
            let precision = self.currencies.precision(&quote)?;
            let average = quote_total
                .checked_div(base_total)
                .ok_or_else(|| PluginError::malformed(&reference, "average price overflow"))?;
            Some(crate::money::parse_decimal(average, precision)?)
        } else {
            None
        };
        let (fee, fee_asset) = match report.commission_asset.as_deref() {
            Some(code) if !code.is_empty() => {
                let (fee, asset) = self.currencies.parse_amount(non_empty(&report.commission), code)?;
                (Some(fee), Some(asset))
            }
            _ => (None, None),
        };

        let created_at = DateTime::<Utc>::from_timestamp_millis(report.created_ms)
            .ok_or_else(|| PluginError::malformed(&reference, "invalid creation time"))?;

        let mut metadata = Metadata::new();
        if !report.client_order_id.is_empty() {
            metadata.insert("client_order_id".into(), report.client_order_id.clone());
        }
        metadata.insert("symbol".into(), report.symbol.clone());

        // Buying base spends quote.
        let (source_asset, target_asset) = match direction {
            OrderDirection::Buy => (quote_asset, base_asset),
            OrderDirection::Sell => (base_asset, quote_asset),
        };

        let order = PspOrder {
            reference,
            created_at,
            direction,
            source_asset,
            target_asset,
            order_type,
            status: order_status(&report.status),
            base_quantity_ordered: ordered,
            base_quantity_filled: filled,
            limit_price,
            time_in_force: time_in_force(&report.time_in_force),
            fee,
            fee_asset,
            average_fill_price,
            metadata,
            raw,
        };
        order.validate()?;
        Ok(Some(order))
    }
}

fn non_empty(amount: &str) -> &str {
    if amount.is_empty() { "0" } else { amount }
}

fn order_status(status: &str) -> OrderStatus {
    match status {
        "NEW" | "PENDING_NEW" => OrderStatus::Open,
        "PARTIALLY_FILLED" => OrderStatus::PartiallyFilled,
        "FILLED" => OrderStatus::Filled,
        "CANCELED" | "PENDING_CANCEL" => OrderStatus::Cancelled,
        "REJECTED" => OrderStatus::Failed,
        "EXPIRED" | "EXPIRED_IN_MATCH" => OrderStatus::Expired,
        _ => OrderStatus::Pending,
    }
}

fn time_in_force(tif: &str) -> TimeInForce {
    match tif {
        "IOC" => TimeInForce::ImmediateOrCancel,
        "FOK" => TimeInForce::FillOrKill,
        _ => TimeInForce::GoodUntilCancelled,
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use serde_json::json;

    pub fn execution_report(order_id: i64, status: &str, filled: &str) -> String {
        json!({
            "e": "executionReport",
            "E": 1_700_000_000_100i64,
            "s": "BTCUSDT",
            "c": "web_1",
            "S": "BUY",
            "o": "LIMIT",
            "f": "GTC",
            "q": "0.50000000",
            "p": "65000.00",
            "X": status,
            "i": order_id,
            "z": filled,
            "Z": "16250.00",
            "n": "0.0001",
            "N": "BTC",
            "O": 1_700_000_000_000i64,
        })
        .to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::fixtures::execution_report;
    use super::*;
    use num_bigint::BigInt;

    fn translator() -> ExecutionReportTranslator {
        ExecutionReportTranslator::new(
            CurrencyTable::iso4217().with("BTC", 8).with("USDT", 6),
            &["USDT", "BTC"],
        )
    }

    #[test]
    fn test_execution_report() {
        let order = translator()
            .translate(&execution_report(42, "PARTIALLY_FILLED", "0.25"))
            .unwrap()
            .unwrap();
        assert_eq!(order.reference, "42");
        assert_eq!(order.direction, OrderDirection::Buy);
        assert_eq!(order.source_asset, "USDT/6");
        assert_eq!(order.target_asset, "BTC/8");
        assert_eq!(order.status, OrderStatus::PartiallyFilled);
        assert_eq!(order.base_quantity_ordered, BigInt::from(50_000_000));
        assert_eq!(order.base_quantity_filled, BigInt::from(25_000_000));
        assert_eq!(order.limit_price, Some(BigInt::from(65_000_000_000i64)));
        // 16250 / 0.25
        assert_eq!(order.average_fill_price, Some(BigInt::from(65_000_000_000i64)));
        assert_eq!(order.fee, Some(BigInt::from(10_000)));
        assert_eq!(order.fee_asset.as_deref(), Some("BTC/8"));
        assert_eq!(order.metadata["client_order_id"], "web_1");
    }

    #[test]
    fn test_other_frames_ignored() {
        let frame = r#"{"e":"outboundAccountPosition","E":1}"#;
        assert!(translator().translate(frame).unwrap().is_none());
    }

    #[test]
    fn test_average_price_overflow_is_malformed() {
        let frame = execution_report(7, "PARTIALLY_FILLED", "0.00000001")
            .replace("16250.00", "1000000000000000000000");
        let err = translator().translate(&frame).unwrap_err();
        assert_eq!(err.code(), "MALFORMED_RECORD");
        assert!(err.is_record_level());
    }

    #[test]
    fn test_unknown_symbol_is_record_level() {
        let frame = execution_report(1, "NEW", "0").replace("BTCUSDT", "DOGEXYZ");
        let err = translator().translate(&frame).unwrap_err();
        assert!(err.is_record_level());
    }
}
