//! Exchange orders and currency conversions.

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Metadata, amount_serde, require_asset, require_created_at, require_raw, require_reference,
};
use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDirection {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Open,
    PartiallyFilled,
    Filled,
    Cancelled,
    Failed,
    Expired,
}

impl OrderStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Failed | OrderStatus::Expired
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TimeInForce {
    #[default]
    GoodUntilCancelled,
    ImmediateOrCancel,
    FillOrKill,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspOrder {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub direction: OrderDirection,
    pub source_asset: String,
    pub target_asset: String,
    #[serde(rename = "type")]
    pub order_type: OrderType,
    pub status: OrderStatus,
    #[serde(with = "amount_serde")]
    pub base_quantity_ordered: BigInt,
    #[serde(with = "amount_serde")]
    pub base_quantity_filled: BigInt,
    #[serde(default, with = "amount_serde::option", skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<BigInt>,
    #[serde(default)]
    pub time_in_force: TimeInForce,
    #[serde(default, with = "amount_serde::option", skip_serializing_if = "Option::is_none")]
    pub fee: Option<BigInt>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_asset: Option<String>,
    #[serde(default, with = "amount_serde::option", skip_serializing_if = "Option::is_none")]
    pub average_fill_price: Option<BigInt>,
    #[serde(default)]
    pub metadata: Metadata,
    pub raw: Value,
}

impl PspOrder {
    pub fn validate(&self) -> PluginResult<()> {
        require_reference(&self.reference, "order")?;
        require_created_at(&self.reference, &self.created_at)?;
        require_asset(&self.reference, &self.source_asset)?;
        require_asset(&self.reference, &self.target_asset)?;
        require_raw(&self.reference, &self.raw)?;
        if self.base_quantity_ordered.is_negative() || self.base_quantity_filled.is_negative() {
            return Err(PluginError::malformed(&self.reference, "negative quantity"));
        }
        if self.base_quantity_filled > self.base_quantity_ordered {
            return Err(PluginError::malformed(
                &self.reference,
                "filled quantity exceeds ordered quantity",
            ));
        }
        if self.order_type == OrderType::Limit && self.limit_price.is_none() {
            return Err(PluginError::malformed(&self.reference, "limit order without price"));
        }
        if let Some(fee_asset) = &self.fee_asset {
            require_asset(&self.reference, fee_asset)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversionStatus {
    Pending,
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspConversion {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    pub source_asset: String,
    pub target_asset: String,
    #[serde(with = "amount_serde")]
    pub source_amount: BigInt,
    #[serde(default, with = "amount_serde::option", skip_serializing_if = "Option::is_none")]
    pub target_amount: Option<BigInt>,
    pub status: ConversionStatus,
    #[serde(default)]
    pub metadata: Metadata,
    pub raw: Value,
}

impl PspConversion {
    pub fn validate(&self) -> PluginResult<()> {
        require_reference(&self.reference, "conversion")?;
        require_created_at(&self.reference, &self.created_at)?;
        require_asset(&self.reference, &self.source_asset)?;
        require_asset(&self.reference, &self.target_asset)?;
        require_raw(&self.reference, &self.raw)?;
        if !self.source_amount.is_positive() {
            return Err(PluginError::malformed(&self.reference, "source amount must be positive"));
        }
        Ok(())
    }
}
