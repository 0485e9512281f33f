use std::fmt;

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use num_traits::Signed;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Metadata, amount_serde, require_asset, require_created_at, require_raw, require_reference,
};
use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentType {
    Payin,
    Payout,
    Transfer,
    Other,
}

impl PaymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentType::Payin => "payin",
            PaymentType::Payout => "payout",
            PaymentType::Transfer => "transfer",
            PaymentType::Other => "other",
        }
    }
}

/// Closed set of payment states. Providers map their own vocabulary onto it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Succeeded,
    Cancelled,
    Failed,
    Expired,
    Refunded,
    RefundedFailure,
    RefundReversed,
    Dispute,
    DisputeWon,
    DisputeLost,
    AmountAdjustment,
    Authorisation,
    Capture,
    CaptureFailed,
    Other,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::RefundedFailure => "refunded_failure",
            PaymentStatus::RefundReversed => "refund_reversed",
            PaymentStatus::Dispute => "dispute",
            PaymentStatus::DisputeWon => "dispute_won",
            PaymentStatus::DisputeLost => "dispute_lost",
            PaymentStatus::AmountAdjustment => "amount_adjustment",
            PaymentStatus::Authorisation => "authorisation",
            PaymentStatus::Capture => "capture",
            PaymentStatus::CaptureFailed => "capture_failed",
            PaymentStatus::Other => "other",
        }
    }

    /// No further provider updates are expected once a payment lands here.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Succeeded
                | PaymentStatus::Cancelled
                | PaymentStatus::Failed
                | PaymentStatus::Expired
                | PaymentStatus::Refunded
                | PaymentStatus::DisputeWon
                | PaymentStatus::DisputeLost
        )
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentScheme {
    CardVisa,
    CardMastercard,
    CardAmex,
    CardOther,
    SepaCredit,
    SepaDebit,
    Ach,
    AchDebit,
    Rtp,
    A2a,
    #[default]
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspPayment {
    /// Set on refunds, disputes and adjustments: the payment they amend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_reference: Option<String>,
    pub reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(rename = "type")]
    pub payment_type: PaymentType,
    #[serde(with = "amount_serde")]
    pub amount: BigInt,
    pub asset: String,
    #[serde(default)]
    pub scheme: PaymentScheme,
    pub status: PaymentStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_account_reference: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
    pub raw: Value,
}

impl PspPayment {
    pub fn validate(&self) -> PluginResult<()> {
        require_reference(&self.reference, "payment")?;
        require_created_at(&self.reference, &self.created_at)?;
        require_asset(&self.reference, &self.asset)?;
        require_raw(&self.reference, &self.raw)?;
        if self.amount.is_negative() {
            return Err(PluginError::malformed(&self.reference, "amount is negative"));
        }
        Ok(())
    }

    /// Whether `account_reference` is on either side of this payment.
    pub fn references_account(&self, account_reference: &str) -> bool {
        self.source_account_reference.as_deref() == Some(account_reference)
            || self.destination_account_reference.as_deref() == Some(account_reference)
    }
}

/// Outbound transfer or payout requested by the caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspPaymentInitiation {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_account: Option<super::PspAccount>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_account: Option<super::PspAccount>,
    #[serde(with = "amount_serde")]
    pub amount: BigInt,
    pub asset: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl PspPaymentInitiation {
    pub fn validate(&self) -> PluginResult<()> {
        let invalid = |reason: &str| PluginError::InvalidRequest(format!("{}: {}", self.reference, reason));
        if self.reference.trim().is_empty() {
            return Err(PluginError::InvalidRequest("payment initiation reference is empty".into()));
        }
        if !crate::money::is_valid_asset(&self.asset) {
            return Err(invalid("invalid asset"));
        }
        if !self.amount.is_positive() {
            return Err(invalid("amount must be positive"));
        }
        if self.destination_account.is_none() {
            return Err(invalid("destination account is required"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn payment() -> PspPayment {
        PspPayment {
            parent_reference: None,
            reference: "tx_1".into(),
            created_at: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            payment_type: PaymentType::Payin,
            amount: BigInt::from(1050),
            asset: "EUR/2".into(),
            scheme: PaymentScheme::Other,
            status: PaymentStatus::Succeeded,
            source_account_reference: None,
            destination_account_reference: Some("acc_1".into()),
            metadata: Metadata::new(),
            raw: json!({"id": "tx_1"}),
        }
    }

    #[test]
    fn test_payment_wire_shape() {
        let json = serde_json::to_value(payment()).unwrap();
        assert_eq!(json["type"], "payin");
        assert_eq!(json["amount"], "1050");
        assert_eq!(json["status"], "succeeded");
        assert!(json.get("sourceAccountReference").is_none());
    }

    #[test]
    fn test_payment_validation() {
        assert!(payment().validate().is_ok());
        let mut p = payment();
        p.amount = BigInt::from(-1);
        assert!(p.validate().unwrap_err().is_record_level());
        let mut p = payment();
        p.asset = "EUR2".into();
        assert!(p.validate().is_err());
    }

    #[test]
    fn test_references_account() {
        let p = payment();
        assert!(p.references_account("acc_1"));
        assert!(!p.references_account("acc_2"));
    }

    #[test]
    fn test_status_terminal() {
        assert!(PaymentStatus::Succeeded.is_terminal());
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(!PaymentStatus::Dispute.is_terminal());
        assert_eq!(PaymentStatus::RefundedFailure.to_string(), "refunded_failure");
    }
}
