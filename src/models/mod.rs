//! Canonical provider-agnostic entities.
//!
//! Every translate function converges on these shapes. They are plain
//! values: a re-fetched entity carries the same `reference` and replaces the
//! previous one in storage.

pub mod account;
pub mod balance;
pub mod open_banking;
pub mod order;
pub mod payment;
pub mod task;
pub mod webhook;

pub use account::PspAccount;
pub use balance::PspBalance;
pub use open_banking::{
    CallbackState, ConnectionStatus, HttpCallInformation, OpenBankingConnection,
    PaymentServiceUser, Token,
};
pub use order::{
    ConversionStatus, OrderDirection, OrderStatus, OrderType, PspConversion, PspOrder,
    TimeInForce,
};
pub use payment::{
    PaymentScheme, PaymentStatus, PaymentType, PspPayment, PspPaymentInitiation,
};
pub use task::{ConnectorTaskTree, TaskType};
pub use webhook::{
    BasicAuth, ConnectionHealth, PspOther, PspWebhook, WebhookConfig, WebhookEvent,
};

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{PluginError, PluginResult};

/// Free-form provider metadata attached to an entity.
pub type Metadata = BTreeMap<String, String>;

/// Serialize `BigInt` amounts as base-10 strings so they survive JSON
/// consumers limited to 53-bit numbers.
pub mod amount_serde {
    use num_bigint::BigInt;
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    pub fn serialize<S: Serializer>(amount: &BigInt, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&amount.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<BigInt, D::Error> {
        let raw = String::deserialize(deserializer)?;
        BigInt::parse_bytes(raw.as_bytes(), 10)
            .ok_or_else(|| D::Error::custom(format!("invalid amount: {}", raw)))
    }

    pub mod option {
        use num_bigint::BigInt;
        use serde::{Deserialize, Deserializer, Serializer, de::Error};

        pub fn serialize<S: Serializer>(
            amount: &Option<BigInt>,
            serializer: S,
        ) -> Result<S::Ok, S::Error> {
            match amount {
                Some(amount) => serializer.serialize_some(&amount.to_string()),
                None => serializer.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            deserializer: D,
        ) -> Result<Option<BigInt>, D::Error> {
            match Option::<String>::deserialize(deserializer)? {
                Some(raw) => BigInt::parse_bytes(raw.as_bytes(), 10)
                    .map(Some)
                    .ok_or_else(|| D::Error::custom(format!("invalid amount: {}", raw))),
                None => Ok(None),
            }
        }
    }
}

// ============================================================================
// Shared validation helpers
// ============================================================================

pub(crate) fn require_reference(reference: &str, entity: &str) -> PluginResult<()> {
    if reference.trim().is_empty() {
        return Err(PluginError::malformed("", format!("{} reference is empty", entity)));
    }
    Ok(())
}

pub(crate) fn require_created_at(reference: &str, created_at: &DateTime<Utc>) -> PluginResult<()> {
    if *created_at == DateTime::<Utc>::default() {
        return Err(PluginError::malformed(reference, "created_at is unset"));
    }
    Ok(())
}

pub(crate) fn require_raw(reference: &str, raw: &serde_json::Value) -> PluginResult<()> {
    if raw.is_null() {
        return Err(PluginError::malformed(reference, "raw payload is missing"));
    }
    Ok(())
}

pub(crate) fn require_asset(reference: &str, asset: &str) -> PluginResult<()> {
    if !crate::money::is_valid_asset(asset) {
        return Err(PluginError::malformed(
            reference,
            format!("invalid asset {}", asset),
        ));
    }
    Ok(())
}
