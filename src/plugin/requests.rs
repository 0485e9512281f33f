//! Request and response shapes for every plugin operation.
//!
//! JSON field names are camelCase to match the fetch wire contract
//! `{fromPayload, state, pageSize}` → `{items, newState, hasMore}`.

use chrono::{DateTime, Utc};
use num_bigint::BigInt;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::{PluginError, PluginResult};
use crate::models::{
    ConnectorTaskTree, HttpCallInformation, Metadata, OpenBankingConnection, PaymentServiceUser,
    PspAccount, PspConversion, PspOrder, PspOther, PspPayment, PspPaymentInitiation, PspWebhook,
    Token, WebhookConfig, WebhookEvent, amount_serde,
};

// ============================================================================
// Lifecycle
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallRequest {
    pub connector_id: String,
    /// Public base URL webhook paths are appended to.
    #[serde(default)]
    pub webhook_base_url: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstallResponse {
    pub workflow: Vec<ConnectorTaskTree>,
    #[serde(default)]
    pub webhook_configs: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UninstallRequest {
    pub connector_id: String,
    #[serde(default)]
    pub webhook_configs: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UninstallResponse {}

// ============================================================================
// Fetch
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNextRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_payload: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub page_size: usize,
}

impl FetchNextRequest {
    /// Decode the parent payload of a scoped fetch.
    ///
    /// Missing payload is a caller error, never retryable.
    pub fn from_payload_as<T: DeserializeOwned>(&self) -> PluginResult<T> {
        let payload = self
            .from_payload
            .as_ref()
            .filter(|v| !v.is_null())
            .ok_or_else(|| PluginError::InvalidRequest("missing from payload".into()))?;
        serde_json::from_value(payload.clone())
            .map_err(|e| PluginError::InvalidRequest(format!("from payload: {}", e)))
    }

    /// Decode the cursor, or start from its default when there is none.
    pub fn state_as<T: DeserializeOwned + Default>(&self) -> PluginResult<T> {
        match &self.state {
            None | Some(Value::Null) => Ok(T::default()),
            Some(state) => serde_json::from_value(state.clone())
                .map_err(|e| PluginError::InvalidRequest(format!("state: {}", e))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchNextResponse<T> {
    pub items: Vec<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_state: Option<Value>,
    pub has_more: bool,
}

impl<T> FetchNextResponse<T> {
    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            new_state: None,
            has_more: false,
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BankAccount {
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iban: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub swift_bic_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBankAccountRequest {
    pub bank_account: BankAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateBankAccountResponse {
    pub related_account: PspAccount,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiationRequest {
    pub payment_initiation: PspPaymentInitiation,
}

/// Result of a transfer or payout: settled synchronously, or a polling id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CreatedPayment {
    Completed(PspPayment),
    Polling(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReversalRequest {
    pub reference: String,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub description: String,
    pub related_payment_initiation: PspPaymentInitiation,
    #[serde(with = "amount_serde")]
    pub amount: BigInt,
    pub asset: String,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollStatusResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment: Option<PspPayment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub order: PspOrder,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<PspOrder>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_order_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversionRequest {
    pub conversion: PspConversion,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConversionResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conversion: Option<PspConversion>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polling_conversion_id: Option<String>,
}

// ============================================================================
// Webhooks
// ============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhooksRequest {
    pub connector_id: String,
    pub webhook_base_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_payload: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWebhooksResponse {
    pub configs: Vec<WebhookConfig>,
    #[serde(default)]
    pub others: Vec<PspOther>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyWebhookRequest {
    pub config: WebhookConfig,
    /// `webhook_base_url + config.url_path`, the URL the provider signed.
    #[serde(default)]
    pub full_url: String,
    pub webhook: PspWebhook,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VerifyWebhookResponse {
    /// Provider delivery id, used to drop redeliveries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_idempotency_key: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrimWebhookRequest {
    pub config: WebhookConfig,
    pub webhook: PspWebhook,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrimWebhookResponse {
    pub webhooks: Vec<PspWebhook>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TranslateWebhookRequest {
    pub name: String,
    pub webhook: PspWebhook,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranslateWebhookResponse {
    pub events: Vec<WebhookEvent>,
}

// ============================================================================
// Open banking
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUserRequest {
    pub user: PaymentServiceUser,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permanent_token: Option<Token>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psp_user_id: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Shared by create and update: start a provider-hosted linking flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLinkRequest {
    pub attempt_id: Uuid,
    pub user: PaymentServiceUser,
    /// Present when re-linking an existing connection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connection: Option<OpenBankingConnection>,
    pub application_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_redirect_url: Option<String>,
    pub redirect_url: String,
    pub callback_state: String,
    pub webhook_base_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserLinkResponse {
    pub link: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temporary_link_token: Option<Token>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteUserLinkRequest {
    pub http_call: HttpCallInformation,
    pub attempt_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CompleteUserLinkResponse {
    Success { connections: Vec<OpenBankingConnection> },
    Error { error: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserConnectionRequest {
    pub user: PaymentServiceUser,
    pub connection: OpenBankingConnection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUserRequest {
    pub user: PaymentServiceUser,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Debug, Default, Deserialize, PartialEq)]
    struct Cursor {
        offset: u64,
    }

    #[derive(Debug, Deserialize)]
    struct Parent {
        reference: String,
    }

    #[test]
    fn test_fetch_request_wire_shape() {
        let req: FetchNextRequest = serde_json::from_value(json!({
            "fromPayload": {"reference": "acc_1"},
            "state": {"offset": 20},
            "pageSize": 10
        }))
        .unwrap();
        assert_eq!(req.page_size, 10);
        assert_eq!(req.state_as::<Cursor>().unwrap(), Cursor { offset: 20 });
        assert_eq!(req.from_payload_as::<Parent>().unwrap().reference, "acc_1");
    }

    #[test]
    fn test_missing_from_payload_is_invalid_request() {
        let req = FetchNextRequest {
            page_size: 10,
            ..Default::default()
        };
        let err = req.from_payload_as::<Parent>().unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
        assert!(!err.is_retryable());
        assert_eq!(req.state_as::<Cursor>().unwrap(), Cursor::default());
    }

    #[test]
    fn test_fetch_response_wire_shape() {
        let resp = FetchNextResponse {
            items: vec![1, 2],
            new_state: Some(json!({"offset": 2})),
            has_more: true,
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json, json!({"items": [1, 2], "newState": {"offset": 2}, "hasMore": true}));
    }
}
