//! Open-banking users, connections and the link handshake state.

use std::collections::BTreeMap;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::Metadata;
use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentServiceUser {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<String>,
    #[serde(default)]
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Token {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

impl Token {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Active,
    Error,
}

/// A user's authorised link to one bank on the aggregator side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenBankingConnection {
    pub connection_id: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_updated_at: Option<DateTime<Utc>>,
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<Token>,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Anti-CSRF state carried through the provider's redirect.
///
/// Encoded as unpadded URL-safe base64 of `{"attemptID":..,"randomized":..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallbackState {
    #[serde(rename = "attemptID")]
    pub attempt_id: Uuid,
    pub randomized: String,
}

impl CallbackState {
    pub fn new(attempt_id: Uuid) -> Self {
        Self {
            attempt_id,
            randomized: Uuid::new_v4().simple().to_string(),
        }
    }

    pub fn encode(&self) -> PluginResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    pub fn decode(value: &str) -> PluginResult<Self> {
        let json = URL_SAFE_NO_PAD
            .decode(value)
            .map_err(|e| PluginError::InvalidRequest(format!("callback state: {}", e)))?;
        Ok(serde_json::from_slice(&json)?)
    }
}

/// What the boundary captured from the redirect back to us.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpCallInformation {
    #[serde(default)]
    pub query_values: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl HttpCallInformation {
    pub fn query(&self, key: &str) -> Option<&str> {
        self.query_values
            .get(key)
            .and_then(|values| values.first())
            .map(String::as_str)
    }
}
