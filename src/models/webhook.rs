use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{
    Metadata, OpenBankingConnection, PspAccount, PspBalance, PspOrder, PspPayment,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

/// Raw inbound webhook as captured at the HTTP boundary.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PspWebhook {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub basic_auth: Option<BasicAuth>,
    #[serde(default)]
    pub query_values: BTreeMap<String, Vec<String>>,
    /// Header names are stored lowercase.
    #[serde(default)]
    pub headers: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub body: Vec<u8>,
}

impl PspWebhook {
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(value.into());
        self
    }

    pub fn with_query(mut self, name: &str, value: impl Into<String>) -> Self {
        self.query_values
            .entry(name.to_string())
            .or_default()
            .push(value.into());
        self
    }

    /// First value of a header, case-insensitive.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .and_then(|values| values.first())
            .map(String::as_str)
    }

    /// Same envelope with a different body.
    pub fn with_body(&self, body: Vec<u8>) -> Self {
        Self {
            basic_auth: self.basic_auth.clone(),
            query_values: self.query_values.clone(),
            headers: self.headers.clone(),
            body,
        }
    }
}

/// A webhook subscription a connector wants registered on install.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub name: String,
    pub url_path: String,
    #[serde(default)]
    pub metadata: Metadata,
}

/// Item of a named "others" collection the core stores opaquely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PspOther {
    pub id: String,
    pub other: Value,
}

/// Normalized connection state driving retry / alert / give-up decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionHealth {
    Ok,
    UserActionNeeded,
    TemporaryError,
    NonRecoverable,
}

impl fmt::Display for ConnectionHealth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionHealth::Ok => "ok",
            ConnectionHealth::UserActionNeeded => "user-action-needed",
            ConnectionHealth::TemporaryError => "temporary-error",
            ConnectionHealth::NonRecoverable => "non-recoverable",
        };
        write!(f, "{}", s)
    }
}

/// Canonical outcome of translating one webhook envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WebhookEvent {
    UserConnectionReconnected {
        connection: OpenBankingConnection,
    },
    UserConnectionDisconnected {
        connection_id: String,
        health: ConnectionHealth,
        reason: Option<String>,
        at: DateTime<Utc>,
    },
    UserDisconnected {
        user_reference: String,
    },
    UserLinkStatus {
        attempt_id: String,
        succeeded: bool,
        error: Option<String>,
    },
    Account(PspAccount),
    ExternalAccount(PspAccount),
    Payment(PspPayment),
    PaymentToDelete {
        reference: String,
    },
    PaymentToCancel {
        reference: String,
    },
    Balance(PspBalance),
    Order(PspOrder),
    /// The push only signalled new data; the scheduler should run a fetch.
    DataReadyToFetch {
        connection_id: Option<String>,
        from_payload: Option<Value>,
    },
}

impl WebhookEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            WebhookEvent::UserConnectionReconnected { .. } => "user_connection_reconnected",
            WebhookEvent::UserConnectionDisconnected { .. } => "user_connection_disconnected",
            WebhookEvent::UserDisconnected { .. } => "user_disconnected",
            WebhookEvent::UserLinkStatus { .. } => "user_link_status",
            WebhookEvent::Account(_) => "account",
            WebhookEvent::ExternalAccount(_) => "external_account",
            WebhookEvent::Payment(_) => "payment",
            WebhookEvent::PaymentToDelete { .. } => "payment_to_delete",
            WebhookEvent::PaymentToCancel { .. } => "payment_to_cancel",
            WebhookEvent::Balance(_) => "balance",
            WebhookEvent::Order(_) => "order",
            WebhookEvent::DataReadyToFetch { .. } => "data_ready_to_fetch",
        }
    }
}
