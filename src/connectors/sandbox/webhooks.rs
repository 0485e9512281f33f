//! Sandbox push notifications.
//!
//! Three subscriptions are registered per connector, all sharing one HMAC
//! secret. `connection_synced` carries the whole connection (accounts with
//! their transactions and balance) and is trimmed to one account per
//! envelope before translation.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::{debug, info, warn};

use super::SandboxPlugin;
use super::client::{RawAccount, RawBalance, RawTransaction};
use super::fetch::{to_account, to_balance, to_payment};
use crate::error::{PluginError, PluginResult};
use crate::models::{
    ConnectionHealth, ConnectionStatus, Metadata, OpenBankingConnection, WebhookConfig,
    WebhookEvent,
};
use crate::plugin::{
    CreateWebhooksRequest, CreateWebhooksResponse, TranslateWebhookRequest,
    TranslateWebhookResponse, TrimWebhookRequest, TrimWebhookResponse, VerifyWebhookRequest,
    VerifyWebhookResponse,
};
use crate::webhook::{AccountSync, ConnectionSync, SECRET_METADATA_KEY, keep_valid, trim_nested};

pub const SIGNATURE_HEADER: &str = "Sandbox-Signature";
pub const SIGNATURE_DATE_HEADER: &str = "Sandbox-Signature-Date";
pub const DELIVERY_HEADER: &str = "Sandbox-Delivery-Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookKind {
    ConnectionSynced,
    ConnectionDeleted,
    UserDeleted,
}

impl WebhookKind {
    pub const ALL: [WebhookKind; 3] = [
        WebhookKind::ConnectionSynced,
        WebhookKind::ConnectionDeleted,
        WebhookKind::UserDeleted,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            WebhookKind::ConnectionSynced => "connection_synced",
            WebhookKind::ConnectionDeleted => "connection_deleted",
            WebhookKind::UserDeleted => "user_deleted",
        }
    }

    pub fn url_path(&self) -> &'static str {
        match self {
            WebhookKind::ConnectionSynced => "/connection-synced",
            WebhookKind::ConnectionDeleted => "/connection-deleted",
            WebhookKind::UserDeleted => "/user-deleted",
        }
    }

    pub fn from_name(name: &str) -> PluginResult<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name() == name)
            .ok_or_else(|| PluginError::InvalidRequest(format!("unknown sandbox webhook {}", name)))
    }
}

// === Payloads ===

#[derive(Debug, Deserialize)]
struct ConnectionSyncedBody {
    connection: SyncedConnection,
}

#[derive(Debug, Deserialize)]
struct SyncedConnection {
    id: u64,
    user_id: String,
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    last_update: Option<DateTime<Utc>>,
    #[serde(default)]
    accounts: Vec<SyncedAccount>,
}

#[derive(Debug, Deserialize)]
struct SyncedAccount {
    #[serde(flatten)]
    account: RawAccount,
    #[serde(default)]
    balance: Option<String>,
    #[serde(default)]
    transactions: Vec<RawTransaction>,
}

#[derive(Debug, Deserialize)]
struct ConnectionDeletedBody {
    connection_id: u64,
    #[serde(default)]
    deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserDeletedBody {
    user_id: String,
}

impl SandboxPlugin {
    pub(super) fn webhook_configs(
        &self,
        req: CreateWebhooksRequest,
    ) -> PluginResult<CreateWebhooksResponse> {
        let secret = self.client.create_webhook_secret(&self.name)?;
        let configs = WebhookKind::ALL
            .into_iter()
            .map(|kind| {
                let mut metadata = Metadata::new();
                metadata.insert(SECRET_METADATA_KEY.to_string(), secret.clone());
                WebhookConfig {
                    name: kind.name().to_string(),
                    url_path: kind.url_path().to_string(),
                    metadata,
                }
            })
            .collect::<Vec<_>>();
        info!(connector = %req.connector_id, base = %req.webhook_base_url, count = configs.len(), "Sandbox webhooks registered");
        Ok(CreateWebhooksResponse {
            configs,
            others: Vec::new(),
        })
    }

    pub(super) fn verify(&self, req: VerifyWebhookRequest) -> PluginResult<VerifyWebhookResponse> {
        self.verifier.verify(&req)?;
        Ok(VerifyWebhookResponse {
            webhook_idempotency_key: req
                .webhook
                .header(DELIVERY_HEADER)
                .map(|id| format!("{}:{}", req.config.name, id)),
        })
    }

    pub(super) fn trim(&self, req: TrimWebhookRequest) -> PluginResult<TrimWebhookResponse> {
        let webhooks = match WebhookKind::from_name(&req.config.name)? {
            WebhookKind::ConnectionSynced => trim_nested(
                &req.webhook,
                "/connection/accounts",
                "transactions",
                self.config.trim_chunk_size,
            )?,
            _ => vec![req.webhook],
        };
        debug!(webhook = %req.config.name, envelopes = webhooks.len(), "Trimmed sandbox webhook");
        Ok(TrimWebhookResponse { webhooks })
    }

    pub(super) fn translate(
        &self,
        req: TranslateWebhookRequest,
    ) -> PluginResult<TranslateWebhookResponse> {
        let body = &req.webhook.body;
        let events = match WebhookKind::from_name(&req.name)? {
            WebhookKind::ConnectionSynced => {
                self.translate_synced(serde_json::from_slice(body)?)?
            }
            WebhookKind::ConnectionDeleted => {
                let body: ConnectionDeletedBody = serde_json::from_slice(body)?;
                vec![WebhookEvent::UserConnectionDisconnected {
                    connection_id: body.connection_id.to_string(),
                    health: ConnectionHealth::NonRecoverable,
                    reason: Some(body.reason.unwrap_or_else(|| "connection deleted".into())),
                    at: body.deleted_at.unwrap_or_else(Utc::now),
                }]
            }
            WebhookKind::UserDeleted => {
                let body: UserDeletedBody = serde_json::from_slice(body)?;
                vec![WebhookEvent::UserDisconnected {
                    user_reference: body.user_id,
                }]
            }
        };
        Ok(TranslateWebhookResponse { events })
    }

    fn translate_synced(&self, body: ConnectionSyncedBody) -> PluginResult<Vec<WebhookEvent>> {
        let connection = body.connection;
        let connection_id = connection.id.to_string();
        let at = connection.last_update.unwrap_or_else(Utc::now);

        if let Some(state) = connection.state.as_deref()
            && let Some(event) =
                self.health
                    .disconnected_event(&connection_id, state, connection.error_message.clone(), at)
        {
            return Ok(vec![event]);
        }

        let mut metadata = Metadata::new();
        metadata.insert("user_id".to_string(), connection.user_id.clone());
        let mut sync = ConnectionSync::new(Some(OpenBankingConnection {
            connection_id,
            created_at: at,
            data_updated_at: connection.last_update,
            status: ConnectionStatus::Active,
            error: None,
            access_token: None,
            metadata,
        }));

        for synced in connection.accounts {
            let raw = synced.account;
            let account_id = raw.id;
            let currency = raw.currency.clone();
            let account = match to_account(&self.currencies, raw) {
                Ok(account) => account,
                Err(err) if err.is_record_level() => {
                    warn!(account = account_id, error = %err, "Dropping pushed account");
                    continue;
                }
                Err(err) => return Err(err),
            };

            let payments = keep_valid(
                synced
                    .transactions
                    .into_iter()
                    .map(|tx| to_payment(&self.currencies, tx)),
            )?;
            let balance = match synced.balance {
                Some(value) => keep_valid([to_balance(
                    &self.currencies,
                    RawBalance {
                        account_id,
                        value,
                        currency,
                    },
                )])?
                .pop(),
                None => None,
            };

            sync = sync.account(
                AccountSync::new(account)
                    .with_payments(payments)
                    .with_balance(balance),
            );
        }
        Ok(sync.into_events())
    }
}
