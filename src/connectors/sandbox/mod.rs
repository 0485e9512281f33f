//! Sandbox provider.
//!
//! A complete connector over the in-memory [`SandboxClient`]: offset and
//! cursor pagination, transfers and payouts, signed webhooks with trimming,
//! and the open-banking user link flow. Used for local runs and as the
//! integration-test provider.

mod client;
mod fetch;
mod payments;
mod users;
mod webhooks;

pub use client::{
    Listing, RawAccount, RawBalance, RawBeneficiary, RawCard, RawConnection, RawTransaction,
    SandboxClient,
};
pub use users::USER_ID_METADATA_KEY;
pub use webhooks::{DELIVERY_HEADER, SIGNATURE_DATE_HEADER, SIGNATURE_HEADER, WebhookKind};

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

use crate::error::{PluginError, PluginResult};
use crate::models::{ConnectorTaskTree, PspAccount, PspBalance, PspOther, PspPayment, TaskType};
use crate::money::CurrencyTable;
use crate::pagination::{OffsetAdvance, PaginationMode, Paginator};
use crate::plugin::*;
use crate::webhook::{DEFAULT_CHUNK_SIZE, DigestEncoding, HealthMap, SignatureScheme, WebhookVerifier};

pub const PROVIDER: &str = "sandbox";

/// Named collection served through `fetch_next_others`.
pub const CARDS: &str = "cards";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxConfig {
    pub name: String,
    pub api_key: String,
    #[serde(default = "default_trim_chunk_size")]
    pub trim_chunk_size: usize,
    #[serde(default = "default_link_base_url")]
    pub link_base_url: String,
    /// Offset step of the account, beneficiary and card listings.
    #[serde(default)]
    pub offset_advance: OffsetAdvance,
}

fn default_trim_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_link_base_url() -> String {
    "https://sandbox.example.com".to_string()
}

impl SandboxConfig {
    fn from_value(config: &Value) -> PluginResult<Self> {
        let config: SandboxConfig = serde_json::from_value(config.clone())
            .map_err(|e| PluginError::InvalidConfig(e.to_string()))?;
        if config.trim_chunk_size == 0 {
            return Err(PluginError::InvalidConfig("trimChunkSize must be positive".into()));
        }
        Ok(config)
    }
}

pub fn capabilities() -> CapabilitySet {
    CapabilitySet::new([
        Capability::FetchAccounts,
        Capability::FetchBalances,
        Capability::FetchExternalAccounts,
        Capability::FetchPayments,
        Capability::FetchOthers,
        Capability::CreateBankAccount,
        Capability::CreateTransfer,
        Capability::ReverseTransfer,
        Capability::CreatePayout,
        Capability::ReversePayout,
        Capability::PollPayoutStatus,
        Capability::CreateWebhooks,
        Capability::VerifyWebhook,
        Capability::TranslateWebhook,
        Capability::TrimWebhook,
        Capability::CreateUser,
        Capability::CreateUserLink,
        Capability::CompleteUserLink,
        Capability::UpdateUserLink,
        Capability::CompleteUpdateUserLink,
        Capability::DeleteUser,
        Capability::DeleteUserConnection,
    ])
}

pub fn schema() -> ConfigSchema {
    ConfigSchema::common()
        .required("apiKey", FieldType::String)
        .optional("trimChunkSize", FieldType::Integer, Some(Value::from(DEFAULT_CHUNK_SIZE)))
        .optional("linkBaseUrl", FieldType::String, Some(Value::from(default_link_base_url())))
}

/// Register the sandbox provider. Every instance shares `client`.
pub fn register(registry: &mut Registry, client: Arc<SandboxClient>) -> PluginResult<()> {
    registry.register(
        PROVIDER,
        PluginType::Both,
        capabilities(),
        schema(),
        Arc::new(move |name: &str, config: &Value| {
            let plugin = SandboxPlugin::new(name, SandboxConfig::from_value(config)?, client.clone());
            Ok(Arc::new(plugin) as Arc<dyn Plugin>)
        }),
    )
}

pub struct SandboxPlugin {
    name: String,
    config: SandboxConfig,
    client: Arc<SandboxClient>,
    currencies: CurrencyTable,
    accounts: Paginator,
    transactions: Paginator,
    verifier: WebhookVerifier,
    health: HealthMap,
}

impl SandboxPlugin {
    pub fn new(name: &str, config: SandboxConfig, client: Arc<SandboxClient>) -> Self {
        let accounts = Paginator::new(PaginationMode::Offset(config.offset_advance));
        Self {
            name: name.to_string(),
            config,
            client,
            currencies: CurrencyTable::iso4217().subset(&["EUR", "USD", "GBP", "CHF"]),
            accounts,
            transactions: Paginator::token(),
            verifier: WebhookVerifier::new(
                SignatureScheme::HmacSha256(DigestEncoding::Base64),
                SIGNATURE_HEADER,
                SIGNATURE_DATE_HEADER,
            ),
            health: HealthMap::new()
                .ok(&["", "null"])
                .user_action(&[
                    "SCARequired",
                    "webauthRequired",
                    "additionalInformationNeeded",
                    "decoupled",
                    "actionNeeded",
                    "wrongpass",
                    "passwordExpired",
                ])
                .temporary(&["validating", "websiteUnavailable", "rateLimiting"])
                .non_recoverable(&["bug"]),
        }
    }

    pub fn config(&self) -> &SandboxConfig {
        &self.config
    }
}

#[async_trait]
impl Plugin for SandboxPlugin {
    fn name(&self) -> &str {
        &self.name
    }

    async fn install(&self, req: InstallRequest) -> PluginResult<InstallResponse> {
        info!(connector = %req.connector_id, "Installing sandbox connector");
        let workflow = vec![
            ConnectorTaskTree::new("fetch_accounts", TaskType::FetchAccounts)
                .then(ConnectorTaskTree::new("fetch_balances", TaskType::FetchBalances))
                .then(ConnectorTaskTree::new("fetch_payments", TaskType::FetchPayments)),
            ConnectorTaskTree::new("fetch_external_accounts", TaskType::FetchExternalAccounts),
            ConnectorTaskTree::new(
                "fetch_cards",
                TaskType::FetchOthers {
                    name: CARDS.to_string(),
                },
            ),
        ];
        Ok(InstallResponse {
            workflow,
            webhook_configs: Vec::new(),
        })
    }

    async fn uninstall(&self, req: UninstallRequest) -> PluginResult<UninstallResponse> {
        // The secret may exist without configs after a partial install.
        self.client.delete_webhook_secret(&self.name)?;
        info!(connector = %req.connector_id, webhooks = req.webhook_configs.len(), "Sandbox connector uninstalled");
        Ok(UninstallResponse::default())
    }

    // === Fetch ===

    async fn fetch_next_accounts(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        self.fetch_accounts(req).await
    }

    async fn fetch_next_external_accounts(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        self.fetch_beneficiaries(req).await
    }

    async fn fetch_next_balances(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspBalance>> {
        self.fetch_balances(req).await
    }

    async fn fetch_next_payments(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspPayment>> {
        self.fetch_payments(req).await
    }

    async fn fetch_next_others(
        &self,
        name: &str,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspOther>> {
        match name {
            CARDS => self.fetch_cards(req).await,
            other => Err(PluginError::InvalidRequest(format!("unknown collection {}", other))),
        }
    }

    // === Writes ===

    async fn create_bank_account(
        &self,
        req: CreateBankAccountRequest,
    ) -> PluginResult<CreateBankAccountResponse> {
        self.create_beneficiary(req)
    }

    async fn create_transfer(&self, req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        self.initiate(req, payments::Initiation::Transfer)
    }

    async fn reverse_transfer(&self, req: ReversalRequest) -> PluginResult<PspPayment> {
        self.reverse(req, crate::models::PaymentType::Transfer)
    }

    async fn create_payout(&self, req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        self.initiate(req, payments::Initiation::Payout)
    }

    async fn reverse_payout(&self, req: ReversalRequest) -> PluginResult<PspPayment> {
        self.reverse(req, crate::models::PaymentType::Payout)
    }

    async fn poll_payout_status(&self, payout_id: &str) -> PluginResult<PollStatusResponse> {
        self.payout_status(payout_id)
    }

    // === Webhooks ===

    async fn create_webhooks(
        &self,
        req: CreateWebhooksRequest,
    ) -> PluginResult<CreateWebhooksResponse> {
        self.webhook_configs(req)
    }

    async fn verify_webhook(
        &self,
        req: VerifyWebhookRequest,
    ) -> PluginResult<VerifyWebhookResponse> {
        self.verify(req)
    }

    async fn trim_webhook(&self, req: TrimWebhookRequest) -> PluginResult<TrimWebhookResponse> {
        self.trim(req)
    }

    async fn translate_webhook(
        &self,
        req: TranslateWebhookRequest,
    ) -> PluginResult<TranslateWebhookResponse> {
        self.translate(req)
    }

    // === Open banking ===

    async fn create_user(&self, req: CreateUserRequest) -> PluginResult<CreateUserResponse> {
        self.register_user(req)
    }

    async fn create_user_link(&self, req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        self.start_link(req)
    }

    async fn complete_user_link(
        &self,
        req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        self.complete_link(req)
    }

    async fn update_user_link(&self, req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        if req.connection.is_none() {
            return Err(PluginError::InvalidRequest("update link needs a connection".into()));
        }
        self.start_link(req)
    }

    async fn complete_update_user_link(
        &self,
        req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        self.complete_link(req)
    }

    async fn delete_user_connection(&self, req: DeleteUserConnectionRequest) -> PluginResult<()> {
        self.remove_connection(req)
    }

    async fn delete_user(&self, req: DeleteUserRequest) -> PluginResult<()> {
        self.remove_user(req)
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_register_validates_config() {
        let mut registry = Registry::new();
        register(&mut registry, Arc::new(SandboxClient::seeded())).unwrap();
        assert_eq!(registry.entry(PROVIDER).unwrap().plugin_type, PluginType::Both);

        let err = registry
            .create(PROVIDER, "sb", &json!({"name": "sb"}))
            .err()
            .unwrap();
        assert_eq!(err.code(), "INVALID_CONFIG");

        let (plugin, config) = registry
            .create(PROVIDER, "sb", &json!({"name": "sb", "apiKey": "k"}))
            .unwrap();
        assert_eq!(plugin.name(), "sb");
        assert_eq!(config["trimChunkSize"], 100);
    }

    #[test]
    fn test_zero_chunk_rejected() {
        let err = SandboxConfig::from_value(&json!({"name": "sb", "apiKey": "k", "trimChunkSize": 0}))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_CONFIG");
    }

    #[tokio::test]
    async fn test_install_workflow() {
        let (plugin, _) = testing::plugin();
        let resp = plugin
            .install(InstallRequest {
                connector_id: "sandbox-test".into(),
                webhook_base_url: String::new(),
            })
            .await
            .unwrap();
        let names: Vec<_> = resp.workflow.iter().flat_map(|t| t.walk()).map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["fetch_accounts", "fetch_balances", "fetch_payments", "fetch_external_accounts", "fetch_cards"]
        );
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let (plugin, _) = testing::plugin();
        let err = plugin
            .fetch_next_others("loans", FetchNextRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }
}
