//! Connector Plugin Contract
//!
//! Every provider integration implements [`Plugin`]. A connector declares a
//! [`CapabilitySet`] when it is registered and the core never dispatches an
//! operation outside it. Unimplemented trait methods fall back to
//! `NotImplemented`, so a connector only writes the operations it supports.

pub mod lifecycle;
pub mod registry;
pub mod requests;
pub mod schema;

pub use lifecycle::{Lifecycle, LifecycleState};
pub use registry::{PluginFactory, PluginType, Registry, RegistryEntry};
pub use requests::*;
pub use schema::{ConfigSchema, FieldType};

use std::collections::BTreeSet;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{PluginError, PluginResult};
use crate::models::{PspAccount, PspBalance, PspConversion, PspOrder, PspOther, PspPayment};

// ============================================================================
// Capabilities
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Capability {
    FetchAccounts,
    FetchBalances,
    FetchExternalAccounts,
    FetchPayments,
    FetchOthers,
    FetchOrders,
    FetchConversions,

    CreateBankAccount,
    CreateTransfer,
    ReverseTransfer,
    PollTransferStatus,
    CreatePayout,
    ReversePayout,
    PollPayoutStatus,
    CreateOrder,
    CancelOrder,
    CreateConversion,

    CreateWebhooks,
    TranslateWebhook,
    VerifyWebhook,
    TrimWebhook,

    CreateUser,
    CreateUserLink,
    CompleteUserLink,
    UpdateUserLink,
    CompleteUpdateUserLink,
    DeleteUser,
    DeleteUserConnection,
}

impl Capability {
    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::FetchAccounts => "FETCH_ACCOUNTS",
            Capability::FetchBalances => "FETCH_BALANCES",
            Capability::FetchExternalAccounts => "FETCH_EXTERNAL_ACCOUNTS",
            Capability::FetchPayments => "FETCH_PAYMENTS",
            Capability::FetchOthers => "FETCH_OTHERS",
            Capability::FetchOrders => "FETCH_ORDERS",
            Capability::FetchConversions => "FETCH_CONVERSIONS",
            Capability::CreateBankAccount => "CREATE_BANK_ACCOUNT",
            Capability::CreateTransfer => "CREATE_TRANSFER",
            Capability::ReverseTransfer => "REVERSE_TRANSFER",
            Capability::PollTransferStatus => "POLL_TRANSFER_STATUS",
            Capability::CreatePayout => "CREATE_PAYOUT",
            Capability::ReversePayout => "REVERSE_PAYOUT",
            Capability::PollPayoutStatus => "POLL_PAYOUT_STATUS",
            Capability::CreateOrder => "CREATE_ORDER",
            Capability::CancelOrder => "CANCEL_ORDER",
            Capability::CreateConversion => "CREATE_CONVERSION",
            Capability::CreateWebhooks => "CREATE_WEBHOOKS",
            Capability::TranslateWebhook => "TRANSLATE_WEBHOOK",
            Capability::VerifyWebhook => "VERIFY_WEBHOOK",
            Capability::TrimWebhook => "TRIM_WEBHOOK",
            Capability::CreateUser => "CREATE_USER",
            Capability::CreateUserLink => "CREATE_USER_LINK",
            Capability::CompleteUserLink => "COMPLETE_USER_LINK",
            Capability::UpdateUserLink => "UPDATE_USER_LINK",
            Capability::CompleteUpdateUserLink => "COMPLETE_UPDATE_USER_LINK",
            Capability::DeleteUser => "DELETE_USER",
            Capability::DeleteUserConnection => "DELETE_USER_CONNECTION",
        }
    }

    fn requires_user(&self) -> bool {
        matches!(
            self,
            Capability::CreateUserLink
                | Capability::CompleteUserLink
                | Capability::UpdateUserLink
                | Capability::CompleteUpdateUserLink
                | Capability::DeleteUser
                | Capability::DeleteUserConnection
        )
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Capabilities a connector declared at registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilitySet(BTreeSet<Capability>);

impl CapabilitySet {
    pub fn new(capabilities: impl IntoIterator<Item = Capability>) -> Self {
        Self(capabilities.into_iter().collect())
    }

    pub fn contains(&self, capability: Capability) -> bool {
        self.0.contains(&capability)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Capability> {
        self.0.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Reject sets the core could not drive consistently.
    pub fn validate(&self) -> PluginResult<()> {
        if self.0.is_empty() {
            return Err(PluginError::InvalidConfig("connector declares no capabilities".into()));
        }
        if self.contains(Capability::TranslateWebhook)
            && !(self.contains(Capability::CreateWebhooks) && self.contains(Capability::VerifyWebhook))
        {
            return Err(PluginError::InvalidConfig(
                "TRANSLATE_WEBHOOK requires CREATE_WEBHOOKS and VERIFY_WEBHOOK".into(),
            ));
        }
        if self.contains(Capability::TrimWebhook) && !self.contains(Capability::TranslateWebhook) {
            return Err(PluginError::InvalidConfig(
                "TRIM_WEBHOOK requires TRANSLATE_WEBHOOK".into(),
            ));
        }
        if !self.contains(Capability::CreateUser) {
            if let Some(cap) = self.0.iter().find(|c| c.requires_user()) {
                return Err(PluginError::InvalidConfig(format!(
                    "{} requires CREATE_USER",
                    cap
                )));
            }
        }
        Ok(())
    }

    /// Gate a call on a declared capability.
    pub fn require(&self, capability: Capability) -> PluginResult<()> {
        if self.contains(capability) {
            Ok(())
        } else {
            Err(PluginError::NotImplemented(capability.as_str()))
        }
    }
}

impl FromIterator<Capability> for CapabilitySet {
    fn from_iter<I: IntoIterator<Item = Capability>>(iter: I) -> Self {
        Self::new(iter)
    }
}

// ============================================================================
// Plugin trait
// ============================================================================

/// Provider integration.
///
/// Only `install`/`uninstall` are mandatory. `trim_webhook` defaults to a
/// pass-through; everything else defaults to `NotImplemented`.
#[async_trait]
pub trait Plugin: Send + Sync {
    /// Provider name for logging
    fn name(&self) -> &str;

    async fn install(&self, req: InstallRequest) -> PluginResult<InstallResponse>;

    async fn uninstall(&self, req: UninstallRequest) -> PluginResult<UninstallResponse>;

    // === Fetch ===

    async fn fetch_next_accounts(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        Err(PluginError::NotImplemented("fetch_next_accounts"))
    }

    async fn fetch_next_external_accounts(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        Err(PluginError::NotImplemented("fetch_next_external_accounts"))
    }

    async fn fetch_next_balances(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspBalance>> {
        Err(PluginError::NotImplemented("fetch_next_balances"))
    }

    async fn fetch_next_payments(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspPayment>> {
        Err(PluginError::NotImplemented("fetch_next_payments"))
    }

    async fn fetch_next_others(
        &self,
        _name: &str,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspOther>> {
        Err(PluginError::NotImplemented("fetch_next_others"))
    }

    async fn fetch_next_orders(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspOrder>> {
        Err(PluginError::NotImplemented("fetch_next_orders"))
    }

    async fn fetch_next_conversions(
        &self,
        _req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspConversion>> {
        Err(PluginError::NotImplemented("fetch_next_conversions"))
    }

    // === Writes ===

    async fn create_bank_account(
        &self,
        _req: CreateBankAccountRequest,
    ) -> PluginResult<CreateBankAccountResponse> {
        Err(PluginError::NotImplemented("create_bank_account"))
    }

    async fn create_transfer(&self, _req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        Err(PluginError::NotImplemented("create_transfer"))
    }

    async fn reverse_transfer(&self, _req: ReversalRequest) -> PluginResult<PspPayment> {
        Err(PluginError::NotImplemented("reverse_transfer"))
    }

    async fn poll_transfer_status(&self, _transfer_id: &str) -> PluginResult<PollStatusResponse> {
        Err(PluginError::NotImplemented("poll_transfer_status"))
    }

    async fn create_payout(&self, _req: PaymentInitiationRequest) -> PluginResult<CreatedPayment> {
        Err(PluginError::NotImplemented("create_payout"))
    }

    async fn reverse_payout(&self, _req: ReversalRequest) -> PluginResult<PspPayment> {
        Err(PluginError::NotImplemented("reverse_payout"))
    }

    async fn poll_payout_status(&self, _payout_id: &str) -> PluginResult<PollStatusResponse> {
        Err(PluginError::NotImplemented("poll_payout_status"))
    }

    async fn create_order(&self, _req: CreateOrderRequest) -> PluginResult<CreateOrderResponse> {
        Err(PluginError::NotImplemented("create_order"))
    }

    async fn cancel_order(&self, _order_id: &str) -> PluginResult<PspOrder> {
        Err(PluginError::NotImplemented("cancel_order"))
    }

    async fn create_conversion(
        &self,
        _req: CreateConversionRequest,
    ) -> PluginResult<CreateConversionResponse> {
        Err(PluginError::NotImplemented("create_conversion"))
    }

    // === Webhooks ===

    async fn create_webhooks(
        &self,
        _req: CreateWebhooksRequest,
    ) -> PluginResult<CreateWebhooksResponse> {
        Err(PluginError::NotImplemented("create_webhooks"))
    }

    async fn verify_webhook(
        &self,
        _req: VerifyWebhookRequest,
    ) -> PluginResult<VerifyWebhookResponse> {
        Err(PluginError::NotImplemented("verify_webhook"))
    }

    async fn trim_webhook(&self, req: TrimWebhookRequest) -> PluginResult<TrimWebhookResponse> {
        Ok(TrimWebhookResponse {
            webhooks: vec![req.webhook],
        })
    }

    async fn translate_webhook(
        &self,
        _req: TranslateWebhookRequest,
    ) -> PluginResult<TranslateWebhookResponse> {
        Err(PluginError::NotImplemented("translate_webhook"))
    }

    // === Open banking ===

    async fn create_user(&self, _req: CreateUserRequest) -> PluginResult<CreateUserResponse> {
        Err(PluginError::NotImplemented("create_user"))
    }

    async fn create_user_link(&self, _req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        Err(PluginError::NotImplemented("create_user_link"))
    }

    async fn complete_user_link(
        &self,
        _req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        Err(PluginError::NotImplemented("complete_user_link"))
    }

    async fn update_user_link(&self, _req: UserLinkRequest) -> PluginResult<UserLinkResponse> {
        Err(PluginError::NotImplemented("update_user_link"))
    }

    async fn complete_update_user_link(
        &self,
        _req: CompleteUserLinkRequest,
    ) -> PluginResult<CompleteUserLinkResponse> {
        Err(PluginError::NotImplemented("complete_update_user_link"))
    }

    async fn delete_user_connection(&self, _req: DeleteUserConnectionRequest) -> PluginResult<()> {
        Err(PluginError::NotImplemented("delete_user_connection"))
    }

    async fn delete_user(&self, _req: DeleteUserRequest) -> PluginResult<()> {
        Err(PluginError::NotImplemented("delete_user"))
    }
}
