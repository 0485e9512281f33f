//! Storage collaborator.
//!
//! The core only needs upsert-by-reference for entities and a key/value
//! slot for fetch cursors. [`MemoryStorage`] backs tests and single-process
//! deployments.

mod memory;

pub use memory::MemoryStorage;

use std::fmt;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::PluginResult;
use crate::models::{PspAccount, PspBalance, PspConversion, PspOrder, PspOther, PspPayment};

/// Where a fetch cursor lives: one slot per connector, entity kind and scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey {
    pub connector: String,
    pub kind: String,
    pub scope: String,
}

impl StateKey {
    pub fn new(connector: &str, kind: &str, scope: &str) -> Self {
        Self {
            connector: connector.to_string(),
            kind: kind.to_string(),
            scope: scope.to_string(),
        }
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.connector, self.kind, self.scope)
    }
}

#[async_trait]
pub trait Storage: Send + Sync {
    // === Entities (upsert by reference) ===

    async fn store_accounts(&self, connector: &str, accounts: &[PspAccount]) -> PluginResult<()>;

    async fn store_external_accounts(
        &self,
        connector: &str,
        accounts: &[PspAccount],
    ) -> PluginResult<()>;

    async fn store_balances(&self, connector: &str, balances: &[PspBalance]) -> PluginResult<()>;

    async fn store_payments(&self, connector: &str, payments: &[PspPayment]) -> PluginResult<()>;

    async fn delete_payment(&self, connector: &str, reference: &str) -> PluginResult<()>;

    async fn store_orders(&self, connector: &str, orders: &[PspOrder]) -> PluginResult<()>;

    async fn store_conversions(
        &self,
        connector: &str,
        conversions: &[PspConversion],
    ) -> PluginResult<()>;

    async fn store_others(&self, connector: &str, name: &str, others: &[PspOther])
    -> PluginResult<()>;

    async fn get_accounts(&self, connector: &str) -> PluginResult<Vec<PspAccount>>;

    async fn get_external_accounts(&self, connector: &str) -> PluginResult<Vec<PspAccount>>;

    async fn get_balances(&self, connector: &str) -> PluginResult<Vec<PspBalance>>;

    async fn get_payments(&self, connector: &str) -> PluginResult<Vec<PspPayment>>;

    async fn get_orders(&self, connector: &str) -> PluginResult<Vec<PspOrder>>;

    // === Cursors ===

    async fn save_state(&self, key: &StateKey, state: &Value) -> PluginResult<()>;

    async fn get_state(&self, key: &StateKey) -> PluginResult<Option<Value>>;

    async fn clear_state(&self, key: &StateKey) -> PluginResult<()>;

    /// Drop every cursor of one connector and entity kind.
    async fn clear_states(&self, connector: &str, kind: &str) -> PluginResult<()>;

    // === Webhook redelivery ===

    /// Returns `false` when `key` was already recorded for this connector.
    async fn mark_webhook_seen(&self, connector: &str, key: &str) -> PluginResult<bool>;

    /// Undo `mark_webhook_seen` so a delivery that failed downstream is
    /// processed again on redelivery.
    async fn forget_webhook(&self, connector: &str, key: &str) -> PluginResult<()>;
}
