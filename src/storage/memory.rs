use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use super::{StateKey, Storage};
use crate::error::PluginResult;
use crate::models::{PspAccount, PspBalance, PspConversion, PspOrder, PspOther, PspPayment};

type Keyed<T> = DashMap<(String, String), T>;

/// In-memory storage on sharded concurrent maps.
#[derive(Default)]
pub struct MemoryStorage {
    accounts: Keyed<PspAccount>,
    external_accounts: Keyed<PspAccount>,
    /// Keyed by (connector, "account/asset"): one snapshot per pair.
    balances: Keyed<PspBalance>,
    payments: Keyed<PspPayment>,
    orders: Keyed<PspOrder>,
    conversions: Keyed<PspConversion>,
    /// Keyed by (connector, "name/id").
    others: Keyed<PspOther>,
    states: DashMap<StateKey, Value>,
    seen_webhooks: DashMap<(String, String), ()>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state_count(&self) -> usize {
        self.states.len()
    }

    pub fn others_count(&self, connector: &str) -> usize {
        self.others.iter().filter(|e| e.key().0 == connector).count()
    }

    pub fn conversions_count(&self, connector: &str) -> usize {
        self.conversions.iter().filter(|e| e.key().0 == connector).count()
    }
}

fn upsert<T: Clone>(map: &Keyed<T>, connector: &str, items: &[T], key: impl Fn(&T) -> String) {
    for item in items {
        map.insert((connector.to_string(), key(item)), item.clone());
    }
}

/// Entries of one connector ordered by key.
fn collect<T: Clone>(map: &Keyed<T>, connector: &str) -> Vec<T> {
    let mut items: Vec<(String, T)> = map
        .iter()
        .filter(|e| e.key().0 == connector)
        .map(|e| (e.key().1.clone(), e.value().clone()))
        .collect();
    items.sort_by(|a, b| a.0.cmp(&b.0));
    items.into_iter().map(|(_, v)| v).collect()
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn store_accounts(&self, connector: &str, accounts: &[PspAccount]) -> PluginResult<()> {
        upsert(&self.accounts, connector, accounts, |a| a.reference.clone());
        Ok(())
    }

    async fn store_external_accounts(
        &self,
        connector: &str,
        accounts: &[PspAccount],
    ) -> PluginResult<()> {
        upsert(&self.external_accounts, connector, accounts, |a| a.reference.clone());
        Ok(())
    }

    async fn store_balances(&self, connector: &str, balances: &[PspBalance]) -> PluginResult<()> {
        upsert(&self.balances, connector, balances, |b| {
            format!("{}/{}", b.account_reference, b.asset)
        });
        Ok(())
    }

    async fn store_payments(&self, connector: &str, payments: &[PspPayment]) -> PluginResult<()> {
        upsert(&self.payments, connector, payments, |p| p.reference.clone());
        Ok(())
    }

    async fn delete_payment(&self, connector: &str, reference: &str) -> PluginResult<()> {
        self.payments
            .remove(&(connector.to_string(), reference.to_string()));
        Ok(())
    }

    async fn store_orders(&self, connector: &str, orders: &[PspOrder]) -> PluginResult<()> {
        upsert(&self.orders, connector, orders, |o| o.reference.clone());
        Ok(())
    }

    async fn store_conversions(
        &self,
        connector: &str,
        conversions: &[PspConversion],
    ) -> PluginResult<()> {
        upsert(&self.conversions, connector, conversions, |c| c.reference.clone());
        Ok(())
    }

    async fn store_others(
        &self,
        connector: &str,
        name: &str,
        others: &[PspOther],
    ) -> PluginResult<()> {
        upsert(&self.others, connector, others, |o| format!("{}/{}", name, o.id));
        Ok(())
    }

    async fn get_accounts(&self, connector: &str) -> PluginResult<Vec<PspAccount>> {
        Ok(collect(&self.accounts, connector))
    }

    async fn get_external_accounts(&self, connector: &str) -> PluginResult<Vec<PspAccount>> {
        Ok(collect(&self.external_accounts, connector))
    }

    async fn get_balances(&self, connector: &str) -> PluginResult<Vec<PspBalance>> {
        Ok(collect(&self.balances, connector))
    }

    async fn get_payments(&self, connector: &str) -> PluginResult<Vec<PspPayment>> {
        Ok(collect(&self.payments, connector))
    }

    async fn get_orders(&self, connector: &str) -> PluginResult<Vec<PspOrder>> {
        Ok(collect(&self.orders, connector))
    }

    async fn save_state(&self, key: &StateKey, state: &Value) -> PluginResult<()> {
        self.states.insert(key.clone(), state.clone());
        Ok(())
    }

    async fn get_state(&self, key: &StateKey) -> PluginResult<Option<Value>> {
        Ok(self.states.get(key).map(|v| v.value().clone()))
    }

    async fn clear_state(&self, key: &StateKey) -> PluginResult<()> {
        self.states.remove(key);
        Ok(())
    }

    async fn clear_states(&self, connector: &str, kind: &str) -> PluginResult<()> {
        self.states
            .retain(|key, _| !(key.connector == connector && key.kind == kind));
        Ok(())
    }

    async fn mark_webhook_seen(&self, connector: &str, key: &str) -> PluginResult<bool> {
        Ok(self
            .seen_webhooks
            .insert((connector.to_string(), key.to_string()), ())
            .is_none())
    }

    async fn forget_webhook(&self, connector: &str, key: &str) -> PluginResult<()> {
        self.seen_webhooks
            .remove(&(connector.to_string(), key.to_string()));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use chrono::Utc;
    use serde_json::json;

    fn account(reference: &str, name: &str) -> PspAccount {
        PspAccount {
            reference: reference.into(),
            created_at: Utc::now(),
            name: Some(name.into()),
            default_asset: None,
            metadata: Metadata::new(),
            raw: json!({}),
        }
    }

    #[tokio::test]
    async fn test_accounts_upsert_by_reference() {
        let store = MemoryStorage::new();
        store
            .store_accounts("c1", &[account("a", "old"), account("b", "b")])
            .await
            .unwrap();
        store.store_accounts("c1", &[account("a", "new")]).await.unwrap();
        store.store_accounts("c2", &[account("a", "other")]).await.unwrap();

        let accounts = store.get_accounts("c1").await.unwrap();
        assert_eq!(accounts.len(), 2);
        assert_eq!(accounts[0].name.as_deref(), Some("new"));
    }

    #[tokio::test]
    async fn test_state_slots() {
        let store = MemoryStorage::new();
        let k1 = StateKey::new("c1", "payments", "_root");
        let k2 = StateKey::new("c1", "payments", "acc_1");
        let k3 = StateKey::new("c1", "accounts", "_root");
        for k in [&k1, &k2, &k3] {
            store.save_state(k, &json!({"offset": 1})).await.unwrap();
        }
        assert_eq!(k2.to_string(), "c1/payments/acc_1");
        assert_eq!(store.get_state(&k1).await.unwrap(), Some(json!({"offset": 1})));

        store.clear_state(&k1).await.unwrap();
        assert_eq!(store.get_state(&k1).await.unwrap(), None);

        store.clear_states("c1", "payments").await.unwrap();
        assert_eq!(store.state_count(), 1);
        assert!(store.get_state(&k3).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_webhook_seen_once() {
        let store = MemoryStorage::new();
        assert!(store.mark_webhook_seen("c1", "evt_1").await.unwrap());
        assert!(!store.mark_webhook_seen("c1", "evt_1").await.unwrap());
        assert!(store.mark_webhook_seen("c2", "evt_1").await.unwrap());

        store.forget_webhook("c1", "evt_1").await.unwrap();
        assert!(store.mark_webhook_seen("c1", "evt_1").await.unwrap());
    }
}
