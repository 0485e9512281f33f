use std::sync::Arc;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use psp_bridge::config::{AppConfig, ConnectorEntry};
use psp_bridge::connector::Connector;
use psp_bridge::connectors::{
    self,
    sandbox::{RawAccount, SandboxClient},
};
use psp_bridge::pagination::FetchKind;
use psp_bridge::plugin::CreateOrderRequest;
use psp_bridge::storage::{MemoryStorage, StateKey, Storage};

const CONFIG: &str = r#"
log_level: debug
log_dir: ./logs
log_file: test.log
webhooks:
  base_url: https://psp.example.com/webhooks
connectors:
  - name: sandbox-eu
    provider: sandbox
    config:
      apiKey: sk_test
      pageSize: 2
"#;

struct Harness {
    client: Arc<SandboxClient>,
    storage: Arc<MemoryStorage>,
    connector: Connector,
}

fn harness() -> Harness {
    let config = AppConfig::from_yaml(CONFIG).unwrap();
    let client = Arc::new(SandboxClient::seeded());
    let registry = connectors::registry(client.clone()).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let connector = Connector::from_config(
        &registry,
        config.connector("sandbox-eu").unwrap(),
        &config,
        storage.clone(),
    )
    .unwrap();
    Harness {
        client,
        storage,
        connector,
    }
}

async fn installed() -> Harness {
    let h = harness();
    h.connector.install().await.unwrap();
    h
}

/// Fresh sync walks accounts, then balances and payments per account
#[tokio::test]
async fn test_sync_runs_full_workflow() {
    let h = installed().await;
    let cancel = CancellationToken::new();

    let report = h.connector.run_workflow(&cancel).await.unwrap();
    // accounts + 3 × (balances, payments) + external accounts + cards
    assert_eq!(report.tasks_run, 9);
    assert_eq!(report.items["fetch_accounts"], 3);
    assert_eq!(report.items["fetch_balances"], 3);
    // 103 is in an unsupported currency and skipped
    assert_eq!(report.items["fetch_payments"], 5);
    assert_eq!(report.items["fetch_external_accounts"], 2);
    assert_eq!(report.items["fetch_cards"], 2);

    assert_eq!(h.storage.get_accounts("sandbox-eu").await.unwrap().len(), 3);
    assert_eq!(h.storage.get_payments("sandbox-eu").await.unwrap().len(), 5);
    assert_eq!(h.storage.get_balances("sandbox-eu").await.unwrap().len(), 3);
    assert_eq!(h.storage.others_count("sandbox-eu"), 2);

    // Every scope is exhausted: a second cycle makes no provider call
    let calls = h.client.calls();
    let again = h.connector.run_workflow(&cancel).await.unwrap();
    assert_eq!(again.tasks_run, 3);
    assert!(again.items.values().all(|&n| n == 0));
    assert_eq!(h.client.calls(), calls);
}

#[tokio::test]
async fn test_failed_page_resumes_without_duplicates() {
    let h = installed().await;
    let cancel = CancellationToken::new();

    let first = h.connector.fetch_next_accounts(None, &cancel).await.unwrap();
    let refs: Vec<_> = first.items.iter().map(|a| a.reference.clone()).collect();
    assert_eq!(refs, ["1", "2"]);

    let before = h.connector.fetch_engine(&FetchKind::Accounts).status(None).unwrap();
    h.client.fail_next(1);
    let err = h.connector.fetch_next_accounts(None, &cancel).await.unwrap_err();
    assert!(err.is_retryable());
    let after = h.connector.fetch_engine(&FetchKind::Accounts).status(None).unwrap();
    assert_eq!(before, after);

    let retry = h.connector.fetch_next_accounts(None, &cancel).await.unwrap();
    assert_eq!(retry.items.len(), 1);
    assert_eq!(retry.items[0].reference, "3");
    assert!(!retry.has_more);

    let calls = h.client.calls();
    let done = h.connector.fetch_next_accounts(None, &cancel).await.unwrap();
    assert!(done.items.is_empty());
    assert!(!done.has_more);
    assert_eq!(h.client.calls(), calls);
}

#[tokio::test]
async fn test_payment_cursors_are_scoped_per_account() {
    let h = installed().await;
    let cancel = CancellationToken::new();
    let accounts = h.connector.fetch_next_accounts(None, &cancel).await.unwrap().items;
    let first = serde_json::to_value(&accounts[0]).unwrap();
    let second = serde_json::to_value(&accounts[1]).unwrap();

    let page = h.connector.fetch_next_payments(Some(&first), &cancel).await.unwrap();
    let refs: Vec<_> = page.items.iter().map(|p| p.reference.as_str()).collect();
    assert_eq!(refs, ["101", "102"]);
    assert!(page.has_more);

    let other = h.connector.fetch_next_payments(Some(&second), &cancel).await.unwrap();
    assert_eq!(other.items[0].reference, "201");
    assert!(!other.has_more);

    let rest = h.connector.fetch_next_payments(Some(&first), &cancel).await.unwrap();
    let refs: Vec<_> = rest.items.iter().map(|p| p.reference.as_str()).collect();
    assert_eq!(refs, ["104"]);
    assert!(!rest.has_more);

    let engine = h.connector.fetch_engine(&FetchKind::Payments);
    assert_eq!(engine.scopes().len(), 2);
    assert_eq!(engine.status(Some(&first)).unwrap().total_items, 3);
}

#[tokio::test]
async fn test_capability_and_lifecycle_gating() {
    let h = harness();
    let cancel = CancellationToken::new();

    let err = h.connector.fetch_next_accounts(None, &cancel).await.unwrap_err();
    assert_eq!(err.code(), "NOT_YET_INSTALLED");

    h.connector.install().await.unwrap();
    let err = h.connector.fetch_next_orders(None, &cancel).await.unwrap_err();
    assert_eq!(err.code(), "NOT_IMPLEMENTED");

    let err = h
        .connector
        .create_order(CreateOrderRequest {
            order: serde_json::from_value(json!({
                "reference": "o1",
                "createdAt": "2024-01-01T00:00:00Z",
                "direction": "buy",
                "sourceAsset": "EUR/2",
                "targetAsset": "BTC/8",
                "type": "market",
                "status": "pending",
                "baseQuantityOrdered": "100",
                "baseQuantityFilled": "0",
                "raw": {}
            }))
            .unwrap(),
        })
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_IMPLEMENTED");

    let err = h.connector.install().await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");
}

#[tokio::test]
async fn test_uninstall_then_reinstall_starts_over() {
    let h = installed().await;
    let cancel = CancellationToken::new();
    h.connector.run_workflow(&cancel).await.unwrap();
    assert!(h.client.webhook_secret("sandbox-eu").is_some());

    h.connector.uninstall().await.unwrap();
    assert!(h.client.webhook_secret("sandbox-eu").is_none());
    let err = h.connector.fetch_next_accounts(None, &cancel).await.unwrap_err();
    assert_eq!(err.code(), "NOT_YET_INSTALLED");

    h.connector.install().await.unwrap();
    let page = h.connector.fetch_next_accounts(None, &cancel).await.unwrap();
    assert_eq!(page.items.len(), 2);
}

#[tokio::test]
async fn test_connector_config_errors() {
    let config = AppConfig::from_yaml(CONFIG).unwrap();
    let registry = connectors::registry(Arc::new(SandboxClient::seeded())).unwrap();
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    let unknown = ConnectorEntry {
        name: "x".into(),
        provider: "nope".into(),
        config: json!({"apiKey": "k"}),
    };
    let err = Connector::from_config(&registry, &unknown, &config, storage.clone())
        .err()
        .unwrap();
    assert_eq!(err.code(), "INVALID_CONFIG");

    let missing_key = ConnectorEntry {
        name: "x".into(),
        provider: "sandbox".into(),
        config: json!({}),
    };
    let err = Connector::from_config(&registry, &missing_key, &config, storage)
        .err()
        .unwrap();
    assert_eq!(err.code(), "INVALID_CONFIG");
}

/// Three accounts, the middle one in a currency the sandbox skips.
fn offset_client() -> Arc<SandboxClient> {
    let client = Arc::new(SandboxClient::new());
    for (id, currency) in [(1, "EUR"), (2, "JPY"), (3, "EUR")] {
        client.add_account(RawAccount {
            id,
            name: format!("acct {}", id),
            currency: currency.into(),
            opened_at: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
        });
    }
    client
}

async fn persisted_account_offset(offset_advance: &str) -> (Vec<String>, u64) {
    let yaml = format!(
        "log_level: debug\nlog_dir: ./logs\nlog_file: test.log\n\
         engine:\n  page_size: 2\n  offset_advance: {}\n\
         connectors:\n  - name: sandbox-eu\n    provider: sandbox\n    config:\n      apiKey: sk_test\n",
        offset_advance
    );
    let config = AppConfig::from_yaml(&yaml).unwrap();
    let registry = connectors::registry(offset_client()).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let connector = Connector::from_config(
        &registry,
        config.connector("sandbox-eu").unwrap(),
        &config,
        storage.clone(),
    )
    .unwrap();
    connector.install().await.unwrap();

    let page = connector
        .fetch_next_accounts(None, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!page.has_more);
    let refs = page.items.iter().map(|a| a.reference.clone()).collect();

    let cursor = storage
        .get_state(&StateKey::new("sandbox-eu", "accounts", "_root"))
        .await
        .unwrap()
        .unwrap();
    (refs, cursor["state"]["offset"].as_u64().unwrap())
}

#[tokio::test]
async fn test_engine_offset_advance_reaches_the_paginator() {
    // Pages [1, 2(JPY)] then [3]: only the short last page tells the modes apart.
    let (refs, offset) = persisted_account_offset("page_size").await;
    assert_eq!(refs, ["1", "3"]);
    assert_eq!(offset, 4);

    let (refs, offset) = persisted_account_offset("consumed").await;
    assert_eq!(refs, ["1", "3"]);
    assert_eq!(offset, 3);
}
