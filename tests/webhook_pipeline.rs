use std::sync::Arc;

use serde_json::{Value, json};

use psp_bridge::config::AppConfig;
use psp_bridge::connector::Connector;
use psp_bridge::connectors::{self, sandbox};
use psp_bridge::models::{ConnectionHealth, PspWebhook, WebhookEvent};
use psp_bridge::storage::{MemoryStorage, Storage};
use psp_bridge::webhook::{DigestEncoding, check_ordering, sign_hmac_sha256, signing_message};

const CONFIG: &str = r#"
log_level: debug
log_dir: ./logs
log_file: test.log
webhooks:
  base_url: https://psp.example.com/webhooks/
connectors:
  - name: sandbox-eu
    provider: sandbox
    config:
      apiKey: sk_test
      trimChunkSize: 1
"#;

async fn installed() -> (Connector, Arc<sandbox::SandboxClient>, Arc<MemoryStorage>) {
    let config = AppConfig::from_yaml(CONFIG).unwrap();
    let client = Arc::new(sandbox::SandboxClient::new());
    let registry = connectors::registry(client.clone()).unwrap();
    let storage = Arc::new(MemoryStorage::new());
    let connector = Connector::from_config(
        &registry,
        config.connector("sandbox-eu").unwrap(),
        &config,
        storage.clone(),
    )
    .unwrap();
    connector.install().await.unwrap();
    (connector, client, storage)
}

fn synced(transactions: usize) -> Value {
    let transactions: Vec<Value> = (0..transactions)
        .map(|i| {
            json!({
                "id": 700 + i,
                "account_id": 1,
                "value": format!("-{}.25", i + 1),
                "currency": "EUR",
                "state": "booked",
                "counterparty": 501,
                "date": "2024-05-01T08:00:00Z"
            })
        })
        .collect();
    json!({
        "connection": {
            "id": 42,
            "user_id": "usr_1",
            "state": null,
            "last_update": "2024-05-01T09:00:00Z",
            "accounts": [{
                "id": 1,
                "name": "Operating",
                "currency": "EUR",
                "opened_at": "2024-01-01T00:00:00Z",
                "balance": "99.999",
                "transactions": transactions
            }]
        }
    })
}

/// Sign the way the provider does: over the public URL path.
fn delivery(client: &sandbox::SandboxClient, url_path: &str, body: &Value, id: &str) -> PspWebhook {
    let secret = client.webhook_secret("sandbox-eu").unwrap();
    let body = serde_json::to_vec(body).unwrap();
    let ts = "1714550400";
    let path = format!("/webhooks/sandbox-eu{}", url_path);
    let signature = sign_hmac_sha256(
        &secret,
        &signing_message("POST", &path, ts, &body),
        DigestEncoding::Base64,
    )
    .unwrap();
    PspWebhook::new(body)
        .with_header(sandbox::SIGNATURE_HEADER, signature)
        .with_header(sandbox::SIGNATURE_DATE_HEADER, ts)
        .with_header(sandbox::DELIVERY_HEADER, id)
}

#[tokio::test]
async fn test_synced_push_is_trimmed_ordered_and_stored() {
    let (connector, client, storage) = installed().await;
    assert_eq!(connector.webhook_base_url(), "https://psp.example.com/webhooks/sandbox-eu");

    let hook = delivery(&client, "/connection-synced", &synced(3), "dlv_1");
    let events = connector.handle_webhook("/connection-synced", hook.clone()).await.unwrap();

    // chunk size 1: three envelopes, each reconnect → account → payment → balance
    assert_eq!(events.len(), 12);
    for envelope in events.chunks(4) {
        check_ordering(envelope).unwrap();
        assert!(matches!(envelope[0], WebhookEvent::UserConnectionReconnected { .. }));
        assert!(matches!(envelope[3], WebhookEvent::Balance(_)));
    }

    let payments = storage.get_payments("sandbox-eu").await.unwrap();
    assert_eq!(payments.len(), 3);
    assert!(payments.iter().all(|p| p.references_account("1")));
    assert_eq!(storage.get_accounts("sandbox-eu").await.unwrap().len(), 1);
    let balances = storage.get_balances("sandbox-eu").await.unwrap();
    assert_eq!(balances[0].amount, num_bigint::BigInt::from(9999));

    // Same delivery id: dropped before translation
    let again = connector.handle_webhook("/connection-synced", hook).await.unwrap();
    assert!(again.is_empty());
}

#[tokio::test]
async fn test_tampered_push_is_rejected_and_nothing_stored() {
    let (connector, client, storage) = installed().await;
    let hook = delivery(&client, "/connection-synced", &synced(1), "dlv_2");
    let tampered = hook.with_body(serde_json::to_vec(&synced(2)).unwrap());

    let err = connector
        .handle_webhook("/connection-synced", tampered)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WEBHOOK_VERIFICATION_FAILED");
    assert!(!err.is_retryable());
    assert!(storage.get_payments("sandbox-eu").await.unwrap().is_empty());

    // A push signed for another path does not verify either
    let misrouted = delivery(&client, "/user-deleted", &synced(1), "dlv_3");
    let err = connector
        .handle_webhook("/connection-synced", misrouted)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WEBHOOK_VERIFICATION_FAILED");
}

#[tokio::test]
async fn test_disconnect_pushes() {
    let (connector, client, _) = installed().await;

    let mut body = synced(1);
    body["connection"]["state"] = json!("wrongpass");
    let events = connector
        .handle_webhook("/connection-synced", delivery(&client, "/connection-synced", &body, "dlv_4"))
        .await
        .unwrap();
    assert!(matches!(
        &events[..],
        [WebhookEvent::UserConnectionDisconnected {
            health: ConnectionHealth::UserActionNeeded,
            ..
        }]
    ));

    let events = connector
        .handle_webhook(
            "/connection-deleted",
            delivery(&client, "/connection-deleted", &json!({"connection_id": 42}), "dlv_5"),
        )
        .await
        .unwrap();
    assert!(matches!(
        &events[..],
        [WebhookEvent::UserConnectionDisconnected {
            health: ConnectionHealth::NonRecoverable,
            ..
        }]
    ));

    let events = connector
        .handle_webhook(
            "/user-deleted",
            delivery(&client, "/user-deleted", &json!({"user_id": "usr_1"}), "dlv_6"),
        )
        .await
        .unwrap();
    assert_eq!(
        events,
        vec![WebhookEvent::UserDisconnected {
            user_reference: "usr_1".into()
        }]
    );
}

#[tokio::test]
async fn test_unknown_path_and_uninstalled_connector() {
    let (connector, client, _) = installed().await;
    let hook = delivery(&client, "/connection-synced", &synced(1), "dlv_7");

    let err = connector.handle_webhook("/nope", hook.clone()).await.unwrap_err();
    assert_eq!(err.code(), "INVALID_REQUEST");

    connector.uninstall().await.unwrap();
    let err = connector.handle_webhook("/connection-synced", hook).await.unwrap_err();
    assert_eq!(err.code(), "NOT_YET_INSTALLED");
}
