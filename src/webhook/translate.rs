//! Building and checking ordered event lists.
//!
//! Within one translate result:
//! 1. a connection (re)established event comes before any account event,
//! 2. an account comes before the payments that reference it,
//! 3. an account's payments come before its balance snapshot.
//!
//! [`ConnectionSync`] emits events in that order by construction;
//! [`check_ordering`] rejects any list that breaks it.

use std::collections::HashMap;

use tracing::warn;

use crate::error::{PluginError, PluginResult};
use crate::models::{OpenBankingConnection, PspAccount, PspBalance, PspPayment, WebhookEvent};

/// One account with the payments and balance a push reported for it.
#[derive(Debug, Clone)]
pub struct AccountSync {
    pub account: PspAccount,
    pub payments: Vec<PspPayment>,
    pub balance: Option<PspBalance>,
}

impl AccountSync {
    pub fn new(account: PspAccount) -> Self {
        Self {
            account,
            payments: Vec::new(),
            balance: None,
        }
    }

    pub fn with_payments(mut self, payments: Vec<PspPayment>) -> Self {
        self.payments = payments;
        self
    }

    pub fn with_balance(mut self, balance: Option<PspBalance>) -> Self {
        self.balance = balance;
        self
    }
}

/// A connection-synced push: optional reconnect, then every account.
#[derive(Debug, Clone, Default)]
pub struct ConnectionSync {
    reconnected: Option<OpenBankingConnection>,
    accounts: Vec<AccountSync>,
}

impl ConnectionSync {
    pub fn new(reconnected: Option<OpenBankingConnection>) -> Self {
        Self {
            reconnected,
            accounts: Vec::new(),
        }
    }

    pub fn account(mut self, account: AccountSync) -> Self {
        self.accounts.push(account);
        self
    }

    pub fn into_events(self) -> Vec<WebhookEvent> {
        let mut events = Vec::new();
        if let Some(connection) = self.reconnected {
            events.push(WebhookEvent::UserConnectionReconnected { connection });
        }
        for sync in self.accounts {
            events.push(WebhookEvent::Account(sync.account));
            events.extend(sync.payments.into_iter().map(WebhookEvent::Payment));
            if let Some(balance) = sync.balance {
                events.push(WebhookEvent::Balance(balance));
            }
        }
        events
    }
}

/// Collect translated records, dropping and logging the ones that failed
/// with a record-level error. Any other error aborts.
pub fn keep_valid<T>(results: impl IntoIterator<Item = PluginResult<T>>) -> PluginResult<Vec<T>> {
    let mut out = Vec::new();
    for result in results {
        match result {
            Ok(item) => out.push(item),
            Err(err) if err.is_record_level() => {
                warn!(error = %err, code = err.code(), "Dropping webhook record");
            }
            Err(err) => return Err(err),
        }
    }
    Ok(out)
}

fn violation(index: usize, what: String) -> PluginError {
    PluginError::EventOrder(format!("event {}: {}", index, what))
}

/// Verify that `events` respect the ordering rules above.
///
/// Payments and balances for accounts that do not appear in the list are
/// fine: the account was created by an earlier push or fetch.
pub fn check_ordering(events: &[WebhookEvent]) -> PluginResult<()> {
    let mut account_at: HashMap<&str, usize> = HashMap::new();
    let mut first_account = None;
    for (i, event) in events.iter().enumerate() {
        if let WebhookEvent::Account(account) = event {
            account_at.entry(account.reference.as_str()).or_insert(i);
            first_account.get_or_insert(i);
        }
    }

    let mut last_payment_for: HashMap<&str, usize> = HashMap::new();
    for (i, event) in events.iter().enumerate() {
        match event {
            WebhookEvent::UserConnectionReconnected { connection } => {
                if first_account.is_some_and(|a| a < i) {
                    return Err(violation(
                        i,
                        format!("reconnect of {} after an account", connection.connection_id),
                    ));
                }
            }
            WebhookEvent::Payment(payment) => {
                for account in [
                    payment.source_account_reference.as_deref(),
                    payment.destination_account_reference.as_deref(),
                ]
                .into_iter()
                .flatten()
                {
                    if account_at.get(account).is_some_and(|&a| a > i) {
                        return Err(violation(
                            i,
                            format!("payment {} before account {}", payment.reference, account),
                        ));
                    }
                    last_payment_for.insert(account, i);
                }
            }
            _ => {}
        }
    }

    for (i, event) in events.iter().enumerate() {
        if let WebhookEvent::Balance(balance) = event {
            let account = balance.account_reference.as_str();
            if account_at.get(account).is_some_and(|&a| a > i) {
                return Err(violation(i, format!("balance before account {}", account)));
            }
            if last_payment_for.get(account).is_some_and(|&p| p > i) {
                return Err(violation(i, format!("balance before payments of {}", account)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{TimeZone, Utc};
    use num_bigint::BigInt;
    use serde_json::json;

    use crate::models::{
        ConnectionStatus, Metadata, OpenBankingConnection, PaymentScheme, PaymentStatus,
        PaymentType, PspAccount, PspBalance, PspPayment,
    };

    pub fn connection(id: &str) -> OpenBankingConnection {
        OpenBankingConnection {
            connection_id: id.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            data_updated_at: None,
            status: ConnectionStatus::Active,
            error: None,
            access_token: None,
            metadata: Metadata::new(),
        }
    }

    pub fn account(reference: &str) -> PspAccount {
        PspAccount {
            reference: reference.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            name: None,
            default_asset: Some("EUR/2".into()),
            metadata: Metadata::new(),
            raw: json!({}),
        }
    }

    pub fn payment(reference: &str, account: &str) -> PspPayment {
        PspPayment {
            parent_reference: None,
            reference: reference.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 2, 0, 0, 0).unwrap(),
            payment_type: PaymentType::Payin,
            amount: BigInt::from(100),
            asset: "EUR/2".into(),
            scheme: PaymentScheme::Other,
            status: PaymentStatus::Succeeded,
            source_account_reference: None,
            destination_account_reference: Some(account.into()),
            metadata: Metadata::new(),
            raw: json!({}),
        }
    }

    pub fn balance(account: &str) -> PspBalance {
        PspBalance {
            account_reference: account.into(),
            created_at: Utc.with_ymd_and_hms(2024, 1, 3, 0, 0, 0).unwrap(),
            amount: BigInt::from(1050),
            asset: "EUR/2".into(),
        }
    }
}
