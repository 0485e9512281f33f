//! In-memory sandbox backend.
//!
//! Plays the provider side: raw records in provider vocabulary (decimal
//! strings, provider status names), offset and cursor listings, webhook
//! secrets and the user-link handshake. Failures can be injected per call.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PluginError, PluginResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAccount {
    pub id: u64,
    pub name: String,
    pub currency: String,
    pub opened_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawTransaction {
    pub id: u64,
    pub account_id: u64,
    /// Signed decimal: negative values are debits.
    pub value: String,
    pub currency: String,
    pub state: String,
    #[serde(default)]
    pub counterparty: Option<u64>,
    /// Caller reference echoed back on debits we initiated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_to_end: Option<String>,
    pub date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBalance {
    pub account_id: u64,
    pub value: String,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawBeneficiary {
    pub id: u64,
    pub name: String,
    pub iban: String,
    pub currency: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawCard {
    pub id: u64,
    pub account_id: u64,
    pub last4: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawConnection {
    pub id: u64,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
}

/// Page of an offset listing.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub records: Vec<T>,
    pub total: usize,
}

#[derive(Default)]
struct Ledger {
    accounts: Vec<RawAccount>,
    transactions: Vec<RawTransaction>,
    balances: Vec<RawBalance>,
    beneficiaries: Vec<RawBeneficiary>,
    cards: Vec<RawCard>,
    /// connector name → webhook secret
    webhook_secrets: BTreeMap<String, String>,
    users: BTreeMap<String, String>,
    /// authorization code → pending connection
    link_codes: BTreeMap<String, RawConnection>,
    connections: BTreeMap<u64, RawConnection>,
    next_id: u64,
}

impl Ledger {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

pub struct SandboxClient {
    ledger: Mutex<Ledger>,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl Default for SandboxClient {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxClient {
    pub fn new() -> Self {
        Self {
            ledger: Mutex::new(Ledger {
                next_id: 10_000,
                ..Default::default()
            }),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Two EUR accounts, one USD account and a handful of transactions,
    /// including one in a currency the connector does not support.
    pub fn seeded() -> Self {
        let client = Self::new();
        let opened = |day| Utc.with_ymd_and_hms(2024, 1, day, 9, 0, 0).single().unwrap_or_default();
        client.with_ledger(|l| {
            l.accounts = vec![
                RawAccount { id: 1, name: "Operating".into(), currency: "EUR".into(), opened_at: opened(1) },
                RawAccount { id: 2, name: "Payroll".into(), currency: "EUR".into(), opened_at: opened(2) },
                RawAccount { id: 3, name: "US Treasury".into(), currency: "USD".into(), opened_at: opened(3) },
            ];
            l.transactions = vec![
                RawTransaction { id: 101, account_id: 1, value: "1250.00".into(), currency: "EUR".into(), state: "booked".into(), counterparty: None, end_to_end: None, date: opened(4) },
                RawTransaction { id: 102, account_id: 1, value: "-99.999".into(), currency: "EUR".into(), state: "booked".into(), counterparty: Some(501), end_to_end: None, date: opened(5) },
                RawTransaction { id: 103, account_id: 1, value: "15".into(), currency: "XYZ".into(), state: "booked".into(), counterparty: None, end_to_end: None, date: opened(6) },
                RawTransaction { id: 104, account_id: 1, value: "-20.50".into(), currency: "EUR".into(), state: "pending".into(), counterparty: None, end_to_end: None, date: opened(7) },
                RawTransaction { id: 201, account_id: 2, value: "-3000.00".into(), currency: "EUR".into(), state: "booked".into(), counterparty: Some(502), end_to_end: None, date: opened(8) },
                RawTransaction { id: 301, account_id: 3, value: "500".into(), currency: "USD".into(), state: "rejected".into(), counterparty: None, end_to_end: None, date: opened(9) },
            ];
            l.balances = vec![
                RawBalance { account_id: 1, value: "1130.001".into(), currency: "EUR".into() },
                RawBalance { account_id: 2, value: "42000.00".into(), currency: "EUR".into() },
                RawBalance { account_id: 3, value: "10.5".into(), currency: "USD".into() },
            ];
            l.beneficiaries = vec![
                RawBeneficiary { id: 501, name: "ACME Supplies".into(), iban: "FR7630006000011234567890189".into(), currency: "EUR".into(), created_at: opened(2) },
                RawBeneficiary { id: 502, name: "Payroll Provider".into(), iban: "DE89370400440532013000".into(), currency: "EUR".into(), created_at: opened(3) },
            ];
            l.cards = vec![
                RawCard { id: 901, account_id: 1, last4: "4242".into() },
                RawCard { id: 902, account_id: 2, last4: "1881".into() },
            ];
        });
        client
    }

    fn with_ledger<R>(&self, f: impl FnOnce(&mut Ledger) -> R) -> R {
        let mut guard = match self.ledger.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(&mut guard)
    }

    /// Count the call and consume one injected failure, if any.
    fn call(&self, op: &str) -> PluginResult<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let injected = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            debug!(op, "Injected sandbox failure");
            return Err(PluginError::upstream(format!("sandbox {}: 503 service unavailable", op)));
        }
        Ok(())
    }

    /// Make the next `n` calls fail with a retryable upstream error.
    pub fn fail_next(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    // === Seeding ===

    pub fn add_account(&self, account: RawAccount) {
        self.with_ledger(|l| l.accounts.push(account));
    }

    pub fn add_transaction(&self, tx: RawTransaction) {
        self.with_ledger(|l| {
            l.transactions.push(tx);
            l.transactions.sort_by_key(|t| t.id);
        });
    }

    pub fn set_balance(&self, balance: RawBalance) {
        self.with_ledger(|l| {
            l.balances.retain(|b| !(b.account_id == balance.account_id && b.currency == balance.currency));
            l.balances.push(balance);
        });
    }

    // === Listings ===

    pub fn list_accounts(&self, offset: u64, limit: usize) -> PluginResult<Listing<RawAccount>> {
        self.call("list_accounts")?;
        Ok(self.with_ledger(|l| slice(&l.accounts, offset, limit)))
    }

    pub fn list_beneficiaries(&self, offset: u64, limit: usize) -> PluginResult<Listing<RawBeneficiary>> {
        self.call("list_beneficiaries")?;
        Ok(self.with_ledger(|l| slice(&l.beneficiaries, offset, limit)))
    }

    pub fn list_cards(&self, offset: u64, limit: usize) -> PluginResult<Listing<RawCard>> {
        self.call("list_cards")?;
        Ok(self.with_ledger(|l| slice(&l.cards, offset, limit)))
    }

    /// Cursor listing: transactions of `account_id` with id above `after`,
    /// plus the cursor for the next call when more remain.
    pub fn list_transactions(
        &self,
        account_id: u64,
        after: Option<u64>,
        limit: usize,
    ) -> PluginResult<(Vec<RawTransaction>, Option<u64>)> {
        self.call("list_transactions")?;
        Ok(self.with_ledger(|l| {
            let remaining: Vec<_> = l
                .transactions
                .iter()
                .filter(|t| t.account_id == account_id && after.is_none_or(|a| t.id > a))
                .cloned()
                .collect();
            let page: Vec<_> = remaining.iter().take(limit).cloned().collect();
            let next = (remaining.len() > page.len()).then(|| page.last().map(|t| t.id)).flatten();
            (page, next)
        }))
    }

    pub fn balances(&self, account_id: u64) -> PluginResult<Vec<RawBalance>> {
        self.call("balances")?;
        Ok(self.with_ledger(|l| {
            l.balances
                .iter()
                .filter(|b| b.account_id == account_id)
                .cloned()
                .collect()
        }))
    }

    // === Writes ===

    pub fn create_beneficiary(&self, name: &str, iban: &str, currency: &str) -> PluginResult<RawBeneficiary> {
        self.call("create_beneficiary")?;
        Ok(self.with_ledger(|l| {
            let beneficiary = RawBeneficiary {
                id: l.next_id(),
                name: name.to_string(),
                iban: iban.to_string(),
                currency: currency.to_string(),
                created_at: Utc::now(),
            };
            l.beneficiaries.push(beneficiary.clone());
            beneficiary
        }))
    }

    /// Book a debit on `account_id`. `state` is the provider state the
    /// transaction starts in.
    pub fn create_debit(
        &self,
        account_id: u64,
        counterparty: Option<u64>,
        value: &str,
        currency: &str,
        state: &str,
        end_to_end: Option<&str>,
    ) -> PluginResult<RawTransaction> {
        self.call("create_debit")?;
        self.with_ledger(|l| {
            if !l.accounts.iter().any(|a| a.id == account_id) {
                return Err(PluginError::upstream_permanent(format!(
                    "sandbox: unknown account {}",
                    account_id
                )));
            }
            let tx = RawTransaction {
                id: l.next_id(),
                account_id,
                value: format!("-{}", value.trim_start_matches('-')),
                currency: currency.to_string(),
                state: state.to_string(),
                counterparty,
                end_to_end: end_to_end.map(str::to_string),
                date: Utc::now(),
            };
            l.transactions.push(tx.clone());
            Ok(tx)
        })
    }

    /// Pending transactions settle the first time their status is read.
    pub fn transaction_status(&self, id: u64) -> PluginResult<Option<RawTransaction>> {
        self.call("transaction_status")?;
        Ok(self.with_ledger(|l| {
            let tx = l.transactions.iter_mut().find(|t| t.id == id)?;
            let current = tx.clone();
            if tx.state == "pending" {
                tx.state = "booked".into();
            }
            Some(current)
        }))
    }

    /// Credit back a debit found by transaction id or end-to-end reference.
    pub fn refund(&self, original: &str, value: &str, currency: &str) -> PluginResult<RawTransaction> {
        self.call("refund")?;
        self.with_ledger(|l| {
            let source = l
                .transactions
                .iter()
                .find(|t| t.id.to_string() == original || t.end_to_end.as_deref() == Some(original))
                .cloned()
                .ok_or_else(|| {
                    PluginError::upstream_permanent(format!("sandbox: unknown transaction {}", original))
                })?;
            let tx = RawTransaction {
                id: l.next_id(),
                account_id: source.account_id,
                value: value.trim_start_matches('-').to_string(),
                currency: currency.to_string(),
                state: "refunded".into(),
                counterparty: source.counterparty,
                end_to_end: source.end_to_end.clone(),
                date: Utc::now(),
            };
            l.transactions.push(tx.clone());
            Ok(tx)
        })
    }

    // === Webhooks ===

    pub fn create_webhook_secret(&self, connector: &str) -> PluginResult<String> {
        self.call("create_webhook_secret")?;
        Ok(self.with_ledger(|l| {
            l.webhook_secrets
                .entry(connector.to_string())
                .or_insert_with(|| format!("whsec_{}", Uuid::new_v4().simple()))
                .clone()
        }))
    }

    pub fn delete_webhook_secret(&self, connector: &str) -> PluginResult<()> {
        self.call("delete_webhook_secret")?;
        self.with_ledger(|l| l.webhook_secrets.remove(connector));
        Ok(())
    }

    pub fn webhook_secret(&self, connector: &str) -> Option<String> {
        self.with_ledger(|l| l.webhook_secrets.get(connector).cloned())
    }

    // === Users ===

    /// Returns the provider's user id.
    pub fn create_user(&self, external_id: &str) -> PluginResult<String> {
        self.call("create_user")?;
        Ok(self.with_ledger(|l| {
            let id = format!("usr_{}", l.next_id());
            l.users.insert(id.clone(), external_id.to_string());
            id
        }))
    }

    /// Start a link flow; returns the authorization code the provider
    /// will hand back on redirect.
    pub fn start_link(&self, user_id: &str, connection_id: Option<u64>) -> PluginResult<String> {
        self.call("start_link")?;
        self.with_ledger(|l| {
            if !l.users.contains_key(user_id) {
                return Err(PluginError::upstream_permanent(format!("sandbox: unknown user {}", user_id)));
            }
            let id = match connection_id {
                Some(id) => id,
                None => l.next_id(),
            };
            let code = format!("code_{}", Uuid::new_v4().simple());
            l.link_codes.insert(
                code.clone(),
                RawConnection {
                    id,
                    user_id: user_id.to_string(),
                    created_at: Utc::now(),
                },
            );
            Ok(code)
        })
    }

    pub fn exchange_code(&self, code: &str) -> PluginResult<RawConnection> {
        self.call("exchange_code")?;
        self.with_ledger(|l| {
            let connection = l
                .link_codes
                .remove(code)
                .ok_or_else(|| PluginError::InvalidRequest(format!("unknown authorization code {}", code)))?;
            l.connections.insert(connection.id, connection.clone());
            Ok(connection)
        })
    }

    pub fn delete_connection(&self, connection_id: u64) -> PluginResult<()> {
        self.call("delete_connection")?;
        self.with_ledger(|l| l.connections.remove(&connection_id));
        Ok(())
    }

    pub fn delete_user(&self, user_id: &str) -> PluginResult<()> {
        self.call("delete_user")?;
        self.with_ledger(|l| {
            l.users.remove(user_id);
            l.connections.retain(|_, c| c.user_id != user_id);
        });
        Ok(())
    }

    pub fn connections(&self, user_id: &str) -> Vec<RawConnection> {
        self.with_ledger(|l| {
            l.connections
                .values()
                .filter(|c| c.user_id == user_id)
                .cloned()
                .collect()
        })
    }

    /// Temporary link tokens live for ten minutes.
    pub fn link_token_ttl(&self) -> Duration {
        Duration::minutes(10)
    }
}

fn slice<T: Clone>(items: &[T], offset: u64, limit: usize) -> Listing<T> {
    let start = (offset as usize).min(items.len());
    let end = start.saturating_add(limit).min(items.len());
    Listing {
        records: items[start..end].to_vec(),
        total: items.len(),
    }
}
