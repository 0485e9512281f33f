use async_trait::async_trait;
use num_traits::Signed;
use tracing::warn;

use super::SandboxPlugin;
use super::client::{
    Listing, RawAccount, RawBalance, RawBeneficiary, RawCard, RawTransaction, SandboxClient,
};
use crate::error::{PluginError, PluginResult};
use crate::models::{
    Metadata, PaymentScheme, PaymentStatus, PaymentType, PspAccount, PspBalance, PspOther,
    PspPayment,
};
use crate::money::{CurrencyTable, MoneyError};
use crate::pagination::{PageRequest, PageSource, PaginatedState, ProviderPage};
use crate::plugin::{FetchNextRequest, FetchNextResponse};

pub(super) const IBAN_METADATA_KEY: &str = "iban";
pub(super) const END_TO_END_METADATA_KEY: &str = "end_to_end";

// ============================================================================
// Page sources
// ============================================================================

type ListFn<R> = fn(&SandboxClient, u64, usize) -> PluginResult<Listing<R>>;

/// Offset listing: `has_more` while `offset + returned < total`.
struct OffsetListing<'a, R> {
    client: &'a SandboxClient,
    list: ListFn<R>,
    key: fn(&R) -> u64,
}

#[async_trait]
impl<'a, R: Send> PageSource for OffsetListing<'a, R> {
    type Record = R;
    type Key = u64;

    async fn next_page(&self, req: &PageRequest) -> PluginResult<ProviderPage<R>> {
        let listing = (self.list)(self.client, req.offset, req.page_size)?;
        let has_more = (req.offset as usize).saturating_add(listing.records.len()) < listing.total;
        Ok(ProviderPage {
            records: listing.records,
            has_more,
            next_token: None,
        })
    }

    fn key(&self, record: &R) -> u64 {
        (self.key)(record)
    }
}

/// Cursor listing of one account's transactions.
struct TransactionPages<'a> {
    client: &'a SandboxClient,
    account_id: u64,
}

#[async_trait]
impl<'a> PageSource for TransactionPages<'a> {
    type Record = RawTransaction;
    type Key = u64;

    async fn next_page(&self, req: &PageRequest) -> PluginResult<ProviderPage<RawTransaction>> {
        let after = req
            .token
            .as_deref()
            .map(|t| {
                t.parse::<u64>()
                    .map_err(|_| PluginError::InvalidRequest(format!("bad transaction cursor {}", t)))
            })
            .transpose()?;
        let (records, next) = self.client.list_transactions(self.account_id, after, req.page_size)?;
        Ok(ProviderPage {
            records,
            has_more: next.is_some(),
            next_token: next.map(|id| id.to_string()),
        })
    }

    fn key(&self, record: &RawTransaction) -> u64 {
        record.id
    }
}

// ============================================================================
// Translation
// ============================================================================

fn parse_money(
    currencies: &CurrencyTable,
    reference: &str,
    value: &str,
    currency: &str,
) -> PluginResult<(num_bigint::BigInt, String)> {
    currencies
        .parse_amount(value, currency)
        .map_err(|err| match err {
            MoneyError::CurrencyNotSupported(code) => PluginError::CurrencyNotSupported(code),
            other => PluginError::malformed(reference, other.to_string()),
        })
}

pub(super) fn account_id(reference: &str) -> PluginResult<u64> {
    reference
        .parse()
        .map_err(|_| PluginError::InvalidRequest(format!("not a sandbox account: {}", reference)))
}

pub(super) fn to_account(currencies: &CurrencyTable, raw: RawAccount) -> PluginResult<PspAccount> {
    Ok(PspAccount {
        reference: raw.id.to_string(),
        created_at: raw.opened_at,
        name: Some(raw.name.clone()),
        default_asset: currencies.format_asset(&raw.currency).ok(),
        metadata: Metadata::new(),
        raw: serde_json::to_value(&raw)?,
    })
}

pub(super) fn to_external_account(
    currencies: &CurrencyTable,
    raw: RawBeneficiary,
) -> PluginResult<PspAccount> {
    let mut metadata = Metadata::new();
    metadata.insert(IBAN_METADATA_KEY.to_string(), raw.iban.clone());
    Ok(PspAccount {
        reference: raw.id.to_string(),
        created_at: raw.created_at,
        name: Some(raw.name.clone()),
        default_asset: currencies.format_asset(&raw.currency).ok(),
        metadata,
        raw: serde_json::to_value(&raw)?,
    })
}

fn payment_status(state: &str) -> PaymentStatus {
    match state {
        "booked" => PaymentStatus::Succeeded,
        "pending" => PaymentStatus::Pending,
        "rejected" => PaymentStatus::Failed,
        "refunded" => PaymentStatus::Refunded,
        "cancelled" => PaymentStatus::Cancelled,
        _ => PaymentStatus::Other,
    }
}

/// Negative values are debits: money leaves the account toward the
/// counterparty. Positive values land on the account.
pub(super) fn to_payment(currencies: &CurrencyTable, raw: RawTransaction) -> PluginResult<PspPayment> {
    let reference = raw.id.to_string();
    let (signed, asset) = parse_money(currencies, &reference, &raw.value, &raw.currency)?;
    let account = raw.account_id.to_string();
    let counterparty = raw.counterparty.map(|c| c.to_string());

    let (payment_type, source, destination) = if signed.is_negative() {
        (PaymentType::Payout, Some(account), counterparty)
    } else {
        (PaymentType::Payin, counterparty, Some(account))
    };

    let mut metadata = Metadata::new();
    if let Some(end_to_end) = &raw.end_to_end {
        metadata.insert(END_TO_END_METADATA_KEY.to_string(), end_to_end.clone());
    }

    Ok(PspPayment {
        parent_reference: None,
        reference,
        created_at: raw.date,
        payment_type,
        amount: signed.abs(),
        asset,
        scheme: PaymentScheme::SepaCredit,
        status: payment_status(&raw.state),
        source_account_reference: source,
        destination_account_reference: destination,
        metadata,
        raw: serde_json::to_value(&raw)?,
    })
}

pub(super) fn to_balance(currencies: &CurrencyTable, raw: RawBalance) -> PluginResult<PspBalance> {
    let account_reference = raw.account_id.to_string();
    let (amount, asset) = parse_money(currencies, &account_reference, &raw.value, &raw.currency)?;
    Ok(PspBalance {
        account_reference,
        created_at: chrono::Utc::now(),
        amount,
        asset,
    })
}

fn to_other(raw: RawCard) -> PluginResult<PspOther> {
    Ok(PspOther {
        id: raw.id.to_string(),
        other: serde_json::to_value(&raw)?,
    })
}

// ============================================================================
// Fetch operations
// ============================================================================

impl SandboxPlugin {
    pub(super) async fn fetch_accounts(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        let source = OffsetListing {
            client: &self.client,
            list: SandboxClient::list_accounts,
            key: |a: &RawAccount| a.id,
        };
        let state: PaginatedState<u64> = req.state_as()?;
        self.accounts
            .fetch_next(&source, state, req.page_size, |raw| to_account(&self.currencies, raw))
            .await?
            .into_response()
    }

    pub(super) async fn fetch_beneficiaries(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspAccount>> {
        let source = OffsetListing {
            client: &self.client,
            list: SandboxClient::list_beneficiaries,
            key: |b: &RawBeneficiary| b.id,
        };
        let state: PaginatedState<u64> = req.state_as()?;
        self.accounts
            .fetch_next(&source, state, req.page_size, |raw| {
                to_external_account(&self.currencies, raw)
            })
            .await?
            .into_response()
    }

    pub(super) async fn fetch_cards(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspOther>> {
        let source = OffsetListing {
            client: &self.client,
            list: SandboxClient::list_cards,
            key: |c: &RawCard| c.id,
        };
        let state: PaginatedState<u64> = req.state_as()?;
        self.accounts
            .fetch_next(&source, state, req.page_size, to_other)
            .await?
            .into_response()
    }

    /// Payments of the account in `from_payload`.
    pub(super) async fn fetch_payments(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspPayment>> {
        let parent: PspAccount = req.from_payload_as()?;
        let source = TransactionPages {
            client: &self.client,
            account_id: account_id(&parent.reference)?,
        };
        let state: PaginatedState<u64> = req.state_as()?;
        self.transactions
            .fetch_next(&source, state, req.page_size, |raw| to_payment(&self.currencies, raw))
            .await?
            .into_response()
    }

    /// One snapshot per currency held by the account in `from_payload`.
    /// Never paginated.
    pub(super) async fn fetch_balances(
        &self,
        req: FetchNextRequest,
    ) -> PluginResult<FetchNextResponse<PspBalance>> {
        let parent: PspAccount = req.from_payload_as()?;
        let raw = self.client.balances(account_id(&parent.reference)?)?;

        let mut items = Vec::with_capacity(raw.len());
        for balance in raw {
            match to_balance(&self.currencies, balance) {
                Ok(balance) => items.push(balance),
                Err(err) if err.is_record_level() => {
                    warn!(account = %parent.reference, error = %err, "Skipping balance");
                }
                Err(err) => return Err(err),
            }
        }
        Ok(FetchNextResponse {
            items,
            new_state: None,
            has_more: false,
        })
    }
}
