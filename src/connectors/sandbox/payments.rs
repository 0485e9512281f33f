use tracing::info;

use super::SandboxPlugin;
use super::fetch::{account_id, to_external_account, to_payment};
use crate::error::{PluginError, PluginResult};
use crate::models::{PaymentType, PspAccount, PspPayment};
use crate::money::{format_amount, parse_asset};
use crate::plugin::{
    CreateBankAccountRequest, CreateBankAccountResponse, CreatedPayment, PaymentInitiationRequest,
    PollStatusResponse, ReversalRequest,
};

/// Bank account metadata naming the beneficiary currency.
pub(super) const CURRENCY_METADATA_KEY: &str = "currency";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Initiation {
    /// Booked immediately between two sandbox accounts.
    Transfer,
    /// Starts pending and settles on the first status poll.
    Payout,
}

fn required_account<'a>(account: &'a Option<PspAccount>, side: &str) -> PluginResult<&'a PspAccount> {
    account
        .as_ref()
        .ok_or_else(|| PluginError::InvalidRequest(format!("{} account is required", side)))
}

impl SandboxPlugin {
    /// `(currency, decimal string)` for a canonical amount, checked against
    /// the currencies this provider supports.
    fn provider_amount(&self, amount: &num_bigint::BigInt, asset: &str) -> PluginResult<(String, String)> {
        let (code, precision) = parse_asset(asset)?;
        let supported = self.currencies.precision(&code)?;
        if supported != precision {
            return Err(PluginError::InvalidRequest(format!(
                "{} has precision {}, not {}",
                code, supported, precision
            )));
        }
        Ok((code, format_amount(amount, precision)))
    }

    pub(super) fn create_beneficiary(
        &self,
        req: CreateBankAccountRequest,
    ) -> PluginResult<CreateBankAccountResponse> {
        let bank_account = req.bank_account;
        let iban = bank_account
            .iban
            .as_deref()
            .ok_or_else(|| PluginError::InvalidRequest("sandbox beneficiaries need an iban".into()))?;
        let currency = bank_account
            .metadata
            .get(CURRENCY_METADATA_KEY)
            .map(String::as_str)
            .unwrap_or("EUR");
        self.currencies.precision(currency)?;

        let raw = self.client.create_beneficiary(&bank_account.name, iban, currency)?;
        info!(beneficiary = raw.id, "Created sandbox beneficiary");
        Ok(CreateBankAccountResponse {
            related_account: to_external_account(&self.currencies, raw)?,
        })
    }

    pub(super) fn initiate(
        &self,
        req: PaymentInitiationRequest,
        kind: Initiation,
    ) -> PluginResult<CreatedPayment> {
        let pi = req.payment_initiation;
        pi.validate()?;
        let source = account_id(&required_account(&pi.source_account, "source")?.reference)?;
        let destination = account_id(&required_account(&pi.destination_account, "destination")?.reference)?;
        let (currency, value) = self.provider_amount(&pi.amount, &pi.asset)?;

        let state = match kind {
            Initiation::Transfer => "booked",
            Initiation::Payout => "pending",
        };
        let raw = self.client.create_debit(
            source,
            Some(destination),
            &value,
            &currency,
            state,
            Some(&pi.reference),
        )?;
        info!(reference = %pi.reference, transaction = raw.id, ?kind, "Initiated sandbox debit");

        match kind {
            Initiation::Transfer => {
                let mut payment = to_payment(&self.currencies, raw)?;
                payment.payment_type = PaymentType::Transfer;
                Ok(CreatedPayment::Completed(payment))
            }
            Initiation::Payout => Ok(CreatedPayment::Polling(raw.id.to_string())),
        }
    }

    /// `payment` stays empty while the debit is pending.
    pub(super) fn payout_status(&self, payout_id: &str) -> PluginResult<PollStatusResponse> {
        let id: u64 = payout_id
            .parse()
            .map_err(|_| PluginError::InvalidRequest(format!("not a sandbox payout: {}", payout_id)))?;
        let raw = self
            .client
            .transaction_status(id)?
            .ok_or_else(|| PluginError::InvalidRequest(format!("unknown payout {}", payout_id)))?;

        let error = match raw.state.as_str() {
            "pending" => return Ok(PollStatusResponse::default()),
            "rejected" => Some(format!("payout {} rejected", payout_id)),
            _ => None,
        };
        Ok(PollStatusResponse {
            payment: Some(to_payment(&self.currencies, raw)?),
            error,
        })
    }

    pub(super) fn reverse(&self, req: ReversalRequest, kind: PaymentType) -> PluginResult<PspPayment> {
        if req.reference.trim().is_empty() {
            return Err(PluginError::InvalidRequest("reversal reference is empty".into()));
        }
        if req.amount.sign() != num_bigint::Sign::Plus {
            return Err(PluginError::InvalidRequest(format!(
                "{}: amount must be positive",
                req.reference
            )));
        }
        if req.asset != req.related_payment_initiation.asset {
            return Err(PluginError::InvalidRequest(format!(
                "{}: asset differs from the original payment",
                req.reference
            )));
        }
        let (currency, value) = self.provider_amount(&req.amount, &req.asset)?;
        let original = req.related_payment_initiation.reference;

        let raw = self.client.refund(&original, &value, &currency)?;
        info!(reference = %req.reference, original = %original, "Reversed sandbox debit");

        let mut payment = to_payment(&self.currencies, raw)?;
        payment.parent_reference = Some(original);
        payment.payment_type = kind;
        Ok(payment)
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing;
    use super::*;
    use crate::models::{Metadata, PaymentStatus, PspPaymentInitiation};
    use crate::plugin::{BankAccount, Plugin};
    use chrono::Utc;
    use num_bigint::BigInt;
    use serde_json::json;
    use uuid::Uuid;

    fn account(reference: &str) -> PspAccount {
        PspAccount {
            reference: reference.into(),
            created_at: Utc::now(),
            name: None,
            default_asset: Some("EUR/2".into()),
            metadata: Metadata::new(),
            raw: json!({"id": reference}),
        }
    }

    fn initiation(reference: &str, amount: i64, asset: &str) -> PspPaymentInitiation {
        PspPaymentInitiation {
            reference: reference.into(),
            created_at: Utc::now(),
            description: "invoice".into(),
            source_account: Some(account("1")),
            destination_account: Some(account("501")),
            amount: BigInt::from(amount),
            asset: asset.into(),
            metadata: Metadata::new(),
        }
    }

    fn reversal(reference: &str, original: PspPaymentInitiation, amount: i64) -> ReversalRequest {
        ReversalRequest {
            reference: reference.into(),
            created_at: Utc::now(),
            description: String::new(),
            asset: original.asset.clone(),
            related_payment_initiation: original,
            amount: BigInt::from(amount),
            metadata: Metadata::new(),
        }
    }

    #[tokio::test]
    async fn test_transfer_completes() {
        let (plugin, _) = testing::plugin();
        let created = plugin
            .create_transfer(PaymentInitiationRequest {
                payment_initiation: initiation("tr_1", 1050, "EUR/2"),
            })
            .await
            .unwrap();
        let CreatedPayment::Completed(payment) = created else {
            panic!("transfer should complete synchronously");
        };
        assert_eq!(payment.payment_type, PaymentType::Transfer);
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.amount, BigInt::from(1050));
        assert_eq!(payment.source_account_reference.as_deref(), Some("1"));
        assert_eq!(payment.destination_account_reference.as_deref(), Some("501"));
        assert_eq!(payment.metadata["end_to_end"], "tr_1");
    }

    #[tokio::test]
    async fn test_payout_polls_then_settles() {
        let (plugin, _) = testing::plugin();
        let created = plugin
            .create_payout(PaymentInitiationRequest {
                payment_initiation: initiation("po_1", 700, "EUR/2"),
            })
            .await
            .unwrap();
        let CreatedPayment::Polling(id) = created else {
            panic!("payout should poll");
        };

        let first = plugin.poll_payout_status(&id).await.unwrap();
        assert!(first.payment.is_none());
        let second = plugin.poll_payout_status(&id).await.unwrap();
        let payment = second.payment.unwrap();
        assert_eq!(payment.status, PaymentStatus::Succeeded);
        assert_eq!(payment.amount, BigInt::from(700));
        assert!(second.error.is_none());
    }

    #[tokio::test]
    async fn test_initiation_checks() {
        let (plugin, _) = testing::plugin();

        let err = plugin
            .create_transfer(PaymentInitiationRequest {
                payment_initiation: initiation("tr_2", 100, "JPY/0"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "CURRENCY_NOT_SUPPORTED");

        let err = plugin
            .create_transfer(PaymentInitiationRequest {
                payment_initiation: initiation("tr_3", 100, "EUR/3"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let mut pi = initiation("tr_4", 100, "EUR/2");
        pi.source_account = None;
        let err = plugin
            .create_transfer(PaymentInitiationRequest { payment_initiation: pi })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");

        let err = plugin
            .create_transfer(PaymentInitiationRequest {
                payment_initiation: initiation("tr_5", 0, "EUR/2"),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REQUEST");
    }

    #[tokio::test]
    async fn test_reverse_payout_links_parent() {
        let (plugin, _) = testing::plugin();
        let pi = initiation("po_9", 2500, "EUR/2");
        plugin
            .create_payout(PaymentInitiationRequest {
                payment_initiation: pi.clone(),
            })
            .await
            .unwrap();

        let reversed = plugin.reverse_payout(reversal("rev_1", pi.clone(), 2500)).await.unwrap();
        assert_eq!(reversed.parent_reference.as_deref(), Some("po_9"));
        assert_eq!(reversed.payment_type, PaymentType::Payout);
        assert_eq!(reversed.status, PaymentStatus::Refunded);
        assert_eq!(reversed.amount, BigInt::from(2500));

        let mut other = pi;
        other.reference = "po_unknown".into();
        let err = plugin.reverse_payout(reversal("rev_2", other, 100)).await.unwrap_err();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_create_bank_account() {
        let (plugin, _) = testing::plugin();
        let mut metadata = Metadata::new();
        metadata.insert(CURRENCY_METADATA_KEY.into(), "GBP".into());
        let resp = plugin
            .create_bank_account(CreateBankAccountRequest {
                bank_account: BankAccount {
                    id: Uuid::new_v4(),
                    created_at: Utc::now(),
                    name: "Landlord".into(),
                    iban: Some("GB33BUKB20201555555555".into()),
                    account_number: None,
                    swift_bic_code: None,
                    country: Some("GB".into()),
                    metadata,
                },
            })
            .await
            .unwrap();
        assert_eq!(resp.related_account.default_asset.as_deref(), Some("GBP/2"));
        assert_eq!(resp.related_account.name.as_deref(), Some("Landlord"));
    }
}
