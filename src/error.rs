//! Plugin Error Types
//!
//! One taxonomy shared by every connector operation. Callers branch on
//! [`PluginError::class`] to decide between retrying, surfacing the problem
//! to whoever supplied the input, or paging an operator.

use thiserror::Error;

use crate::money::MoneyError;

/// How orchestration should react to a failed operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Transient; re-invoke later with the same input.
    RetryLater,
    /// The request or configuration must change before a retry can succeed.
    FixInput,
    /// Contract violation or provider-side fault nobody can fix by retrying.
    ContactSupport,
}

#[derive(Error, Debug, Clone)]
pub enum PluginError {
    // === Caller Errors ===
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    // === Lifecycle / Contract ===
    #[error("connector not yet installed")]
    NotYetInstalled,

    #[error("operation not implemented: {0}")]
    NotImplemented(&'static str),

    // === Per-Record Errors ===
    #[error("currency not supported: {0}")]
    CurrencyNotSupported(String),

    #[error("malformed record {reference}: {reason}")]
    MalformedRecord { reference: String, reason: String },

    // === Webhooks ===
    #[error("webhook verification failed: {0}")]
    WebhookVerificationFailed(String),

    #[error("translated events out of order: {0}")]
    EventOrder(String),

    // === Upstream I/O ===
    #[error("upstream error: {message}")]
    Upstream { message: String, retryable: bool },

    #[error("operation cancelled")]
    Cancelled,

    #[error("storage error: {0}")]
    Storage(String),
}

impl PluginError {
    /// Wrap a transient provider failure.
    pub fn upstream(message: impl Into<String>) -> Self {
        PluginError::Upstream {
            message: message.into(),
            retryable: true,
        }
    }

    /// Wrap a provider failure that retrying cannot fix (4xx-style).
    pub fn upstream_permanent(message: impl Into<String>) -> Self {
        PluginError::Upstream {
            message: message.into(),
            retryable: false,
        }
    }

    pub fn malformed(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        PluginError::MalformedRecord {
            reference: reference.into(),
            reason: reason.into(),
        }
    }

    /// Get the error code for API responses and log fields
    pub fn code(&self) -> &'static str {
        match self {
            PluginError::InvalidConfig(_) => "INVALID_CONFIG",
            PluginError::InvalidRequest(_) => "INVALID_REQUEST",
            PluginError::NotYetInstalled => "NOT_YET_INSTALLED",
            PluginError::NotImplemented(_) => "NOT_IMPLEMENTED",
            PluginError::CurrencyNotSupported(_) => "CURRENCY_NOT_SUPPORTED",
            PluginError::MalformedRecord { .. } => "MALFORMED_RECORD",
            PluginError::WebhookVerificationFailed(_) => "WEBHOOK_VERIFICATION_FAILED",
            PluginError::EventOrder(_) => "EVENT_ORDER_VIOLATION",
            PluginError::Upstream { .. } => "UPSTREAM_ERROR",
            PluginError::Cancelled => "CANCELLED",
            PluginError::Storage(_) => "STORAGE_ERROR",
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            PluginError::Upstream { retryable: true, .. }
            | PluginError::Cancelled
            | PluginError::Storage(_) => ErrorClass::RetryLater,
            PluginError::InvalidConfig(_)
            | PluginError::InvalidRequest(_)
            | PluginError::NotYetInstalled
            | PluginError::CurrencyNotSupported(_)
            | PluginError::MalformedRecord { .. }
            | PluginError::WebhookVerificationFailed(_)
            | PluginError::Upstream {
                retryable: false, ..
            } => ErrorClass::FixInput,
            PluginError::NotImplemented(_) | PluginError::EventOrder(_) => {
                ErrorClass::ContactSupport
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::RetryLater
    }

    /// Errors scoped to a single provider record. The surrounding page or
    /// webhook keeps going without it.
    pub fn is_record_level(&self) -> bool {
        matches!(
            self,
            PluginError::CurrencyNotSupported(_) | PluginError::MalformedRecord { .. }
        )
    }
}

impl From<MoneyError> for PluginError {
    fn from(err: MoneyError) -> Self {
        match err {
            MoneyError::CurrencyNotSupported(code) => PluginError::CurrencyNotSupported(code),
            other => PluginError::InvalidRequest(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for PluginError {
    fn from(err: serde_json::Error) -> Self {
        PluginError::InvalidRequest(format!("malformed json: {}", err))
    }
}

impl From<reqwest::Error> for PluginError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = match err.status() {
            Some(status) => status.is_server_error() || status.as_u16() == 429,
            None => true,
        };
        PluginError::Upstream {
            message: err.to_string(),
            retryable,
        }
    }
}

pub type PluginResult<T> = Result<T, PluginError>;
