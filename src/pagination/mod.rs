//! Fetch-state pagination.
//!
//! Two layers:
//! - [`Paginator`] lives inside a plugin and turns a provider's raw page
//!   call into a `FetchNextResponse` holding at most `page_size` canonical
//!   items plus an opaque cursor.
//! - [`FetchEngine`] lives in the connector and owns those cursors, one per
//!   (entity kind, scope). It persists a cursor only after the plugin
//!   call succeeds.

mod engine;
mod paginator;
mod state;

pub use engine::FetchEngine;
#[cfg(test)]
pub(crate) use paginator::mock;
pub use paginator::{
    OffsetAdvance, PageOutcome, PageRequest, PageSource, PaginationMode, Paginator, ProviderPage,
};
pub use state::{FetchCursor, PaginatedState, ScopeKey};

use std::fmt;

/// Entity kinds with their own cursor table.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FetchKind {
    Accounts,
    ExternalAccounts,
    Balances,
    Payments,
    Orders,
    Conversions,
    Others(String),
}

impl fmt::Display for FetchKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchKind::Accounts => f.write_str("accounts"),
            FetchKind::ExternalAccounts => f.write_str("external_accounts"),
            FetchKind::Balances => f.write_str("balances"),
            FetchKind::Payments => f.write_str("payments"),
            FetchKind::Orders => f.write_str("orders"),
            FetchKind::Conversions => f.write_str("conversions"),
            FetchKind::Others(name) => write!(f, "others/{}", name),
        }
    }
}
