//! Fill-until-enough pagination over a provider's raw page primitive.
//!
//! One call to [`Paginator::fetch_next`] may read several provider pages:
//! records below the high-water mark and records whose translation fails
//! with a record-level error do not count toward `page_size`, so the loop
//! keeps reading while `collected < page_size` and the provider has more.
//!
//! Cursor rules:
//! - A fully consumed provider page moves the offset by `page_size`
//!   ([`OffsetAdvance::PageSize`]) however many records were usable.
//! - When `page_size` is reached mid-page the surplus is left in place: the
//!   offset stays at that page and the high-water mark is the last record
//!   handed out, so the next call re-reads the page and skips what was sent.
//! - The state is only returned on success. An I/O error leaves the caller
//!   holding the previous state.

use std::fmt::Debug;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use super::PaginatedState;
use crate::error::{PluginError, PluginResult};
use crate::plugin::FetchNextResponse;

/// How far a fully consumed provider page moves the offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OffsetAdvance {
    /// Always `page_size`, even when the provider returned fewer records.
    #[default]
    PageSize,
    /// The number of records the provider actually returned.
    Consumed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaginationMode {
    Offset(OffsetAdvance),
    /// Seek/next-link pagination driven by an opaque provider token.
    Token,
}

impl Default for PaginationMode {
    fn default() -> Self {
        PaginationMode::Offset(OffsetAdvance::default())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub token: Option<String>,
    pub page_size: usize,
}

#[derive(Debug, Clone)]
pub struct ProviderPage<R> {
    pub records: Vec<R>,
    pub has_more: bool,
    pub next_token: Option<String>,
}

impl<R> ProviderPage<R> {
    pub fn last(records: Vec<R>) -> Self {
        Self {
            records,
            has_more: false,
            next_token: None,
        }
    }
}

/// A provider's raw "give me the next page" call.
///
/// Records must come back in ascending [`PageSource::key`] order.
#[async_trait]
pub trait PageSource: Send + Sync {
    type Record: Send;
    type Key: Ord + Clone + Debug + Serialize + DeserializeOwned + Send + Sync;

    async fn next_page(&self, req: &PageRequest) -> PluginResult<ProviderPage<Self::Record>>;

    fn key(&self, record: &Self::Record) -> Self::Key;
}

#[derive(Debug, Clone)]
pub struct PageOutcome<T, K> {
    pub items: Vec<T>,
    pub state: PaginatedState<K>,
    pub has_more: bool,
    /// Provider pages read during this call.
    pub provider_pages: usize,
    /// Records dropped for record-level errors.
    pub skipped: usize,
}

impl<T, K: Serialize> PageOutcome<T, K> {
    pub fn into_response(self) -> PluginResult<FetchNextResponse<T>> {
        Ok(FetchNextResponse {
            items: self.items,
            new_state: Some(serde_json::to_value(&self.state)?),
            has_more: self.has_more,
        })
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Paginator {
    mode: PaginationMode,
    max_provider_pages: usize,
}

impl Default for Paginator {
    fn default() -> Self {
        Self::new(PaginationMode::default())
    }
}

impl Paginator {
    pub const DEFAULT_MAX_PROVIDER_PAGES: usize = 50;

    pub fn new(mode: PaginationMode) -> Self {
        Self {
            mode,
            max_provider_pages: Self::DEFAULT_MAX_PROVIDER_PAGES,
        }
    }

    pub fn offset() -> Self {
        Self::new(PaginationMode::Offset(OffsetAdvance::PageSize))
    }

    pub fn token() -> Self {
        Self::new(PaginationMode::Token)
    }

    /// Cap on provider reads per call. Hitting it returns what was collected
    /// with `has_more = true`.
    pub fn with_max_provider_pages(mut self, max: usize) -> Self {
        self.max_provider_pages = max.max(1);
        self
    }

    pub fn mode(&self) -> PaginationMode {
        self.mode
    }

    pub async fn fetch_next<S, T, F>(
        &self,
        source: &S,
        state: PaginatedState<S::Key>,
        page_size: usize,
        mut translate: F,
    ) -> PluginResult<PageOutcome<T, S::Key>>
    where
        S: PageSource + ?Sized,
        F: FnMut(S::Record) -> PluginResult<T> + Send,
        T: Send,
    {
        if page_size == 0 {
            return Err(PluginError::InvalidRequest("page size must be positive".into()));
        }

        let mut state = state;
        let mut items: Vec<T> = Vec::with_capacity(page_size);
        let mut skipped = 0usize;
        let mut provider_pages = 0usize;

        let has_more = loop {
            let req = PageRequest {
                offset: state.offset,
                token: state.next_token.clone(),
                page_size,
            };
            let page = source.next_page(&req).await?;
            provider_pages += 1;

            let raw_len = page.records.len();
            let mut high_water = state.last_seen.clone();
            let mut stopped_mid_page = false;

            for record in page.records {
                if items.len() >= page_size {
                    stopped_mid_page = true;
                    break;
                }
                let key = source.key(&record);
                if high_water.as_ref().is_some_and(|seen| key <= *seen) {
                    continue;
                }
                match translate(record) {
                    Ok(item) => items.push(item),
                    Err(err) if err.is_record_level() => {
                        skipped += 1;
                        warn!(key = ?key, error = %err, code = err.code(), "Skipping provider record");
                    }
                    Err(err) => return Err(err),
                }
                high_water = Some(key);
            }
            state.last_seen = high_water;

            if stopped_mid_page {
                debug!(offset = state.offset, raw = raw_len, "Page size reached mid provider page");
                break true;
            }

            let provider_has_more = match self.mode {
                PaginationMode::Offset(advance) => {
                    if raw_len > 0 {
                        state.offset += match advance {
                            OffsetAdvance::PageSize => page_size as u64,
                            OffsetAdvance::Consumed => raw_len as u64,
                        };
                    }
                    page.has_more && raw_len > 0
                }
                PaginationMode::Token => {
                    let advanced = page.next_token.is_some() && page.next_token != state.next_token;
                    if let Some(token) = page.next_token {
                        state.next_token = Some(token);
                    }
                    page.has_more && advanced
                }
            };

            debug!(
                offset = state.offset,
                raw = raw_len,
                collected = items.len(),
                provider_has_more,
                "Provider page consumed"
            );

            if !provider_has_more {
                break false;
            }
            if items.len() >= page_size || provider_pages >= self.max_provider_pages {
                break true;
            }
        };

        Ok(PageOutcome {
            items,
            state,
            has_more,
            provider_pages,
            skipped,
        })
    }
}

#[cfg(test)]
pub mod mock {
    //! Scripted in-memory provider for paginator tests.

    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, PartialEq)]
    pub struct MockRecord {
        pub id: u64,
        pub currency: &'static str,
    }

    pub struct MockSource {
        records: Vec<MockRecord>,
        pub calls: AtomicUsize,
        pub requests: Mutex<Vec<PageRequest>>,
        fail_on_call: Mutex<Option<usize>>,
        /// Return up to this many records regardless of the requested size.
        serve_size: Option<usize>,
    }

    impl MockSource {
        pub fn new(records: Vec<MockRecord>) -> Self {
            Self {
                records,
                calls: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                fail_on_call: Mutex::new(None),
                serve_size: None,
            }
        }

        pub fn with_serve_size(mut self, size: usize) -> Self {
            self.serve_size = Some(size);
            self
        }

        pub fn fail_on_call(&self, call: usize) {
            *self.fail_on_call.lock().unwrap() = Some(call);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl PageSource for MockSource {
        type Record = MockRecord;
        type Key = u64;

        async fn next_page(&self, req: &PageRequest) -> PluginResult<ProviderPage<MockRecord>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            self.requests.lock().unwrap().push(req.clone());
            if *self.fail_on_call.lock().unwrap() == Some(call) {
                return Err(PluginError::upstream("connection reset"));
            }

            let start = match &req.token {
                Some(token) => token.parse::<usize>().unwrap(),
                None => req.offset as usize,
            };
            let size = self.serve_size.unwrap_or(req.page_size);
            let end = (start + size).min(self.records.len());
            let records = self.records.get(start..end).unwrap_or_default().to_vec();
            let has_more = end < self.records.len();
            Ok(ProviderPage {
                records,
                has_more,
                next_token: has_more.then(|| end.to_string()),
            })
        }

        fn key(&self, record: &MockRecord) -> u64 {
            record.id
        }
    }

    pub fn records(currencies: &[&'static str]) -> Vec<MockRecord> {
        currencies
            .iter()
            .enumerate()
            .map(|(i, currency)| MockRecord {
                id: i as u64 + 1,
                currency,
            })
            .collect()
    }

    pub fn translate(record: MockRecord) -> PluginResult<u64> {
        if record.currency == "EUR" {
            Ok(record.id)
        } else {
            Err(PluginError::CurrencyNotSupported(record.currency.to_string()))
        }
    }
}
