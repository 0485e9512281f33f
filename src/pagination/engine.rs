//! Scoped cursor table for one connector and entity kind.
//!
//! Locking:
//! - The scope table is a `DashMap`; a shard lock is held only while the
//!   slot `Arc` is looked up or inserted.
//! - Each slot's cursor sits behind a `std::sync::Mutex` taken only to read
//!   or commit, never across an `.await`.
//! - Each slot also has an async gate so two fetches on the same scope run
//!   one after the other instead of both reading the same cursor. Different
//!   scopes never share a gate.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::{FetchCursor, ScopeKey};
use crate::error::{PluginError, PluginResult};
use crate::plugin::{FetchNextRequest, FetchNextResponse};
use crate::storage::{StateKey, Storage};

#[derive(Default)]
struct ScopeSlot {
    gate: tokio::sync::Mutex<()>,
    /// `None` until loaded from storage.
    cursor: Mutex<Option<FetchCursor>>,
}

impl ScopeSlot {
    fn read(&self) -> Option<FetchCursor> {
        match self.cursor.lock() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn write(&self, cursor: FetchCursor) {
        let mut guard = match self.cursor.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = Some(cursor);
    }
}

pub struct FetchEngine {
    connector: String,
    kind: String,
    page_size: usize,
    storage: Arc<dyn Storage>,
    scopes: DashMap<ScopeKey, Arc<ScopeSlot>>,
    /// Bumped by `reset`; commits from fetches started before it are dropped.
    generation: AtomicU64,
}

impl FetchEngine {
    pub fn new(connector: &str, kind: &str, page_size: usize, storage: Arc<dyn Storage>) -> Self {
        Self {
            connector: connector.to_string(),
            kind: kind.to_string(),
            page_size,
            storage,
            scopes: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    fn slot(&self, scope: &ScopeKey) -> Arc<ScopeSlot> {
        self.scopes.entry(scope.clone()).or_default().value().clone()
    }

    fn state_key(&self, scope: &ScopeKey) -> StateKey {
        StateKey::new(&self.connector, &self.kind, scope.as_str())
    }

    async fn load(&self, scope: &ScopeKey, slot: &ScopeSlot) -> PluginResult<FetchCursor> {
        if let Some(cursor) = slot.read() {
            return Ok(cursor);
        }
        let key = self.state_key(scope);
        let cursor = match self.storage.get_state(&key).await? {
            Some(blob) => serde_json::from_value(blob).map_err(|e| {
                error!(key = %key, error = %e, "Unreadable persisted cursor");
                PluginError::Storage(format!("unreadable cursor {}: {}", key, e))
            })?,
            None => FetchCursor::default(),
        };
        slot.write(cursor.clone());
        Ok(cursor)
    }

    /// Fetch the next page for the scope of `from_payload`.
    ///
    /// `fetch` receives the stored cursor and performs the provider call.
    /// The cursor is committed only if `fetch` succeeds and the call was not
    /// cancelled. An exhausted scope returns an empty page without calling
    /// `fetch`.
    pub async fn fetch_next<T, F, Fut>(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
        fetch: F,
    ) -> PluginResult<FetchNextResponse<T>>
    where
        F: FnOnce(FetchNextRequest) -> Fut,
        Fut: Future<Output = PluginResult<FetchNextResponse<T>>>,
    {
        let scope = ScopeKey::from_payload(from_payload);
        let slot = self.slot(&scope);
        let _gate = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(PluginError::Cancelled),
            guard = slot.gate.lock() => guard,
        };

        let generation = self.generation.load(Ordering::SeqCst);
        let cursor = self.load(&scope, &slot).await?;
        if cursor.is_exhausted() {
            debug!(connector = %self.connector, kind = %self.kind, scope = %scope, "Scope exhausted, skipping provider");
            return Ok(FetchNextResponse {
                items: Vec::new(),
                new_state: cursor.state,
                has_more: false,
            });
        }

        let req = FetchNextRequest {
            from_payload: from_payload.cloned(),
            state: cursor.state.clone(),
            page_size: self.page_size,
        };
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!(connector = %self.connector, kind = %self.kind, scope = %scope, "Fetch cancelled, cursor unchanged");
                return Err(PluginError::Cancelled);
            }
            resp = fetch(req) => resp?,
        };

        let next = FetchCursor {
            state: resp.new_state.clone().or(cursor.state),
            has_more: resp.has_more,
            pages_fetched: cursor.pages_fetched + 1,
            total_items: cursor.total_items + resp.items.len() as u64,
        };

        if self.generation.load(Ordering::SeqCst) != generation {
            warn!(connector = %self.connector, kind = %self.kind, scope = %scope, "Reset during fetch, dropping cursor update");
            return Ok(resp);
        }

        let key = self.state_key(&scope);
        self.storage
            .save_state(&key, &serde_json::to_value(&next)?)
            .await?;
        if self.generation.load(Ordering::SeqCst) != generation {
            warn!(key = %key, "Reset during cursor save, clearing it again");
            self.storage.clear_state(&key).await?;
            return Ok(resp);
        }
        debug!(
            connector = %self.connector,
            kind = %self.kind,
            scope = %scope,
            items = resp.items.len(),
            has_more = next.has_more,
            pages = next.pages_fetched,
            "Cursor committed"
        );
        slot.write(next);

        Ok(resp)
    }

    /// Drive one scope until the provider reports no more data.
    pub async fn fetch_all<T, F, Fut>(
        &self,
        from_payload: Option<&Value>,
        cancel: &CancellationToken,
        mut fetch: F,
    ) -> PluginResult<Vec<T>>
    where
        F: FnMut(FetchNextRequest) -> Fut,
        Fut: Future<Output = PluginResult<FetchNextResponse<T>>>,
    {
        let mut all = Vec::new();
        loop {
            let page = self.fetch_next(from_payload, cancel, &mut fetch).await?;
            all.extend(page.items);
            if !page.has_more {
                return Ok(all);
            }
        }
    }

    /// In-memory cursor of a scope, if it was loaded.
    pub fn status(&self, from_payload: Option<&Value>) -> Option<FetchCursor> {
        self.scopes
            .get(&ScopeKey::from_payload(from_payload))
            .and_then(|slot| slot.read())
    }

    pub fn scopes(&self) -> Vec<ScopeKey> {
        let mut scopes: Vec<_> = self.scopes.iter().map(|e| e.key().clone()).collect();
        scopes.sort();
        scopes
    }

    /// Forget every cursor of this kind, in memory and in storage.
    pub async fn reset(&self) -> PluginResult<()> {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.scopes.clear();
        self.storage.clear_states(&self.connector, &self.kind).await?;
        info!(connector = %self.connector, kind = %self.kind, "Fetch state reset");
        Ok(())
    }
}
