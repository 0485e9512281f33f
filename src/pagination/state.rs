use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Scope of a cursor: the canonical serialization of `from_payload`, or
/// [`ScopeKey::ROOT`] for unscoped fetches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeKey(String);

impl ScopeKey {
    pub const ROOT: &'static str = "_root";

    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// `serde_json` maps are key-sorted, so equal payloads give equal keys
    /// regardless of the order fields arrived in.
    pub fn from_payload(from_payload: Option<&Value>) -> Self {
        match from_payload {
            None | Some(Value::Null) => Self::root(),
            Some(payload) => Self(payload.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }
}

impl fmt::Display for ScopeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Per-scope bookkeeping kept by [`FetchEngine`](super::FetchEngine).
///
/// `state` is the provider's opaque cursor, round-tripped untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchCursor {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,
    pub has_more: bool,
    pub pages_fetched: u64,
    pub total_items: u64,
}

impl Default for FetchCursor {
    fn default() -> Self {
        Self {
            state: None,
            has_more: true,
            pages_fetched: 0,
            total_items: 0,
        }
    }
}

impl FetchCursor {
    pub fn is_exhausted(&self) -> bool {
        !self.has_more
    }
}

/// Cursor owned by [`Paginator`](super::Paginator).
///
/// `last_seen` is the high-water mark: records keyed at or below it were
/// already handed out and are dropped on replay.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaginatedState<K> {
    #[serde(default)]
    pub offset: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<K>,
}

impl<K> Default for PaginatedState<K> {
    fn default() -> Self {
        Self {
            offset: 0,
            next_token: None,
            last_seen: None,
        }
    }
}
