use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::warn;

use crate::models::{ConnectionHealth, WebhookEvent};

/// Provider connection state → [`ConnectionHealth`].
///
/// States the provider never documented fall back to
/// [`ConnectionHealth::TemporaryError`] unless told otherwise, and are
/// logged so the table can be extended.
#[derive(Debug, Clone)]
pub struct HealthMap {
    states: HashMap<String, ConnectionHealth>,
    fallback: ConnectionHealth,
}

impl Default for HealthMap {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMap {
    pub fn new() -> Self {
        Self {
            states: HashMap::new(),
            fallback: ConnectionHealth::TemporaryError,
        }
    }

    fn with(mut self, health: ConnectionHealth, states: &[&str]) -> Self {
        for state in states {
            self.states.insert(state.to_string(), health);
        }
        self
    }

    pub fn ok(self, states: &[&str]) -> Self {
        self.with(ConnectionHealth::Ok, states)
    }

    pub fn user_action(self, states: &[&str]) -> Self {
        self.with(ConnectionHealth::UserActionNeeded, states)
    }

    pub fn temporary(self, states: &[&str]) -> Self {
        self.with(ConnectionHealth::TemporaryError, states)
    }

    pub fn non_recoverable(self, states: &[&str]) -> Self {
        self.with(ConnectionHealth::NonRecoverable, states)
    }

    pub fn with_fallback(mut self, fallback: ConnectionHealth) -> Self {
        self.fallback = fallback;
        self
    }

    pub fn classify(&self, state: &str) -> ConnectionHealth {
        match self.states.get(state) {
            Some(health) => *health,
            None => {
                warn!(state, fallback = %self.fallback, "Unmapped provider connection state");
                self.fallback
            }
        }
    }

    /// `None` when the state is healthy.
    pub fn disconnected_event(
        &self,
        connection_id: &str,
        state: &str,
        reason: Option<String>,
        at: DateTime<Utc>,
    ) -> Option<WebhookEvent> {
        match self.classify(state) {
            ConnectionHealth::Ok => None,
            health => Some(WebhookEvent::UserConnectionDisconnected {
                connection_id: connection_id.to_string(),
                health,
                reason,
                at,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> HealthMap {
        HealthMap::new()
            .ok(&["", "null"])
            .user_action(&["SCARequired", "wrongpass", "validating"])
            .temporary(&["rateLimiting", "websiteUnavailable"])
            .non_recoverable(&["bug"])
    }

    #[test]
    fn test_classify() {
        let map = aggregator();
        assert_eq!(map.classify("null"), ConnectionHealth::Ok);
        assert_eq!(map.classify("wrongpass"), ConnectionHealth::UserActionNeeded);
        assert_eq!(map.classify("rateLimiting"), ConnectionHealth::TemporaryError);
        assert_eq!(map.classify("bug"), ConnectionHealth::NonRecoverable);
        assert_eq!(map.classify("somethingNew"), ConnectionHealth::TemporaryError);
        assert_eq!(
            map.with_fallback(ConnectionHealth::NonRecoverable).classify("somethingNew"),
            ConnectionHealth::NonRecoverable
        );
    }

    #[test]
    fn test_disconnected_event() {
        let map = aggregator();
        let at = Utc::now();
        assert!(map.disconnected_event("12", "", None, at).is_none());

        match map.disconnected_event("12", "SCARequired", Some("SCA error".into()), at) {
            Some(WebhookEvent::UserConnectionDisconnected { connection_id, health, reason, .. }) => {
                assert_eq!(connection_id, "12");
                assert_eq!(health, ConnectionHealth::UserActionNeeded);
                assert_eq!(reason.as_deref(), Some("SCA error"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
