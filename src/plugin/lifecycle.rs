//! Install / uninstall state machine.
//!
//! ```text
//! Uninstalled ──install──▶ Installed ──uninstall──▶ Uninstalled
//! ```
//!
//! Every data or write operation checks [`Lifecycle::ensure_installed`]
//! before anything else, including the capability check.

use std::fmt;
use std::sync::RwLock;

use crate::error::{PluginError, PluginResult};
use crate::models::{ConnectorTaskTree, WebhookConfig};

use super::InstallResponse;

#[derive(Debug, Clone, PartialEq)]
pub enum LifecycleState {
    Uninstalled,
    Installed {
        workflow: Vec<ConnectorTaskTree>,
        webhook_configs: Vec<WebhookConfig>,
    },
}

impl LifecycleState {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Uninstalled => "UNINSTALLED",
            LifecycleState::Installed { .. } => "INSTALLED",
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug)]
pub struct Lifecycle {
    state: RwLock<LifecycleState>,
}

impl Default for Lifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl Lifecycle {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(LifecycleState::Uninstalled),
        }
    }

    pub fn state(&self) -> LifecycleState {
        match self.state.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_installed(&self) -> bool {
        matches!(self.state(), LifecycleState::Installed { .. })
    }

    pub fn ensure_installed(&self) -> PluginResult<()> {
        if self.is_installed() {
            Ok(())
        } else {
            Err(PluginError::NotYetInstalled)
        }
    }

    pub fn mark_installed(&self, response: &InstallResponse) {
        self.set(LifecycleState::Installed {
            workflow: response.workflow.clone(),
            webhook_configs: response.webhook_configs.clone(),
        });
    }

    /// Returns the webhook configs registered at install so the caller can
    /// hand them to uninstall.
    pub fn installed_webhooks(&self) -> PluginResult<Vec<WebhookConfig>> {
        match self.state() {
            LifecycleState::Installed {
                webhook_configs, ..
            } => Ok(webhook_configs),
            LifecycleState::Uninstalled => Err(PluginError::NotYetInstalled),
        }
    }

    /// Record webhook configs created after install.
    pub fn add_webhooks(&self, configs: &[WebhookConfig]) -> PluginResult<()> {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        match &mut *guard {
            LifecycleState::Installed {
                webhook_configs, ..
            } => {
                for config in configs {
                    if !webhook_configs.iter().any(|c| c.url_path == config.url_path) {
                        webhook_configs.push(config.clone());
                    }
                }
                Ok(())
            }
            LifecycleState::Uninstalled => Err(PluginError::NotYetInstalled),
        }
    }

    pub fn mark_uninstalled(&self) {
        self.set(LifecycleState::Uninstalled);
    }

    fn set(&self, next: LifecycleState) {
        let mut guard = match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = next;
    }
}
