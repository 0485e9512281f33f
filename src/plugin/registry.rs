//! Provider registry.
//!
//! Built once at startup and passed by reference to whoever needs to turn a
//! provider name into a plugin instance. No process-wide state.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::{CapabilitySet, ConfigSchema, Plugin};
use crate::error::{PluginError, PluginResult};

/// Builds a plugin from a connector name and its validated configuration.
pub type PluginFactory =
    Arc<dyn Fn(&str, &Value) -> PluginResult<Arc<dyn Plugin>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PluginType {
    Psp,
    OpenBanking,
    Both,
}

#[derive(Clone)]
pub struct RegistryEntry {
    pub plugin_type: PluginType,
    pub capabilities: CapabilitySet,
    pub schema: ConfigSchema,
    factory: PluginFactory,
}

impl std::fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryEntry")
            .field("plugin_type", &self.plugin_type)
            .field("capabilities", &self.capabilities)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default, Clone)]
pub struct Registry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider. The capability set is validated here, once.
    pub fn register(
        &mut self,
        provider: &str,
        plugin_type: PluginType,
        capabilities: CapabilitySet,
        schema: ConfigSchema,
        factory: PluginFactory,
    ) -> PluginResult<()> {
        let provider = provider.to_lowercase();
        if self.entries.contains_key(&provider) {
            return Err(PluginError::InvalidConfig(format!(
                "provider {} already registered",
                provider
            )));
        }
        capabilities.validate()?;

        info!(provider = %provider, ?plugin_type, capabilities = capabilities.iter().count(), "Registered provider");
        self.entries.insert(
            provider,
            RegistryEntry {
                plugin_type,
                capabilities,
                schema,
                factory,
            },
        );
        Ok(())
    }

    pub fn entry(&self, provider: &str) -> PluginResult<&RegistryEntry> {
        self.entries
            .get(&provider.to_lowercase())
            .ok_or_else(|| PluginError::InvalidConfig(format!("unknown provider {}", provider)))
    }

    pub fn capabilities(&self, provider: &str) -> PluginResult<&CapabilitySet> {
        Ok(&self.entry(provider)?.capabilities)
    }

    pub fn providers(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Validate `raw_config` against the provider schema and build the plugin.
    ///
    /// Returns the plugin together with the config after defaults were applied.
    pub fn create(
        &self,
        provider: &str,
        connector_name: &str,
        raw_config: &Value,
    ) -> PluginResult<(Arc<dyn Plugin>, Value)> {
        let entry = self.entry(provider)?;
        let config = entry.schema.validate(raw_config)?;
        let plugin = (entry.factory)(connector_name, &config)?;
        Ok((plugin, config))
    }
}
