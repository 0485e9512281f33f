//! Provider integrations shipped with the crate.

pub mod sandbox;

use std::sync::Arc;

use crate::error::PluginResult;
use crate::plugin::Registry;

/// Registry holding every built-in provider. The sandbox provider serves
/// from `sandbox`.
pub fn registry(sandbox: Arc<sandbox::SandboxClient>) -> PluginResult<Registry> {
    let mut registry = Registry::new();
    sandbox::register(&mut registry, sandbox)?;
    Ok(registry)
}
