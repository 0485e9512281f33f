//! psp_bridge - sync runner
//!
//! Loads `config/<env>.yaml`, installs every configured connector against
//! the in-memory store and runs one workflow cycle per connector:
//!
//! ```text
//! ┌──────────┐    ┌──────────┐    ┌──────────┐    ┌──────────┐
//! │  Config  │───▶│ Registry │───▶│Connector │───▶│ Storage  │
//! │  (YAML)  │    │(plugins) │    │(workflow)│    │ (memory) │
//! └──────────┘    └──────────┘    └──────────┘    └──────────┘
//! ```

use std::sync::Arc;

use anyhow::Context;
use tokio_util::sync::CancellationToken;

use psp_bridge::config::AppConfig;
use psp_bridge::connector::Connector;
use psp_bridge::connectors::{self, sandbox::SandboxClient};
use psp_bridge::storage::{MemoryStorage, Storage};

fn get_env() -> String {
    let args: Vec<String> = std::env::args().collect();
    for i in 0..args.len() {
        if (args[i] == "--env" || args[i] == "-e") && i + 1 < args.len() {
            return args[i + 1].clone();
        }
    }
    "dev".to_string()
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = get_env();
    let app_config = AppConfig::load_any(&env)?;
    let _log_guard = psp_bridge::logging::init_logging(&app_config)?;

    tracing::info!(env = %env, connectors = app_config.connectors.len(), "Starting psp_bridge");

    let registry = connectors::registry(Arc::new(SandboxClient::seeded()))?;
    let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling sync");
            on_signal.cancel();
        }
    });

    for entry in &app_config.connectors {
        let connector = Connector::from_config(&registry, entry, &app_config, storage.clone())
            .with_context(|| format!("building connector {}", entry.name))?;
        connector
            .install()
            .await
            .with_context(|| format!("installing connector {}", entry.name))?;

        match connector.run_workflow(&cancel).await {
            Ok(report) => {
                tracing::info!(connector = %entry.name, tasks = report.tasks_run, items = ?report.items, "Sync finished");
            }
            Err(err) => {
                tracing::error!(connector = %entry.name, error = %err, code = err.code(), class = ?err.class(), "Sync failed");
            }
        }
    }

    Ok(())
}
