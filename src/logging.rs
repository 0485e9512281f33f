//! Tracing setup.
//!
//! The filter starts from `log_level` and then applies `log_modules`
//! overrides keyed by crate module, so `webhook: debug` in the config turns
//! into `psp_bridge::webhook=debug`. `RUST_LOG` replaces the whole filter.

use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use crate::config::{AppConfig, ConfigError};

/// Client crates that log every request and frame at debug.
const CHATTY_CLIENTS: &[&str] = &["hyper", "hyper_util", "reqwest", "tungstenite", "tokio_tungstenite"];

pub(crate) fn rotation(name: &str) -> Option<Rotation> {
    match name {
        "minutely" => Some(Rotation::MINUTELY),
        "hourly" => Some(Rotation::HOURLY),
        "daily" => Some(Rotation::DAILY),
        "never" => Some(Rotation::NEVER),
        _ => None,
    }
}

/// `EnvFilter` directives for `config`.
pub fn filter_directives(config: &AppConfig) -> String {
    let mut directives = vec![config.log_level.clone()];
    if matches!(config.log_level.as_str(), "debug" | "trace") {
        directives.extend(CHATTY_CLIENTS.iter().map(|c| format!("{}=info", c)));
    }
    directives.extend(
        config
            .log_modules
            .iter()
            .map(|(module, level)| format!("{}::{}={}", env!("CARGO_CRATE_NAME"), module, level)),
    );
    directives.join(",")
}

/// Install the global subscriber. Keep the guard alive for the life of the
/// process or buffered file output is lost.
pub fn init_logging(config: &AppConfig) -> Result<WorkerGuard, ConfigError> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(filter_directives(config))
            .map_err(|e| ConfigError::Invalid(format!("log filter: {}", e)))?,
    };

    let appender = RollingFileAppender::builder()
        .rotation(rotation(&config.rotation).unwrap_or(Rotation::NEVER))
        .filename_prefix(config.log_file.as_str())
        .build(&config.log_dir)
        .map_err(|e| ConfigError::Invalid(format!("log file {}/{}: {}", config.log_dir, config.log_file, e)))?;
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let registry = tracing_subscriber::registry().with(filter);
    if config.use_json {
        // connector, kind and scope land as top-level keys
        let file_layer = fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(false)
            .with_writer(non_blocking)
            .with_ansi(false);
        registry.with(file_layer).init();
    } else {
        let file_layer = fmt::layer().with_writer(non_blocking).with_ansi(false);
        let stdout_layer = fmt::layer().with_target(false).compact();
        registry.with(file_layer).with(stdout_layer).init();
    }

    Ok(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> AppConfig {
        AppConfig::from_yaml(&format!("log_dir: ./logs\nlog_file: t.log\n{}", yaml)).unwrap()
    }

    #[test]
    fn test_module_overrides() {
        let config = config("log_level: info\nlog_modules:\n  webhook: debug\n  pagination: trace\n");
        assert_eq!(
            filter_directives(&config),
            "info,psp_bridge::pagination=trace,psp_bridge::webhook=debug"
        );
        assert!(EnvFilter::try_new(filter_directives(&config)).is_ok());
    }

    #[test]
    fn test_debug_quiets_clients() {
        let directives = filter_directives(&config("log_level: debug\n"));
        assert!(directives.starts_with("debug,"));
        assert!(directives.contains("reqwest=info"));
        assert!(directives.contains("tungstenite=info"));

        assert_eq!(filter_directives(&config("log_level: warn\n")), "warn");
    }

    #[test]
    fn test_rotation_names() {
        assert_eq!(rotation("hourly"), Some(Rotation::HOURLY));
        assert_eq!(rotation("never"), Some(Rotation::NEVER));
        assert_eq!(rotation("weekly"), None);
    }
}
