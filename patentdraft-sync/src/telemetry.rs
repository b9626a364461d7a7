//! Tracing subscriber setup.

use patentdraft_core::{DraftError, DraftResult};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "patentdraft_sync=debug,info";

/// Output format of log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    Plain,
}

/// Telemetry configuration from environment variables.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub format: LogFormat,
    /// Service name recorded in the startup line.
    pub service_name: String,
}

impl TelemetryConfig {
    pub fn from_env() -> Self {
        let format = match std::env::var("PATENTDRAFT_LOG_FORMAT")
            .map(|s| s.to_ascii_lowercase())
            .as_deref()
        {
            Ok("plain") | Ok("text") | Ok("pretty") => LogFormat::Plain,
            _ => LogFormat::Json,
        };
        Self {
            format,
            service_name: std::env::var("PATENTDRAFT_SERVICE_NAME")
                .unwrap_or_else(|_| "patentdraft-sync".to_string()),
        }
    }
}

/// Install the global tracing subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> DraftResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let registry = tracing_subscriber::registry().with(env_filter);
    let result = match config.format {
        LogFormat::Json => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        LogFormat::Plain => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };
    result.map_err(|e| DraftError::Telemetry(format!("Failed to init subscriber: {}", e)))?;

    tracing::info!(
        service_name = %config.service_name,
        format = ?config.format,
        "Telemetry initialized"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct EnvVarGuard {
        key: &'static str,
        original: Option<String>,
    }

    impl EnvVarGuard {
        fn set(key: &'static str, value: Option<&str>) -> Self {
            let original = std::env::var(key).ok();
            match value {
                Some(v) => std::env::set_var(key, v),
                None => std::env::remove_var(key),
            }
            Self { key, original }
        }
    }

    impl Drop for EnvVarGuard {
        fn drop(&mut self) {
            match self.original.as_deref() {
                Some(v) => std::env::set_var(self.key, v),
                None => std::env::remove_var(self.key),
            }
        }
    }

    #[test]
    fn test_log_format_from_env() {
        {
            let _guard = EnvVarGuard::set("PATENTDRAFT_LOG_FORMAT", Some("Plain"));
            assert_eq!(TelemetryConfig::from_env().format, LogFormat::Plain);
        }
        {
            let _guard = EnvVarGuard::set("PATENTDRAFT_LOG_FORMAT", None);
            let config = TelemetryConfig::from_env();
            assert_eq!(config.format, LogFormat::Json);
        }
    }

    #[test]
    fn test_second_init_reports_error() {
        let config = TelemetryConfig {
            format: LogFormat::Plain,
            service_name: "test".to_string(),
        };
        let first = init_tracing(&config);
        let second = init_tracing(&config);
        // Another test may have installed a subscriber first.
        assert!(first.is_err() || second.is_err());
        assert!(matches!(second, Err(DraftError::Telemetry(_))));
    }
}
