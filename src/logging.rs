//! Logging setup
//!
//! The library only emits `tracing` events. Applications that want them on
//! stderr can call [`init_logging`] once at startup.

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install a global subscriber
///
/// `RUST_LOG` wins over the configured level. Returns `false` if a global
/// subscriber was already installed.
pub fn init_logging(config: &LoggingConfig) -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.level));

    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format.as_str() {
        "json" => registry.with(tracing_subscriber::fmt::layer().json()).try_init(),
        _ => registry.with(tracing_subscriber::fmt::layer()).try_init(),
    };

    installed.is_ok()
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::try_new(format!("drift_client={level}")).unwrap_or_else(|_| EnvFilter::new("drift_client=info"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_accepts_levels() {
        for level in ["trace", "debug", "info", "warn", "error"] {
            assert_eq!(
                default_filter(level).to_string(),
                format!("drift_client={level}")
            );
        }
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default();
        let first = init_logging(&config);
        let second = init_logging(&config);
        assert!(!(first && second));
    }
}
