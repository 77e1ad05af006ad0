//! Tracing subscriber setup

use crate::config::{LogFormat, TelemetryConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Filter from `RUST_LOG`, else from the configured directive, else `info`
#[must_use]
pub fn env_filter(config: &TelemetryConfig) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.filter))
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber
///
/// # Errors
/// Returns an error if a global subscriber is already set.
pub fn init(config: &TelemetryConfig) -> anyhow::Result<()> {
    let registry = tracing_subscriber::registry().with(env_filter(config));
    match config.format {
        LogFormat::Pretty => registry.with(tracing_subscriber::fmt::layer()).try_init()?,
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json().with_current_span(true))
            .try_init()?,
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_fails_instead_of_panicking() {
        let config = TelemetryConfig::default();
        let _ = init(&config);
        assert!(init(&config).is_err());
    }
}
