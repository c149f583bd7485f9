use anyhow::{anyhow, Result};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Installs the global subscriber. `RUST_LOG` wins over the configured
/// level. Logs go to stderr; stdout carries the event stream.
pub fn init_tracing(config: &LoggingConfig) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let stderr_layer = fmt::layer()
        .with_target(config.with_target)
        .with_thread_ids(false)
        .with_writer(std::io::stderr);

    // A subscriber set by a test harness or embedding app is left alone.
    if let Err(e) = Registry::default().with(env_filter).with(stderr_layer).try_init() {
        let msg = e.to_string();
        if !msg.contains("already been set") {
            return Err(anyhow!("failed to initialise tracing: {e}"));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let cfg = LoggingConfig::default();
        init_tracing(&cfg).unwrap();
        init_tracing(&cfg).unwrap();
    }
}
