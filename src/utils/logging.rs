//! Structured logging setup.
//!
//! The transport itself only emits `tracing` events; installing a subscriber is left to the
//! embedding process. [`init_logging`] is the convenience used by binaries and tests.

use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;
use crate::error::{ProtocolError, Result};

/// Install a global fmt subscriber according to `config`.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.as_str().to_lowercase()));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);

    let outcome = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    outcome.map_err(|e| {
        ProtocolError::ConfigError(format!(
            "Failed to install subscriber for {}: {e}",
            config.app_name
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_config_error() {
        let config = LoggingConfig::default();
        let _ = init_logging(&config);
        assert!(matches!(
            init_logging(&config),
            Err(ProtocolError::ConfigError(_))
        ));
    }
}
