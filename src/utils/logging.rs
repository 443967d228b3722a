//! Structured logging setup.
//!
//! Installs a `tracing-subscriber` fmt subscriber configured from
//! [`LoggingConfig`]. The level comes from configuration only; environment
//! filters are not read.

use tracing::info;
use tracing_subscriber::fmt;

use crate::config::LoggingConfig;
use crate::error::{Result, SessionError};

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let builder = fmt()
        .with_max_level(config.log_level)
        .with_target(true)
        .with_thread_names(true);

    let installed = if config.json_format {
        builder.json().try_init()
    } else {
        builder.try_init()
    };

    installed.map_err(|e| SessionError::ConfigError(format!("Failed to install logger: {e}")))?;
    info!(app = %config.app_name, level = %config.log_level, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_install_is_refused() {
        let config = LoggingConfig::default();
        assert!(init_logging(&config).is_ok());
        assert!(matches!(
            init_logging(&config),
            Err(SessionError::ConfigError(_))
        ));
    }
}
