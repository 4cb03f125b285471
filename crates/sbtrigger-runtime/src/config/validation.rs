//! Configuration validation.

use sbtrigger_core::{ConnectionString, ServiceBusOptions};

use super::error::{ConfigError, ConfigResult};
use super::schema::{LogOutput, LoggingConfig, TriggerHostConfig};

/// Validates the entire configuration.
pub fn validate_config(config: &TriggerHostConfig) -> ConfigResult<()> {
    validate_logging(&config.logging)?;
    validate_options(&config.service_bus)?;

    for (name, value) in &config.connections {
        ConnectionString::parse(value)
            .map_err(|e| ConfigError::validation(format!("connection '{name}': {e}")))?;
    }
    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> ConfigResult<()> {
    if logging.output == LogOutput::File && logging.file_path.is_none() {
        return Err(ConfigError::validation(
            "logging.file_path is required when logging.output is 'file'",
        ));
    }
    Ok(())
}

fn validate_options(options: &ServiceBusOptions) -> ConfigResult<()> {
    if options.message_handler_options.max_concurrent_calls == 0 {
        return Err(ConfigError::validation(
            "max_concurrent_calls must be greater than 0",
        ));
    }
    if options.session_handler_options.max_concurrent_sessions == 0 {
        return Err(ConfigError::validation(
            "max_concurrent_sessions must be greater than 0",
        ));
    }
    if options.batch_options.max_message_count == 0 {
        return Err(ConfigError::validation(
            "max_message_count must be greater than 0",
        ));
    }
    Ok(())
}
