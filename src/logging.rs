use flexi_logger::{detailed_format, Logger, LoggerHandle};

use crate::config::LoggingConfig;
use crate::error::StagewiseError;

/// Starts logging to stderr. `RUST_LOG` wins over the configured level when set.
///
/// The returned handle must be kept alive for as long as logging is wanted.
pub fn init_logging(config: &LoggingConfig) -> Result<LoggerHandle, StagewiseError> {
    Logger::try_with_env_or_str(log_spec(config))
        .map_err(|e| StagewiseError::Error(format!("Invalid log specification: {}", e)))?
        .format(detailed_format)
        .start()
        .map_err(|e| StagewiseError::Error(format!("Failed to start logger: {}", e)))
}

/// Dependencies log warnings and above; this crate logs at the configured level.
pub fn log_spec(config: &LoggingConfig) -> String {
    format!("warn, stagewise={}", config.stagewise)
}
