use super::types::{ClusterConfig, PollingConfig};
use crate::types::{Error, Result};

// Validation helper functions

/// Validate that an interval is non-zero
pub(crate) fn validate_positive_interval(value: u64, field: &str) -> Result<()> {
    if value == 0 {
        return Err(Error::Validation {
            field: field.to_string(),
            message: "Interval must be greater than 0".to_string(),
        });
    }
    Ok(())
}

/// Validate that a required string is not blank
pub(crate) fn validate_not_blank(value: &str, field: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation {
            field: field.to_string(),
            message: "Value must not be empty".to_string(),
        });
    }
    Ok(())
}

/// Validate that the initial backoff interval does not exceed its cap
pub(crate) fn validate_backoff_bounds(initial: u64, max: u64) -> Result<()> {
    if initial > max {
        return Err(Error::Validation {
            field: "polling.start_initial_interval_ms".to_string(),
            message: format!(
                "Initial interval ({}ms) must not exceed polling.start_max_interval_ms ({}ms)",
                initial, max
            ),
        });
    }
    Ok(())
}

/// Validate that a directory exists
async fn validate_directory_exists(path: &std::path::Path, field: &str) -> Result<()> {
    let metadata = tokio::fs::metadata(path)
        .await
        .map_err(|e| Error::Validation {
            field: field.to_string(),
            message: format!("Cannot access path '{}': {}", path.display(), e),
        })?;

    if !metadata.is_dir() {
        return Err(Error::Validation {
            field: field.to_string(),
            message: format!("Path '{}' is not a directory", path.display()),
        });
    }
    Ok(())
}

impl PollingConfig {
    /// Reject schedules that would poll without sleeping
    pub fn validate(&self) -> Result<()> {
        validate_positive_interval(
            self.start_initial_interval_ms,
            "polling.start_initial_interval_ms",
        )?;
        validate_positive_interval(self.start_max_interval_ms, "polling.start_max_interval_ms")?;
        validate_positive_interval(self.stop_interval_ms, "polling.stop_interval_ms")?;
        validate_backoff_bounds(self.start_initial_interval_ms, self.start_max_interval_ms)?;
        if let Some(timeout) = self.timeout_secs {
            validate_positive_interval(timeout, "polling.timeout_secs")?;
        }
        Ok(())
    }
}

impl ClusterConfig {
    /// Validate the configuration
    pub async fn validate(&self) -> Result<()> {
        validate_not_blank(&self.binaries.store_server, "binaries.store_server")?;
        validate_not_blank(&self.binaries.store_cli, "binaries.store_cli")?;
        validate_not_blank(&self.binaries.proxy_server, "binaries.proxy_server")?;

        if let Some(dir) = &self.templates.dir {
            validate_directory_exists(dir, "templates.dir").await?;
        }

        self.polling.validate()?;

        validate_not_blank(&self.executor.shell, "executor.shell")?;
        validate_positive_interval(self.executor.command_timeout, "executor.command_timeout")?;

        if !matches!(
            self.logging.level.as_str(),
            "trace" | "debug" | "info" | "warn" | "error"
        ) {
            return Err(Error::Validation {
                field: "logging.level".to_string(),
                message: format!(
                    "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                    self.logging.level
                ),
            });
        }

        if !matches!(self.logging.format.as_str(), "json" | "pretty") {
            return Err(Error::Validation {
                field: "logging.format".to_string(),
                message: format!(
                    "Invalid log format '{}'. Must be one of: json, pretty",
                    self.logging.format
                ),
            });
        }

        Ok(())
    }
}
