//! Validation of a loaded configuration.

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;

/// Check every section for values the client cannot work with.
///
/// # Errors
///
/// Returns the first invalid field found.
pub fn validate(config: &AppConfig) -> ConfigResult<()> {
    let network = &config.network;
    if network.host.trim().is_empty() {
        return Err(ConfigError::invalid("network", "host", None, "must not be empty"));
    }
    if network.port == 0 {
        return Err(ConfigError::invalid(
            "network",
            "port",
            Some(network.port.to_string()),
            "must be between 1 and 65535",
        ));
    }
    if network.nick.is_empty() || network.nick.contains(char::is_whitespace) {
        return Err(ConfigError::invalid(
            "network",
            "nick",
            Some(network.nick.clone()),
            "must be a single word",
        ));
    }
    for channel in &network.channels {
        ensure_channel("network", "channels", channel)?;
    }

    let transfer = &config.transfer;
    if transfer.chunk_size == 0 {
        return Err(ConfigError::invalid("transfer", "chunk_size", None, "must be positive"));
    }
    if transfer.sample_interval_ms == 0 {
        return Err(ConfigError::invalid(
            "transfer",
            "sample_interval_ms",
            None,
            "must be positive",
        ));
    }
    if transfer.watchdog_poll_ms == 0 {
        return Err(ConfigError::invalid(
            "transfer",
            "watchdog_poll_ms",
            None,
            "must be positive",
        ));
    }
    if transfer.stall_multiplier == 0 {
        return Err(ConfigError::invalid(
            "transfer",
            "stall_multiplier",
            None,
            "must be positive",
        ));
    }
    if transfer.rollback_check_bytes > transfer.rollback_bytes {
        return Err(ConfigError::invalid(
            "transfer",
            "rollback_check_bytes",
            Some(transfer.rollback_check_bytes.to_string()),
            "must not exceed rollback_bytes",
        ));
    }

    if let Some(format) = &config.telemetry.log_format
        && !matches!(format.as_str(), "json" | "pretty")
    {
        return Err(ConfigError::invalid(
            "telemetry",
            "log_format",
            Some(format.clone()),
            "must be json or pretty",
        ));
    }

    for request in &config.requests {
        ensure_channel("requests", "channel", &request.channel)?;
        if request.bot.trim().is_empty() {
            return Err(ConfigError::invalid("requests", "bot", None, "must not be empty"));
        }
    }
    Ok(())
}

fn ensure_channel(section: &'static str, field: &'static str, value: &str) -> ConfigResult<()> {
    if value.len() > 1 && value.starts_with(['#', '&']) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            section,
            field,
            Some(value.to_string()),
            "must start with # or &",
        ))
    }
}
