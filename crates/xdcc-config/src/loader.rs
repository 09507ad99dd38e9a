//! Load-or-create of the configuration document.
//!
//! # Design
//! - The document is JSON at `XDCC_CONFIG` (default `xdcc.json`); a missing
//!   file is written out with defaults so operators have something to edit.
//! - Environment overrides are applied after the file through an injected
//!   lookup, so tests never touch the process environment.
//! - Validation runs last.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::info;

use crate::error::{ConfigError, ConfigResult};
use crate::model::AppConfig;
use crate::validate::validate;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_ENV: &str = "XDCC_CONFIG";
const DEFAULT_CONFIG_PATH: &str = "xdcc.json";

/// Resolve the configuration path.
#[must_use]
pub fn config_path(lookup: impl Fn(&str) -> Option<String>) -> PathBuf {
    lookup(CONFIG_PATH_ENV).map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load, override and validate the configuration.
///
/// # Errors
///
/// Returns an error if the document cannot be read or written, an override
/// does not parse, or validation fails.
pub async fn load(lookup: impl Fn(&str) -> Option<String>) -> ConfigResult<AppConfig> {
    let path = config_path(&lookup);
    let mut config = load_or_create(&path).await?;
    apply_env_overrides(&mut config, &lookup)?;
    validate(&config)?;
    Ok(config)
}

/// Read the document at `path`, writing defaults there first if it is missing.
///
/// # Errors
///
/// Returns an error if the file cannot be read, parsed or created.
pub async fn load_or_create(path: &Path) -> ConfigResult<AppConfig> {
    match fs::read(path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|source| ConfigError::Json {
            operation: "parse",
            path: path.to_path_buf(),
            source,
        }),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            let config = AppConfig::default();
            write_default(path, &config).await?;
            info!(path = %path.display(), "configuration created with defaults");
            Ok(config)
        }
        Err(source) => Err(ConfigError::Io {
            operation: "read",
            path: path.to_path_buf(),
            source,
        }),
    }
}

async fn write_default(path: &Path, config: &AppConfig) -> ConfigResult<()> {
    if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .await
            .map_err(|source| ConfigError::Io {
                operation: "create_dir",
                path: parent.to_path_buf(),
                source,
            })?;
    }
    let rendered = serde_json::to_vec_pretty(config).map_err(|source| ConfigError::Json {
        operation: "render",
        path: path.to_path_buf(),
        source,
    })?;
    fs::write(path, rendered)
        .await
        .map_err(|source| ConfigError::Io {
            operation: "write",
            path: path.to_path_buf(),
            source,
        })
}

/// Apply `XDCC_*` overrides from `lookup`.
///
/// # Errors
///
/// Returns an error if `XDCC_IRC_PORT` is not a port number.
pub fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> ConfigResult<()> {
    if let Some(level) = lookup("XDCC_LOG_LEVEL") {
        config.telemetry.level = level;
    }
    if let Some(format) = lookup("XDCC_LOG_FORMAT") {
        config.telemetry.log_format = Some(format.to_ascii_lowercase());
    }
    if let Some(host) = lookup("XDCC_IRC_HOST") {
        config.network.host = host;
    }
    if let Some(port) = lookup("XDCC_IRC_PORT") {
        config.network.port = port.trim().parse().map_err(|_| {
            ConfigError::invalid("network", "port", Some(port.clone()), "must be a port number")
        })?;
    }
    if let Some(nick) = lookup("XDCC_IRC_NICK") {
        config.network.nick = nick;
    }
    if let Some(dir) = lookup("XDCC_DATA_DIR") {
        config.storage.data_dir = PathBuf::from(dir);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn default_path_without_env() {
        assert_eq!(config_path(lookup(&[])), PathBuf::from("xdcc.json"));
        assert_eq!(
            config_path(lookup(&[("XDCC_CONFIG", "/etc/xdcc.json")])),
            PathBuf::from("/etc/xdcc.json")
        );
    }

    #[test]
    fn overrides_replace_file_values() {
        let mut config = AppConfig::default();
        apply_env_overrides(
            &mut config,
            lookup(&[
                ("XDCC_IRC_HOST", "irc.example.net"),
                ("XDCC_IRC_PORT", "6697"),
                ("XDCC_LOG_FORMAT", "JSON"),
                ("XDCC_DATA_DIR", "/var/lib/xdcc"),
            ]),
        )
        .expect("overrides");
        assert_eq!(config.network.host, "irc.example.net");
        assert_eq!(config.network.port, 6697);
        assert_eq!(config.telemetry.log_format.as_deref(), Some("json"));
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/xdcc"));
    }

    #[test]
    fn bad_port_override_is_rejected() {
        let mut config = AppConfig::default();
        let err = apply_env_overrides(&mut config, lookup(&[("XDCC_IRC_PORT", "70000")]))
            .expect_err("out of range");
        assert!(matches!(err, ConfigError::InvalidField { field: "port", .. }));
    }
}
