//! Typed configuration sections.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Root configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// IRC server connection.
    pub network: NetworkConfig,
    /// Download session parameters.
    pub transfer: TransferConfig,
    /// Tracker behaviour.
    pub tracker: TrackerConfig,
    /// Where state and files live.
    pub storage: StorageConfig,
    /// Logging.
    pub telemetry: TelemetryConfig,
    /// Packets to fetch, seeded into the tracker at startup.
    pub requests: Vec<PacketRequest>,
}

impl AppConfig {
    /// Directory holding partial downloads.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.transfer.temp_dir)
    }

    /// Directory completed downloads are moved to.
    #[must_use]
    pub fn ready_dir(&self) -> PathBuf {
        self.storage.data_dir.join(&self.transfer.ready_dir)
    }

    /// Directory holding state snapshots.
    #[must_use]
    pub fn data_dir(&self) -> &Path {
        &self.storage.data_dir
    }
}

/// IRC server connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Server host name.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Nickname to register with.
    pub nick: String,
    /// Real name sent with `USER`.
    pub realname: String,
    /// Channels joined on connect.
    pub channels: Vec<String>,
    /// Delay between reconnect attempts, in seconds.
    pub reconnect_delay_secs: u64,
}

impl NetworkConfig {
    /// Reconnect backoff.
    #[must_use]
    pub const fn reconnect_delay(&self) -> Duration {
        Duration::from_secs(self.reconnect_delay_secs)
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: defaults::NETWORK_NAME.to_string(),
            port: defaults::IRC_PORT,
            nick: defaults::NICK.to_string(),
            realname: defaults::REALNAME.to_string(),
            channels: Vec::new(),
            reconnect_delay_secs: defaults::RECONNECT_DELAY_SECS,
        }
    }
}

/// Download session parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Bound on opening a peer socket, in seconds.
    pub connect_timeout_secs: u64,
    /// A read yielding nothing for this long ends the stream, in seconds.
    pub read_timeout_secs: u64,
    /// Bytes requested per socket read.
    pub chunk_size: usize,
    /// How far a resume rewinds behind the stored size.
    pub rollback_bytes: u64,
    /// Length of the reference window compared on resume.
    pub rollback_check_bytes: u64,
    /// Throughput sampling interval, in milliseconds.
    pub sample_interval_ms: u64,
    /// Silent sampling intervals tolerated before a session is stopped.
    pub stall_multiplier: u32,
    /// Watchdog poll interval, in milliseconds.
    pub watchdog_poll_ms: u64,
    /// Partial downloads, relative to the data directory unless absolute.
    pub temp_dir: PathBuf,
    /// Completed downloads, relative to the data directory unless absolute.
    pub ready_dir: PathBuf,
}

impl TransferConfig {
    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Read timeout.
    #[must_use]
    pub const fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs)
    }

    /// Sampling interval.
    #[must_use]
    pub const fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }

    /// Watchdog poll interval.
    #[must_use]
    pub const fn watchdog_poll(&self) -> Duration {
        Duration::from_millis(self.watchdog_poll_ms)
    }
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: defaults::CONNECT_TIMEOUT_SECS,
            read_timeout_secs: defaults::READ_TIMEOUT_SECS,
            chunk_size: defaults::CHUNK_SIZE,
            rollback_bytes: defaults::ROLLBACK_BYTES,
            rollback_check_bytes: defaults::ROLLBACK_CHECK_BYTES,
            sample_interval_ms: defaults::SAMPLE_INTERVAL_MS,
            stall_multiplier: defaults::STALL_MULTIPLIER,
            watchdog_poll_ms: defaults::WATCHDOG_POLL_MS,
            temp_dir: PathBuf::from(defaults::TEMP_DIR),
            ready_dir: PathBuf::from(defaults::READY_DIR),
        }
    }
}

/// Tracker behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Reply to CTCP `VERSION`.
    pub version: String,
    /// Reply to CTCP `XGVERSION`.
    pub custom_version: String,
    /// Delay before a bot is asked again, in seconds.
    pub command_wait_secs: u64,
    /// Delay before rejoining a channel a bot made us leave, in seconds.
    pub rejoin_delay_secs: u64,
    /// Publish unrecognised bot chatter.
    pub diagnostics: bool,
}

impl TrackerConfig {
    /// Retry delay.
    #[must_use]
    pub const fn command_wait(&self) -> Duration {
        Duration::from_secs(self.command_wait_secs)
    }

    /// Rejoin delay.
    #[must_use]
    pub const fn rejoin_delay(&self) -> Duration {
        Duration::from_secs(self.rejoin_delay_secs)
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            version: concat!("xdcc-grab ", env!("CARGO_PKG_VERSION")).to_string(),
            custom_version: env!("CARGO_PKG_VERSION").to_string(),
            command_wait_secs: defaults::COMMAND_WAIT_SECS,
            rejoin_delay_secs: defaults::REJOIN_DELAY_SECS,
            diagnostics: false,
        }
    }
}

/// State and file locations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory for snapshots and downloads.
    pub data_dir: PathBuf,
    /// Interval between snapshot saves, in seconds.
    pub snapshot_interval_secs: u64,
}

impl StorageConfig {
    /// Snapshot interval.
    #[must_use]
    pub const fn snapshot_interval(&self) -> Duration {
        Duration::from_secs(self.snapshot_interval_secs)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(defaults::DATA_DIR),
            snapshot_interval_secs: defaults::SNAPSHOT_INTERVAL_SECS,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Default level filter when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build when absent.
    pub log_format: Option<String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            log_format: None,
        }
    }
}

/// A wanted packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketRequest {
    /// Channel the bot lives in.
    pub channel: String,
    /// Bot nickname.
    pub bot: String,
    /// Packet number.
    pub packet: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_documents_fill_defaults() {
        let config: AppConfig =
            serde_json::from_str(r##"{"network":{"host":"irc.example.net","channels":["#xdcc"]}}"##)
                .expect("parse");
        assert_eq!(config.network.host, "irc.example.net");
        assert_eq!(config.network.port, 6667);
        assert_eq!(config.transfer, TransferConfig::default());
        assert!(config.requests.is_empty());
    }

    #[test]
    fn directories_resolve_under_data_dir() {
        let mut config = AppConfig::default();
        config.storage.data_dir = PathBuf::from("/srv/xdcc");
        assert_eq!(config.temp_dir(), PathBuf::from("/srv/xdcc/temp"));
        config.transfer.ready_dir = PathBuf::from("/media/done");
        assert_eq!(config.ready_dir(), PathBuf::from("/media/done"));
    }

    #[test]
    fn durations_convert() {
        let transfer = TransferConfig::default();
        assert_eq!(transfer.sample_interval(), Duration::from_secs(1));
        assert_eq!(transfer.watchdog_poll(), Duration::from_millis(500));
        assert_eq!(TrackerConfig::default().command_wait(), Duration::from_secs(15));
    }
}
