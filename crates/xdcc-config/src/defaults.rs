//! Default values for configuration sections.
//!
//! # Design
//! - Every default lives here so the model and the generated file agree.
//! - Durations are stored as plain integers in the document; helpers on the
//!   model turn them into `Duration`s.

pub(crate) const NETWORK_NAME: &str = "irc.rizon.net";
pub(crate) const IRC_PORT: u16 = 6667;
pub(crate) const NICK: &str = "xdcc-grab";
pub(crate) const REALNAME: &str = "xdcc-grab";
pub(crate) const RECONNECT_DELAY_SECS: u64 = 30;

pub(crate) const CONNECT_TIMEOUT_SECS: u64 = 30;
pub(crate) const READ_TIMEOUT_SECS: u64 = 60;
pub(crate) const CHUNK_SIZE: usize = 100 * 1024;
pub(crate) const ROLLBACK_BYTES: u64 = 512 * 1024;
pub(crate) const ROLLBACK_CHECK_BYTES: u64 = 10 * 1024;
pub(crate) const SAMPLE_INTERVAL_MS: u64 = 1_000;
pub(crate) const STALL_MULTIPLIER: u32 = 4;
pub(crate) const WATCHDOG_POLL_MS: u64 = 500;
pub(crate) const TEMP_DIR: &str = "temp";
pub(crate) const READY_DIR: &str = "ready";

pub(crate) const COMMAND_WAIT_SECS: u64 = 15;
pub(crate) const REJOIN_DELAY_SECS: u64 = 600;

pub(crate) const DATA_DIR: &str = "data";
pub(crate) const SNAPSHOT_INTERVAL_SECS: u64 = 60;

pub(crate) const LOG_LEVEL: &str = "info";
