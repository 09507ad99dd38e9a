#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! File-backed configuration for the XDCC client.
//!
//! Layout: `model.rs` (typed sections), `defaults.rs` (default values),
//! `loader.rs` (load-or-create plus environment overrides), `validate.rs`
//! (field checks).

pub mod defaults;
pub mod error;
pub mod loader;
pub mod model;
pub mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, apply_env_overrides, config_path, load, load_or_create};
pub use model::{
    AppConfig, NetworkConfig, PacketRequest, StorageConfig, TelemetryConfig, TrackerConfig,
    TransferConfig,
};
pub use validate::validate;
