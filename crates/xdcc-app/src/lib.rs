#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! XDCC client application wiring.
//!
//! Layout: `bootstrap.rs` (configuration, logging and state restoration),
//! `irc.rs` (server connection), `orchestrator.rs` (tracker and session
//! coordination), `notifications.rs` (event bus subscriber).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// IRC server connection task.
pub mod irc;
mod notifications;
/// Per-network orchestration loop.
pub mod orchestrator;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use irc::{IrcSettings, ServerEvent, spawn_irc};
pub use orchestrator::{Command, Orchestrator, OrchestratorDeps, OrchestratorHandle};
