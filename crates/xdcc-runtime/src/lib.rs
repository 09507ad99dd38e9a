#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

//! Persistence layer for the entity tree and file records.
//!
//! # Design
//! - Two JSON documents per data directory: `network.json` (the entity tree) and
//!   `files.json` (the file records).
//! - A save writes `<doc>.new`, keeps the previous copy as `<doc>.bak` and renames
//!   the new file into place, so a crash leaves at least one readable copy.
//! - A load falls back to the backup when the primary is missing or unreadable.

pub mod error;
pub mod store;

pub use error::{SnapshotError, SnapshotResult};
pub use store::{FILES_DOCUMENT, NETWORK_DOCUMENT, Snapshot, SnapshotBackend, SnapshotStore};
