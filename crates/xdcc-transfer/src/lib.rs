#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, unreachable_pub, clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions, clippy::cast_possible_truncation)]

//! Download side of the XDCC client.
//!
//! # Design
//! - [`FileStore`] owns partial files and answers resume questions for the
//!   tracker through [`xdcc_core::ResumeCatalog`].
//! - [`spawn_session`] runs one transfer per task; owners talk to it through
//!   [`SessionHandle`] and receive [`SessionUpdate`]s.

pub mod error;
pub mod rollback;
pub mod session;
pub mod signal;
pub mod store;
pub mod throughput;
pub mod watchdog;

pub use error::{TransferError, TransferResult};
pub use rollback::{RollbackGuard, RollbackProgress};
pub use session::{
    SessionContext, SessionHandle, SessionReport, SessionSettings, SessionUpdate, decide_outcome,
    spawn_session,
};
pub use signal::{SessionControl, SessionSignal};
pub use store::{FileLease, FileRecord, FileStore};
pub use throughput::Throughput;
pub use watchdog::{ActivityClock, spawn_watchdog};
