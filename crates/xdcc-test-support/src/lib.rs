#![forbid(unsafe_code)]
#![deny(
    dead_code,
    unused,
    unused_imports,
    unused_must_use,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls,
    missing_docs
)]

//! Shared test helpers used across unit and integration suites.
//! Layout: fixtures.rs (canned bot chatter and payloads), peer.rs (scripted DCC sender), stats.rs (recording statistics sink).

pub mod fixtures;
pub mod peer;
pub mod stats;
