#![forbid(unsafe_code)]
#![deny(unused_must_use, rustdoc::broken_intra_doc_links, rustdoc::bare_urls)]
#![warn(missing_docs, clippy::all, clippy::pedantic)]

//! Binary entrypoint that loads the configuration, connects to the network and
//! runs until interrupted.

use xdcc_app::{AppResult, run_app};

/// Bootstraps the client and blocks until shutdown.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
