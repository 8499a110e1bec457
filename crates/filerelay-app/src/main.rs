#![forbid(unsafe_code)]
#![deny(unused_must_use)]
#![warn(missing_docs, clippy::all, clippy::pedantic, clippy::nursery)]

//! Binary entrypoint that loads configuration and runs the relay until
//! Ctrl-C or SIGTERM.

use filerelay_app::{AppResult, run_app};

/// Bootstraps the relay and blocks until shutdown completes.
#[tokio::main]
async fn main() -> AppResult<()> {
    run_app().await
}
