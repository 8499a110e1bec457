#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Filerelay application wiring.
//!
//! Layout: `bootstrap.rs` (configuration, logging and signal handling),
//! `relay.rs` (pipeline assembly and shutdown), `scheduler.rs` (poll trigger).

/// Application bootstrap and environment loading.
pub mod bootstrap;
/// Application error types.
pub mod error;
/// Pipeline assembly and drain-then-close shutdown.
pub mod relay;
/// Fixed-rate poll scheduling.
pub mod scheduler;

pub use bootstrap::run_app;
pub use error::{AppError, AppResult};
pub use relay::{
    DISCOVERED_TOPIC, DOWNLOADED_TOPIC, RelaySettings, RunningRelay, ShutdownReport, start_relay,
};
pub use scheduler::{Schedule, SchedulerHandle, SchedulerReport, spawn_scheduler};
