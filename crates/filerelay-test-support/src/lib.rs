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

//! Shared test helpers used across filerelay suites.
//! Layout: fixtures.rs (timestamps, pool options), mocks.rs (scripted source,
//! pool manager, object store, recording stage).

pub mod fixtures;
pub mod mocks;

pub use fixtures::{fast_pool_options, ts};
pub use mocks::{MemoryManager, MemorySession, MemorySource, MemoryStore, RecordingStage};
