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

//! Bounded pool of expensive, stateful connections.
//!
//! Built on `deadpool::managed`. Sources implement deadpool's [`Manager`]
//! (re-exported here) and every borrowed connection is wrapped in a [`Pooled`]
//! guard that must end in exactly one of [`Pooled::release`] (back to the pool) or
//! [`Pooled::invalidate`] (discarded for good). A guard dropped without either
//! call is invalidated, so error paths that bail out with `?` or unwind never
//! hand a half-used connection to the next borrower.
//!
//! Layout: `manager.rs` (connection factory bound), `pool.rs` (pool and guard),
//! `error.rs` (borrow failures).

pub mod error;
pub mod manager;
pub mod pool;

pub use error::{PoolError, PoolResult};
pub use deadpool::managed::{Manager, Metrics as RecycleMetrics, RecycleError, RecycleResult};
pub use manager::ConnectionManager;
pub use pool::{Pool, PoolOptions, PoolStats, Pooled};
