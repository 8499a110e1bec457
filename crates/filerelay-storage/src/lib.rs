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

//! Concrete adapters behind the relay's capability traits.
//!
//! - [`LocalDirManager`] hands out [`LocalDirSession`]s over a mounted
//!   directory tree for the connection pool.
//! - [`OpenDalStore`] writes relayed files through an OpenDAL operator.

pub mod local;
pub mod object;

pub use local::{LocalDirManager, LocalDirSession};
pub use object::OpenDalStore;
