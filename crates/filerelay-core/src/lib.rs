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

//! Source-agnostic relay interfaces and DTOs.
//!
//! Layout: `model/` (file items and listing entries), `service/` (source and
//! object store capabilities), `error.rs` (adapter error types).

pub mod error;
pub mod model;
pub mod service;

pub use error::{SourceError, SourceResult, StoreError, StoreResult};
pub use model::{FileItem, RemoteEntry};
pub use service::{ByteStream, ObjectStore, SourceSession};
