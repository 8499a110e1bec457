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

//! Relay configuration.
//!
//! A YAML document (path from `FILERELAY_CONFIG`, default `filerelay.yaml`)
//! is layered with `FILERELAY_*` environment overrides and validated before
//! any component is built from it.

mod defaults;
pub mod error;
pub mod loader;
pub mod model;
mod validate;

pub use error::{ConfigError, ConfigResult};
pub use loader::{CONFIG_PATH_ENV, DEFAULT_CONFIG_PATH, load, load_from_path, load_with, parse_yaml};
pub use model::{
    LoggingSettings, OverflowMode, PipelineConfig, PollConfig, PoolConfig, RelayConfig,
    SourceConfig, StoreConfig, StoreScheme,
};
