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

//! Incremental discovery and transfer of remote files.
//!
//! Layout: `poller.rs` (watermark poller), `filter.rs` (extension allow-list),
//! `download.rs` and `upload.rs` (pipeline stages), `error.rs` (per-operation
//! failures).

pub mod download;
pub mod error;
pub mod filter;
pub mod poller;
pub mod upload;

pub use download::{DownloadSettings, DownloadStage};
pub use error::{TransferError, TransferResult, describe};
pub use filter::ExtensionFilter;
pub use poller::{CycleOutcome, Poller, Watermark};
pub use upload::UploadStage;

/// Metric label and stage name of the download stage.
pub const DOWNLOAD_STAGE: &str = "download";
/// Metric label and stage name of the upload stage.
pub const UPLOAD_STAGE: &str = "upload";
/// Metric label for source deletions.
pub const DELETE_STEP: &str = "delete";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Success,
    Failure,
    Skipped,
}

impl Outcome {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Skipped => "skipped",
        }
    }
}
