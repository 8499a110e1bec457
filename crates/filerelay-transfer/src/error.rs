//! # Design
//!
//! - One variant per failing operation, so logs and metrics can tell a
//!   listing outage from a single unreadable file.
//! - Messages stay constant; names and paths travel in fields.

use std::error::Error;

use filerelay_core::{SourceError, StoreError};
use filerelay_events::PipelineError;
use filerelay_pool::PoolError;
use thiserror::Error;

/// Result alias for transfer operations.
pub type TransferResult<T> = Result<T, TransferError>;

/// Errors raised while discovering or moving a file.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Listing the source directory failed.
    #[error("source listing failed")]
    Listing {
        /// Directory that was listed.
        path: String,
        /// Underlying source error.
        source: SourceError,
    },
    /// Retrieving a file failed part way.
    #[error("file retrieval failed")]
    Retrieval {
        /// File being retrieved.
        name: String,
        /// Underlying source error.
        source: SourceError,
    },
    /// The source had no stream to offer for the file.
    #[error("retrieval stream unavailable")]
    StreamUnavailable {
        /// File being retrieved.
        name: String,
    },
    /// Removing the source file failed.
    #[error("source deletion failed")]
    Deletion {
        /// File being deleted.
        name: String,
        /// Underlying source error.
        source: SourceError,
    },
    /// The object store rejected the write.
    #[error("object store write failed")]
    StoreWrite {
        /// Destination key.
        key: String,
        /// Underlying store error.
        source: StoreError,
    },
    /// No pooled connection could be borrowed.
    #[error("connection borrow failed")]
    Borrow {
        /// Operation that needed the connection.
        operation: &'static str,
        /// Underlying pool error.
        source: PoolError,
    },
    /// Handing the item to the next topic failed.
    #[error("pipeline publish failed")]
    Publish {
        /// Underlying pipeline error.
        source: PipelineError,
    },
    /// The extension allow-list is unusable.
    #[error("invalid extension filter")]
    InvalidFilter {
        /// Static reason for the rejection.
        reason: &'static str,
        /// Offending entry when available.
        value: Option<String>,
    },
    /// The compiled allow-list pattern was rejected by the regex engine.
    #[error("extension filter pattern failed to compile")]
    FilterPattern {
        /// Underlying regex error.
        source: regex::Error,
    },
}

impl TransferError {
    /// Short label for the step that failed.
    #[must_use]
    pub const fn phase(&self) -> &'static str {
        match self {
            Self::Listing { .. } => "list",
            Self::Retrieval { .. } | Self::StreamUnavailable { .. } => "retrieve",
            Self::Deletion { .. } => "delete",
            Self::StoreWrite { .. } => "store",
            Self::Borrow { .. } => "borrow",
            Self::Publish { .. } => "publish",
            Self::InvalidFilter { .. } | Self::FilterPattern { .. } => "filter",
        }
    }
}

/// Render an error with its whole source chain, for log fields.
#[must_use]
pub fn describe(err: &(dyn Error + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
