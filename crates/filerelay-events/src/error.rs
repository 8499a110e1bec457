//! Pipeline error primitives.

use std::time::Duration;

use thiserror::Error;

/// Result wrapper for pipeline operations.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised when handing an item to a topic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineError {
    /// A subscriber queue stayed full for the whole publish timeout.
    #[error("timed out publishing to full subscriber queue")]
    PublishTimeout {
        /// Topic the item was published on.
        topic: &'static str,
        /// Subscription whose queue was full.
        subscriber: &'static str,
        /// Time spent waiting for room.
        waited: Duration,
    },
    /// The topic no longer accepts items.
    #[error("pipeline topic closed")]
    Closed {
        /// Topic the item was published on.
        topic: &'static str,
    },
}

impl PipelineError {
    /// Topic associated with the failure.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::PublishTimeout { topic, .. } | Self::Closed { topic } => topic,
        }
    }
}
