//! # Design
//!
//! - Keep error messages constant; carry the operation and file name in fields.
//! - Preserve adapter-specific sources behind boxed errors so the core stays
//!   protocol-agnostic.

use std::error::Error;
use std::io;

use thiserror::Error;

/// Result alias for source session operations.
pub type SourceResult<T> = Result<T, SourceError>;

/// Result alias for object store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors raised by a file source session.
#[derive(Debug, Error)]
pub enum SourceError {
    /// IO failure while talking to the source.
    #[error("source io failure")]
    Io {
        /// Operation that triggered the failure.
        operation: &'static str,
        /// File or directory involved.
        name: String,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The source refused the request.
    #[error("source rejected request")]
    Rejected {
        /// Operation that was rejected.
        operation: &'static str,
        /// File or directory involved.
        name: String,
        /// Reply or reason reported for the rejection.
        reason: String,
    },
    /// The session can no longer be used.
    #[error("source session unavailable")]
    Unavailable {
        /// Static reason describing why the session is unusable.
        reason: &'static str,
    },
}

impl SourceError {
    /// Build an [`SourceError::Io`] with operation context.
    #[must_use]
    pub fn io(operation: &'static str, name: impl Into<String>, source: io::Error) -> Self {
        Self::Io {
            operation,
            name: name.into(),
            source,
        }
    }

    /// Build a [`SourceError::Rejected`] with operation context.
    #[must_use]
    pub fn rejected(
        operation: &'static str,
        name: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Rejected {
            operation,
            name: name.into(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by an object store adapter.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Writing an object failed.
    #[error("object store write failed")]
    Write {
        /// Destination key.
        key: String,
        /// Backend error.
        source: Box<dyn Error + Send + Sync>,
    },
    /// The payload length differs from the length declared for the object.
    #[error("object length does not match declared size")]
    LengthMismatch {
        /// Destination key.
        key: String,
        /// Length declared at discovery.
        declared: u64,
        /// Length of the payload handed to the store.
        actual: u64,
    },
    /// The backend could not be configured.
    #[error("object store backend unavailable")]
    Backend {
        /// Operation that failed.
        operation: &'static str,
        /// Backend error.
        source: Box<dyn Error + Send + Sync>,
    },
}

impl StoreError {
    /// Build a [`StoreError::Write`] for `key`.
    #[must_use]
    pub fn write(key: impl Into<String>, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Write {
            key: key.into(),
            source: Box::new(source),
        }
    }

    /// Build a [`StoreError::Backend`] for `operation`.
    #[must_use]
    pub fn backend(operation: &'static str, source: impl Error + Send + Sync + 'static) -> Self {
        Self::Backend {
            operation,
            source: Box::new(source),
        }
    }
}
