//! Borrow failures surfaced by the pool.

use std::error::Error;
use std::time::Duration;

use deadpool::managed::BuildError;
use thiserror::Error;

/// Result alias for pool operations.
pub type PoolResult<T> = Result<T, PoolError>;

/// Errors returned when a connection cannot be borrowed.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Every connection is checked out and the pool does not wait.
    #[error("connection pool exhausted")]
    Exhausted {
        /// Configured upper bound on live connections.
        max_total: usize,
    },
    /// No connection became available within the borrow timeout.
    #[error("timed out waiting for pooled connection")]
    Timeout {
        /// Time spent waiting.
        waited: Duration,
    },
    /// The pool is shutting down.
    #[error("connection pool closed")]
    Closed,
    /// Opening a fresh connection failed.
    #[error("failed to open pooled connection")]
    Connect {
        /// Error reported by the connection manager.
        source: Box<dyn Error + Send + Sync>,
    },
    /// The underlying pool could not be built.
    #[error("failed to build connection pool")]
    Build {
        /// Builder failure reported by deadpool.
        source: BuildError,
    },
    /// The underlying pool rejected the borrow for a reason unrelated to capacity.
    #[error("connection pool misconfigured")]
    Misconfigured {
        /// Which part of the configuration is at fault.
        reason: &'static str,
    },
}

impl PoolError {
    pub(crate) fn connect(source: impl Error + Send + Sync + 'static) -> Self {
        Self::Connect {
            source: Box::new(source),
        }
    }

    /// Whether the failure comes from pool saturation rather than the remote side.
    #[must_use]
    pub const fn is_saturation(&self) -> bool {
        matches!(self, Self::Exhausted { .. } | Self::Timeout { .. })
    }
}
