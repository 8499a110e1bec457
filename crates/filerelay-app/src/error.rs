//! # Design
//!
//! - Centralize application-level errors for bootstrap, wiring and shutdown.
//! - Keep error messages constant while carrying the operation in a field.

use thiserror::Error;
use tokio::task::JoinError;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration could not be loaded or validated.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: filerelay_config::ConfigError,
    },
    /// Logging or metrics setup failed.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: filerelay_telemetry::TelemetryError,
    },
    /// The object store could not be built.
    #[error("object store operation failed")]
    Store {
        /// Operation identifier.
        operation: &'static str,
        /// Source store error.
        source: filerelay_core::StoreError,
    },
    /// Transfer components rejected their settings.
    #[error("transfer setup failed")]
    Transfer {
        /// Operation identifier.
        operation: &'static str,
        /// Source transfer error.
        source: filerelay_transfer::TransferError,
    },
    /// Pipeline wiring failed.
    #[error("pipeline operation failed")]
    Pipeline {
        /// Operation identifier.
        operation: &'static str,
        /// Source pipeline error.
        source: filerelay_events::PipelineError,
    },
    /// Connection pool operation failed.
    #[error("connection pool operation failed")]
    Pool {
        /// Operation identifier.
        operation: &'static str,
        /// Source pool error.
        source: filerelay_pool::PoolError,
    },
    /// A background task could not be joined.
    #[error("background task failed")]
    TaskJoin {
        /// Task name.
        task: &'static str,
        /// Join failure.
        source: JoinError,
    },
}

impl AppError {
    pub(crate) const fn config(
        operation: &'static str,
        source: filerelay_config::ConfigError,
    ) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: filerelay_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn store(operation: &'static str, source: filerelay_core::StoreError) -> Self {
        Self::Store { operation, source }
    }

    pub(crate) const fn transfer(
        operation: &'static str,
        source: filerelay_transfer::TransferError,
    ) -> Self {
        Self::Transfer { operation, source }
    }

    pub(crate) const fn pipeline(
        operation: &'static str,
        source: filerelay_events::PipelineError,
    ) -> Self {
        Self::Pipeline { operation, source }
    }

    pub(crate) const fn pool(operation: &'static str, source: filerelay_pool::PoolError) -> Self {
        Self::Pool { operation, source }
    }
}
