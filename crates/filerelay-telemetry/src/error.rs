//! Telemetry failures. Messages are constant; the metric involved travels in
//! a field.

use thiserror::Error;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Which half of collector setup failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorStep {
    /// Building the collector from its options.
    Build,
    /// Adding the collector to the registry.
    Register,
}

impl CollectorStep {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Build => "build",
            Self::Register => "register",
        }
    }
}

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global tracing subscriber was already installed or could not be set.
    #[error("failed to install tracing subscriber")]
    SubscriberInstall {
        /// Underlying subscriber error.
        source: tracing_subscriber::util::TryInitError,
    },
    /// A Prometheus collector could not be set up.
    #[error("metrics collector setup failed")]
    Collector {
        /// Metric name.
        metric: &'static str,
        /// Setup step that failed.
        step: CollectorStep,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// Text exposition of the registry failed.
    #[error("failed to encode metrics")]
    Encode {
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The encoder produced bytes that are not UTF-8.
    #[error("metrics output was not valid utf-8")]
    NonUtf8 {
        /// Underlying conversion error.
        source: std::string::FromUtf8Error,
    },
}
