//! Typed configuration sections.

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::defaults;

/// Complete relay configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RelayConfig {
    /// Polling schedule.
    pub poll: PollConfig,
    /// Remote directory and discovery rules.
    pub source: SourceConfig,
    /// Source connection pool sizing.
    pub pool: PoolConfig,
    /// Topic capacity, back-pressure and worker counts.
    pub pipeline: PipelineConfig,
    /// Object store destination.
    pub store: StoreConfig,
    /// Log level and output format.
    pub logging: LoggingSettings,
}

/// Polling schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PollConfig {
    /// Period between poll cycles.
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
    /// Delay before the first cycle.
    #[serde(with = "humantime_serde")]
    pub initial_delay: Duration,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: defaults::POLL_INTERVAL,
            initial_delay: defaults::POLL_INITIAL_DELAY,
        }
    }
}

/// Source directory and discovery rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    /// Local mount point of the source tree.
    pub root: PathBuf,
    /// Directory polled under `root`.
    pub path: String,
    /// Allowed file extensions, with or without the leading dot.
    pub extensions: Vec<String>,
    /// Remove the source file after it has been handed to the upload stage.
    pub delete_after_transfer: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::new(),
            path: defaults::SOURCE_PATH.to_string(),
            extensions: defaults::SOURCE_EXTENSIONS
                .iter()
                .map(ToString::to_string)
                .collect(),
            delete_after_transfer: false,
        }
    }
}

/// Connection pool sizing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PoolConfig {
    /// Upper bound on live connections.
    pub max_total: usize,
    /// Connections opened eagerly at startup.
    pub min_idle: usize,
    /// Idle connections kept after release.
    pub max_idle: usize,
    /// How long a borrow may wait for capacity.
    #[serde(with = "humantime_serde")]
    pub borrow_timeout: Duration,
    /// Check idle connections before lending them.
    pub validate_on_borrow: bool,
    /// Wait for capacity instead of failing fast.
    pub block_when_exhausted: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_total: defaults::POOL_MAX_TOTAL,
            min_idle: defaults::POOL_MIN_IDLE,
            max_idle: defaults::POOL_MAX_IDLE,
            borrow_timeout: defaults::POOL_BORROW_TIMEOUT,
            validate_on_borrow: true,
            block_when_exhausted: true,
        }
    }
}

/// Behaviour when a topic queue is full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowMode {
    /// Wait for room, up to the publish timeout.
    #[default]
    Block,
    /// Discard the new item and count the drop.
    DropNewest,
}

/// Topic and worker settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PipelineConfig {
    /// Per-subscriber queue capacity.
    pub capacity: usize,
    /// Full-queue behaviour.
    pub overflow: OverflowMode,
    /// Longest a blocking publish may wait.
    #[serde(with = "humantime_serde")]
    pub publish_timeout: Duration,
    /// Concurrent download handlers.
    pub download_workers: usize,
    /// Concurrent upload handlers.
    pub upload_workers: usize,
    /// Longest shutdown may spend draining queues and the pool.
    #[serde(with = "humantime_serde")]
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: defaults::PIPELINE_CAPACITY,
            overflow: OverflowMode::Block,
            publish_timeout: defaults::PIPELINE_PUBLISH_TIMEOUT,
            download_workers: defaults::PIPELINE_DOWNLOAD_WORKERS,
            upload_workers: defaults::PIPELINE_UPLOAD_WORKERS,
            shutdown_timeout: defaults::PIPELINE_SHUTDOWN_TIMEOUT,
        }
    }
}

/// Object store backend.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreScheme {
    /// S3 or an S3-compatible endpoint.
    #[default]
    S3,
    /// Local filesystem directory.
    Fs,
}

impl StoreScheme {
    /// Label used in logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::S3 => "s3",
            Self::Fs => "fs",
        }
    }
}

/// Object store destination.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StoreConfig {
    /// Backend kind.
    pub scheme: StoreScheme,
    /// Bucket name (`s3`).
    pub bucket: Option<String>,
    /// Bucket region (`s3`).
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services.
    pub endpoint: Option<String>,
    /// Static access key; the ambient credential chain is used when unset.
    pub access_key_id: Option<String>,
    /// Static secret key.
    pub secret_access_key: Option<String>,
    /// Key prefix (`s3`) or target directory (`fs`).
    pub root: Option<String>,
}

impl fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreConfig")
            .field("scheme", &self.scheme)
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field("access_key_id", &self.access_key_id)
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "<redacted>"),
            )
            .field("root", &self.root)
            .finish()
    }
}

/// Log level and output format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// `json` or `pretty`; inferred from the build profile when unset.
    pub format: Option<String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: defaults::LOG_LEVEL.to_string(),
            format: None,
        }
    }
}
