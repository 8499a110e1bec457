//! Pipeline assembly and drain-then-close shutdown.

use std::sync::Arc;
use std::time::Duration;

use filerelay_config::{OverflowMode, RelayConfig};
use filerelay_core::{FileItem, ObjectStore, SourceSession};
use filerelay_events::{Drain, OverflowPolicy, PipelineOptions, Topic};
use filerelay_pool::{ConnectionManager, Pool, PoolError, PoolOptions, PoolStats};
use filerelay_telemetry::{Metrics, MetricsSnapshot};
use filerelay_transfer::{
    DOWNLOAD_STAGE, DownloadSettings, DownloadStage, ExtensionFilter, Poller, UPLOAD_STAGE,
    UploadStage, Watermark,
};
use tokio::time::Instant;
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::scheduler::{Schedule, SchedulerHandle, spawn_scheduler};

/// Topic carrying freshly discovered items.
pub const DISCOVERED_TOPIC: &str = "discovered";
/// Topic carrying downloaded items.
pub const DOWNLOADED_TOPIC: &str = "downloaded";

/// Everything needed to assemble a relay, independent of file formats.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySettings {
    /// Directory polled on the source.
    pub source_path: String,
    /// Allowed file extensions.
    pub extensions: Vec<String>,
    /// Remove source files after they reach the upload stage.
    pub delete_after_transfer: bool,
    /// Poll timing.
    pub schedule: Schedule,
    /// Source connection pool options.
    pub pool: PoolOptions,
    /// Options shared by both topics.
    pub pipeline: PipelineOptions,
    /// Download handlers.
    pub download_workers: usize,
    /// Upload handlers.
    pub upload_workers: usize,
    /// Budget for draining the pipeline and closing the pool.
    pub shutdown_timeout: Duration,
}

impl RelaySettings {
    /// Translate a validated configuration.
    #[must_use]
    pub fn from_config(config: &RelayConfig) -> Self {
        Self {
            source_path: config.source.path.clone(),
            extensions: config.source.extensions.clone(),
            delete_after_transfer: config.source.delete_after_transfer,
            schedule: Schedule {
                interval: config.poll.interval,
                initial_delay: config.poll.initial_delay,
            },
            pool: PoolOptions {
                max_total: config.pool.max_total,
                min_idle: config.pool.min_idle,
                max_idle: config.pool.max_idle,
                borrow_timeout: config.pool.borrow_timeout,
                validate_on_borrow: config.pool.validate_on_borrow,
                block_when_exhausted: config.pool.block_when_exhausted,
            },
            pipeline: PipelineOptions {
                capacity: config.pipeline.capacity,
                overflow: match config.pipeline.overflow {
                    OverflowMode::Block => OverflowPolicy::Block,
                    OverflowMode::DropNewest => OverflowPolicy::DropNewest,
                },
                publish_timeout: config.pipeline.publish_timeout,
            },
            download_workers: config.pipeline.download_workers,
            upload_workers: config.pipeline.upload_workers,
            shutdown_timeout: config.pipeline.shutdown_timeout,
        }
    }
}

/// Summary of a completed shutdown.
#[derive(Debug, Clone)]
pub struct ShutdownReport {
    /// Poll cycles run.
    pub cycles: u64,
    /// Watermark when polling stopped.
    pub watermark: Watermark,
    /// How the download subscription stopped.
    pub downloads: Drain,
    /// How the upload subscription stopped.
    pub uploads: Drain,
    /// Pool bookkeeping after close.
    pub pool: PoolStats,
    /// Whether everything drained within the shutdown budget.
    pub clean: bool,
    /// Final metric values.
    pub metrics: MetricsSnapshot,
}

/// A relay whose scheduler and stage workers are running.
pub struct RunningRelay<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    scheduler: SchedulerHandle,
    discovered: Topic<FileItem>,
    downloaded: Topic<FileItem>,
    downloads: filerelay_events::Subscription,
    uploads: filerelay_events::Subscription,
    pool: Pool<M>,
    metrics: Metrics,
    shutdown_timeout: Duration,
}

/// Wire poller, topics and stages together and start polling.
///
/// Subscriptions are registered before the scheduler starts, so no
/// discovered item is published without a consumer.
///
/// # Errors
///
/// Returns an error when the extension list is unusable, the pool cannot
/// open its `min_idle` connections, or a topic rejects a subscription.
pub async fn start_relay<M>(
    manager: M,
    store: Arc<dyn ObjectStore>,
    settings: RelaySettings,
    metrics: Metrics,
) -> AppResult<RunningRelay<M>>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    let filter = ExtensionFilter::new(&settings.extensions)
        .map_err(|err| AppError::transfer("filter.build", err))?;

    let pool = Pool::new(manager, settings.pool.clone())
        .map_err(|err| AppError::pool("pool.build", err))?;
    let opened = pool
        .prefill()
        .await
        .map_err(|err| AppError::pool("pool.prefill", err))?;

    let discovered = Topic::new(DISCOVERED_TOPIC, settings.pipeline, metrics.clone());
    let downloaded = Topic::new(DOWNLOADED_TOPIC, settings.pipeline, metrics.clone());

    let uploads = downloaded
        .subscribe(
            UPLOAD_STAGE,
            settings.upload_workers,
            Arc::new(UploadStage::new(store, metrics.clone())),
        )
        .map_err(|err| AppError::pipeline("pipeline.subscribe", err))?;
    let downloads = discovered
        .subscribe(
            DOWNLOAD_STAGE,
            settings.download_workers,
            Arc::new(DownloadStage::new(
                pool.clone(),
                downloaded.clone(),
                metrics.clone(),
                DownloadSettings {
                    source_path: settings.source_path.clone(),
                    delete_after_transfer: settings.delete_after_transfer,
                },
            )),
        )
        .map_err(|err| AppError::pipeline("pipeline.subscribe", err))?;

    let poller = Poller::new(
        pool.clone(),
        discovered.clone(),
        metrics.clone(),
        settings.source_path.clone(),
        filter,
    );
    let scheduler = spawn_scheduler(poller, pool.clone(), settings.schedule, metrics.clone());

    info!(
        path = %settings.source_path,
        extensions = ?settings.extensions,
        prefilled = opened,
        download_workers = settings.download_workers,
        upload_workers = settings.upload_workers,
        delete_after_transfer = settings.delete_after_transfer,
        "relay started"
    );

    Ok(RunningRelay {
        scheduler,
        discovered,
        downloaded,
        downloads,
        uploads,
        pool,
        metrics,
        shutdown_timeout: settings.shutdown_timeout,
    })
}

impl<M> RunningRelay<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    /// Metrics shared by every component.
    #[must_use]
    pub const fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Current pool bookkeeping.
    #[must_use]
    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    /// Stop polling, drain both stages in order, then close the pool.
    ///
    /// Draining and closing share one shutdown budget. Stage workers still
    /// running when it is spent are aborted, their queued items dropped, and
    /// the shutdown is reported as unclean.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TaskJoin`] if the scheduler task panicked.
    pub async fn shutdown(self) -> AppResult<ShutdownReport> {
        let deadline = Instant::now() + self.shutdown_timeout;
        info!("relay shutdown starting");

        let scheduler = self.scheduler.stop().await?;

        self.discovered.close();
        let downloads = self.downloads.join_until(deadline).await;
        if !downloads.is_complete() {
            warn!(topic = DISCOVERED_TOPIC, "download stage aborted at shutdown deadline");
        }

        self.downloaded.close();
        let uploads = self.uploads.join_until(deadline).await;
        if !uploads.is_complete() {
            warn!(topic = DOWNLOADED_TOPIC, "upload stage aborted at shutdown deadline");
        }

        let grace = deadline.saturating_duration_since(Instant::now());
        let pool_closed = match self.pool.close(grace).await {
            Ok(()) => true,
            Err(PoolError::Timeout { .. }) => {
                warn!(stats = ?self.pool.stats(), "connections still held at pool close");
                false
            }
            Err(err) => {
                warn!(error = %err, "pool close failed");
                false
            }
        };

        let pool = self.pool.stats();
        self.metrics.set_pool_connections(pool.idle, pool.in_use);
        let report = ShutdownReport {
            cycles: scheduler.cycles,
            watermark: scheduler.watermark,
            clean: downloads.is_complete() && uploads.is_complete() && pool_closed,
            downloads,
            uploads,
            pool,
            metrics: self.metrics.snapshot(),
        };
        info!(
            cycles = report.cycles,
            watermark = ?report.watermark.value(),
            clean = report.clean,
            files_discovered = report.metrics.files_discovered,
            uploads_succeeded = report.metrics.uploads_succeeded,
            uploads_failed = report.metrics.uploads_failed,
            "relay shutdown complete"
        );
        Ok(report)
    }
}
