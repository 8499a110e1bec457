//! Prometheus-backed metrics registry and snapshot helpers.
//!
//! # Design
//! - Encapsulates collector registration to keep the public API small.
//! - Label values are fixed strings chosen by the callers (stage and topic
//!   names, outcome keywords) so cardinality stays bounded.

use std::sync::Arc;

use prometheus::core::Collector;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use serde::Serialize;

use crate::error::{CollectorStep, Result, TelemetryError};

/// Prometheus-backed metrics registry shared by the poller and the stages.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

struct MetricsInner {
    registry: Registry,
    poll_cycles_total: IntCounterVec,
    files_discovered_total: IntCounter,
    transfers_total: IntCounterVec,
    transfer_bytes_total: IntCounterVec,
    pipeline_dropped_total: IntCounterVec,
    stage_failures_total: IntCounterVec,
    pool_connections: IntGaugeVec,
}

/// Snapshot of selected gauges and counters for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Poll cycles that listed at least one matching entry.
    pub poll_cycles_completed: u64,
    /// Poll cycles aborted by a borrow, listing or publish failure.
    pub poll_cycles_failed: u64,
    /// Entries published as new by the poller.
    pub files_discovered: u64,
    /// Downloads that produced a payload.
    pub downloads_succeeded: u64,
    /// Downloads that left the item without payload.
    pub downloads_failed: u64,
    /// Uploads written to the object store.
    pub uploads_succeeded: u64,
    /// Uploads rejected by the object store.
    pub uploads_failed: u64,
    /// Bytes read from the source.
    pub bytes_downloaded: u64,
    /// Bytes written to the object store.
    pub bytes_uploaded: u64,
    /// Idle pooled connections at the last gauge update.
    pub pool_idle: i64,
    /// Borrowed pooled connections at the last gauge update.
    pub pool_in_use: i64,
}

impl Metrics {
    /// Construct a new metrics registry with the standard collectors registered.
    ///
    /// # Errors
    ///
    /// Returns an error if any of the Prometheus collectors cannot be built or
    /// registered.
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let poll_cycles_total = register(
            &registry,
            "poll_cycles_total",
            IntCounterVec::new(
                Opts::new("poll_cycles_total", "Poll cycles executed by outcome"),
                &["outcome"],
            ),
        )?;
        let files_discovered_total = register(
            &registry,
            "files_discovered_total",
            IntCounter::with_opts(Opts::new(
                "files_discovered_total",
                "Entries newer than the watermark published by the poller",
            )),
        )?;
        let transfers_total = register(
            &registry,
            "transfers_total",
            IntCounterVec::new(
                Opts::new("transfers_total", "Per-item transfer attempts by stage and outcome"),
                &["stage", "outcome"],
            ),
        )?;
        let transfer_bytes_total = register(
            &registry,
            "transfer_bytes_total",
            IntCounterVec::new(
                Opts::new("transfer_bytes_total", "Bytes moved by stage"),
                &["stage"],
            ),
        )?;
        let pipeline_dropped_total = register(
            &registry,
            "pipeline_dropped_total",
            IntCounterVec::new(
                Opts::new(
                    "pipeline_dropped_total",
                    "Items dropped by a full pipeline queue",
                ),
                &["topic"],
            ),
        )?;
        let stage_failures_total = register(
            &registry,
            "stage_failures_total",
            IntCounterVec::new(
                Opts::new(
                    "stage_failures_total",
                    "Stage handler errors and panics caught at the item boundary",
                ),
                &["stage"],
            ),
        )?;
        let pool_connections = register(
            &registry,
            "pool_connections",
            IntGaugeVec::new(
                Opts::new("pool_connections", "Pooled source connections by state"),
                &["state"],
            ),
        )?;

        Ok(Self {
            inner: Arc::new(MetricsInner {
                registry,
                poll_cycles_total,
                files_discovered_total,
                transfers_total,
                transfer_bytes_total,
                pipeline_dropped_total,
                stage_failures_total,
                pool_connections,
            }),
        })
    }

    /// Increment the poll cycle counter for the given outcome.
    pub fn inc_poll_cycle(&self, outcome: &str) {
        self.inner
            .poll_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    /// Record entries published as new by the poller.
    pub fn add_files_discovered(&self, count: u64) {
        self.inner.files_discovered_total.inc_by(count);
    }

    /// Increment the transfer counter for a stage and outcome.
    pub fn inc_transfer(&self, stage: &str, outcome: &str) {
        self.inner
            .transfers_total
            .with_label_values(&[stage, outcome])
            .inc();
    }

    /// Record bytes moved by a stage.
    pub fn add_transfer_bytes(&self, stage: &str, bytes: u64) {
        self.inner
            .transfer_bytes_total
            .with_label_values(&[stage])
            .inc_by(bytes);
    }

    /// Record items dropped by a full queue on `topic`.
    pub fn add_pipeline_dropped(&self, topic: &str, count: u64) {
        self.inner
            .pipeline_dropped_total
            .with_label_values(&[topic])
            .inc_by(count);
    }

    /// Increment the failure counter for a stage.
    pub fn inc_stage_failure(&self, stage: &str) {
        self.inner
            .stage_failures_total
            .with_label_values(&[stage])
            .inc();
    }

    /// Update the pool gauges.
    pub fn set_pool_connections(&self, idle: usize, in_use: usize) {
        let gauge = &self.inner.pool_connections;
        gauge.with_label_values(&["idle"]).set(saturating_i64(idle));
        gauge
            .with_label_values(&["in_use"])
            .set(saturating_i64(in_use));
    }

    /// Number of stage failures recorded for `stage`.
    #[must_use]
    pub fn stage_failures(&self, stage: &str) -> u64 {
        self.inner
            .stage_failures_total
            .with_label_values(&[stage])
            .get()
    }

    /// Number of items dropped on `topic`.
    #[must_use]
    pub fn pipeline_dropped(&self, topic: &str) -> u64 {
        self.inner
            .pipeline_dropped_total
            .with_label_values(&[topic])
            .get()
    }

    /// Render the metrics registry using the Prometheus text exposition format.
    ///
    /// # Errors
    ///
    /// Returns an error if the metrics cannot be encoded or if the encoded
    /// buffer is not valid UTF-8.
    pub fn render(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        encoder
            .encode(&metric_families, &mut buffer)
            .map_err(|source| TelemetryError::Encode { source })?;
        String::from_utf8(buffer).map_err(|source| TelemetryError::NonUtf8 { source })
    }

    /// Take a point-in-time snapshot of the most relevant gauges and counters.
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        let inner = &self.inner;
        let transfers = |stage: &str, outcome: &str| {
            inner
                .transfers_total
                .with_label_values(&[stage, outcome])
                .get()
        };
        let bytes = |stage: &str| inner.transfer_bytes_total.with_label_values(&[stage]).get();
        MetricsSnapshot {
            poll_cycles_completed: inner
                .poll_cycles_total
                .with_label_values(&["completed"])
                .get(),
            poll_cycles_failed: inner.poll_cycles_total.with_label_values(&["failed"]).get(),
            files_discovered: inner.files_discovered_total.get(),
            downloads_succeeded: transfers("download", "success"),
            downloads_failed: transfers("download", "failure"),
            uploads_succeeded: transfers("upload", "success"),
            uploads_failed: transfers("upload", "failure"),
            bytes_downloaded: bytes("download"),
            bytes_uploaded: bytes("upload"),
            pool_idle: inner.pool_connections.with_label_values(&["idle"]).get(),
            pool_in_use: inner.pool_connections.with_label_values(&["in_use"]).get(),
        }
    }
}

fn register<C>(
    registry: &Registry,
    name: &'static str,
    collector: prometheus::Result<C>,
) -> Result<C>
where
    C: Collector + Clone + 'static,
{
    let collector = collector.map_err(|source| TelemetryError::Collector {
        metric: name,
        step: CollectorStep::Build,
        source,
    })?;
    registry
        .register(Box::new(collector.clone()))
        .map_err(|source| TelemetryError::Collector {
            metric: name,
            step: CollectorStep::Register,
            source,
        })?;
    Ok(collector)
}

fn saturating_i64(value: usize) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}
