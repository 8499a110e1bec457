//! Watermark poller turning directory listings into new-file events.
//!
//! # Design
//! - The watermark is a plain field; `poll_cycle` takes `&mut self`, so two
//!   cycles can never interleave on the same poller.
//! - Entries are emitted in ascending modification order and only when they are
//!   strictly newer than the watermark captured at the start of the cycle.
//! - After a successful cycle the watermark moves to the newest matching entry,
//!   whether or not that entry was new. It never moves backwards.
//! - Any failure aborts the cycle with the watermark untouched; the listing
//!   connection is invalidated on every error path.

use chrono::{DateTime, Utc};
use filerelay_core::{FileItem, RemoteEntry, SourceSession};
use filerelay_events::{Delivery, Topic};
use filerelay_pool::{ConnectionManager, Pool};
use filerelay_telemetry::Metrics;
use tracing::{debug, error, info, warn};

use crate::error::{TransferError, TransferResult, describe};
use crate::filter::ExtensionFilter;

/// Newest modification time already handed to the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Watermark(Option<DateTime<Utc>>);

impl Watermark {
    /// Watermark that admits every timestamp.
    #[must_use]
    pub const fn unset() -> Self {
        Self(None)
    }

    /// Watermark positioned at `at`.
    #[must_use]
    pub const fn at(at: DateTime<Utc>) -> Self {
        Self(Some(at))
    }

    /// Current position, `None` before the first successful cycle.
    #[must_use]
    pub const fn value(self) -> Option<DateTime<Utc>> {
        self.0
    }

    /// Whether an entry modified at `modified_at` is newer than the watermark.
    #[must_use]
    pub fn admits(self, modified_at: DateTime<Utc>) -> bool {
        self.0.is_none_or(|mark| modified_at > mark)
    }

    /// Move forward to `candidate`; older or equal candidates are ignored.
    pub fn advance(&mut self, candidate: DateTime<Utc>) -> bool {
        if self.admits(candidate) {
            self.0 = Some(candidate);
            true
        } else {
            false
        }
    }
}

/// Result of one poll cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The cycle did not run.
    Skipped {
        /// Why the cycle was skipped.
        reason: &'static str,
    },
    /// The listing had no matching entries.
    Empty,
    /// The listing was processed.
    Completed {
        /// Matching entries in the listing.
        listed: usize,
        /// Entries newer than the watermark, published to the pipeline.
        new: usize,
    },
    /// The cycle was aborted.
    Failed {
        /// Step that failed (`borrow`, `list` or `publish`).
        phase: &'static str,
    },
}

impl CycleOutcome {
    /// Metric label for the outcome.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Skipped { .. } => "skipped",
            Self::Empty => "empty",
            Self::Completed { .. } => "completed",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Lists one source directory and publishes entries newer than the watermark.
pub struct Poller<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    pool: Pool<M>,
    topic: Topic<FileItem>,
    metrics: Metrics,
    path: String,
    filter: ExtensionFilter,
    watermark: Watermark,
}

impl<M> Poller<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    /// Poller for `path`, publishing to `topic`, starting with an unset watermark.
    #[must_use]
    pub fn new(
        pool: Pool<M>,
        topic: Topic<FileItem>,
        metrics: Metrics,
        path: impl Into<String>,
        filter: ExtensionFilter,
    ) -> Self {
        Self {
            pool,
            topic,
            metrics,
            path: path.into(),
            filter,
            watermark: Watermark::unset(),
        }
    }

    /// Start from an existing watermark instead of an unset one.
    #[must_use]
    pub const fn with_watermark(mut self, watermark: Watermark) -> Self {
        self.watermark = watermark;
        self
    }

    /// Current watermark.
    #[must_use]
    pub const fn watermark(&self) -> Watermark {
        self.watermark
    }

    /// Run one cycle: list, filter, sort, publish new entries, advance the watermark.
    pub async fn poll_cycle(&mut self) -> CycleOutcome {
        let outcome = if self.topic.is_closed() {
            debug!(path = %self.path, "pipeline closed; poll cycle skipped");
            CycleOutcome::Skipped {
                reason: "pipeline closed",
            }
        } else {
            match self.run_cycle().await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(
                        path = %self.path,
                        phase = err.phase(),
                        error = %describe(&err),
                        "poll cycle aborted"
                    );
                    CycleOutcome::Failed { phase: err.phase() }
                }
            }
        };
        self.metrics.inc_poll_cycle(outcome.as_str());
        outcome
    }

    async fn run_cycle(&mut self) -> TransferResult<CycleOutcome> {
        let mut connection = self
            .pool
            .borrow()
            .await
            .map_err(|source| TransferError::Borrow {
                operation: "list",
                source,
            })?;

        let entries = match connection.list(&self.path).await {
            Ok(entries) => entries,
            Err(source) => {
                connection.invalidate();
                return Err(TransferError::Listing {
                    path: self.path.clone(),
                    source,
                });
            }
        };

        let mut matching: Vec<RemoteEntry> = entries
            .into_iter()
            .filter(|entry| self.filter.matches(&entry.name))
            .collect();
        matching.sort_by_key(|entry| entry.modified_at);

        let listed = matching.len();
        let Some(newest) = matching.last().map(|entry| entry.modified_at) else {
            connection.release();
            debug!(path = %self.path, "no matching files listed");
            return Ok(CycleOutcome::Empty);
        };

        let baseline = self.watermark;
        let mut new = 0_usize;
        for entry in matching {
            if !baseline.admits(entry.modified_at) {
                debug!(
                    file = %entry.name,
                    modified_at = %entry.modified_at,
                    "entry not newer than watermark; skipping"
                );
                continue;
            }
            let item = FileItem::discovered(entry);
            debug!(file = %item.name, modified_at = %item.modified_at, "publishing new file");
            match self.topic.publish(item).await {
                Ok(Delivery::Delivered) => {}
                Ok(Delivery::Dropped { subscribers }) => {
                    warn!(path = %self.path, subscribers, "pipeline queue full; new file dropped");
                }
                Ok(Delivery::NoSubscribers) => {
                    warn!(path = %self.path, "no stage subscribed; new file discarded");
                }
                Err(source) => {
                    connection.invalidate();
                    return Err(TransferError::Publish { source });
                }
            }
            new += 1;
        }

        if !self.watermark.advance(newest) {
            debug!(
                path = %self.path,
                newest = %newest,
                "newest listed entry is not newer than the watermark; watermark kept"
            );
        }
        connection.release();

        self.metrics
            .add_files_discovered(u64::try_from(new).unwrap_or(u64::MAX));
        debug!(path = %self.path, total = listed, new, "poll cycle finished");
        if new > 0 {
            info!(path = %self.path, total = listed, new, "new files discovered");
        }
        Ok(CycleOutcome::Completed { listed, new })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filerelay_events::PipelineOptions;
    use filerelay_test_support::{
        MemoryManager, MemorySource, RecordingStage, fast_pool_options, ts,
    };
    use std::sync::Arc;

    struct Harness {
        source: MemorySource,
        pool: Pool<MemoryManager>,
        topic: Topic<FileItem>,
        recorder: Arc<RecordingStage<FileItem>>,
        subscription: filerelay_events::Subscription,
        poller: Poller<MemoryManager>,
        metrics: Metrics,
    }

    impl Harness {
        fn new() -> anyhow::Result<Self> {
            let source = MemorySource::new();
            let metrics = Metrics::new()?;
            let pool = Pool::new(MemoryManager::new(source.clone()), fast_pool_options(2))?;
            let topic = Topic::new("discovered", PipelineOptions::default(), metrics.clone());
            let recorder = Arc::new(RecordingStage::new("recorder"));
            let subscription = topic.subscribe("recorder", 1, recorder.clone())?;
            let poller = Poller::new(
                pool.clone(),
                topic.clone(),
                metrics.clone(),
                ".",
                ExtensionFilter::new([".jpg"])?,
            );
            Ok(Self {
                source,
                pool,
                topic,
                recorder,
                subscription,
                poller,
                metrics,
            })
        }

        async fn emitted(self) -> Vec<String> {
            self.topic.close();
            self.subscription.join().await;
            self.recorder
                .items()
                .into_iter()
                .map(|item| item.name)
                .collect()
        }
    }

    #[test]
    fn watermark_admits_only_newer_timestamps() {
        let mut mark = Watermark::unset();
        assert!(mark.admits(ts(0)));
        assert!(mark.advance(ts(5)));
        assert!(!mark.admits(ts(5)));
        assert!(mark.admits(ts(6)));
        assert!(!mark.advance(ts(3)));
        assert_eq!(mark.value(), Some(ts(5)));
    }

    #[tokio::test]
    async fn emits_matching_entries_in_order_and_advances_to_newest() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("c.jpg", &b"c"[..], ts(3));
        harness.source.add_file("a.jpg", &b"a"[..], ts(1));
        harness.source.add_file("b.txt", &b"b"[..], ts(2));

        let outcome = harness.poller.poll_cycle().await;
        assert_eq!(outcome, CycleOutcome::Completed { listed: 2, new: 2 });
        assert_eq!(harness.poller.watermark(), Watermark::at(ts(3)));
        assert_eq!(harness.metrics.snapshot().files_discovered, 2);
        assert_eq!(harness.emitted().await, vec!["a.jpg", "c.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn unchanged_listing_emits_nothing_on_second_cycle() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"a"[..], ts(1));
        harness.source.add_file("b.txt", &b"b"[..], ts(2));
        harness.source.add_file("c.jpg", &b"c"[..], ts(3));

        harness.poller.poll_cycle().await;
        let second = harness.poller.poll_cycle().await;
        assert_eq!(second, CycleOutcome::Completed { listed: 2, new: 0 });
        assert_eq!(harness.poller.watermark(), Watermark::at(ts(3)));
        assert_eq!(harness.emitted().await, vec!["a.jpg", "c.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn only_entries_newer_than_cycle_start_are_emitted() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"a"[..], ts(10));
        harness.poller.poll_cycle().await;

        harness.source.add_file("late.jpg", &b"l"[..], ts(5));
        harness.source.add_file("same.jpg", &b"s"[..], ts(10));
        harness.source.add_file("next.jpg", &b"n"[..], ts(11));
        let outcome = harness.poller.poll_cycle().await;

        assert_eq!(outcome, CycleOutcome::Completed { listed: 4, new: 1 });
        assert_eq!(harness.poller.watermark(), Watermark::at(ts(11)));
        assert_eq!(harness.emitted().await, vec!["a.jpg", "next.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn watermark_never_moves_backwards() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.poller = harness.poller.with_watermark(Watermark::at(ts(100)));
        harness.source.add_file("old.jpg", &b"o"[..], ts(50));

        let outcome = harness.poller.poll_cycle().await;
        assert_eq!(outcome, CycleOutcome::Completed { listed: 1, new: 0 });
        assert_eq!(harness.poller.watermark(), Watermark::at(ts(100)));
        assert!(harness.emitted().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn empty_listing_keeps_watermark_and_returns_connection() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("notes.txt", &b"n"[..], ts(1));

        assert_eq!(harness.poller.poll_cycle().await, CycleOutcome::Empty);
        assert_eq!(harness.poller.watermark(), Watermark::unset());
        let stats = harness.pool.stats();
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.invalidated, 0);
        Ok(())
    }

    #[tokio::test]
    async fn listing_failure_invalidates_connection_and_keeps_watermark() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"a"[..], ts(1));
        harness.source.fail_next_listings(1);

        let failed = harness.poller.poll_cycle().await;
        assert_eq!(failed, CycleOutcome::Failed { phase: "list" });
        assert_eq!(harness.poller.watermark(), Watermark::unset());
        assert_eq!(harness.pool.stats().invalidated, 1);

        let recovered = harness.poller.poll_cycle().await;
        assert_eq!(recovered, CycleOutcome::Completed { listed: 1, new: 1 });
        assert_eq!(harness.metrics.snapshot().poll_cycles_failed, 1);
        assert_eq!(harness.emitted().await, vec!["a.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn borrow_failure_aborts_cycle_without_side_effects() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"a"[..], ts(1));
        harness.pool.manager().refuse_connections(true);

        let outcome = harness.poller.poll_cycle().await;
        assert_eq!(outcome, CycleOutcome::Failed { phase: "borrow" });
        assert_eq!(harness.poller.watermark(), Watermark::unset());
        assert!(harness.source.listed_paths().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn closed_pipeline_skips_cycle() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"a"[..], ts(1));
        harness.topic.close();

        let outcome = harness.poller.poll_cycle().await;
        assert_eq!(
            outcome,
            CycleOutcome::Skipped {
                reason: "pipeline closed"
            }
        );
        assert_eq!(harness.poller.watermark(), Watermark::unset());
        assert!(harness.emitted().await.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn repeated_cycles_keep_watermark_monotonic() -> anyhow::Result<()> {
        let mut harness = Harness::new()?;
        let mut previous = harness.poller.watermark();
        for (round, stamp) in [4_i64, 2, 9, 9, 1, 12].into_iter().enumerate() {
            harness
                .source
                .add_file(&format!("file-{round}.jpg"), &b"x"[..], ts(stamp));
            harness.poller.poll_cycle().await;
            let current = harness.poller.watermark();
            assert!(current >= previous, "watermark moved backwards");
            previous = current;
        }
        assert_eq!(previous, Watermark::at(ts(12)));
        Ok(())
    }
}
