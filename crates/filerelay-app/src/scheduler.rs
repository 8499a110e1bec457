//! Fixed-rate trigger driving the poller.
//!
//! One task owns the [`Poller`], so cycles never overlap: a tick that comes
//! due while a cycle is still running is skipped, not queued.

use std::time::Duration;

use filerelay_core::SourceSession;
use filerelay_pool::{ConnectionManager, Pool};
use filerelay_telemetry::Metrics;
use filerelay_transfer::{CycleOutcome, Poller, Watermark};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info};

use crate::error::{AppError, AppResult};

/// When poll cycles run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Period between cycle starts.
    pub interval: Duration,
    /// Wait before the first cycle.
    pub initial_delay: Duration,
}

/// What the scheduler did before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerReport {
    /// Cycles run, skipped ones included.
    pub cycles: u64,
    /// Cycles that published at least one file.
    pub productive_cycles: u64,
    /// Watermark held by the poller when it stopped.
    pub watermark: Watermark,
}

/// Handle to a running scheduler task.
pub struct SchedulerHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<SchedulerReport>,
}

impl SchedulerHandle {
    /// Signal the scheduler and wait for the in-flight cycle, if any, to finish.
    ///
    /// # Errors
    ///
    /// Returns [`AppError::TaskJoin`] if the scheduler task panicked.
    pub async fn stop(self) -> AppResult<SchedulerReport> {
        let _ = self.shutdown.send(true);
        self.task.await.map_err(|source| AppError::TaskJoin {
            task: "scheduler",
            source,
        })
    }
}

/// Run `poller` on `schedule` until stopped.
///
/// After each cycle the pool gauges are refreshed from `pool`.
pub fn spawn_scheduler<M>(
    mut poller: Poller<M>,
    pool: Pool<M>,
    schedule: Schedule,
    metrics: Metrics,
) -> SchedulerHandle
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    let (shutdown, mut stopped) = watch::channel(false);
    let task = tokio::spawn(async move {
        let mut report = SchedulerReport::default();

        tokio::select! {
            () = time::sleep(schedule.initial_delay) => {}
            _ = stopped.changed() => {
                report.watermark = poller.watermark();
                return report;
            }
        }

        let mut ticker = time::interval(schedule.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!(
            interval_ms = u64::try_from(schedule.interval.as_millis()).unwrap_or(u64::MAX),
            "poll scheduler started"
        );

        loop {
            tokio::select! {
                biased;
                _ = stopped.changed() => break,
                _ = ticker.tick() => {
                    let outcome = poller.poll_cycle().await;
                    report.cycles += 1;
                    if matches!(outcome, CycleOutcome::Completed { new, .. } if new > 0) {
                        report.productive_cycles += 1;
                    }
                    let stats = pool.stats();
                    metrics.set_pool_connections(stats.idle, stats.in_use);
                    debug!(outcome = outcome.as_str(), cycle = report.cycles, "poll cycle finished");
                }
            }
        }

        report.watermark = poller.watermark();
        info!(cycles = report.cycles, "poll scheduler stopped");
        report
    });
    SchedulerHandle { shutdown, task }
}
