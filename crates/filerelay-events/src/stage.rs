//! Stage contract and the worker tasks that drive it.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use filerelay_telemetry::Metrics;
use futures::FutureExt;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

/// Per-item processing step attached to a topic subscription.
#[async_trait]
pub trait Stage<T>: Send + Sync + 'static {
    /// Stable name used in logs and metric labels.
    fn name(&self) -> &'static str;

    /// Process one item. Errors are logged and counted by the worker; they do
    /// not stop the subscription.
    async fn handle(&self, item: T) -> anyhow::Result<()>;
}

/// Counts of items handled by a subscription's workers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriptionReport {
    /// Items whose handler returned `Ok`.
    pub processed: u64,
    /// Items whose handler returned an error.
    pub failed: u64,
    /// Items whose handler panicked.
    pub panicked: u64,
}

#[derive(Default)]
struct WorkerCounters {
    processed: AtomicU64,
    failed: AtomicU64,
    panicked: AtomicU64,
}

impl WorkerCounters {
    fn report(&self) -> SubscriptionReport {
        SubscriptionReport {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
        }
    }
}

/// How a deadline-bounded join ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Drain {
    /// Every worker emptied the queue and exited.
    Completed(SubscriptionReport),
    /// The deadline passed first; the remaining workers were aborted and the
    /// items still queued were dropped.
    Aborted(SubscriptionReport),
}

impl Drain {
    /// Counts at the moment the workers stopped.
    #[must_use]
    pub const fn report(&self) -> SubscriptionReport {
        match self {
            Self::Completed(report) | Self::Aborted(report) => *report,
        }
    }

    /// Whether the queue drained before the deadline.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        matches!(self, Self::Completed(_))
    }
}

/// Handle to the worker tasks serving one subscription.
pub struct Subscription {
    topic: &'static str,
    stage: &'static str,
    workers: Vec<JoinHandle<()>>,
    counters: Arc<WorkerCounters>,
}

impl Subscription {
    /// Wait until every worker has drained the queue and exited.
    ///
    /// Workers exit once the topic is closed and the queue is empty.
    pub async fn join(mut self) -> SubscriptionReport {
        self.wait_workers().await;
        self.counters.report()
    }

    /// Like [`Subscription::join`], but abort whatever is still running at
    /// `deadline`. Aborted workers have stopped by the time this returns.
    pub async fn join_until(mut self, deadline: Instant) -> Drain {
        if time::timeout_at(deadline, self.wait_workers()).await.is_ok() {
            return Drain::Completed(self.counters.report());
        }
        warn!(
            topic = self.topic,
            stage = self.stage,
            remaining = self.workers.len(),
            "subscription did not drain before deadline; aborting workers"
        );
        for worker in &self.workers {
            worker.abort();
        }
        self.wait_workers().await;
        Drain::Aborted(self.counters.report())
    }

    async fn wait_workers(&mut self) {
        while let Some(worker) = self.workers.last_mut() {
            let exit = worker.await;
            self.workers.pop();
            if let Err(err) = exit
                && !err.is_cancelled()
            {
                error!(
                    topic = self.topic,
                    stage = self.stage,
                    error = %err,
                    "pipeline worker terminated abnormally"
                );
            }
        }
    }
}

pub(crate) fn spawn_workers<T: Send + 'static>(
    topic: &'static str,
    receiver: mpsc::Receiver<T>,
    concurrency: usize,
    stage: Arc<dyn Stage<T>>,
    metrics: Metrics,
) -> Subscription {
    let receiver = Arc::new(Mutex::new(receiver));
    let counters = Arc::new(WorkerCounters::default());
    let stage_name = stage.name();
    let workers = (0..concurrency.max(1))
        .map(|worker| {
            let worker = Worker {
                topic,
                index: worker,
                receiver: Arc::clone(&receiver),
                stage: Arc::clone(&stage),
                counters: Arc::clone(&counters),
                metrics: metrics.clone(),
            };
            tokio::spawn(worker.run())
        })
        .collect();
    debug!(
        topic,
        stage = stage_name,
        concurrency,
        "pipeline subscription started"
    );
    Subscription {
        topic,
        stage: stage_name,
        workers,
        counters,
    }
}

struct Worker<T> {
    topic: &'static str,
    index: usize,
    receiver: Arc<Mutex<mpsc::Receiver<T>>>,
    stage: Arc<dyn Stage<T>>,
    counters: Arc<WorkerCounters>,
    metrics: Metrics,
}

impl<T: Send + 'static> Worker<T> {
    async fn run(self) {
        let stage = self.stage.name();
        loop {
            // The lock is held only while waiting for the next item.
            let next = self.receiver.lock().await.recv().await;
            let Some(item) = next else {
                break;
            };

            match AssertUnwindSafe(self.stage.handle(item))
                .catch_unwind()
                .await
            {
                Ok(Ok(())) => {
                    self.counters.processed.fetch_add(1, Ordering::Relaxed);
                }
                Ok(Err(err)) => {
                    self.counters.failed.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_stage_failure(stage);
                    let error = format!("{err:#}");
                    warn!(
                        topic = self.topic,
                        stage,
                        error = %error,
                        "pipeline stage failed for item"
                    );
                }
                Err(panic) => {
                    self.counters.panicked.fetch_add(1, Ordering::Relaxed);
                    self.metrics.inc_stage_failure(stage);
                    error!(
                        topic = self.topic,
                        stage,
                        panic = panic_message(panic.as_ref()),
                        "pipeline stage panicked while handling item"
                    );
                }
            }
        }
        debug!(
            topic = self.topic,
            stage,
            worker = self.index,
            "pipeline worker drained"
        );
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&'static str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}
