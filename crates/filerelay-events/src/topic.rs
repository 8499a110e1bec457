//! Multicast topic with bounded per-subscription queues.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use filerelay_telemetry::Metrics;
use tokio::sync::mpsc::{self, error::SendTimeoutError, error::TrySendError};
use tracing::debug;

use crate::error::{PipelineError, PipelineResult};
use crate::options::{OverflowPolicy, PipelineOptions};
use crate::stage::{Stage, Subscription, spawn_workers};

/// Result of a successful publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Every subscription queued the item.
    Delivered,
    /// Some subscriptions had a full queue and skipped the item.
    Dropped {
        /// Number of subscriptions that skipped the item.
        subscribers: usize,
    },
    /// Nobody is subscribed; the item was discarded.
    NoSubscribers,
}

/// Named publish/subscribe channel. Clones share the same subscriptions.
pub struct Topic<T> {
    inner: Arc<TopicInner<T>>,
}

impl<T> Clone for Topic<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct TopicInner<T> {
    name: &'static str,
    options: PipelineOptions,
    metrics: Metrics,
    subscribers: Mutex<Vec<Subscriber<T>>>,
    closed: AtomicBool,
    dropped: AtomicU64,
}

struct Subscriber<T> {
    name: &'static str,
    sender: mpsc::Sender<T>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            sender: self.sender.clone(),
        }
    }
}

impl<T: Clone + Send + 'static> Topic<T> {
    /// Create a topic with no subscriptions.
    #[must_use]
    pub fn new(name: &'static str, options: PipelineOptions, metrics: Metrics) -> Self {
        Self {
            inner: Arc::new(TopicInner {
                name,
                options: PipelineOptions {
                    capacity: options.capacity.max(1),
                    ..options
                },
                metrics,
                subscribers: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                dropped: AtomicU64::new(0),
            }),
        }
    }

    /// Topic name used in logs and metric labels.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.inner.name
    }

    /// Whether [`Topic::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    /// Attach `stage` behind a bounded queue served by `concurrency` workers.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] if the topic was already closed.
    pub fn subscribe(
        &self,
        name: &'static str,
        concurrency: usize,
        stage: Arc<dyn Stage<T>>,
    ) -> PipelineResult<Subscription> {
        let (sender, receiver) = mpsc::channel(self.inner.options.capacity);
        {
            let mut subscribers = self.inner.lock_subscribers();
            if self.is_closed() {
                return Err(PipelineError::Closed {
                    topic: self.inner.name,
                });
            }
            subscribers.push(Subscriber { name, sender });
        }
        Ok(spawn_workers(
            self.inner.name,
            receiver,
            concurrency,
            stage,
            self.inner.metrics.clone(),
        ))
    }

    /// Hand one item to every subscription.
    ///
    /// Every subscription but the last receives a clone; the last receives `item`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Closed`] once the topic is closed and
    /// [`PipelineError::PublishTimeout`] when a queue stays full for the whole
    /// publish timeout under [`OverflowPolicy::Block`].
    pub async fn publish(&self, item: T) -> PipelineResult<Delivery> {
        if self.is_closed() {
            return Err(PipelineError::Closed {
                topic: self.inner.name,
            });
        }
        let targets = self.inner.lock_subscribers().clone();
        let Some((last, rest)) = targets.split_last() else {
            return Ok(Delivery::NoSubscribers);
        };

        let mut skipped = 0;
        for target in rest {
            if !self.deliver(target, item.clone()).await? {
                skipped += 1;
            }
        }
        if !self.deliver(last, item).await? {
            skipped += 1;
        }

        if skipped == 0 {
            return Ok(Delivery::Delivered);
        }
        let count = u64::try_from(skipped).unwrap_or(u64::MAX);
        self.inner.dropped.fetch_add(count, Ordering::Relaxed);
        self.inner.metrics.add_pipeline_dropped(self.inner.name, count);
        Ok(Delivery::Dropped {
            subscribers: skipped,
        })
    }

    /// Stop accepting items. Workers finish the queued items, then exit.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let released = std::mem::take(&mut *self.inner.lock_subscribers());
        debug!(
            topic = self.inner.name,
            subscriptions = released.len(),
            "pipeline topic closed"
        );
    }

    /// Items currently queued, per subscription.
    #[must_use]
    pub fn depth(&self) -> Vec<(&'static str, usize)> {
        self.inner
            .lock_subscribers()
            .iter()
            .map(|subscriber| {
                let queued = subscriber
                    .sender
                    .max_capacity()
                    .saturating_sub(subscriber.sender.capacity());
                (subscriber.name, queued)
            })
            .collect()
    }

    /// Items dropped so far because a queue was full.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::Relaxed)
    }

    async fn deliver(&self, target: &Subscriber<T>, item: T) -> PipelineResult<bool> {
        let topic = self.inner.name;
        match self.inner.options.overflow {
            OverflowPolicy::Block => {
                let waited = self.inner.options.publish_timeout;
                match target.sender.send_timeout(item, waited).await {
                    Ok(()) => Ok(true),
                    Err(SendTimeoutError::Timeout(_)) => Err(PipelineError::PublishTimeout {
                        topic,
                        subscriber: target.name,
                        waited,
                    }),
                    Err(SendTimeoutError::Closed(_)) => Err(PipelineError::Closed { topic }),
                }
            }
            OverflowPolicy::DropNewest => match target.sender.try_send(item) {
                Ok(()) => Ok(true),
                Err(TrySendError::Full(_)) => {
                    debug!(topic, subscriber = target.name, "queue full; item dropped");
                    Ok(false)
                }
                Err(TrySendError::Closed(_)) => Err(PipelineError::Closed { topic }),
            },
        }
    }
}

impl<T> TopicInner<T> {
    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Subscriber<T>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stage::SubscriptionReport;
    use anyhow::{Result, bail};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;
    use tokio::sync::Semaphore;

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
    }

    impl Recorder {
        fn seen(&self) -> Vec<String> {
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    #[async_trait]
    impl Stage<String> for Recorder {
        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, item: String) -> Result<()> {
            if item == "bad" {
                bail!("rejected {item}");
            }
            if item == "boom" {
                panic!("stage blew up");
            }
            self.seen
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(item);
            Ok(())
        }
    }

    /// Holds every item until the gate opens; reports each item it starts.
    struct Gated {
        gate: Arc<Semaphore>,
        started: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl Stage<String> for Gated {
        fn name(&self) -> &'static str {
            "gated"
        }

        async fn handle(&self, item: String) -> Result<()> {
            let _ = self.started.send(item);
            let permit = self.gate.acquire().await?;
            permit.forget();
            Ok(())
        }
    }

    fn topic(options: PipelineOptions) -> Result<Topic<String>> {
        Ok(Topic::new("discovered", options, Metrics::new()?))
    }

    fn gated() -> (Arc<Gated>, Arc<Semaphore>, mpsc::UnboundedReceiver<String>) {
        let gate = Arc::new(Semaphore::new(0));
        let (started, started_rx) = mpsc::unbounded_channel();
        (
            Arc::new(Gated {
                gate: Arc::clone(&gate),
                started,
            }),
            gate,
            started_rx,
        )
    }

    #[tokio::test]
    async fn publish_fans_out_to_every_subscription() -> Result<()> {
        let topic = topic(PipelineOptions::default())?;
        let first = Arc::new(Recorder::default());
        let second = Arc::new(Recorder::default());
        let sub_a = topic.subscribe("first", 1, first.clone())?;
        let sub_b = topic.subscribe("second", 2, second.clone())?;

        for name in ["a.jpg", "b.jpg"] {
            assert_eq!(topic.publish(name.to_string()).await?, Delivery::Delivered);
        }
        topic.close();
        sub_a.join().await;
        sub_b.join().await;

        assert_eq!(first.seen(), vec!["a.jpg", "b.jpg"]);
        let mut second_seen = second.seen();
        second_seen.sort();
        assert_eq!(second_seen, vec!["a.jpg", "b.jpg"]);
        Ok(())
    }

    #[tokio::test]
    async fn publish_without_subscribers_reports_it() -> Result<()> {
        let topic = topic(PipelineOptions::default())?;
        assert_eq!(
            topic.publish("lonely".to_string()).await?,
            Delivery::NoSubscribers
        );
        Ok(())
    }

    #[tokio::test]
    async fn closed_topic_rejects_publish_and_subscribe() -> Result<()> {
        let topic = topic(PipelineOptions::default())?;
        topic.close();
        assert!(matches!(
            topic.publish("late".to_string()).await,
            Err(PipelineError::Closed { topic: "discovered" })
        ));
        assert!(
            topic
                .subscribe("late", 1, Arc::new(Recorder::default()))
                .is_err()
        );
        Ok(())
    }

    #[tokio::test]
    async fn blocking_publish_times_out_on_full_queue() -> Result<()> {
        let topic = topic(PipelineOptions {
            capacity: 1,
            overflow: OverflowPolicy::Block,
            publish_timeout: Duration::from_millis(30),
        })?;
        let (stage, gate, mut started) = gated();
        let subscription = topic.subscribe("download", 1, stage)?;

        topic.publish("one".to_string()).await?;
        assert_eq!(started.recv().await.as_deref(), Some("one"));
        topic.publish("two".to_string()).await?;
        assert_eq!(topic.depth(), vec![("download", 1)]);

        match topic.publish("three".to_string()).await {
            Err(PipelineError::PublishTimeout { subscriber, .. }) => {
                assert_eq!(subscriber, "download");
            }
            other => bail!("expected publish timeout, got {other:?}"),
        }

        gate.add_permits(8);
        topic.close();
        let report = subscription.join().await;
        assert_eq!(report.processed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn drop_newest_skips_full_subscriber_and_counts_it() -> Result<()> {
        let metrics = Metrics::new()?;
        let topic = Topic::new(
            "discovered",
            PipelineOptions {
                capacity: 1,
                overflow: OverflowPolicy::DropNewest,
                publish_timeout: Duration::from_secs(5),
            },
            metrics.clone(),
        );
        let (stage, gate, mut started) = gated();
        let subscription = topic.subscribe("download", 1, stage)?;

        topic.publish("one".to_string()).await?;
        assert_eq!(started.recv().await.as_deref(), Some("one"));
        assert_eq!(topic.publish("two".to_string()).await?, Delivery::Delivered);
        assert_eq!(
            topic.publish("three".to_string()).await?,
            Delivery::Dropped { subscribers: 1 }
        );
        assert_eq!(topic.dropped(), 1);
        assert_eq!(metrics.pipeline_dropped("discovered"), 1);

        gate.add_permits(8);
        topic.close();
        assert_eq!(subscription.join().await.processed, 2);
        Ok(())
    }

    #[tokio::test]
    async fn failing_and_panicking_items_do_not_stop_the_subscription() -> Result<()> {
        let metrics = Metrics::new()?;
        let topic = Topic::new("downloaded", PipelineOptions::default(), metrics.clone());
        let recorder = Arc::new(Recorder::default());
        let subscription = topic.subscribe("upload", 1, recorder.clone())?;

        for name in ["a", "bad", "boom", "b"] {
            topic.publish(name.to_string()).await?;
        }
        topic.close();
        let report = subscription.join().await;

        assert_eq!(
            report,
            SubscriptionReport {
                processed: 2,
                failed: 1,
                panicked: 1,
            }
        );
        assert_eq!(recorder.seen(), vec!["a", "b"]);
        assert_eq!(metrics.stage_failures("recorder"), 2);
        Ok(())
    }

    #[tokio::test]
    async fn close_drains_queued_items_before_workers_exit() -> Result<()> {
        let topic = topic(PipelineOptions {
            capacity: 16,
            ..PipelineOptions::default()
        })?;
        let recorder = Arc::new(Recorder::default());
        let subscription = topic.subscribe("download", 2, recorder.clone())?;
        for index in 0..10 {
            topic.publish(format!("file-{index}")).await?;
        }
        topic.close();
        let report = subscription.join().await;
        assert_eq!(report.processed, 10);
        assert_eq!(recorder.seen().len(), 10);
        Ok(())
    }

    struct Slow {
        handled: AtomicUsize,
    }

    #[async_trait]
    impl Stage<String> for Slow {
        fn name(&self) -> &'static str {
            "slow"
        }

        async fn handle(&self, _item: String) -> Result<()> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn join_until_aborts_workers_still_running_at_the_deadline() -> Result<()> {
        let topic = topic(PipelineOptions {
            capacity: 8,
            ..PipelineOptions::default()
        })?;
        let slow = Arc::new(Slow {
            handled: AtomicUsize::new(0),
        });
        let subscription = topic.subscribe("upload", 1, slow.clone())?;
        for index in 0..5 {
            topic.publish(format!("file-{index}")).await?;
        }
        topic.close();

        let deadline = tokio::time::Instant::now() + Duration::from_millis(150);
        let drain = subscription.join_until(deadline).await;
        assert!(!drain.is_complete());
        assert_eq!(drain.report().processed, 1);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(slow.handled.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn join_until_completes_when_the_queue_drains_in_time() -> Result<()> {
        let topic = topic(PipelineOptions::default())?;
        let slow = Arc::new(Slow {
            handled: AtomicUsize::new(0),
        });
        let subscription = topic.subscribe("upload", 2, slow.clone())?;
        for index in 0..4 {
            topic.publish(format!("file-{index}")).await?;
        }
        topic.close();

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        let drain = subscription.join_until(deadline).await;
        assert!(drain.is_complete());
        assert_eq!(drain.report().processed, 4);
        Ok(())
    }

    #[tokio::test]
    async fn workers_bound_items_in_flight() -> Result<()> {
        struct Tracking {
            current: AtomicUsize,
            peak: AtomicUsize,
        }

        #[async_trait]
        impl Stage<String> for Tracking {
            fn name(&self) -> &'static str {
                "tracking"
            }

            async fn handle(&self, _item: String) -> Result<()> {
                let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
                self.peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                self.current.fetch_sub(1, Ordering::SeqCst);
                Ok(())
            }
        }

        let topic = topic(PipelineOptions::default())?;
        let stage = Arc::new(Tracking {
            current: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        });
        let subscription = topic.subscribe("download", 3, stage.clone())?;
        for index in 0..9 {
            topic.publish(format!("file-{index}")).await?;
        }
        topic.close();
        assert_eq!(subscription.join().await.processed, 9);

        let peak = stage.peak.load(Ordering::SeqCst);
        assert!(peak <= 3, "peak in-flight {peak} exceeded concurrency");
        assert!(peak >= 2, "workers never overlapped");
        Ok(())
    }
}
