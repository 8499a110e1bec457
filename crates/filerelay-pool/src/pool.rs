//! Pool implementation and the scoped connection guard.
//!
//! # Design
//! - Storage, recycling and the slot semaphore come from `deadpool::managed`.
//!   Idle sessions are recycled (validated) lazily, on borrow.
//! - [`Pooled`] wraps the deadpool object so a borrow ends in exactly one of
//!   release or invalidate, and keeps the counters behind [`PoolStats`].
//! - `max_idle` is enforced on release: surplus sessions are detached and closed.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use deadpool::Runtime;
use deadpool::managed::{self, Object, TimeoutType};
use tokio::sync::Notify;
use tracing::{debug, warn};

use crate::error::{PoolError, PoolResult};
use crate::manager::{ConnectionManager, Tracked};

const DEFAULT_MAX_TOTAL: usize = 8;
const DEFAULT_BORROW_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_TOTAL_LIMIT: usize = 1 << 20;

/// Sizing and wait policy for a [`Pool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolOptions {
    /// Upper bound on connections checked out at the same time.
    pub max_total: usize,
    /// Idle connections opened eagerly by [`Pool::prefill`].
    pub min_idle: usize,
    /// Idle connections kept after release; extras are closed.
    pub max_idle: usize,
    /// How long a borrow waits for a free slot.
    pub borrow_timeout: Duration,
    /// Validate idle connections before lending them out.
    pub validate_on_borrow: bool,
    /// Wait for a free slot instead of failing immediately.
    pub block_when_exhausted: bool,
}

impl Default for PoolOptions {
    fn default() -> Self {
        Self {
            max_total: DEFAULT_MAX_TOTAL,
            min_idle: 0,
            max_idle: DEFAULT_MAX_TOTAL,
            borrow_timeout: DEFAULT_BORROW_TIMEOUT,
            validate_on_borrow: true,
            block_when_exhausted: true,
        }
    }
}

impl PoolOptions {
    /// Wait budget handed to deadpool; zero makes it try once without waiting.
    fn wait_timeout(&self) -> Duration {
        if self.block_when_exhausted {
            self.borrow_timeout
        } else {
            Duration::ZERO
        }
    }
}

/// Point-in-time view of the pool's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStats {
    /// Connections waiting in the pool.
    pub idle: usize,
    /// Connections currently held by borrowers.
    pub in_use: usize,
    /// Connections opened through the manager.
    pub created: u64,
    /// Successful borrows.
    pub borrowed: u64,
    /// Borrows that ended with [`Pooled::release`].
    pub returned: u64,
    /// Borrows that ended with [`Pooled::invalidate`] or an unreleased drop.
    pub invalidated: u64,
    /// Idle connections discarded because validation failed.
    pub evicted: u64,
}

/// Counters shared between the pool handle, its guards and the manager wrapper.
#[derive(Default)]
pub(crate) struct Shared {
    created: AtomicU64,
    borrowed: AtomicU64,
    returned: AtomicU64,
    invalidated: AtomicU64,
    evicted: AtomicU64,
    in_use: AtomicUsize,
    drained: Notify,
}

impl Shared {
    pub(crate) fn record_created(&self) {
        self.created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_evicted(&self) {
        self.evicted.fetch_add(1, Ordering::Relaxed);
    }

    fn lent(&self) {
        self.borrowed.fetch_add(1, Ordering::Relaxed);
        self.in_use.fetch_add(1, Ordering::AcqRel);
    }

    fn finished(&self, returned: bool) {
        let counter = if returned {
            &self.returned
        } else {
            &self.invalidated
        };
        counter.fetch_add(1, Ordering::Relaxed);
        if self.in_use.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.drained.notify_waiters();
        }
    }

    async fn wait_until_drained(&self) {
        loop {
            let drained = self.drained.notified();
            if self.in_use.load(Ordering::Acquire) == 0 {
                return;
            }
            drained.await;
        }
    }
}

/// Shared pool handle; clones refer to the same connections.
pub struct Pool<M: ConnectionManager> {
    pool: managed::Pool<Tracked<M>>,
    options: Arc<PoolOptions>,
    shared: Arc<Shared>,
}

impl<M: ConnectionManager> Clone for Pool<M> {
    fn clone(&self) -> Self {
        Self {
            pool: self.pool.clone(),
            options: Arc::clone(&self.options),
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<M: ConnectionManager> Pool<M> {
    /// Build a pool around `manager`. No connection is opened until the first
    /// borrow or [`Pool::prefill`].
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Build`] if deadpool rejects the configuration.
    pub fn new(manager: M, options: PoolOptions) -> PoolResult<Self> {
        let max_total = options.max_total.clamp(1, MAX_TOTAL_LIMIT);
        let options = PoolOptions {
            max_total,
            max_idle: options.max_idle.min(max_total),
            ..options
        };
        let shared = Arc::new(Shared::default());
        let tracked = Tracked {
            inner: manager,
            validate: options.validate_on_borrow,
            shared: Arc::clone(&shared),
        };
        let pool = managed::Pool::builder(tracked)
            .max_size(max_total)
            .wait_timeout(Some(options.wait_timeout()))
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|source| PoolError::Build { source })?;
        Ok(Self {
            pool,
            options: Arc::new(options),
            shared,
        })
    }

    /// Access the connection manager backing this pool.
    #[must_use]
    pub fn manager(&self) -> &M {
        &self.pool.manager().inner
    }

    /// Effective options after clamping.
    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Whether [`Pool::close`] has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    /// Borrow a connection, reusing a validated idle one when possible.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Exhausted`] or [`PoolError::Timeout`] when no slot
    /// frees up, [`PoolError::Closed`] after shutdown started, and
    /// [`PoolError::Connect`] when a new connection cannot be opened.
    pub async fn borrow(&self) -> PoolResult<Pooled<M>> {
        if self.is_closed() {
            return Err(PoolError::Closed);
        }
        let object = self.pool.get().await.map_err(|err| self.borrow_error(err))?;
        self.shared.lent();
        Ok(Pooled {
            object: Some(object),
            pool: self.clone(),
        })
    }

    /// Open connections until `min_idle` are waiting in the pool.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Connect`] if the manager fails to open a connection.
    pub async fn prefill(&self) -> PoolResult<usize> {
        let before = self.shared.created.load(Ordering::Relaxed);
        let missing = self
            .options
            .min_idle
            .min(self.options.max_total)
            .saturating_sub(self.pool.status().size);
        let mut held = Vec::with_capacity(missing);
        for _ in 0..missing {
            held.push(self.pool.get().await.map_err(|err| self.borrow_error(err))?);
        }
        drop(held);
        let opened = self.shared.created.load(Ordering::Relaxed) - before;
        Ok(usize::try_from(opened).unwrap_or(usize::MAX))
    }

    /// Stop lending connections, wait up to `grace` for every borrower to
    /// finish, then drop the idle connections.
    ///
    /// # Errors
    ///
    /// Returns [`PoolError::Timeout`] if connections were still checked out
    /// when `grace` elapsed; the pool is closed either way.
    pub async fn close(&self, grace: Duration) -> PoolResult<()> {
        let idle = self.pool.status().available;
        self.pool.close();
        debug!(discarded = idle, "connection pool closed");

        if tokio::time::timeout(grace, self.shared.wait_until_drained())
            .await
            .is_err()
        {
            warn!(
                in_use = self.shared.in_use.load(Ordering::Acquire),
                "connection pool closed with connections still checked out"
            );
            return Err(PoolError::Timeout { waited: grace });
        }
        Ok(())
    }

    /// Snapshot the pool's counters.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            idle: if self.is_closed() {
                0
            } else {
                self.pool.status().available
            },
            in_use: shared.in_use.load(Ordering::Acquire),
            created: shared.created.load(Ordering::Relaxed),
            borrowed: shared.borrowed.load(Ordering::Relaxed),
            returned: shared.returned.load(Ordering::Relaxed),
            invalidated: shared.invalidated.load(Ordering::Relaxed),
            evicted: shared.evicted.load(Ordering::Relaxed),
        }
    }

    fn borrow_error(&self, err: managed::PoolError<M::Error>) -> PoolError {
        match err {
            managed::PoolError::Timeout(TimeoutType::Wait) if !self.options.block_when_exhausted => {
                PoolError::Exhausted {
                    max_total: self.options.max_total,
                }
            }
            managed::PoolError::Timeout(_) => PoolError::Timeout {
                waited: self.options.borrow_timeout,
            },
            managed::PoolError::Backend(source) => PoolError::connect(source),
            managed::PoolError::Closed => PoolError::Closed,
            managed::PoolError::NoRuntimeSpecified => PoolError::Misconfigured {
                reason: "no async runtime for borrow timeouts",
            },
            managed::PoolError::PostCreateHook(_) => PoolError::Misconfigured {
                reason: "post-create hook rejected connection",
            },
        }
    }

    fn give_back(&self, object: Object<Tracked<M>>) {
        self.shared.finished(true);
        if !self.is_closed() && self.pool.status().available >= self.options.max_idle {
            drop(Object::take(object));
        } else {
            drop(object);
        }
    }

    fn discard(&self, object: Object<Tracked<M>>) {
        self.shared.finished(false);
        drop(Object::take(object));
    }
}

/// Connection on loan from a [`Pool`].
///
/// Consume it with [`Pooled::release`] when the connection is known to be
/// healthy, or [`Pooled::invalidate`] after any failure. Dropping the guard
/// without either call invalidates the connection.
pub struct Pooled<M: ConnectionManager> {
    object: Option<Object<Tracked<M>>>,
    pool: Pool<M>,
}

impl<M: ConnectionManager> Pooled<M> {
    /// Return the connection to the pool.
    pub fn release(mut self) {
        if let Some(object) = self.object.take() {
            self.pool.give_back(object);
        }
    }

    /// Discard the connection permanently.
    pub fn invalidate(mut self) {
        if let Some(object) = self.object.take() {
            self.pool.discard(object);
        }
    }
}

impl<M: ConnectionManager> Deref for Pooled<M> {
    type Target = M::Type;

    fn deref(&self) -> &Self::Target {
        match self.object.as_ref() {
            Some(object) => &**object,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> DerefMut for Pooled<M> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        match self.object.as_mut() {
            Some(object) => &mut **object,
            None => unreachable!("pooled connection accessed after release"),
        }
    }
}

impl<M: ConnectionManager> Drop for Pooled<M> {
    fn drop(&mut self) {
        if let Some(object) = self.object.take() {
            debug!("pooled connection dropped without release; invalidating");
            self.pool.discard(object);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, bail};
    use deadpool::managed::{Manager, RecycleError, RecycleResult};
    use std::io;
    use std::sync::atomic::AtomicBool;

    struct TestConnection {
        id: usize,
        healthy: bool,
    }

    #[derive(Default)]
    struct CountingManager {
        connects: AtomicUsize,
        refuse: AtomicBool,
    }

    impl Manager for CountingManager {
        type Type = TestConnection;
        type Error = io::Error;

        async fn create(&self) -> Result<TestConnection, io::Error> {
            if self.refuse.load(Ordering::SeqCst) {
                return Err(io::Error::other("connection refused"));
            }
            let id = self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(TestConnection { id, healthy: true })
        }

        async fn recycle(
            &self,
            connection: &mut TestConnection,
            _: &managed::Metrics,
        ) -> RecycleResult<io::Error> {
            if connection.healthy {
                Ok(())
            } else {
                Err(RecycleError::Backend(io::Error::other("stale session")))
            }
        }
    }

    fn pool(options: PoolOptions) -> Pool<CountingManager> {
        match Pool::new(CountingManager::default(), options) {
            Ok(pool) => pool,
            Err(err) => panic!("pool should build: {err}"),
        }
    }

    fn options(max_total: usize) -> PoolOptions {
        PoolOptions {
            max_total,
            max_idle: max_total,
            borrow_timeout: Duration::from_millis(50),
            ..PoolOptions::default()
        }
    }

    #[tokio::test]
    async fn released_connection_is_reused() -> Result<()> {
        let pool = pool(options(2));
        let first = pool.borrow().await?;
        let first_id = first.id;
        first.release();

        let second = pool.borrow().await?;
        assert_eq!(second.id, first_id);
        second.release();

        let stats = pool.stats();
        assert_eq!(stats.created, 1);
        assert_eq!(stats.returned, 2);
        assert_eq!(stats.idle, 1);
        assert_eq!(stats.in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn invalidated_connection_is_never_reused() -> Result<()> {
        let pool = pool(options(2));
        let first = pool.borrow().await?;
        let first_id = first.id;
        first.invalidate();

        let second = pool.borrow().await?;
        assert_ne!(second.id, first_id);
        second.release();

        let stats = pool.stats();
        assert_eq!(stats.created, 2);
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.returned, 1);
        Ok(())
    }

    #[tokio::test]
    async fn dropping_guard_invalidates_connection() -> Result<()> {
        let pool = pool(options(1));
        {
            let _connection = pool.borrow().await?;
        }
        let stats = pool.stats();
        assert_eq!(stats.invalidated, 1);
        assert_eq!(stats.returned, 0);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.in_use, 0);
        Ok(())
    }

    #[tokio::test]
    async fn non_blocking_pool_reports_exhaustion() -> Result<()> {
        let pool = pool(PoolOptions {
            block_when_exhausted: false,
            ..options(1)
        });
        let held = pool.borrow().await?;
        match pool.borrow().await {
            Err(PoolError::Exhausted { max_total }) => assert_eq!(max_total, 1),
            Err(other) => bail!("unexpected error: {other}"),
            Ok(_) => bail!("borrow should fail while the only slot is held"),
        }
        held.release();
        Ok(())
    }

    #[tokio::test]
    async fn blocking_pool_times_out() -> Result<()> {
        let pool = pool(options(1));
        let held = pool.borrow().await?;
        let err = match pool.borrow().await {
            Err(err) => err,
            Ok(_) => bail!("borrow should time out while the only slot is held"),
        };
        assert!(matches!(err, PoolError::Timeout { .. }));
        held.release();
        Ok(())
    }

    #[tokio::test]
    async fn waiting_borrower_receives_released_connection() -> Result<()> {
        let pool = pool(PoolOptions {
            borrow_timeout: Duration::from_secs(5),
            ..options(1)
        });
        let held = pool.borrow().await?;
        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move {
                let connection = pool.borrow().await?;
                let id = connection.id;
                connection.release();
                Ok::<usize, PoolError>(id)
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        let held_id = held.id;
        held.release();

        let waiter_id = waiter.await??;
        assert_eq!(waiter_id, held_id);
        assert_eq!(pool.stats().created, 1);
        Ok(())
    }

    #[tokio::test]
    async fn failed_validation_evicts_idle_connection() -> Result<()> {
        let pool = pool(options(1));
        let mut connection = pool.borrow().await?;
        connection.healthy = false;
        let stale_id = connection.id;
        connection.release();

        let fresh = pool.borrow().await?;
        assert_ne!(fresh.id, stale_id);
        fresh.release();

        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.created, 2);
        Ok(())
    }

    #[tokio::test]
    async fn release_respects_max_idle() -> Result<()> {
        let pool = pool(PoolOptions {
            max_idle: 1,
            ..options(3)
        });
        let first = pool.borrow().await?;
        let second = pool.borrow().await?;
        first.release();
        second.release();
        assert_eq!(pool.stats().idle, 1);
        Ok(())
    }

    #[tokio::test]
    async fn connect_failure_surfaces_and_frees_slot() -> Result<()> {
        let pool = pool(PoolOptions {
            block_when_exhausted: false,
            ..options(1)
        });
        pool.manager().refuse.store(true, Ordering::SeqCst);
        assert!(matches!(pool.borrow().await, Err(PoolError::Connect { .. })));

        pool.manager().refuse.store(false, Ordering::SeqCst);
        let connection = pool.borrow().await?;
        connection.release();
        Ok(())
    }

    #[tokio::test]
    async fn prefill_opens_min_idle_connections() -> Result<()> {
        let pool = pool(PoolOptions {
            min_idle: 2,
            ..options(4)
        });
        assert_eq!(pool.prefill().await?, 2);
        assert_eq!(pool.prefill().await?, 0);
        let stats = pool.stats();
        assert_eq!(stats.idle, 2);
        assert_eq!(stats.created, 2);
        Ok(())
    }

    #[tokio::test]
    async fn close_waits_for_borrowers_then_rejects_new_borrows() -> Result<()> {
        let pool = pool(options(2));
        let idle = pool.borrow().await?;
        idle.release();
        let held = pool.borrow().await?;

        let closing = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.close(Duration::from_secs(5)).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!closing.is_finished());
        held.release();

        closing.await??;
        assert!(pool.is_closed());
        assert_eq!(pool.stats().idle, 0);
        assert!(matches!(pool.borrow().await, Err(PoolError::Closed)));
        Ok(())
    }

    #[tokio::test]
    async fn close_reports_timeout_when_connection_is_held() -> Result<()> {
        let pool = pool(options(1));
        let held = pool.borrow().await?;
        let result = pool.close(Duration::from_millis(20)).await;
        assert!(matches!(result, Err(PoolError::Timeout { .. })));
        held.release();
        assert_eq!(pool.stats().idle, 0);
        Ok(())
    }

    #[tokio::test]
    async fn every_borrow_ends_in_exactly_one_outcome() -> Result<()> {
        let pool = pool(PoolOptions {
            borrow_timeout: Duration::from_secs(5),
            ..options(3)
        });
        let mut tasks = Vec::new();
        for index in 0..24_usize {
            let pool = pool.clone();
            tasks.push(tokio::spawn(async move {
                let connection = pool.borrow().await?;
                tokio::task::yield_now().await;
                match index % 3 {
                    0 => connection.release(),
                    1 => connection.invalidate(),
                    _ => drop(connection),
                }
                Ok::<(), PoolError>(())
            }));
        }
        for task in tasks {
            task.await??;
        }

        let stats = pool.stats();
        assert_eq!(stats.borrowed, 24);
        assert_eq!(stats.returned + stats.invalidated, stats.borrowed);
        assert_eq!(stats.returned, 8);
        assert_eq!(stats.invalidated, 16);
        assert_eq!(stats.in_use, 0);
        Ok(())
    }
}
