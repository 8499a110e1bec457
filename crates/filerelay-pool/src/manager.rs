//! Connection factory contract used by [`crate::Pool`].
//!
//! Sources implement deadpool's [`Manager`]: `create` opens a session and
//! `recycle` checks an idle one before it is lent out again.

use std::error::Error;
use std::sync::Arc;

use deadpool::managed::{self, Manager, RecycleResult};
use tracing::debug;

use crate::pool::Shared;

/// A deadpool [`Manager`] whose errors can be reported and whose sessions
/// can cross task boundaries.
pub trait ConnectionManager:
    Manager<Type: Send + 'static, Error: Error + Send + Sync + 'static> + 'static
{
}

impl<M> ConnectionManager for M where
    M: Manager<Type: Send + 'static, Error: Error + Send + Sync + 'static> + 'static
{
}

/// Wraps the source manager to count creations and failed recycles.
pub(crate) struct Tracked<M> {
    pub(crate) inner: M,
    pub(crate) validate: bool,
    pub(crate) shared: Arc<Shared>,
}

impl<M: ConnectionManager> Manager for Tracked<M> {
    type Type = M::Type;
    type Error = M::Error;

    async fn create(&self) -> Result<M::Type, M::Error> {
        let connection = self.inner.create().await?;
        self.shared.record_created();
        Ok(connection)
    }

    async fn recycle(&self, connection: &mut M::Type, metrics: &managed::Metrics) -> RecycleResult<M::Error> {
        if !self.validate {
            return Ok(());
        }
        let checked = self.inner.recycle(connection, metrics).await;
        if let Err(err) = &checked {
            self.shared.record_evicted();
            debug!(error = %err, "evicting idle connection that failed validation");
        }
        checked
    }
}
