//! Queue sizing and overflow behaviour.

use std::time::Duration;

const DEFAULT_CAPACITY: usize = 256;
const DEFAULT_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);

/// What `publish` does when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for room, bounded by [`PipelineOptions::publish_timeout`].
    #[default]
    Block,
    /// Discard the item for the full subscriber and carry on.
    DropNewest,
}

/// Per-topic queue settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineOptions {
    /// Items buffered per subscription.
    pub capacity: usize,
    /// Behaviour when a subscription queue is full.
    pub overflow: OverflowPolicy,
    /// Longest wait for room under [`OverflowPolicy::Block`].
    pub publish_timeout: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            overflow: OverflowPolicy::default(),
            publish_timeout: DEFAULT_PUBLISH_TIMEOUT,
        }
    }
}
