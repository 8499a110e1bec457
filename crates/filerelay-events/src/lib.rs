#![forbid(unsafe_code)]
#![deny(
    unused_must_use,
    rustdoc::broken_intra_doc_links,
    rustdoc::bare_urls
)]
#![warn(
    missing_docs,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    clippy::nursery
)]
#![allow(clippy::module_name_repetitions)]

//! Bounded pipeline topics connecting the poller to the transfer stages.
//!
//! A [`Topic`] fans each published item out to every subscription. Each
//! subscription owns a bounded queue and a fixed set of worker tasks that feed
//! items to a [`Stage`] one at a time. When a queue is full the topic either
//! waits (up to a timeout) or drops the item for that subscriber, depending on
//! [`OverflowPolicy`]. Handler errors and panics are caught per item so a
//! single bad file never stops a subscription.

pub mod error;
pub mod options;
pub mod stage;
pub mod topic;

pub use error::{PipelineError, PipelineResult};
pub use options::{OverflowPolicy, PipelineOptions};
pub use stage::{Drain, Stage, Subscription, SubscriptionReport};
pub use topic::{Delivery, Topic};
