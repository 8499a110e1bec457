//! Timestamp and option fixtures.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use filerelay_pool::PoolOptions;

/// Deterministic timestamp `secs` seconds after the Unix epoch.
#[must_use]
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).single().unwrap_or_default()
}

/// Pool options with short waits so failing borrows do not slow tests down.
#[must_use]
pub fn fast_pool_options(max_total: usize) -> PoolOptions {
    PoolOptions {
        max_total,
        max_idle: max_total,
        borrow_timeout: Duration::from_millis(100),
        ..PoolOptions::default()
    }
}
