//! Default values for every configuration section.

use std::time::Duration;

pub(crate) const POLL_INTERVAL: Duration = Duration::from_secs(30);
pub(crate) const POLL_INITIAL_DELAY: Duration = Duration::from_secs(2);

pub(crate) const SOURCE_PATH: &str = ".";
pub(crate) const SOURCE_EXTENSIONS: [&str; 3] = [".jpeg", ".jpg", ".dmg"];

pub(crate) const POOL_MAX_TOTAL: usize = 8;
pub(crate) const POOL_MIN_IDLE: usize = 0;
pub(crate) const POOL_MAX_IDLE: usize = 8;
pub(crate) const POOL_BORROW_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const PIPELINE_CAPACITY: usize = 256;
pub(crate) const PIPELINE_PUBLISH_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const PIPELINE_DOWNLOAD_WORKERS: usize = 4;
pub(crate) const PIPELINE_UPLOAD_WORKERS: usize = 4;
pub(crate) const PIPELINE_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) const LOG_LEVEL: &str = "info";
