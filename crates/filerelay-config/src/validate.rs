//! Semantic checks applied after parsing and overrides.

use std::time::Duration;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{RelayConfig, StoreScheme};

const LOG_FORMATS: [&str; 3] = ["json", "pretty", "text"];

impl RelayConfig {
    /// Reject values the relay cannot run with.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError::InvalidField`] found.
    pub fn validate(&self) -> ConfigResult<()> {
        ensure_duration("poll", "interval", self.poll.interval)?;

        if self.source.root.as_os_str().is_empty() {
            return Err(ConfigError::invalid("source", "root", None, "must be set"));
        }
        if self.source.extensions.is_empty() {
            return Err(ConfigError::invalid(
                "source",
                "extensions",
                None,
                "at least one extension required",
            ));
        }
        if let Some(blank) = self
            .source
            .extensions
            .iter()
            .find(|extension| extension.trim().trim_start_matches('.').trim().is_empty())
        {
            return Err(ConfigError::invalid(
                "source",
                "extensions",
                Some(blank.clone()),
                "blank extension",
            ));
        }

        let pool = &self.pool;
        ensure_nonzero("pool", "max_total", pool.max_total)?;
        ensure_duration("pool", "borrow_timeout", pool.borrow_timeout)?;
        if pool.min_idle > pool.max_idle {
            return Err(ConfigError::invalid(
                "pool",
                "min_idle",
                Some(pool.min_idle.to_string()),
                "must not exceed max_idle",
            ));
        }
        if pool.max_idle > pool.max_total {
            return Err(ConfigError::invalid(
                "pool",
                "max_idle",
                Some(pool.max_idle.to_string()),
                "must not exceed max_total",
            ));
        }

        let pipeline = &self.pipeline;
        ensure_nonzero("pipeline", "capacity", pipeline.capacity)?;
        ensure_nonzero("pipeline", "download_workers", pipeline.download_workers)?;
        ensure_nonzero("pipeline", "upload_workers", pipeline.upload_workers)?;
        ensure_duration("pipeline", "publish_timeout", pipeline.publish_timeout)?;
        ensure_duration("pipeline", "shutdown_timeout", pipeline.shutdown_timeout)?;

        match self.store.scheme {
            StoreScheme::S3 if is_blank(self.store.bucket.as_deref()) => {
                return Err(ConfigError::invalid(
                    "store",
                    "bucket",
                    None,
                    "required for the s3 scheme",
                ));
            }
            StoreScheme::Fs if is_blank(self.store.root.as_deref()) => {
                return Err(ConfigError::invalid(
                    "store",
                    "root",
                    None,
                    "required for the fs scheme",
                ));
            }
            _ => {}
        }

        if self.logging.level.trim().is_empty() {
            return Err(ConfigError::invalid("logging", "level", None, "must be set"));
        }
        if let Some(format) = self.logging.format.as_deref()
            && !LOG_FORMATS.contains(&format.trim().to_ascii_lowercase().as_str())
        {
            return Err(ConfigError::invalid(
                "logging",
                "format",
                Some(format.to_string()),
                "expected json or pretty",
            ));
        }
        Ok(())
    }
}

fn ensure_nonzero(section: &str, field: &str, value: usize) -> ConfigResult<()> {
    if value == 0 {
        return Err(ConfigError::invalid(
            section,
            field,
            Some("0".to_string()),
            "must be positive",
        ));
    }
    Ok(())
}

fn ensure_duration(section: &str, field: &str, value: Duration) -> ConfigResult<()> {
    if value.is_zero() {
        return Err(ConfigError::invalid(
            section,
            field,
            Some("0s".to_string()),
            "must be positive",
        ));
    }
    Ok(())
}

fn is_blank(value: Option<&str>) -> bool {
    value.is_none_or(|value| value.trim().is_empty())
}
