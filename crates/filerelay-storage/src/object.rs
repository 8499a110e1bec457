//! Object store adapter over OpenDAL.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use filerelay_config::{StoreConfig, StoreScheme};
use filerelay_core::{ObjectStore, StoreError, StoreResult};
use opendal::{Operator, services};
use tracing::debug;

const DEFAULT_REGION: &str = "us-east-1";

/// Writes relayed files through an OpenDAL [`Operator`].
#[derive(Clone)]
pub struct OpenDalStore {
    operator: Operator,
    target: String,
}

impl fmt::Debug for OpenDalStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenDalStore")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

impl OpenDalStore {
    /// Wrap an already configured operator; `target` labels it in logs.
    #[must_use]
    pub fn new(operator: Operator, target: impl Into<String>) -> Self {
        Self {
            operator,
            target: target.into(),
        }
    }

    /// Build the operator described by the `store` configuration section.
    ///
    /// S3 uses path-style addressing, so custom endpoints such as MinIO work
    /// unchanged. Credentials fall back to the ambient chain when unset.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Backend`] when OpenDAL rejects the settings.
    pub fn from_config(config: &StoreConfig) -> StoreResult<Self> {
        match config.scheme {
            StoreScheme::S3 => {
                let bucket = config.bucket.as_deref().unwrap_or_default();
                let mut builder = services::S3::default()
                    .bucket(bucket)
                    .region(config.region.as_deref().unwrap_or(DEFAULT_REGION));
                if let Some(root) = config.root.as_deref() {
                    builder = builder.root(root);
                }
                if let Some(endpoint) = config.endpoint.as_deref() {
                    builder = builder.endpoint(endpoint);
                }
                if let Some(key) = config.access_key_id.as_deref() {
                    builder = builder.access_key_id(key);
                }
                if let Some(secret) = config.secret_access_key.as_deref() {
                    builder = builder.secret_access_key(secret);
                }
                let operator = Operator::new(builder)
                    .map_err(|err| StoreError::backend("store.s3", err))?
                    .finish();
                Ok(Self::new(operator, format!("s3://{bucket}")))
            }
            StoreScheme::Fs => {
                let root = config.root.as_deref().unwrap_or_default();
                let operator = Operator::new(services::Fs::default().root(root))
                    .map_err(|err| StoreError::backend("store.fs", err))?
                    .finish();
                Ok(Self::new(operator, format!("fs://{root}")))
            }
        }
    }

    /// Label of the configured destination.
    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }
}

#[async_trait]
impl ObjectStore for OpenDalStore {
    async fn put(&self, key: &str, bytes: Bytes, size_bytes: u64) -> StoreResult<()> {
        let actual = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
        if actual != size_bytes {
            return Err(StoreError::LengthMismatch {
                key: key.to_string(),
                declared: size_bytes,
                actual,
            });
        }
        self.operator
            .write(key, bytes)
            .await
            .map_err(|err| StoreError::write(key, err))?;
        debug!(target_store = %self.target, key, bytes = size_bytes, "object written");
        Ok(())
    }
}
