//! Upload stage: write payloads to the object store and release them.

use std::sync::Arc;

use async_trait::async_trait;
use filerelay_core::{FileItem, ObjectStore};
use filerelay_events::Stage;
use filerelay_telemetry::Metrics;
use tracing::{debug, error, info, warn};

use crate::error::{TransferError, describe};
use crate::{Outcome, UPLOAD_STAGE};

/// Pipeline stage writing each downloaded item to the object store.
pub struct UploadStage {
    store: Arc<dyn ObjectStore>,
    metrics: Metrics,
}

impl UploadStage {
    /// Stage writing to `store`.
    #[must_use]
    pub fn new(store: Arc<dyn ObjectStore>, metrics: Metrics) -> Self {
        Self { store, metrics }
    }

    /// Write the payload under the item's name.
    ///
    /// Items without payload are skipped; store failures are logged and
    /// counted. The item is returned untouched in every case.
    pub async fn upload(&self, item: FileItem) -> FileItem {
        let Some(payload) = item.payload().cloned() else {
            self.metrics
                .inc_transfer(UPLOAD_STAGE, Outcome::Skipped.as_str());
            warn!(file = %item.name, id = %item.id, "no payload to upload; skipping");
            return item;
        };

        let length = u64::try_from(payload.len()).unwrap_or(u64::MAX);
        if length != item.size_bytes {
            warn!(
                file = %item.name,
                declared = item.size_bytes,
                actual = length,
                "downloaded size differs from listing"
            );
        }

        match self.store.put(&item.name, payload, item.size_bytes).await {
            Ok(()) => {
                self.metrics
                    .inc_transfer(UPLOAD_STAGE, Outcome::Success.as_str());
                self.metrics.add_transfer_bytes(UPLOAD_STAGE, length);
                info!(file = %item.name, id = %item.id, bytes = length, "file relayed to object store");
            }
            Err(source) => {
                let err = TransferError::StoreWrite {
                    key: item.name.clone(),
                    source,
                };
                self.metrics
                    .inc_transfer(UPLOAD_STAGE, Outcome::Failure.as_str());
                error!(
                    file = %item.name,
                    id = %item.id,
                    error = %describe(&err),
                    "upload failed"
                );
            }
        }
        item
    }

    /// Release the in-memory payload.
    #[must_use]
    pub fn finalize(mut item: FileItem) -> FileItem {
        item.clear_payload();
        item
    }

    /// Upload, then finalise regardless of the upload outcome.
    pub async fn process(&self, item: FileItem) -> FileItem {
        Self::finalize(self.upload(item).await)
    }
}

#[async_trait]
impl Stage<FileItem> for UploadStage {
    fn name(&self) -> &'static str {
        UPLOAD_STAGE
    }

    async fn handle(&self, item: FileItem) -> anyhow::Result<()> {
        let item = self.process(item).await;
        debug!(
            file = %item.name,
            id = %item.id,
            discovered_at = %item.discovered_at,
            "item completed"
        );
        Ok(())
    }
}
