//! Download stage: materialise file contents and forward them downstream.
//!
//! # Design
//! - Every borrow ends in `release` on success or `invalidate` on failure;
//!   the `Pooled` guard invalidates anything left over on early returns.
//! - Failures stay local to the item: it is forwarded without payload and the
//!   subscription keeps running.
//! - The source file is deleted only when deletion is enabled, the bytes were
//!   read, and the item reached the upload topic.

use async_trait::async_trait;
use bytes::Bytes;
use filerelay_core::{FileItem, SourceError, SourceSession};
use filerelay_events::{Delivery, Stage, Topic};
use filerelay_pool::{ConnectionManager, Pool};
use filerelay_telemetry::Metrics;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info, warn};

use crate::error::{TransferError, TransferResult, describe};
use crate::{DELETE_STEP, DOWNLOAD_STAGE, Outcome};

const MAX_PREALLOCATION: usize = 64 * 1024 * 1024;

/// Source-side options for the download stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadSettings {
    /// Directory the poller lists; names are resolved relative to it.
    pub source_path: String,
    /// Remove the source file once it has been handed to the upload stage.
    pub delete_after_transfer: bool,
}

/// Pipeline stage reading each discovered file into memory.
pub struct DownloadStage<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    pool: Pool<M>,
    downstream: Topic<FileItem>,
    metrics: Metrics,
    settings: DownloadSettings,
}

impl<M> DownloadStage<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    /// Stage borrowing from `pool` and forwarding to `downstream`.
    #[must_use]
    pub const fn new(
        pool: Pool<M>,
        downstream: Topic<FileItem>,
        metrics: Metrics,
        settings: DownloadSettings,
    ) -> Self {
        Self {
            pool,
            downstream,
            metrics,
            settings,
        }
    }

    /// Read the file behind `item` into its payload.
    ///
    /// Failures are logged and counted; the item is returned without payload.
    pub async fn download(&self, mut item: FileItem) -> FileItem {
        match self.fetch(&item).await {
            Ok(bytes) => {
                let length = u64::try_from(bytes.len()).unwrap_or(u64::MAX);
                self.metrics
                    .inc_transfer(DOWNLOAD_STAGE, Outcome::Success.as_str());
                self.metrics.add_transfer_bytes(DOWNLOAD_STAGE, length);
                debug!(file = %item.name, id = %item.id, bytes = length, "file downloaded");
                item.attach_payload(bytes);
            }
            Err(err) => {
                self.metrics
                    .inc_transfer(DOWNLOAD_STAGE, Outcome::Failure.as_str());
                error!(
                    file = %item.name,
                    id = %item.id,
                    phase = err.phase(),
                    error = %describe(&err),
                    "download failed; forwarding item without payload"
                );
            }
        }
        item
    }

    /// Delete the source file when deletion is enabled and `relayed` holds.
    ///
    /// Failures are logged and counted, never raised.
    pub async fn finalize(&self, name: &str, relayed: bool) {
        if !self.settings.delete_after_transfer {
            return;
        }
        if !relayed {
            debug!(file = name, "item was not relayed; source file kept");
            self.metrics.inc_transfer(DELETE_STEP, Outcome::Skipped.as_str());
            return;
        }
        match self.delete_source(name).await {
            Ok(()) => {
                self.metrics.inc_transfer(DELETE_STEP, Outcome::Success.as_str());
                debug!(file = name, "source file deleted");
            }
            Err(err) => {
                self.metrics.inc_transfer(DELETE_STEP, Outcome::Failure.as_str());
                warn!(
                    file = name,
                    error = %describe(&err),
                    "failed to delete source file"
                );
            }
        }
    }

    async fn fetch(&self, item: &FileItem) -> TransferResult<Bytes> {
        let mut connection = self
            .pool
            .borrow()
            .await
            .map_err(|source| TransferError::Borrow {
                operation: "download",
                source,
            })?;
        let remote = self.remote_path(&item.name);
        match retrieve(&mut *connection, &remote, &item.name, item.size_bytes).await {
            Ok(bytes) => {
                connection.release();
                Ok(bytes)
            }
            Err(err) => {
                connection.invalidate();
                Err(err)
            }
        }
    }

    async fn delete_source(&self, name: &str) -> TransferResult<()> {
        let mut connection = self
            .pool
            .borrow()
            .await
            .map_err(|source| TransferError::Borrow {
                operation: "delete",
                source,
            })?;
        match connection.delete(&self.remote_path(name)).await {
            Ok(()) => {
                connection.release();
                Ok(())
            }
            Err(source) => {
                connection.invalidate();
                Err(TransferError::Deletion {
                    name: name.to_string(),
                    source,
                })
            }
        }
    }

    fn remote_path(&self, name: &str) -> String {
        let directory = self.settings.source_path.trim_end_matches('/');
        if directory.is_empty() || directory == "." {
            name.to_string()
        } else {
            format!("{directory}/{name}")
        }
    }
}

async fn retrieve<S: SourceSession>(
    session: &mut S,
    remote: &str,
    name: &str,
    declared_size: u64,
) -> TransferResult<Bytes> {
    let retrieval = |source: SourceError| TransferError::Retrieval {
        name: name.to_string(),
        source,
    };

    session.prepare_binary_transfer().await.map_err(retrieval)?;
    let Some(mut stream) = session.open_stream(remote).await.map_err(retrieval)? else {
        return Err(TransferError::StreamUnavailable {
            name: name.to_string(),
        });
    };

    let capacity = usize::try_from(declared_size)
        .unwrap_or(MAX_PREALLOCATION)
        .min(MAX_PREALLOCATION);
    let mut buffer = Vec::with_capacity(capacity);
    stream
        .read_to_end(&mut buffer)
        .await
        .map_err(|source| retrieval(SourceError::io("read", name, source)))?;
    drop(stream);

    session.complete_transfer().await.map_err(retrieval)?;
    Ok(Bytes::from(buffer))
}

#[async_trait]
impl<M> Stage<FileItem> for DownloadStage<M>
where
    M: ConnectionManager,
    M::Type: SourceSession,
{
    fn name(&self) -> &'static str {
        DOWNLOAD_STAGE
    }

    async fn handle(&self, item: FileItem) -> anyhow::Result<()> {
        let item = self.download(item).await;
        let downloaded = item.has_payload();
        let name = item.name.clone();

        let delivery = self.downstream.publish(item).await;
        let relayed = matches!(delivery, Ok(Delivery::Delivered));
        match &delivery {
            Ok(Delivery::Delivered) => {}
            Ok(Delivery::Dropped { .. }) => {
                warn!(file = %name, "upload queue full; item dropped");
            }
            Ok(Delivery::NoSubscribers) => {
                warn!(file = %name, "no upload stage subscribed; item discarded");
            }
            Err(err) => {
                warn!(file = %name, error = %describe(err), "failed to forward item");
            }
        }

        self.finalize(&name, downloaded && relayed).await;
        if downloaded && relayed {
            info!(file = %name, "file handed to upload stage");
        }
        delivery
            .map(|_| ())
            .map_err(|source| TransferError::Publish { source }.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filerelay_core::RemoteEntry;
    use filerelay_events::PipelineOptions;
    use filerelay_pool::PoolStats;
    use filerelay_test_support::{
        MemoryManager, MemorySource, RecordingStage, fast_pool_options, ts,
    };
    use std::sync::Arc;

    struct Harness {
        source: MemorySource,
        pool: Pool<MemoryManager>,
        downstream: Topic<FileItem>,
        metrics: Metrics,
    }

    impl Harness {
        fn new() -> anyhow::Result<Self> {
            let source = MemorySource::new();
            let metrics = Metrics::new()?;
            Ok(Self {
                pool: Pool::new(MemoryManager::new(source.clone()), fast_pool_options(2))?,
                downstream: Topic::new("downloaded", PipelineOptions::default(), metrics.clone()),
                source,
                metrics,
            })
        }

        fn stage(&self, delete_after_transfer: bool) -> DownloadStage<MemoryManager> {
            DownloadStage::new(
                self.pool.clone(),
                self.downstream.clone(),
                self.metrics.clone(),
                DownloadSettings {
                    source_path: "inbox".to_string(),
                    delete_after_transfer,
                },
            )
        }

        fn item(&self, name: &str) -> FileItem {
            FileItem::discovered(RemoteEntry::new(name, 5, ts(1)))
        }

        fn assert_balanced(&self) -> PoolStats {
            let stats = self.pool.stats();
            assert_eq!(stats.returned + stats.invalidated, stats.borrowed);
            assert_eq!(stats.in_use, 0);
            stats
        }
    }

    #[tokio::test]
    async fn download_attaches_payload_and_releases_connection() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        let stage = harness.stage(false);

        let item = stage.download(harness.item("a.jpg")).await;
        assert_eq!(item.payload().map(|bytes| bytes.as_ref()), Some(&b"alpha"[..]));
        assert_eq!(harness.source.completed_transfers(), 1);

        let stats = harness.assert_balanced();
        assert_eq!(stats.returned, 1);
        assert_eq!(harness.metrics.snapshot().bytes_downloaded, 5);
        Ok(())
    }

    #[tokio::test]
    async fn unavailable_stream_invalidates_connection() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        harness.source.withhold_stream("a.jpg");
        let stage = harness.stage(false);

        let item = stage.download(harness.item("a.jpg")).await;
        assert!(!item.has_payload());
        let stats = harness.assert_balanced();
        assert_eq!(stats.invalidated, 1);
        assert_eq!(harness.metrics.snapshot().downloads_failed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn read_failure_invalidates_connection() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        harness.source.fail_reads("a.jpg");
        let stage = harness.stage(false);

        let item = stage.download(harness.item("a.jpg")).await;
        assert!(!item.has_payload());
        assert_eq!(harness.source.completed_transfers(), 0);
        assert_eq!(harness.assert_balanced().invalidated, 1);
        Ok(())
    }

    #[tokio::test]
    async fn borrow_failure_leaves_payload_absent_and_next_item_succeeds() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("x.jpg", &b"x"[..], ts(1));
        harness.source.add_file("y.jpg", &b"y"[..], ts(2));
        let stage = harness.stage(false);
        let x = harness.item("x.jpg");
        let y = harness.item("y.jpg");

        harness.pool.manager().refuse_connections(true);
        let x = stage.download(x).await;
        assert!(!x.has_payload());

        harness.pool.manager().refuse_connections(false);
        let y = stage.download(y).await;
        assert!(y.has_payload());
        harness.assert_balanced();
        Ok(())
    }

    #[tokio::test]
    async fn handle_forwards_and_deletes_relayed_file() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        let recorder = Arc::new(RecordingStage::new("recorder"));
        let subscription = harness.downstream.subscribe("upload", 1, recorder.clone())?;
        let stage = harness.stage(true);

        stage.handle(harness.item("a.jpg")).await?;
        harness.downstream.close();
        subscription.join().await;

        let forwarded = recorder.items();
        assert_eq!(forwarded.len(), 1);
        assert!(forwarded[0].has_payload());
        assert_eq!(harness.source.deleted(), vec!["a.jpg"]);
        assert_eq!(harness.assert_balanced().returned, 2);
        Ok(())
    }

    #[tokio::test]
    async fn failed_download_is_forwarded_but_not_deleted() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        harness.source.withhold_stream("a.jpg");
        let recorder = Arc::new(RecordingStage::new("recorder"));
        let subscription = harness.downstream.subscribe("upload", 1, recorder.clone())?;
        let stage = harness.stage(true);

        stage.handle(harness.item("a.jpg")).await?;
        harness.downstream.close();
        subscription.join().await;

        let forwarded = recorder.items();
        assert_eq!(forwarded.len(), 1);
        assert!(!forwarded[0].has_payload());
        assert!(harness.source.deleted().is_empty());
        assert!(harness.source.contains("a.jpg"));
        Ok(())
    }

    #[tokio::test]
    async fn delete_failure_invalidates_connection_without_failing_item() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        harness.source.fail_deletes("a.jpg");
        let recorder = Arc::new(RecordingStage::new("recorder"));
        let subscription = harness.downstream.subscribe("upload", 1, recorder.clone())?;
        let stage = harness.stage(true);

        stage.handle(harness.item("a.jpg")).await?;
        harness.downstream.close();
        subscription.join().await;

        assert_eq!(recorder.items().len(), 1);
        let stats = harness.assert_balanced();
        assert_eq!(stats.returned, 1);
        assert_eq!(stats.invalidated, 1);
        Ok(())
    }

    #[tokio::test]
    async fn source_file_is_kept_when_deletion_is_disabled() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        let subscription = harness.downstream.subscribe(
            "upload",
            1,
            Arc::new(RecordingStage::<FileItem>::new("recorder")),
        )?;
        let stage = harness.stage(false);

        stage.handle(harness.item("a.jpg")).await?;
        harness.downstream.close();
        subscription.join().await;

        assert!(harness.source.contains("a.jpg"));
        assert_eq!(harness.assert_balanced().borrowed, 1);
        Ok(())
    }

    #[tokio::test]
    async fn closed_downstream_is_reported_and_file_kept() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.source.add_file("a.jpg", &b"alpha"[..], ts(1));
        harness.downstream.close();
        let stage = harness.stage(true);

        assert!(stage.handle(harness.item("a.jpg")).await.is_err());
        assert!(harness.source.contains("a.jpg"));
        harness.assert_balanced();
        Ok(())
    }
}
