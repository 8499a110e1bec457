//! Capability traits implemented by source and destination adapters.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::AsyncRead;

use crate::error::{SourceResult, StoreResult};
use crate::model::RemoteEntry;

/// Byte stream returned by a source when a file retrieval starts.
pub type ByteStream = Box<dyn AsyncRead + Send + Unpin>;

/// One stateful session against the file source.
///
/// Sessions are expensive to establish and are handed out by the connection
/// pool; a single session is only ever used by one operation at a time.
#[async_trait]
pub trait SourceSession: Send + 'static {
    /// List the entries found directly under `path`.
    async fn list(&mut self, path: &str) -> SourceResult<Vec<RemoteEntry>>;

    /// Switch the session into binary streaming mode ahead of a retrieval.
    async fn prepare_binary_transfer(&mut self) -> SourceResult<()> {
        Ok(())
    }

    /// Open a retrieval stream for `name`; `None` means the source has no
    /// stream to offer for that file.
    async fn open_stream(&mut self, name: &str) -> SourceResult<Option<ByteStream>>;

    /// Finalise the retrieval started by [`SourceSession::open_stream`].
    async fn complete_transfer(&mut self) -> SourceResult<()> {
        Ok(())
    }

    /// Remove `name` from the source.
    async fn delete(&mut self, name: &str) -> SourceResult<()>;

    /// Cheap liveness probe used when validating idle sessions.
    async fn is_healthy(&mut self) -> bool {
        true
    }
}

/// Durable destination for relayed files.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Write `bytes` under `key` with declared length `size_bytes`, the size
    /// reported at discovery. A store that cannot honour the declared length
    /// fails the write.
    async fn put(&self, key: &str, bytes: Bytes, size_bytes: u64) -> StoreResult<()>;
}
