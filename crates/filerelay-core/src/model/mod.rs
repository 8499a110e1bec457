//! Transfer DTOs shared by the poller, the pipeline stages, and the adapters.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Entry reported by a source directory listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEntry {
    /// File name relative to the listed directory.
    pub name: String,
    /// Size reported by the source at listing time.
    pub size_bytes: u64,
    /// Modification timestamp reported by the source.
    pub modified_at: DateTime<Utc>,
}

impl RemoteEntry {
    /// Convenience constructor used by adapters and fixtures.
    #[must_use]
    pub fn new(name: impl Into<String>, size_bytes: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            modified_at,
        }
    }
}

/// One file in flight through the relay pipeline.
///
/// The payload is absent when the poller creates the item, populated once by
/// the download stage, and cleared by the upload stage so that memory is only
/// held for items that are currently moving.
#[derive(Debug, Clone)]
pub struct FileItem {
    /// Correlation identifier used in logs.
    pub id: Uuid,
    /// Name at the source; also used as the destination key.
    pub name: String,
    /// Size declared by the listing that discovered the file.
    pub size_bytes: u64,
    /// Source modification timestamp used for watermark comparisons.
    pub modified_at: DateTime<Utc>,
    /// Wall-clock instant at which the poller discovered the file.
    pub discovered_at: DateTime<Utc>,
    payload: Option<Bytes>,
}

impl FileItem {
    /// Build a payload-less item from a listing entry.
    #[must_use]
    pub fn discovered(entry: RemoteEntry) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: entry.name,
            size_bytes: entry.size_bytes,
            modified_at: entry.modified_at,
            discovered_at: Utc::now(),
            payload: None,
        }
    }

    /// Borrow the downloaded bytes, if any.
    #[must_use]
    pub const fn payload(&self) -> Option<&Bytes> {
        self.payload.as_ref()
    }

    /// Whether the download stage materialised the file contents.
    #[must_use]
    pub const fn has_payload(&self) -> bool {
        self.payload.is_some()
    }

    /// Number of bytes currently held in memory for this item.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        self.payload.as_ref().map_or(0, Bytes::len)
    }

    /// Store the downloaded contents on the item.
    pub fn attach_payload(&mut self, bytes: Bytes) {
        self.payload = Some(bytes);
    }

    /// Release the in-memory contents.
    pub fn clear_payload(&mut self) {
        self.payload = None;
    }
}
