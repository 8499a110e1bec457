//! Scripted fakes for the source, the pool manager, the object store and
//! pipeline stages.

use std::collections::{BTreeMap, HashSet};
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use filerelay_core::{
    ByteStream, ObjectStore, RemoteEntry, SourceError, SourceResult, SourceSession, StoreError,
    StoreResult,
};
use filerelay_events::Stage;
use filerelay_pool::{Manager, RecycleError, RecycleMetrics, RecycleResult};
use tokio::io::{AsyncRead, ReadBuf};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct MemoryFile {
    contents: Bytes,
    modified_at: DateTime<Utc>,
    declared_size: u64,
}

#[derive(Default)]
struct SourceState {
    files: BTreeMap<String, MemoryFile>,
    failing_listings: usize,
    withheld: HashSet<String>,
    failing_reads: HashSet<String>,
    failing_deletes: HashSet<String>,
    deleted: Vec<String>,
    listed_paths: Vec<String>,
    completed_transfers: usize,
}

/// In-memory file source whose failures can be scripted per file.
#[derive(Clone, Default)]
pub struct MemorySource {
    state: Arc<Mutex<SourceState>>,
}

impl MemorySource {
    /// Empty source.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a file whose listed size matches its contents.
    pub fn add_file(&self, name: &str, contents: impl Into<Bytes>, modified_at: DateTime<Utc>) {
        let contents = contents.into();
        let declared_size = u64::try_from(contents.len()).unwrap_or(u64::MAX);
        self.add_file_with_declared_size(name, contents, modified_at, declared_size);
    }

    /// Add a file whose listing reports `declared_size` regardless of its contents.
    pub fn add_file_with_declared_size(
        &self,
        name: &str,
        contents: impl Into<Bytes>,
        modified_at: DateTime<Utc>,
        declared_size: u64,
    ) {
        lock(&self.state).files.insert(
            name.to_string(),
            MemoryFile {
                contents: contents.into(),
                modified_at,
                declared_size,
            },
        );
    }

    /// Make the next `count` listings fail.
    pub fn fail_next_listings(&self, count: usize) {
        lock(&self.state).failing_listings = count;
    }

    /// Make `open_stream` report that no stream is available for `name`.
    pub fn withhold_stream(&self, name: &str) {
        lock(&self.state).withheld.insert(name.to_string());
    }

    /// Make reading the stream for `name` fail.
    pub fn fail_reads(&self, name: &str) {
        lock(&self.state).failing_reads.insert(name.to_string());
    }

    /// Make deleting `name` fail.
    pub fn fail_deletes(&self, name: &str) {
        lock(&self.state).failing_deletes.insert(name.to_string());
    }

    /// Whether `name` is still present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        lock(&self.state).files.contains_key(name)
    }

    /// Files removed through [`SourceSession::delete`], in call order.
    #[must_use]
    pub fn deleted(&self) -> Vec<String> {
        lock(&self.state).deleted.clone()
    }

    /// Paths passed to [`SourceSession::list`], in call order.
    #[must_use]
    pub fn listed_paths(&self) -> Vec<String> {
        lock(&self.state).listed_paths.clone()
    }

    /// Retrievals finalised through [`SourceSession::complete_transfer`].
    #[must_use]
    pub fn completed_transfers(&self) -> usize {
        lock(&self.state).completed_transfers
    }

    /// Open a session against this source.
    #[must_use]
    pub fn session(&self) -> MemorySession {
        MemorySession {
            source: self.clone(),
            healthy: true,
        }
    }
}

/// Session over a [`MemorySource`]. Paths are resolved by their last segment.
pub struct MemorySession {
    source: MemorySource,
    healthy: bool,
}

impl MemorySession {
    /// Make the next health probe fail.
    pub const fn mark_unhealthy(&mut self) {
        self.healthy = false;
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[async_trait]
impl SourceSession for MemorySession {
    async fn list(&mut self, path: &str) -> SourceResult<Vec<RemoteEntry>> {
        let mut state = lock(&self.source.state);
        state.listed_paths.push(path.to_string());
        if state.failing_listings > 0 {
            state.failing_listings -= 1;
            return Err(SourceError::io(
                "list",
                path,
                io::Error::new(io::ErrorKind::ConnectionReset, "scripted listing failure"),
            ));
        }
        Ok(state
            .files
            .iter()
            .map(|(name, file)| RemoteEntry::new(name.clone(), file.declared_size, file.modified_at))
            .collect())
    }

    async fn open_stream(&mut self, name: &str) -> SourceResult<Option<ByteStream>> {
        let key = file_name(name);
        let state = lock(&self.source.state);
        if state.withheld.contains(key) {
            return Ok(None);
        }
        if state.failing_reads.contains(key) {
            return Ok(Some(Box::new(FailingReader)));
        }
        match state.files.get(key) {
            Some(file) => Ok(Some(Box::new(io::Cursor::new(file.contents.clone())))),
            None => Err(SourceError::rejected("retrieve", name, "550 no such file")),
        }
    }

    async fn complete_transfer(&mut self) -> SourceResult<()> {
        lock(&self.source.state).completed_transfers += 1;
        Ok(())
    }

    async fn delete(&mut self, name: &str) -> SourceResult<()> {
        let key = file_name(name);
        let mut state = lock(&self.source.state);
        if state.failing_deletes.contains(key) {
            return Err(SourceError::rejected("delete", name, "550 permission denied"));
        }
        if state.files.remove(key).is_none() {
            return Err(SourceError::rejected("delete", name, "550 no such file"));
        }
        state.deleted.push(key.to_string());
        Ok(())
    }

    async fn is_healthy(&mut self) -> bool {
        self.healthy
    }
}

struct FailingReader;

impl AsyncRead for FailingReader {
    fn poll_read(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        _buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        Poll::Ready(Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "scripted read failure",
        )))
    }
}

/// Pool manager handing out [`MemorySession`]s.
pub struct MemoryManager {
    source: MemorySource,
    connects: AtomicUsize,
    refuse: AtomicBool,
}

impl MemoryManager {
    /// Manager over `source`.
    #[must_use]
    pub const fn new(source: MemorySource) -> Self {
        Self {
            source,
            connects: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
        }
    }

    /// Source backing every session.
    #[must_use]
    pub const fn source(&self) -> &MemorySource {
        &self.source
    }

    /// Sessions opened so far.
    #[must_use]
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Toggle connection refusal.
    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

impl Manager for MemoryManager {
    type Type = MemorySession;
    type Error = SourceError;

    async fn create(&self) -> Result<MemorySession, SourceError> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(SourceError::Unavailable {
                reason: "scripted connection refusal",
            });
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(self.source.session())
    }

    async fn recycle(
        &self,
        connection: &mut MemorySession,
        _: &RecycleMetrics,
    ) -> RecycleResult<SourceError> {
        if connection.is_healthy().await {
            Ok(())
        } else {
            Err(RecycleError::Backend(SourceError::Unavailable {
                reason: "session failed health check",
            }))
        }
    }
}

struct StoredObject {
    bytes: Bytes,
    declared_size: u64,
}

/// Recording object store with scriptable write failures.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, StoredObject>>,
    failing: Mutex<HashSet<String>>,
    stalled: AtomicBool,
    attempts: AtomicUsize,
}

impl MemoryStore {
    /// Empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make writes to `key` fail.
    pub fn fail_writes(&self, key: &str) {
        lock(&self.failing).insert(key.to_string());
    }

    /// Make every later write hang without completing.
    pub fn stall_writes(&self) {
        self.stalled.store(true, Ordering::SeqCst);
    }

    /// Bytes stored under `key`.
    #[must_use]
    pub fn object(&self, key: &str) -> Option<Bytes> {
        lock(&self.objects).get(key).map(|object| object.bytes.clone())
    }

    /// Size passed alongside the bytes stored under `key`.
    #[must_use]
    pub fn declared_size(&self, key: &str) -> Option<u64> {
        lock(&self.objects).get(key).map(|object| object.declared_size)
    }

    /// Stored keys in lexical order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        lock(&self.objects).keys().cloned().collect()
    }

    /// Calls to [`ObjectStore::put`], including failed ones.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn put(&self, key: &str, bytes: Bytes, size_bytes: u64) -> StoreResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.stalled.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if lock(&self.failing).contains(key) {
            return Err(StoreError::write(
                key,
                io::Error::other("scripted write failure"),
            ));
        }
        lock(&self.objects).insert(
            key.to_string(),
            StoredObject {
                bytes,
                declared_size: size_bytes,
            },
        );
        Ok(())
    }
}

/// Stage that records every item it receives.
pub struct RecordingStage<T> {
    name: &'static str,
    items: Mutex<Vec<T>>,
}

impl<T> RecordingStage<T> {
    /// Stage reporting `name` in logs and metrics.
    #[must_use]
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            items: Mutex::new(Vec::new()),
        }
    }

    /// Items received so far, in arrival order.
    #[must_use]
    pub fn items(&self) -> Vec<T>
    where
        T: Clone,
    {
        lock(&self.items).clone()
    }
}

#[async_trait]
impl<T: Send + 'static> Stage<T> for RecordingStage<T> {
    fn name(&self) -> &'static str {
        self.name
    }

    async fn handle(&self, item: T) -> anyhow::Result<()> {
        lock(&self.items).push(item);
        Ok(())
    }
}
