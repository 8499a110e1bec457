//! Source adapter over a local or mounted directory.

use std::io;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use filerelay_core::{ByteStream, RemoteEntry, SourceError, SourceResult, SourceSession};
use filerelay_pool::{Manager, RecycleError, RecycleMetrics, RecycleResult};
use tokio::fs;
use tracing::debug;

/// Opens sessions rooted at one directory.
#[derive(Debug, Clone)]
pub struct LocalDirManager {
    root: PathBuf,
}

impl LocalDirManager {
    /// Manager for sessions rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

}

impl Manager for LocalDirManager {
    type Type = LocalDirSession;
    type Error = SourceError;

    async fn create(&self) -> SourceResult<LocalDirSession> {
        let mut session = LocalDirSession {
            root: self.root.clone(),
        };
        if !session.is_healthy().await {
            return Err(SourceError::Unavailable {
                reason: "source root is not a readable directory",
            });
        }
        debug!(root = %self.root.display(), "source session opened");
        Ok(session)
    }

    async fn recycle(
        &self,
        connection: &mut LocalDirSession,
        _: &RecycleMetrics,
    ) -> RecycleResult<SourceError> {
        if connection.is_healthy().await {
            Ok(())
        } else {
            Err(RecycleError::Backend(SourceError::Unavailable {
                reason: "source root disappeared",
            }))
        }
    }
}

/// One session against the directory tree.
#[derive(Debug)]
pub struct LocalDirSession {
    root: PathBuf,
}

impl LocalDirSession {
    fn resolve(&self, operation: &'static str, relative: &str) -> SourceResult<PathBuf> {
        let path = Path::new(relative);
        if path.is_absolute() {
            return Err(SourceError::rejected(operation, relative, "path_escape"));
        }
        let mut resolved = self.root.clone();
        for component in path.components() {
            match component {
                Component::Normal(segment) => resolved.push(segment),
                Component::CurDir => {}
                _ => return Err(SourceError::rejected(operation, relative, "path_escape")),
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl SourceSession for LocalDirSession {
    async fn list(&mut self, path: &str) -> SourceResult<Vec<RemoteEntry>> {
        let directory = self.resolve("list", path)?;
        let mut reader = fs::read_dir(&directory)
            .await
            .map_err(|err| SourceError::io("list", path, err))?;

        let mut entries = Vec::new();
        while let Some(entry) = reader
            .next_entry()
            .await
            .map_err(|err| SourceError::io("list", path, err))?
        {
            let Ok(name) = entry.file_name().into_string() else {
                debug!(path, "skipping entry with a non UTF-8 name");
                continue;
            };
            let metadata = match entry.metadata().await {
                Ok(metadata) => metadata,
                // removed between read_dir and stat
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(err) => return Err(SourceError::io("list", name, err)),
            };
            if !metadata.is_file() {
                continue;
            }
            let modified = metadata
                .modified()
                .map_err(|err| SourceError::io("list", name.clone(), err))?;
            entries.push(RemoteEntry::new(
                name,
                metadata.len(),
                DateTime::<Utc>::from(modified),
            ));
        }
        Ok(entries)
    }

    async fn open_stream(&mut self, name: &str) -> SourceResult<Option<ByteStream>> {
        let path = self.resolve("retrieve", name)?;
        match fs::File::open(&path).await {
            Ok(file) => Ok(Some(Box::new(file))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SourceError::io("retrieve", name, err)),
        }
    }

    async fn delete(&mut self, name: &str) -> SourceResult<()> {
        let path = self.resolve("delete", name)?;
        fs::remove_file(&path)
            .await
            .map_err(|err| SourceError::io("delete", name, err))
    }

    async fn is_healthy(&mut self) -> bool {
        fs::metadata(&self.root)
            .await
            .is_ok_and(|metadata| metadata.is_dir())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use filerelay_pool::{Pool, PoolError, PoolOptions};
    use std::fs as stdfs;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    fn seeded() -> anyhow::Result<TempDir> {
        let dir = TempDir::new()?;
        stdfs::create_dir(dir.path().join("incoming"))?;
        stdfs::create_dir(dir.path().join("incoming").join("nested"))?;
        stdfs::write(dir.path().join("incoming").join("a.jpg"), b"alpha")?;
        stdfs::write(dir.path().join("incoming").join("b.txt"), b"bravo!")?;
        Ok(dir)
    }

    #[tokio::test]
    async fn lists_files_with_size_and_skips_directories() -> anyhow::Result<()> {
        let dir = seeded()?;
        let mut session = LocalDirManager::new(dir.path()).create().await?;

        let mut entries = session.list("incoming").await?;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let names: Vec<_> = entries.iter().map(|entry| entry.name.as_str()).collect();
        assert_eq!(names, ["a.jpg", "b.txt"]);
        assert_eq!(entries[0].size_bytes, 5);
        assert_eq!(entries[1].size_bytes, 6);
        Ok(())
    }

    #[tokio::test]
    async fn streams_existing_files_and_reports_missing_ones() -> anyhow::Result<()> {
        let dir = seeded()?;
        let mut session = LocalDirManager::new(dir.path()).create().await?;

        let mut stream = session
            .open_stream("incoming/a.jpg")
            .await?
            .ok_or_else(|| anyhow::anyhow!("stream missing"))?;
        let mut buffer = Vec::new();
        stream.read_to_end(&mut buffer).await?;
        assert_eq!(buffer, b"alpha");

        assert!(session.open_stream("incoming/gone.jpg").await?.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn deletes_files() -> anyhow::Result<()> {
        let dir = seeded()?;
        let mut session = LocalDirManager::new(dir.path()).create().await?;

        session.delete("incoming/a.jpg").await?;
        assert!(!dir.path().join("incoming").join("a.jpg").exists());
        assert!(matches!(
            session.delete("incoming/a.jpg").await,
            Err(SourceError::Io { operation: "delete", .. })
        ));
        Ok(())
    }

    #[tokio::test]
    async fn rejects_paths_leaving_the_root() -> anyhow::Result<()> {
        let dir = seeded()?;
        let mut session = LocalDirManager::new(dir.path()).create().await?;

        for name in ["../secret", "/etc/passwd", "incoming/../../x"] {
            assert!(matches!(
                session.open_stream(name).await,
                Err(SourceError::Rejected { ref reason, .. }) if reason == "path_escape"
            ));
        }
        Ok(())
    }

    #[tokio::test]
    async fn pooled_sessions_follow_the_root() -> anyhow::Result<()> {
        let dir = seeded()?;
        let manager = LocalDirManager::new(dir.path().join("incoming"));
        assert!(manager.create().await?.is_healthy().await);

        let pool = Pool::new(manager, PoolOptions::default())?;
        pool.borrow().await?.release();
        assert_eq!(pool.stats().idle, 1);

        stdfs::remove_dir_all(dir.path().join("incoming"))?;
        assert!(matches!(pool.borrow().await, Err(PoolError::Connect { .. })));
        let stats = pool.stats();
        assert_eq!(stats.evicted, 1);
        assert_eq!(stats.idle, 0);
        Ok(())
    }
}
