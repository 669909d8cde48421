//! # Snapshot Storage
//!
//! Where the serialized database image lives between runs.
//!
//! ```text
//! ┌──────────────┐   read(key) on open    ┌──────────────────────┐
//! │    Store     │ ◄───────────────────── │  SnapshotStorage     │
//! │ (working db) │                        │  ├── FileStorage     │
//! │              │ ─────────────────────► │  └── MemoryStorage   │
//! └──────────────┘   write(key, bytes)    └──────────────────────┘
//!                    after every commit
//! ```
//!
//! A write always replaces the previous image in full.

use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;
use std::io;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

/// Storage collaborator for whole-database images.
#[async_trait]
pub trait SnapshotStorage: Send + Sync + Debug {
    /// Returns the stored image, or `None` on first run.
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>>;

    /// Replaces the stored image.
    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()>;
}

// =============================================================================
// File Storage
// =============================================================================

/// Keeps images as files in a directory.
///
/// Writes go to `<key>.tmp` and are renamed over `<key>`, so a crash mid-write
/// leaves the previous image intact.
#[derive(Debug, Clone)]
pub struct FileStorage {
    dir: PathBuf,
}

impl FileStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(key)
    }
}

#[async_trait]
impl SnapshotStorage for FileStorage {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match tokio::fs::read(self.path_for(key)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let target = self.path_for(key);
        let staging = self.path_for(&format!("{key}.tmp"));
        tokio::fs::write(&staging, bytes).await?;
        tokio::fs::rename(&staging, &target).await?;

        debug!(path = %target.display(), bytes = bytes.len(), "Snapshot written");
        Ok(())
    }
}

// =============================================================================
// Memory Storage
// =============================================================================

/// In-process storage for tests and embedding.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    images: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of bytes currently stored under `key`.
    pub async fn len_of(&self, key: &str) -> Option<usize> {
        self.images.lock().await.get(key).map(Vec::len)
    }
}

#[async_trait]
impl SnapshotStorage for MemoryStorage {
    async fn read(&self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.images.lock().await.get(key).cloned())
    }

    async fn write(&self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.images.lock().await.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}
