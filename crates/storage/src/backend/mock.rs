//! In-memory storage backend for testing.

use super::FileInfoStream;
use crate::StorageBackend;
use crate::error::{ErrorKind, Result};
use crate::models::FileInfo;
use crate::path::validate as validate_name;
use async_stream::stream;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use time::UtcDateTime;
use tokio::sync::RwLock;

/// In-memory storage backend for testing.
///
/// Files are stored in a `HashMap` behind a [`RwLock`] together with their
/// modification time, which tests can backdate to simulate old artifacts.
/// Individual names can be marked so that deleting them fails, to exercise
/// callers that must survive per-file errors.
///
/// # Examples
///
/// ```
/// use komerge_storage::backend::{MockBackend, StorageBackend};
/// use std::path::Path;
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let backend = MockBackend::with_files([("abc.sqlite3", b"data")]);
/// assert!(backend.exists(Path::new("abc.sqlite3")).await?);
/// # Ok(())
/// # }
/// ```
pub struct MockBackend {
    name: String,
    storage: RwLock<HashMap<PathBuf, (UtcDateTime, Vec<u8>)>>,
    undeletable: RwLock<HashSet<PathBuf>>,
}

impl MockBackend {
    /// Create a mock backend pre-populated with files, all modified "now".
    ///
    /// Panics if any name fails validation. If test setup is wrong, then the
    /// test should not pass.
    pub fn with_files(files: impl IntoIterator<Item = (impl Into<PathBuf>, impl Into<Vec<u8>>)>) -> Self {
        let now = UtcDateTime::now();
        Self::with_dated_files(files.into_iter().map(|(path, data)| (path, now, data)))
    }

    /// Create a mock backend pre-populated with files and explicit
    /// modification times.
    pub fn with_dated_files(
        files: impl IntoIterator<Item = (impl Into<PathBuf>, UtcDateTime, impl Into<Vec<u8>>)>,
    ) -> Self {
        let mut map = HashMap::new();
        for (path, modified, data) in files {
            let path = path.into();
            let Ok(validated) = validate_name(&path) else {
                panic!("MockBackend::with_dated_files: invalid name {}", path.display());
            };
            map.insert(validated, (modified, data.into()));
        }
        Self {
            name: "mock".to_string(),
            storage: RwLock::new(map),
            undeletable: RwLock::new(HashSet::new()),
        }
    }

    /// Make every future `delete` of `path` fail with an I/O error.
    pub async fn fail_deletes_of(&self, path: impl Into<PathBuf>) {
        self.undeletable.write().await.insert(path.into());
    }

    /// Overwrite the modification time of an existing file.
    pub async fn set_modified(&self, path: impl AsRef<Path>, modified: UtcDateTime) -> Result<()> {
        let path = validate_name(path)?;
        let mut guard = self.storage.write().await;
        let entry = guard.get_mut(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        entry.0 = modified;
        Ok(())
    }
}
impl Default for MockBackend {
    fn default() -> Self {
        let files: [(&str, &str); 0] = [];
        Self::with_files(files)
    }
}

#[async_trait]
impl StorageBackend for MockBackend {
    fn name(&self) -> &str {
        &self.name
    }

    fn list_stream<'a>(&'a self) -> FileInfoStream<'a> {
        Box::pin(stream! {
            // Snapshot under the read lock, then drop it before yielding to
            // avoid holding the lock across yield points.
            let entries: Vec<FileInfo> = {
                let guard = self.storage.read().await;
                guard
                    .iter()
                    .map(|(path, (modified, data))| FileInfo::new(path.clone(), data.len() as u64, *modified))
                    .collect()
            };
            for info in entries {
                yield Ok(info);
            }
        })
    }

    async fn exists(&self, path: &Path) -> Result<bool> {
        let path = validate_name(path)?;
        Ok(self.storage.read().await.contains_key(&path))
    }

    async fn read(&self, path: &Path) -> Result<Vec<u8>> {
        let path = validate_name(path)?;
        let (_modified, data) =
            self.storage.read().await.get(&path).cloned().ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))?;
        Ok(data)
    }

    async fn write(&self, path: &Path, data: &[u8]) -> Result<()> {
        let path = validate_name(path)?;
        self.storage.write().await.insert(path, (UtcDateTime::now(), data.to_vec()));
        Ok(())
    }

    async fn delete(&self, path: &Path) -> Result<()> {
        let path = validate_name(path)?;
        if self.undeletable.read().await.contains(&path) {
            exn::bail!(ErrorKind::Io(std::io::Error::other(format!("refusing to delete {}", path.display()))));
        }
        self.storage.write().await.remove(&path).map(|_| ()).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path)))
    }

    async fn stat(&self, path: &Path) -> Result<FileInfo> {
        let path = validate_name(path)?;
        let guard = self.storage.read().await;
        let (modified, data) = guard.get(&path).ok_or_else(|| exn::Exn::from(ErrorKind::NotFound(path.clone())))?;
        Ok(FileInfo::new(path.clone(), data.len() as u64, *modified))
    }
}
