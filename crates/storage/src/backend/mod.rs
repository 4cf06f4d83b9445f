//! Storage backend trait and implementations.
//!
//! This module defines the `StorageBackend` trait, a unified interface over a
//! single flat artifact directory.

mod local;
#[cfg(feature = "mock")]
mod mock;

pub use self::local::LocalBackend;
#[cfg(feature = "mock")]
pub use self::mock::MockBackend;
use crate::error::Result;
use crate::models::FileInfo;
use async_trait::async_trait;
use futures::{Stream, TryStreamExt};
use std::path::Path;
use std::pin::Pin;

pub(crate) type FileInfoStream<'a> = Pin<Box<dyn Stream<Item = Result<FileInfo>> + Send + 'a>>;

/// Unified interface for artifact directories.
///
/// # Path Handling
/// Every path argument is an artifact *name*, validated with
/// [`validate_name`](crate::validate_name) before use. Implementations must
/// enforce this validation.
///
/// # Examples
///
/// ```
/// use std::path::Path;
/// use komerge_storage::{backend::StorageBackend, error::Result};
///
/// async fn size_of_upload(backend: &dyn StorageBackend) -> Result<usize> {
///     let name = Path::new("0b5c0c3e.sqlite3");
///     if backend.exists(name).await? {
///         Ok(backend.read(name).await?.len())
///     } else {
///         Ok(0)
///     }
/// }
/// ```
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Name of the directory (used for logging only).
    fn name(&self) -> &str;

    /// List all files in the directory.
    ///
    /// Default implementation collects [`list_stream()`](Self::list_stream)
    /// into a [`Vec`].
    async fn list(&self) -> Result<Vec<FileInfo>> {
        self.list_stream().try_collect().await
    }

    /// Stream metadata for every file in the directory.
    ///
    /// Per-entry failures are yielded as `Err` items and the stream carries
    /// on with the next entry, so a caller can skip a bad file without
    /// losing the rest of the listing.
    ///
    /// ```
    /// use futures::StreamExt;
    /// # use komerge_storage::{backend::StorageBackend, error::Result};
    /// # async fn example(backend: &dyn StorageBackend) -> Result<()> {
    /// let mut stream = backend.list_stream();
    /// while let Some(entry) = stream.next().await {
    ///     match entry {
    ///         Ok(info) => println!("{}: {} bytes", info.path.display(), info.size),
    ///         Err(e) => eprintln!("skipping: {e}"),
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    fn list_stream<'a>(&'a self) -> FileInfoStream<'a>;

    /// Check if a file exists.
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Read file contents.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn read(&self, path: &Path) -> Result<Vec<u8>>;

    /// Write file contents, replacing any existing file.
    async fn write(&self, path: &Path, data: &[u8]) -> Result<()>;

    /// Delete a file.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn delete(&self, path: &Path) -> Result<()>;

    /// Read a single file's metadata fresh from the directory, rather than
    /// trusting an earlier listing.
    ///
    /// Returns [`NotFound`](crate::error::ErrorKind::NotFound) if the file
    /// does not exist.
    async fn stat(&self, path: &Path) -> Result<FileInfo>;
}
