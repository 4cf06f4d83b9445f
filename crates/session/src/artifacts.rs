//! Where a session's files live and what they are called.
//!
//! Uploads are stored as `<session>.sqlite3` in the uploads directory; the
//! corrected working copy as `<session>_fixed.sqlite3` in the processed
//! directory. Both names can be mapped back to their session, which is how
//! the sweeper recognises files that are still in use.

use crate::SessionId;
use komerge_storage::backend::LocalBackend;
use komerge_storage::{BackendHandle, StorageBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// File extension of KOReader statistics databases.
pub const EXTENSION: &str = "sqlite3";
/// Name the corrected database is offered for download under.
pub const DOWNLOAD_NAME: &str = "statistics_fixed.sqlite3";
const FIXED_SUFFIX: &str = "_fixed";

pub fn upload_name(id: SessionId) -> PathBuf {
    PathBuf::from(format!("{id}.{EXTENSION}"))
}

pub fn fixed_name(id: SessionId) -> PathBuf {
    PathBuf::from(format!("{id}{FIXED_SUFFIX}.{EXTENSION}"))
}

/// The session an artifact belongs to, if `path` is an artifact name at all.
pub fn session_of(path: &Path) -> Option<SessionId> {
    let name = path.file_name()?.to_str()?;
    let stem = name.strip_suffix(EXTENSION)?.strip_suffix('.')?;
    let stem = stem.strip_suffix(FIXED_SUFFIX).unwrap_or(stem);
    let id: SessionId = stem.parse().ok()?;
    // Only the canonical spelling counts; braced or upper-case UUIDs are not
    // names this crate ever writes.
    (id.to_string() == stem).then_some(id)
}

/// The two artifact directories.
#[derive(Clone, Debug)]
pub struct Artifacts {
    pub uploads: LocalBackend,
    pub processed: LocalBackend,
}

impl Artifacts {
    pub fn new(uploads: LocalBackend, processed: LocalBackend) -> Self {
        Self { uploads, processed }
    }

    /// Both directories, for the sweeper.
    pub fn directories(&self) -> Vec<BackendHandle> {
        vec![Arc::new(self.uploads.clone()), Arc::new(self.processed.clone())]
    }

    /// Delete whatever files `id` still has. Missing files are fine; other
    /// failures are logged and skipped. Returns how many files were deleted.
    pub async fn purge(&self, id: SessionId) -> usize {
        let mut deleted = 0;
        for (backend, name) in [(&self.uploads, upload_name(id)), (&self.processed, fixed_name(id))] {
            match backend.delete(&name).await {
                Ok(()) => deleted += 1,
                Err(e) if e.is_not_found() => {},
                Err(e) => {
                    tracing::warn!(session = %id, directory = backend.name(), error = ?e, "could not delete artifact");
                },
            }
        }
        deleted
    }
}
