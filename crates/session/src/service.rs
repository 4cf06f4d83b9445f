//! Everything a front end can ask of a session.

use crate::artifacts::{Artifacts, DOWNLOAD_NAME, EXTENSION};
use crate::error::{ErrorKind, Result};
use crate::protection::ProtectionGuard;
use crate::session::{Session, SessionInfo, SessionState, Validation};
use crate::staging::MergeGroup;
use crate::store::{SessionHandle, SessionStore};
use crate::SessionId;
use exn::ResultExt;
use komerge_counter::DownloadCounter;
use komerge_stats::error::ErrorKind as StatsErrorKind;
use komerge_stats::{Book, MergeOutcome, StatsDatabase};
use komerge_storage::StorageBackend;
use std::path::{Path, PathBuf};
use time::{Duration, UtcDateTime};
use tracing::instrument;

/// Outcome of a successful [`Service::commit`].
#[derive(Clone, Debug)]
pub struct Commit {
    /// Absolute path of the corrected database.
    pub path: PathBuf,
    /// One entry per staged group, in commit order.
    pub merges: Vec<MergeOutcome>,
}

/// A committed database ready to be streamed to the user.
///
/// The session's files are protected from the sweeper for as long as the
/// ticket lives. Call [`finish`](Self::finish) once the transfer completed;
/// dropping the ticket instead abandons the download without counting it.
#[derive(Debug)]
pub struct Download {
    id: SessionId,
    path: PathBuf,
    store: SessionStore,
    counter: DownloadCounter,
    _guard: ProtectionGuard,
}

impl Download {
    pub fn session(&self) -> SessionId {
        self.id
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name to offer the file under.
    pub fn filename(&self) -> &'static str {
        DOWNLOAD_NAME
    }

    /// Record the download as completed and return the new download count.
    #[instrument(skip(self), fields(session = %self.id))]
    pub async fn finish(self) -> Result<u64> {
        let count = self.counter.increment().await.or_raise(|| ErrorKind::Counter)?;
        // The session may have been cleaned up while the file was streaming;
        // the download still happened.
        if let Some(handle) = self.store.get(self.id).await {
            handle.lock().await.state = SessionState::Downloaded;
        }
        tracing::info!(session = %self.id, count, "download finished");
        Ok(count)
    }
}

/// Session operations, shared by every request.
#[derive(Clone, Debug)]
pub struct Service {
    store: SessionStore,
    artifacts: Artifacts,
    counter: DownloadCounter,
    retention: Duration,
}

fn stats_error(kind: &StatsErrorKind) -> ErrorKind {
    match kind.is_schema() {
        true => ErrorKind::Schema,
        false => ErrorKind::Database,
    }
}

impl Service {
    /// `retention` is the fixed age after which the sweeper deletes files,
    /// used here only to tell users how long their upload will last.
    pub fn new(store: SessionStore, artifacts: Artifacts, counter: DownloadCounter, retention: Duration) -> Self {
        Self { store, artifacts, counter, retention }
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    async fn session(&self, id: SessionId) -> Result<SessionHandle> {
        match self.store.get(id).await {
            Some(handle) => Ok(handle),
            None => exn::bail!(ErrorKind::SessionNotFound),
        }
    }

    /// Store and validate an uploaded statistics database, starting a new
    /// session for it.
    ///
    /// Anything that goes wrong after the file was written removes it again.
    #[instrument(skip(self, data), fields(size = data.len()))]
    pub async fn upload(&self, filename: &str, data: &[u8]) -> Result<SessionId> {
        let has_extension = Path::new(filename).extension().is_some_and(|ext| ext == EXTENSION);
        if !has_extension {
            exn::bail!(ErrorKind::InvalidUpload(filename.to_string()));
        }

        let id = SessionId::new();
        let _guard = self.store.protection().protect(id).await;
        let session = Session::new(id, UtcDateTime::now(), self.store.timeout());

        if let Err(e) = self.store_upload(&session.upload, data).await {
            self.discard_upload(id, &session.upload).await;
            return Err(e);
        }
        tracing::info!(session = %id, filename, "upload accepted");
        self.store.insert(session).await;
        Ok(id)
    }

    async fn store_upload(&self, name: &Path, data: &[u8]) -> Result<()> {
        let uploads = &self.artifacts.uploads;
        uploads.write(name, data).await.or_raise(|| ErrorKind::Storage)?;
        let path = uploads.resolve(name).or_raise(|| ErrorKind::Storage)?;
        if let Err(e) = komerge_stats::validate(&path).await {
            let kind = stats_error(&e);
            return Err(e).or_raise(|| kind);
        }
        Ok(())
    }

    async fn discard_upload(&self, id: SessionId, name: &Path) {
        match self.artifacts.uploads.delete(name).await {
            Ok(()) => tracing::warn!(session = %id, "discarded rejected upload"),
            Err(e) if e.is_not_found() => {},
            Err(e) => tracing::warn!(session = %id, error = ?e, "could not discard rejected upload"),
        }
    }

    /// Books in the original upload.
    pub async fn books(&self, id: SessionId) -> Result<Vec<Book>> {
        let upload = self.session(id).await?.lock().await.upload.clone();
        let _guard = self.store.protection().protect(id).await;
        let path = self.artifacts.uploads.resolve(&upload).or_raise(|| ErrorKind::Storage)?;
        Self::read_books(&path).await
    }

    /// Books in the committed working copy.
    pub async fn result(&self, id: SessionId) -> Result<Vec<Book>> {
        let handle = self.session(id).await?;
        let _guard = self.store.protection().protect(id).await;
        let session = handle.lock().await;
        let Some(fixed) = &session.fixed else {
            exn::bail!(ErrorKind::NotCommitted);
        };
        let path = self.artifacts.processed.resolve(fixed).or_raise(|| ErrorKind::Storage)?;
        Self::read_books(&path).await
    }

    async fn read_books(path: &Path) -> Result<Vec<Book>> {
        let mut db = match StatsDatabase::open_read_only(path).await {
            Ok(db) => db,
            Err(e) => {
                let kind = match &*e {
                    // The file was there when the session was last checked.
                    StatsErrorKind::Open => ErrorKind::SessionMissingFiles,
                    other => stats_error(other),
                };
                return Err(e).or_raise(|| kind);
            },
        };
        let books = db.books().await.or_raise(|| ErrorKind::Database);
        db.close().await.or_raise(|| ErrorKind::Database)?;
        books
    }

    pub async fn groups(&self, id: SessionId) -> Result<Vec<MergeGroup>> {
        Ok(self.session(id).await?.lock().await.staging.list().to_vec())
    }

    /// Stage a merge group; see [`Staging::add`](crate::Staging::add).
    pub async fn add_group(&self, id: SessionId, keep: i64, merge: &[i64]) -> Result<MergeGroup> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        let group = session.staging.add(keep, merge)?.clone();
        session.staging_changed();
        tracing::debug!(session = %id, keep, merge = ?group.merge, "staged merge group");
        Ok(group)
    }

    pub async fn remove_last_group(&self, id: SessionId) -> Result<Option<MergeGroup>> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        let removed = session.staging.remove_last();
        if removed.is_some() {
            session.staging_changed();
        }
        Ok(removed)
    }

    pub async fn clear_groups(&self, id: SessionId) -> Result<()> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        session.staging.clear();
        session.staging_changed();
        Ok(())
    }

    /// Apply every staged group, in order, to a fresh copy of the upload.
    ///
    /// Each group is applied atomically, but the batch is not: if a group
    /// fails, the groups before it stay applied to the working copy, the
    /// session stays in [`SessionState::Staging`] and the error names the
    /// failing group. Committing again starts over from the upload.
    #[instrument(skip(self), fields(session = %id))]
    pub async fn commit(&self, id: SessionId) -> Result<Commit> {
        let handle = self.session(id).await?;
        // Held until the end: one writer per working copy.
        let mut session = handle.lock().await;
        if session.staging.is_empty() {
            exn::bail!(ErrorKind::NothingStaged);
        }
        let _guard = self.store.protection().protect(id).await;
        let groups = session.staging.list().to_vec();
        let working_copy = session.working_copy();
        // Whatever was committed before is about to be overwritten.
        session.fixed = None;
        session.applied_groups = 0;
        session.state = SessionState::Staging;

        let data = match self.artifacts.uploads.read(&session.upload).await {
            Ok(data) => data,
            Err(e) if e.is_not_found() => return Err(e).or_raise(|| ErrorKind::SessionMissingFiles),
            Err(e) => return Err(e).or_raise(|| ErrorKind::Storage),
        };
        let processed = &self.artifacts.processed;
        processed.write(&working_copy, &data).await.or_raise(|| ErrorKind::Storage)?;
        let path = processed.resolve(&working_copy).or_raise(|| ErrorKind::Storage)?;
        let mut db = StatsDatabase::open(&path).await.or_raise(|| ErrorKind::Database)?;

        let mut merges = Vec::with_capacity(groups.len());
        for (index, group) in groups.iter().enumerate() {
            let position = index + 1;
            match db.merge(group.keep, &group.merge).await {
                Ok(outcome) => {
                    merges.push(outcome);
                    session.applied_groups = position;
                },
                Err(e) => {
                    _ = db.close().await;
                    tracing::warn!(session = %id, group = position, applied = index, error = ?e, "commit stopped");
                    let kind = match &*e {
                        StatsErrorKind::MissingBook(book) => ErrorKind::MergeConflict { group: position, book: *book },
                        _ => ErrorKind::MergeFailed { group: position },
                    };
                    return Err(e).or_raise(|| kind);
                },
            }
        }
        db.close().await.or_raise(|| ErrorKind::Database)?;

        session.fixed = Some(working_copy);
        session.state = SessionState::Committed;
        tracing::info!(session = %id, groups = merges.len(), "merges committed");
        Ok(Commit { path, merges })
    }

    /// Hand out the committed database for download.
    pub async fn prepare_download(&self, id: SessionId) -> Result<Download> {
        let handle = self.session(id).await?;
        let guard = self.store.protection().protect(id).await;
        let session = handle.lock().await;
        let Some(fixed) = &session.fixed else {
            exn::bail!(ErrorKind::NotCommitted);
        };
        let processed = &self.artifacts.processed;
        if !processed.exists(fixed).await.or_raise(|| ErrorKind::Storage)? {
            exn::bail!(ErrorKind::SessionMissingFiles);
        }
        Ok(Download {
            id,
            path: processed.resolve(fixed).or_raise(|| ErrorKind::Storage)?,
            store: self.store.clone(),
            counter: self.counter.clone(),
            _guard: guard,
        })
    }

    /// Forget the session and delete its files.
    #[instrument(skip(self), fields(session = %id))]
    pub async fn cleanup(&self, id: SessionId) -> Result<()> {
        let Some(handle) = self.store.remove(id).await else {
            exn::bail!(ErrorKind::SessionNotFound);
        };
        // Wait for anything still running on the session's files.
        drop(handle.lock().await);
        let deleted = self.artifacts.purge(id).await;
        tracing::info!(session = %id, deleted, "session cleaned up");
        Ok(())
    }

    /// Check that the session is still usable and extend its expiry.
    ///
    /// The only operation that refreshes the inactivity window.
    pub async fn validate(&self, id: SessionId) -> Result<Validation> {
        self.validate_at(id, UtcDateTime::now()).await
    }

    /// [`validate`](Self::validate) as of `now`.
    pub async fn validate_at(&self, id: SessionId, now: UtcDateTime) -> Result<Validation> {
        let handle = self.session(id).await?;
        let mut session = handle.lock().await;
        if session.is_expired(now) {
            drop(session);
            // Someone else may have cleaned it up in the meantime; either way
            // it is gone.
            _ = self.cleanup(id).await;
            tracing::info!(session = %id, "session expired");
            exn::bail!(ErrorKind::SessionExpired);
        }
        if !self.artifacts.uploads.exists(&session.upload).await.or_raise(|| ErrorKind::Storage)? {
            drop(session);
            self.store.remove(id).await;
            tracing::info!(session = %id, "session files disappeared");
            exn::bail!(ErrorKind::SessionMissingFiles);
        }

        session.refresh(now, self.store.timeout());
        let cleanup_at = session.created_at + self.retention;
        Ok(Validation {
            expires_at: session.expires_at,
            session_minutes_remaining: (session.expires_at - now).whole_minutes(),
            cleanup_minutes_remaining: (cleanup_at - now).whole_minutes().max(0),
        })
    }

    /// Snapshot of the session. Does not refresh its expiry.
    pub async fn info(&self, id: SessionId) -> Result<SessionInfo> {
        let handle = self.session(id).await?;
        let session = handle.lock().await;
        let upload_present = self.artifacts.uploads.exists(&session.upload).await.or_raise(|| ErrorKind::Storage)?;
        let fixed_present = match &session.fixed {
            Some(fixed) => self.artifacts.processed.exists(fixed).await.or_raise(|| ErrorKind::Storage)?,
            None => false,
        };
        Ok(SessionInfo {
            id,
            state: session.state,
            created_at: session.created_at,
            last_accessed: session.last_accessed,
            expires_at: session.expires_at,
            expired: session.is_expired(UtcDateTime::now()),
            groups: session.staging.list().to_vec(),
            applied_groups: session.applied_groups,
            upload_present,
            fixed_present,
        })
    }

    /// Current download count.
    pub async fn downloads(&self) -> Result<u64> {
        self.counter.get().await.or_raise(|| ErrorKind::Counter)
    }

    /// Drop every expired session and delete its files. Returns how many
    /// sessions were removed.
    pub async fn cleanup_expired(&self) -> usize {
        self.cleanup_expired_at(UtcDateTime::now()).await
    }

    /// [`cleanup_expired`](Self::cleanup_expired) as of `now`.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_at(&self, now: UtcDateTime) -> usize {
        let expired = self.store.reap_expired(now).await;
        for &id in &expired {
            let deleted = self.artifacts.purge(id).await;
            tracing::info!(session = %id, deleted, "expired session removed");
        }
        expired.len()
    }
}
