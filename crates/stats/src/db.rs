//! Connections to uploaded statistics databases.
//!
//! Unlike a long-lived application database, every statistics file is opened
//! for a single short job (validate, list, merge) and closed again, so this
//! holds one [`SqliteConnection`] rather than a pool.

use crate::error::{ErrorKind, Result};
use crate::schema::{self, Capabilities};
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteSynchronous};
use sqlx::{Connection, SqliteConnection};
use std::path::Path;
use std::time::Duration;
use tracing::instrument;

/// An open statistics database together with the result of probing its
/// `book` table.
#[derive(Debug)]
pub struct StatsDatabase {
    pub(crate) conn: SqliteConnection,
    capabilities: Capabilities,
}

impl StatsDatabase {
    /// Open an existing statistics database for reading and writing.
    ///
    /// The schema is validated and the optional `book` columns are probed
    /// exactly once, here.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect(path.as_ref(), false).await
    }

    /// Open an existing statistics database without write access.
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub async fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        Self::connect(path.as_ref(), true).await
    }

    async fn connect(path: &Path, read_only: bool) -> Result<Self> {
        let mut conn = match SqliteConnection::connect_with(&Self::options(path, read_only)).await {
            Ok(conn) => conn,
            Err(e) => {
                let kind = classify(&e, ErrorKind::Open);
                return Err(e).or_raise(|| kind);
            },
        };
        let capabilities = match schema::probe(&mut conn).await {
            Ok(capabilities) => capabilities,
            Err(e) => {
                _ = conn.close().await;
                return Err(e);
            },
        };
        Ok(Self { conn, capabilities })
    }

    fn options(path: &Path, read_only: bool) -> SqliteConnectOptions {
        let options = SqliteConnectOptions::new()
            .filename(path)
            // Uploads must already exist; never conjure an empty database
            // out of a typo'd path.
            .create_if_missing(false)
            .read_only(read_only)
            .busy_timeout(Duration::from_millis(1500));
        match read_only {
            // Switching journal mode is a write.
            true => options,
            // The file is handed back to the user afterwards, so it has to
            // stay a single self-contained file: no WAL or shared-memory
            // side files.
            false => options.journal_mode(SqliteJournalMode::Delete).synchronous(SqliteSynchronous::Full),
        }
    }

    /// Optional `book` columns detected when the file was opened.
    pub fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    /// Close the connection, flushing anything still pending to disk.
    pub async fn close(self) -> Result<()> {
        self.conn.close().await.or_raise(|| ErrorKind::Database)
    }
}

/// SQLite's primary result code for "file is not a database".
const SQLITE_NOTADB: &str = "26";

/// Pick the error kind for a failed query, singling out files that SQLite
/// refuses to recognise as databases at all.
pub(crate) fn classify(err: &sqlx::Error, fallback: ErrorKind) -> ErrorKind {
    match err.as_database_error().and_then(|db| db.code()) {
        Some(code) if code == SQLITE_NOTADB => ErrorKind::NotADatabase,
        _ => fallback,
    }
}

/// Confirm that the file at `path` is a statistics database this crate can
/// work with.
///
/// No side effects: the file is opened read-only and closed again.
pub async fn validate(path: impl AsRef<Path>) -> Result<()> {
    let db = StatsDatabase::open_read_only(path).await?;
    db.close().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixture::Fixture;

    #[tokio::test]
    async fn test_validate_accepts_statistics_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ok.sqlite3");
        Fixture::new().book(1, "Dune").write(&path).await.unwrap();
        validate(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_open_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = StatsDatabase::open(dir.path().join("missing.sqlite3")).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::Open));
    }

    #[tokio::test]
    async fn test_open_leaves_no_side_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.sqlite3");
        Fixture::new().book(1, "Dune").write(&path).await.unwrap();
        let db = StatsDatabase::open(&path).await.unwrap();
        db.close().await.unwrap();
        let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().file_name()).collect();
        assert_eq!(entries, vec![std::ffi::OsString::from("stats.sqlite3")]);
    }
}
