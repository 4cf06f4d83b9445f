//! Recognising KOReader statistics databases.

use crate::db::classify;
use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::SqliteConnection;
use std::collections::HashSet;

const REQUIRED_TABLES: [&str; 2] = ["book", "page_stat_data"];
const REQUIRED_BOOK_COLUMNS: [&str; 2] = ["total_read_time", "md5"];
const REQUIRED_EVENT_COLUMNS: [&str; 5] = ["id_book", "page", "start_time", "duration", "total_pages"];
/// Merging relies on this key to detect colliding events.
const EVENT_KEY: [&str; 3] = ["id_book", "page", "start_time"];

/// Optional columns of the `book` table.
///
/// Older KOReader releases wrote fewer columns; everything not listed here is
/// required and checked by [`probe`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub authors: bool,
    pub series: bool,
    pub total_read_pages: bool,
}

/// Check that the connected database looks like a KOReader statistics file
/// and find out which optional `book` columns it carries.
pub(crate) async fn probe(conn: &mut SqliteConnection) -> Result<Capabilities> {
    // The first real read of the file: this is where SQLite notices that
    // the bytes are not a database at all.
    let tables: Vec<String> = match sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type = 'table'")
        .fetch_all(&mut *conn)
        .await
    {
        Ok(tables) => tables,
        Err(e) => {
            let kind = classify(&e, ErrorKind::Database);
            return Err(e).or_raise(|| kind);
        },
    };
    for table in REQUIRED_TABLES {
        if !tables.iter().any(|name| name == table) {
            exn::bail!(ErrorKind::MissingTable(table));
        }
    }

    let columns = table_columns(conn, "book").await?;
    for column in REQUIRED_BOOK_COLUMNS {
        if !columns.contains(column) {
            exn::bail!(ErrorKind::MissingColumn("book", column));
        }
    }
    let event_columns = table_columns(conn, "page_stat_data").await?;
    for column in REQUIRED_EVENT_COLUMNS {
        if !event_columns.contains(column) {
            exn::bail!(ErrorKind::MissingColumn("page_stat_data", column));
        }
    }
    if !has_event_key(conn).await? {
        exn::bail!(ErrorKind::MissingUniqueKey("page_stat_data"));
    }

    let capabilities = Capabilities {
        authors: columns.contains("authors"),
        series: columns.contains("series"),
        total_read_pages: columns.contains("total_read_pages"),
    };
    tracing::debug!(?capabilities, "probed statistics schema");
    Ok(capabilities)
}

async fn table_columns(conn: &mut SqliteConnection, table: &str) -> Result<HashSet<String>> {
    let columns: Vec<String> = sqlx::query_scalar("SELECT name FROM pragma_table_info(?)")
        .bind(table)
        .fetch_all(&mut *conn)
        .await
        .or_raise(|| ErrorKind::Database)?;
    Ok(columns.into_iter().collect())
}

/// Whether some unique index (or constraint) on `page_stat_data` covers
/// exactly the event key columns.
async fn has_event_key(conn: &mut SqliteConnection) -> Result<bool> {
    let indexes: Vec<String> =
        sqlx::query_scalar("SELECT name FROM pragma_index_list('page_stat_data') WHERE \"unique\" = 1")
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
    for index in indexes {
        // Expression columns have no name.
        let columns: Vec<Option<String>> = sqlx::query_scalar("SELECT name FROM pragma_index_info(?)")
            .bind(&index)
            .fetch_all(&mut *conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let covered = columns.len() == EVENT_KEY.len()
            && EVENT_KEY.iter().all(|key| columns.iter().any(|column| column.as_deref() == Some(*key)));
        if covered {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use crate::StatsDatabase;
    use crate::error::ErrorKind;
    use crate::fixture::Fixture;
    use rstest::rstest;
    use sqlx::{Connection, SqliteConnection};

    async fn raw(path: &std::path::Path, statements: &str) {
        let url = format!("sqlite://{}?mode=rwc", path.display());
        let mut conn = SqliteConnection::connect(&url).await.unwrap();
        sqlx::raw_sql(statements).execute(&mut conn).await.unwrap();
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_schema_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("full.sqlite3");
        Fixture::new().book(1, "Dune").write(&path).await.unwrap();
        let db = StatsDatabase::open_read_only(&path).await.unwrap();
        let caps = *db.capabilities();
        assert!(caps.authors && caps.series && caps.total_read_pages);
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_legacy_schema_capabilities() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("legacy.sqlite3");
        Fixture::new().legacy().book(1, "Dune").write(&path).await.unwrap();
        let db = StatsDatabase::open_read_only(&path).await.unwrap();
        assert_eq!(*db.capabilities(), Default::default());
        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_table() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nostats.sqlite3");
        raw(&path, "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT, total_read_time INTEGER, md5 TEXT);").await;
        let err = StatsDatabase::open_read_only(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingTable("page_stat_data")));
    }

    #[tokio::test]
    async fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nomd5.sqlite3");
        raw(
            &path,
            "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT, total_read_time INTEGER);
             CREATE TABLE page_stat_data (id_book INTEGER, page INTEGER, start_time INTEGER, duration INTEGER, total_pages INTEGER);",
        )
        .await;
        let err = StatsDatabase::open_read_only(&path).await.unwrap_err();
        assert!(matches!(&*err, ErrorKind::MissingColumn("book", "md5")));
    }

    #[tokio::test]
    async fn test_missing_event_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nototal.sqlite3");
        raw(
            &path,
            "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT, total_read_time INTEGER, md5 TEXT);
             CREATE TABLE page_stat_data (id_book INTEGER, page INTEGER, start_time INTEGER, duration INTEGER,
                 UNIQUE (id_book, page, start_time));",
        )
        .await;
        let err = StatsDatabase::open_read_only(&path).await.unwrap_err();
        assert!(err.is_schema());
        assert!(matches!(&*err, ErrorKind::MissingColumn("page_stat_data", "total_pages")));
    }

    #[rstest]
    #[case::no_constraint("")]
    #[case::narrower_key(", UNIQUE (id_book, page)")]
    #[case::wider_key(", UNIQUE (id_book, page, start_time, duration)")]
    #[tokio::test]
    async fn test_events_without_unique_key(#[case] constraint: &str) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nokey.sqlite3");
        raw(
            &path,
            &format!(
                "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT, total_read_time INTEGER, md5 TEXT);
                 CREATE TABLE page_stat_data (id_book INTEGER, page INTEGER, start_time INTEGER, duration INTEGER,
                     total_pages INTEGER{constraint});"
            ),
        )
        .await;
        let err = crate::validate(&path).await.unwrap_err();
        assert!(err.is_schema());
        assert!(matches!(&*err, ErrorKind::MissingUniqueKey("page_stat_data")));
    }

    #[tokio::test]
    async fn test_unique_index_counts_as_event_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("indexed.sqlite3");
        raw(
            &path,
            "CREATE TABLE book (id INTEGER PRIMARY KEY, title TEXT, total_read_time INTEGER, md5 TEXT);
             CREATE TABLE page_stat_data (id_book INTEGER, page INTEGER, start_time INTEGER, duration INTEGER,
                 total_pages INTEGER);
             CREATE UNIQUE INDEX page_stat_data_key ON page_stat_data (start_time, id_book, page);",
        )
        .await;
        crate::validate(&path).await.unwrap();
    }

    #[tokio::test]
    async fn test_not_a_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notes.sqlite3");
        std::fs::write(&path, "these are my reading notes, not a database. ".repeat(64)).unwrap();
        let err = StatsDatabase::open_read_only(&path).await.unwrap_err();
        assert!(err.is_schema(), "unexpected error: {err:?}");
        assert!(matches!(&*err, ErrorKind::NotADatabase));
    }
}
