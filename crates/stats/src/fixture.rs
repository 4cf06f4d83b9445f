//! Builder for KOReader-shaped statistics databases.
//!
//! Only compiled for tests, or for other crates' tests through the
//! `fixture` feature.

use crate::error::{ErrorKind, Result};
use exn::ResultExt;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode};
use sqlx::{Connection, SqliteConnection};
use std::path::Path;

const SCHEMA: &str = "
    CREATE TABLE book (
        id integer PRIMARY KEY autoincrement,
        title text,
        authors text,
        notes integer,
        last_open integer,
        highlights integer,
        pages integer,
        series text,
        language text,
        md5 text,
        total_read_time integer,
        total_read_pages integer
    );
    CREATE TABLE page_stat_data (
        id_book integer,
        page integer NOT NULL DEFAULT 0,
        start_time integer NOT NULL DEFAULT 0,
        duration integer NOT NULL DEFAULT 0,
        total_pages integer NOT NULL DEFAULT 0,
        UNIQUE (id_book, page, start_time),
        FOREIGN KEY (id_book) REFERENCES book(id)
    );
    CREATE INDEX page_stat_data_start_time ON page_stat_data(start_time);";

/// Databases written by older releases, before authors, series and page
/// totals were tracked.
const LEGACY_SCHEMA: &str = "
    CREATE TABLE book (
        id integer PRIMARY KEY autoincrement,
        title text,
        md5 text,
        total_read_time integer
    );
    CREATE TABLE page_stat_data (
        id_book integer,
        page integer NOT NULL DEFAULT 0,
        start_time integer NOT NULL DEFAULT 0,
        duration integer NOT NULL DEFAULT 0,
        total_pages integer NOT NULL DEFAULT 0,
        UNIQUE (id_book, page, start_time),
        FOREIGN KEY (id_book) REFERENCES book(id)
    );";

struct FixtureBook {
    id: i64,
    title: String,
    authors: Option<String>,
}

struct Event {
    book: i64,
    page: i64,
    start_time: i64,
    duration: i64,
    total_pages: i64,
}

/// Describes a statistics database and writes it to disk.
///
/// Book totals are computed from the events unless overridden with
/// [`stale_totals`](Self::stale_totals).
#[derive(Default)]
pub struct Fixture {
    legacy: bool,
    unkeyed: bool,
    books: Vec<FixtureBook>,
    events: Vec<Event>,
    stale: Vec<(i64, i64, i64)>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write the older schema without `authors`, `series` and
    /// `total_read_pages`.
    pub fn legacy(mut self) -> Self {
        self.legacy = true;
        self
    }

    /// Leave out the unique key on page events.
    pub fn unkeyed(mut self) -> Self {
        self.unkeyed = true;
        self
    }

    pub fn book(mut self, id: i64, title: impl Into<String>) -> Self {
        self.books.push(FixtureBook { id, title: title.into(), authors: None });
        self
    }

    pub fn book_by(mut self, id: i64, title: impl Into<String>, authors: impl Into<String>) -> Self {
        self.books.push(FixtureBook { id, title: title.into(), authors: Some(authors.into()) });
        self
    }

    pub fn event(mut self, book: i64, page: i64, start_time: i64, duration: i64, total_pages: i64) -> Self {
        self.events.push(Event { book, page, start_time, duration, total_pages });
        self
    }

    /// Overwrite a book's stored totals after they have been computed.
    pub fn stale_totals(mut self, book: i64, total_read_time: i64, total_read_pages: i64) -> Self {
        self.stale.push((book, total_read_time, total_read_pages));
        self
    }

    /// Create the database at `path`, which must not exist yet.
    pub async fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let options = SqliteConnectOptions::new()
            .filename(path.as_ref())
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Delete);
        let mut conn = SqliteConnection::connect_with(&options).await.or_raise(|| ErrorKind::Open)?;

        let schema = if self.legacy { LEGACY_SCHEMA } else { SCHEMA };
        let schema = match self.unkeyed {
            true => schema.replace("UNIQUE (id_book, page, start_time),", ""),
            false => schema.to_string(),
        };
        sqlx::raw_sql(&schema).execute(&mut conn).await.or_raise(|| ErrorKind::Database)?;

        for book in &self.books {
            let md5 = format!("{:032x}", book.id);
            let query = match self.legacy {
                true => sqlx::query("INSERT INTO book (id, title, md5, total_read_time) VALUES (?, ?, ?, 0)")
                    .bind(book.id)
                    .bind(&book.title)
                    .bind(md5),
                false => sqlx::query(
                    "INSERT INTO book (id, title, authors, md5, total_read_time, total_read_pages) \
                     VALUES (?, ?, ?, ?, 0, 0)",
                )
                .bind(book.id)
                .bind(&book.title)
                .bind(book.authors.as_deref())
                .bind(md5),
            };
            query.execute(&mut conn).await.or_raise(|| ErrorKind::Database)?;
        }

        for event in &self.events {
            sqlx::query(
                "INSERT INTO page_stat_data (id_book, page, start_time, duration, total_pages) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(event.book)
            .bind(event.page)
            .bind(event.start_time)
            .bind(event.duration)
            .bind(event.total_pages)
            .execute(&mut conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        }

        let totals = match self.legacy {
            true => {
                "UPDATE book SET total_read_time = \
                 (SELECT COALESCE(SUM(duration), 0) FROM page_stat_data WHERE id_book = book.id)"
            },
            false => {
                "UPDATE book SET \
                 total_read_time = (SELECT COALESCE(SUM(duration), 0) FROM page_stat_data WHERE id_book = book.id), \
                 total_read_pages = (SELECT COUNT(DISTINCT page) FROM page_stat_data WHERE id_book = book.id)"
            },
        };
        sqlx::query(totals).execute(&mut conn).await.or_raise(|| ErrorKind::Database)?;

        for &(book, time, pages) in &self.stale {
            let query = match self.legacy {
                true => sqlx::query("UPDATE book SET total_read_time = ? WHERE id = ?").bind(time).bind(book),
                false => sqlx::query("UPDATE book SET total_read_time = ?, total_read_pages = ? WHERE id = ?")
                    .bind(time)
                    .bind(pages)
                    .bind(book),
            };
            query.execute(&mut conn).await.or_raise(|| ErrorKind::Database)?;
        }

        conn.close().await.or_raise(|| ErrorKind::Database)
    }
}
