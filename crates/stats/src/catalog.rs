//! Listing the books recorded in a statistics database.

use crate::db::StatsDatabase;
use crate::error::{ErrorKind, Result};
use crate::schema::Capabilities;
use exn::ResultExt;
use sqlx::Row;
use sqlx::sqlite::SqliteRow;
use tracing::instrument;

/// Author shown for books whose database predates the `authors` column, or
/// whose authors were never filled in.
pub const UNKNOWN_AUTHOR: &str = "Unknown Author";

/// One row of the `book` table, as presented to someone choosing duplicates.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Book {
    pub id: i64,
    pub title: String,
    pub authors: String,
    pub series: Option<String>,
    /// Total reading time in seconds.
    pub total_read_time: i64,
    /// Only present when the database has the column.
    pub total_read_pages: Option<i64>,
    pub md5: Option<String>,
}

impl Book {
    fn from_row(row: &SqliteRow, capabilities: &Capabilities) -> Result<Self> {
        let authors = match capabilities.authors {
            true => row.try_get::<Option<String>, _>("authors").or_raise(|| ErrorKind::InvalidData("authors"))?,
            false => None,
        };
        let series = match capabilities.series {
            true => row.try_get::<Option<String>, _>("series").or_raise(|| ErrorKind::InvalidData("series"))?,
            false => None,
        };
        let total_read_pages = match capabilities.total_read_pages {
            true => row
                .try_get::<Option<i64>, _>("total_read_pages")
                .or_raise(|| ErrorKind::InvalidData("total_read_pages"))?,
            false => None,
        };
        Ok(Self {
            id: row.try_get("id").or_raise(|| ErrorKind::InvalidData("id"))?,
            title: row
                .try_get::<Option<String>, _>("title")
                .or_raise(|| ErrorKind::InvalidData("title"))?
                .unwrap_or_default(),
            authors: authors.filter(|a| !a.is_empty()).unwrap_or_else(|| UNKNOWN_AUTHOR.to_string()),
            series: series.filter(|s| !s.is_empty()),
            total_read_time: row
                .try_get::<Option<i64>, _>("total_read_time")
                .or_raise(|| ErrorKind::InvalidData("total_read_time"))?
                .unwrap_or(0),
            total_read_pages,
            md5: row.try_get("md5").or_raise(|| ErrorKind::InvalidData("md5"))?,
        })
    }
}

fn select_books(capabilities: &Capabilities) -> String {
    let mut columns = vec!["id", "title", "total_read_time", "md5"];
    if capabilities.authors {
        columns.push("authors");
    }
    if capabilities.series {
        columns.push("series");
    }
    if capabilities.total_read_pages {
        columns.push("total_read_pages");
    }
    format!("SELECT {} FROM book ORDER BY id", columns.join(", "))
}

impl StatsDatabase {
    /// Every book in the database, ordered by id.
    #[instrument(skip(self))]
    pub async fn books(&mut self) -> Result<Vec<Book>> {
        let capabilities = *self.capabilities();
        let rows = sqlx::query(&select_books(&capabilities))
            .fetch_all(&mut self.conn)
            .await
            .or_raise(|| ErrorKind::Database)?;
        let books = rows.iter().map(|row| Book::from_row(row, &capabilities)).collect::<Result<Vec<_>>>()?;
        tracing::debug!(count = books.len(), "listed books");
        Ok(books)
    }
}
