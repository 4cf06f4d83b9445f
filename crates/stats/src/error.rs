//! Statistics Database Error Types
//!
//! Structured errors using `exn` for automatic location tracking and error
//! tree construction.

use derive_more::{Display, Error};

/// A statistics database error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for statistics database operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Schema Errors
/// - [`ErrorKind::NotADatabase`]
/// - [`ErrorKind::MissingTable`]
/// - [`ErrorKind::MissingColumn`]
/// - [`ErrorKind::MissingUniqueKey`]
///
/// ### Merge Errors
/// - [`ErrorKind::MissingBook`]
/// - [`ErrorKind::InvalidGroup`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// The file could not be opened at all.
    #[display("could not open statistics database")]
    Open,
    /// A query failed for reasons unrelated to the shape of the data.
    #[display("database error")]
    Database,
    /// The file exists but SQLite does not recognise it.
    #[display("file is not an SQLite database")]
    NotADatabase,
    #[display("missing table: {_0}")]
    MissingTable(#[error(not(source))] &'static str),
    #[display("table `{_0}` is missing column `{_1}`")]
    MissingColumn(#[error(not(source))] &'static str, &'static str),
    /// Events cannot be merged without a unique `(id_book, page, start_time)` key.
    #[display("table `{_0}` has no unique key on (id_book, page, start_time)")]
    MissingUniqueKey(#[error(not(source))] &'static str),
    /// A book referenced by a merge does not exist (any more).
    #[display("book {_0} does not exist")]
    MissingBook(#[error(not(source))] i64),
    /// A merge was asked to absorb nothing, or to absorb the book into itself.
    #[display("merge group must absorb at least one book other than {_0}")]
    InvalidGroup(#[error(not(source))] i64),
    #[display("invalid data in column: {_0}")]
    InvalidData(#[error(not(source))] &'static str),
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Database)
    }

    /// Returns `true` if the file was rejected for not looking like a
    /// statistics database.
    pub fn is_schema(&self) -> bool {
        matches!(
            self,
            Self::NotADatabase | Self::MissingTable(_) | Self::MissingColumn(..) | Self::MissingUniqueKey(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display() {
        assert_eq!(ErrorKind::MissingTable("page_stat_data").to_string(), "missing table: page_stat_data");
        assert_eq!(
            ErrorKind::MissingColumn("book", "md5").to_string(),
            "table `book` is missing column `md5`"
        );
        assert_eq!(ErrorKind::MissingBook(7).to_string(), "book 7 does not exist");
    }

    #[test]
    fn test_schema_classification() {
        assert!(ErrorKind::NotADatabase.is_schema());
        assert!(ErrorKind::MissingColumn("book", "total_read_time").is_schema());
        assert!(ErrorKind::MissingUniqueKey("page_stat_data").is_schema());
        assert!(!ErrorKind::MissingUniqueKey("page_stat_data").is_retryable());
        assert!(!ErrorKind::MissingBook(1).is_schema());
        assert!(!ErrorKind::Database.is_schema());
    }
}
