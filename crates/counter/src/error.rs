//! Download Counter Error Types

use derive_more::{Display, Error};

/// A counter error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for counter operations.
pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    #[display("database error")]
    Database,
    #[display("database migration error")]
    Migration,
    /// The stored row is missing or holds a value that cannot be a count.
    #[display("invalid counter data")]
    InvalidData,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        // Most likely SQLITE_BUSY outlasting the busy timeout.
        matches!(self, Self::Database)
    }
}
