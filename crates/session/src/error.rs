//! Session Error Types
//!
//! Every outcome a caller may need to react to differently has its own
//! variant; nothing is collapsed into a generic failure.

use derive_more::{Display, Error};

/// A session error with automatic location tracking.
pub type Error = exn::Exn<ErrorKind>;
/// Result type alias for session operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Actionable error categories.
///
/// ### Session Validity
/// - [`ErrorKind::SessionNotFound`]
/// - [`ErrorKind::SessionExpired`]
/// - [`ErrorKind::SessionMissingFiles`]
///
/// ### Commit
/// - [`ErrorKind::NothingStaged`]
/// - [`ErrorKind::MergeConflict`]
/// - [`ErrorKind::MergeFailed`]
#[derive(Debug, Display, Error)]
pub enum ErrorKind {
    /// Only `.sqlite3` files are accepted.
    #[display("not a statistics upload: {_0}")]
    InvalidUpload(#[error(not(source))] String),
    /// The upload is not a KOReader statistics database. It has been removed.
    #[display("file is not a KOReader statistics database")]
    Schema,
    /// The group would not absorb any book; the staged list is unchanged.
    #[display("merge group keeping book {keep} has no other books to merge")]
    Staging { keep: i64 },
    #[display("no merge groups are staged")]
    NothingStaged,
    /// A book referenced by the group at (1-based) position `group` no longer
    /// exists. Groups before it remain applied to the working copy.
    #[display("merge group {group} refers to book {book}, which no longer exists")]
    MergeConflict { group: usize, book: i64 },
    /// The group at (1-based) position `group` failed for any other reason.
    #[display("merge group {group} could not be applied")]
    MergeFailed { group: usize },
    #[display("no merged database is available; commit the staged groups first")]
    NotCommitted,
    #[display("session not found")]
    SessionNotFound,
    #[display("session expired")]
    SessionExpired,
    /// The session's upload was removed from disk, most likely by the cleanup
    /// sweep. The session has been discarded.
    #[display("session files are no longer available")]
    SessionMissingFiles,
    #[display("storage error")]
    Storage,
    #[display("database error")]
    Database,
    #[display("download counter error")]
    Counter,
}

impl ErrorKind {
    /// Returns `true` if retrying might succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Storage | Self::Database | Self::Counter | Self::MergeFailed { .. })
    }

    /// Returns `true` if the session can no longer be used and a new upload
    /// is needed.
    pub fn is_session_gone(&self) -> bool {
        matches!(self, Self::SessionNotFound | Self::SessionExpired | Self::SessionMissingFiles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validity_errors_are_distinct() {
        let messages = [
            ErrorKind::SessionNotFound.to_string(),
            ErrorKind::SessionExpired.to_string(),
            ErrorKind::SessionMissingFiles.to_string(),
        ];
        assert_eq!(messages[2], "session files are no longer available");
        assert_ne!(messages[0], messages[1]);
        assert_ne!(messages[1], messages[2]);
        assert!(ErrorKind::SessionMissingFiles.is_session_gone());
        assert!(!ErrorKind::NotCommitted.is_session_gone());
    }

    #[test]
    fn test_merge_conflict_names_group_and_book() {
        let kind = ErrorKind::MergeConflict { group: 2, book: 17 };
        assert_eq!(kind.to_string(), "merge group 2 refers to book 17, which no longer exists");
        assert!(!kind.is_retryable());
    }
}
