//! Storage models.

use std::path::PathBuf;
use time::UtcDateTime;

/// File metadata returned by storage backends.
///
/// The modification time is the only notion of age the cleanup sweep has;
/// nothing else about an artifact's history is tracked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInfo {
    /// File name, relative to the backend's directory
    pub path: PathBuf,
    /// File size in bytes
    pub size: u64,
    /// Last modified timestamp
    pub modified: UtcDateTime,
}
impl FileInfo {
    pub fn new(path: impl Into<PathBuf>, size: u64, modified: UtcDateTime) -> Self {
        Self { path: path.into(), size, modified }
    }

    /// How long ago the file was last modified, relative to `now`.
    ///
    /// Files with a modification time in the future report a zero age.
    pub fn age(&self, now: UtcDateTime) -> time::Duration {
        (now - self.modified).max(time::Duration::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::Duration;

    #[test]
    fn test_age() {
        let now = UtcDateTime::now();
        let info = FileInfo::new("a.sqlite3", 1, now - Duration::minutes(90));
        assert_eq!(info.age(now), Duration::minutes(90));
        let future = FileInfo::new("b.sqlite3", 1, now + Duration::minutes(5));
        assert_eq!(future.age(now), Duration::ZERO);
    }
}
