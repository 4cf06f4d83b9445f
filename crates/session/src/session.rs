use crate::SessionId;
use crate::artifacts::{fixed_name, upload_name};
use crate::staging::{MergeGroup, Staging};
use derive_more::Display;
use std::path::PathBuf;
use time::{Duration, UtcDateTime};

/// Where a session is in its lifecycle.
///
/// Sessions that expired or were cleaned up are simply no longer stored.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq)]
pub enum SessionState {
    /// The upload passed validation; nothing staged yet.
    #[display("validated")]
    Validated,
    /// Groups are being edited, or a commit failed part-way.
    #[display("staging")]
    Staging,
    /// The staged groups have been applied to the working copy.
    #[display("committed")]
    Committed,
    #[display("downloaded")]
    Downloaded,
}

/// One user's upload and everything done to it since.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    /// Artifact name of the pristine upload.
    pub upload: PathBuf,
    /// Artifact name of the working copy, once a commit has succeeded.
    pub fixed: Option<PathBuf>,
    /// Groups applied to the working copy by the last commit attempt.
    pub applied_groups: usize,
    pub staging: Staging,
    pub state: SessionState,
    pub created_at: UtcDateTime,
    pub last_accessed: UtcDateTime,
    pub expires_at: UtcDateTime,
}

impl Session {
    pub(crate) fn new(id: SessionId, now: UtcDateTime, timeout: Duration) -> Self {
        Self {
            id,
            upload: upload_name(id),
            fixed: None,
            applied_groups: 0,
            staging: Staging::default(),
            state: SessionState::Validated,
            created_at: now,
            last_accessed: now,
            expires_at: now + timeout,
        }
    }

    pub fn is_expired(&self, now: UtcDateTime) -> bool {
        now >= self.expires_at
    }

    /// Push the expiry out to a full window from `now`.
    pub(crate) fn refresh(&mut self, now: UtcDateTime, timeout: Duration) {
        self.last_accessed = now;
        self.expires_at = now + timeout;
    }

    /// The staged list changed, so whatever was committed no longer matches it.
    pub(crate) fn staging_changed(&mut self) {
        self.state = SessionState::Staging;
        self.fixed = None;
    }

    pub(crate) fn working_copy(&self) -> PathBuf {
        fixed_name(self.id)
    }
}

/// Result of a successful [`validate`](crate::Service::validate).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Validation {
    pub expires_at: UtcDateTime,
    /// Whole minutes until the session times out without further validation.
    pub session_minutes_remaining: i64,
    /// Whole minutes until the upload is old enough to be swept, regardless
    /// of activity. Zero once that point has passed.
    pub cleanup_minutes_remaining: i64,
}

/// Read-only snapshot of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: SessionId,
    pub state: SessionState,
    pub created_at: UtcDateTime,
    pub last_accessed: UtcDateTime,
    pub expires_at: UtcDateTime,
    pub expired: bool,
    pub groups: Vec<MergeGroup>,
    pub applied_groups: usize,
    pub upload_present: bool,
    pub fixed_present: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expiry_window() {
        let now = UtcDateTime::now();
        let mut session = Session::new(SessionId::new(), now, Duration::hours(2));
        assert_eq!(session.expires_at, now + Duration::hours(2));
        assert!(!session.is_expired(now + Duration::minutes(119)));
        assert!(session.is_expired(now + Duration::hours(2)));

        let later = now + Duration::minutes(90);
        session.refresh(later, Duration::hours(2));
        assert_eq!(session.last_accessed, later);
        assert!(!session.is_expired(now + Duration::hours(3)));
        // The creation time is never moved.
        assert_eq!(session.created_at, now);
    }

    #[test]
    fn test_staging_change_discards_commit() {
        let mut session = Session::new(SessionId::new(), UtcDateTime::now(), Duration::hours(2));
        session.fixed = Some(session.working_copy());
        session.state = SessionState::Committed;
        session.staging_changed();
        assert_eq!(session.state, SessionState::Staging);
        assert_eq!(session.fixed, None);
    }
}
