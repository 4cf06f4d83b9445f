//! Concurrency-safe map of live sessions.

use crate::protection::ProtectionSet;
use crate::session::Session;
use crate::SessionId;
use std::collections::HashMap;
use std::sync::Arc;
use time::{Duration, UtcDateTime};
use tokio::sync::{Mutex, RwLock};

/// A stored session. Its mutex also serialises every operation on the
/// session's files, so two merges never write the same database at once.
pub type SessionHandle = Arc<Mutex<Session>>;

/// Live sessions keyed by id.
///
/// The map lock is only held to look up, insert or remove a handle; work on
/// a session happens under that session's own lock.
#[derive(Clone, Debug)]
pub struct SessionStore {
    sessions: Arc<RwLock<HashMap<SessionId, SessionHandle>>>,
    protection: ProtectionSet,
    timeout: Duration,
}

impl SessionStore {
    /// `timeout` is the rolling inactivity window given to new and
    /// revalidated sessions.
    pub fn new(timeout: Duration, protection: ProtectionSet) -> Self {
        Self { sessions: Arc::default(), protection, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn protection(&self) -> &ProtectionSet {
        &self.protection
    }

    pub async fn insert(&self, session: Session) -> SessionHandle {
        let id = session.id;
        let handle = Arc::new(Mutex::new(session));
        self.sessions.write().await.insert(id, Arc::clone(&handle));
        handle
    }

    pub async fn get(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.read().await.get(&id).cloned()
    }

    pub async fn remove(&self, id: SessionId) -> Option<SessionHandle> {
        self.sessions.write().await.remove(&id)
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.sessions.read().await.is_empty()
    }

    /// Remove every session whose expiry has passed at `now` and return their
    /// ids.
    ///
    /// Protected sessions, and sessions currently locked by an operation, are
    /// in use and left alone; a later pass picks them up.
    pub async fn reap_expired(&self, now: UtcDateTime) -> Vec<SessionId> {
        let mut sessions = self.sessions.write().await;
        let expired: Vec<SessionId> = sessions
            .iter()
            .filter(|(id, _)| !self.protection.is_protected(**id))
            .filter_map(|(id, handle)| {
                let session = handle.try_lock().ok()?;
                session.is_expired(now).then_some(*id)
            })
            .collect();
        for id in &expired {
            sessions.remove(id);
        }
        expired
    }
}
