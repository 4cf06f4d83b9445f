//! Sessions whose files must survive the cleanup sweep.

use crate::SessionId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::Notify;

#[derive(Debug, Default)]
struct State {
    /// Operations in flight, per session.
    active: HashMap<SessionId, usize>,
    /// Sweeps currently deciding about, or deleting, a session's files.
    claimed: HashMap<SessionId, usize>,
}

#[derive(Debug, Default)]
struct Inner {
    state: Mutex<State>,
    released: Notify,
}

/// Reference-counted set of session ids with an operation in flight.
///
/// The sweeper never deletes a protected session's files. To make "is it
/// protected?" and "delete it" one step, the sweeper first claims the
/// session; [`protect`](Self::protect) waits for outstanding claims, so an
/// operation cannot start on files that are about to disappear.
///
/// The state mutex is never held across an `.await`.
#[derive(Clone, Debug, Default)]
pub struct ProtectionSet {
    inner: Arc<Inner>,
}

impl ProtectionSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Protect `id` until the returned guard is dropped. Guards nest.
    ///
    /// Waits while a sweep holds a claim on `id`.
    pub async fn protect(&self, id: SessionId) -> ProtectionGuard {
        loop {
            let released = self.inner.released.notified();
            tokio::pin!(released);
            // Register before looking, so a release in between is not missed.
            released.as_mut().enable();
            {
                let mut state = self.lock();
                if !state.claimed.contains_key(&id) {
                    *state.active.entry(id).or_insert(0) += 1;
                    return ProtectionGuard { set: self.clone(), id };
                }
            }
            released.await;
        }
    }

    pub fn is_protected(&self, id: SessionId) -> bool {
        self.lock().active.contains_key(&id)
    }

    /// Claim `id` for deletion, unless it is protected.
    ///
    /// While the claim lives, [`protect`](Self::protect) on `id` waits.
    pub(crate) fn claim(&self, id: SessionId) -> Option<SweepClaim> {
        let mut state = self.lock();
        if state.active.contains_key(&id) {
            return None;
        }
        *state.claimed.entry(id).or_insert(0) += 1;
        Some(SweepClaim { set: self.clone(), id })
    }

    fn release(&self, id: SessionId) {
        decrement(&mut self.lock().active, id);
    }

    fn release_claim(&self, id: SessionId) {
        decrement(&mut self.lock().claimed, id);
        self.inner.released.notify_waiters();
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        // The maps are always left consistent, so a panic elsewhere while
        // holding the lock does not invalidate them.
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn decrement(counts: &mut HashMap<SessionId, usize>, id: SessionId) {
    if let Some(count) = counts.get_mut(&id) {
        *count -= 1;
        if *count == 0 {
            counts.remove(&id);
        }
    }
}

/// Keeps a session protected while alive.
#[derive(Debug)]
pub struct ProtectionGuard {
    set: ProtectionSet,
    id: SessionId,
}

impl ProtectionGuard {
    pub fn session(&self) -> SessionId {
        self.id
    }
}

impl Drop for ProtectionGuard {
    fn drop(&mut self) {
        self.set.release(self.id);
    }
}

/// Holds off new protection for a session while the sweeper deletes its files.
#[derive(Debug)]
pub(crate) struct SweepClaim {
    set: ProtectionSet,
    id: SessionId,
}

impl Drop for SweepClaim {
    fn drop(&mut self) {
        self.set.release_claim(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guards_nest() {
        let set = ProtectionSet::new();
        let id = SessionId::new();
        assert!(!set.is_protected(id));

        let outer = set.protect(id).await;
        let inner = set.protect(id).await;
        assert_eq!(inner.session(), id);
        drop(inner);
        assert!(set.is_protected(id));
        drop(outer);
        assert!(!set.is_protected(id));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let set = ProtectionSet::new();
        let a = SessionId::new();
        let b = SessionId::new();
        let _guard = set.protect(a).await;
        assert!(set.is_protected(a));
        assert!(!set.is_protected(b));
        assert!(set.claim(a).is_none());
        assert!(set.claim(b).is_some());
    }

    #[tokio::test]
    async fn test_protect_waits_for_claim() {
        let set = ProtectionSet::new();
        let id = SessionId::new();
        let claim = set.claim(id).unwrap();

        let waiting = tokio::spawn({
            let set = set.clone();
            async move { set.protect(id).await }
        });
        for _ in 0..3 {
            tokio::task::yield_now().await;
        }
        assert!(!waiting.is_finished());
        assert!(!set.is_protected(id));

        drop(claim);
        let guard = waiting.await.unwrap();
        assert!(set.is_protected(id));
        assert!(set.claim(id).is_none());
        drop(guard);
        assert!(set.claim(id).is_some());
    }

    #[tokio::test]
    async fn test_claims_nest() {
        let set = ProtectionSet::new();
        let id = SessionId::new();
        let first = set.claim(id).unwrap();
        let second = set.claim(id).unwrap();
        drop(first);

        let waiting = tokio::spawn({
            let set = set.clone();
            async move { set.protect(id).await }
        });
        tokio::task::yield_now().await;
        assert!(!waiting.is_finished());
        drop(second);
        waiting.await.unwrap();
    }
}
