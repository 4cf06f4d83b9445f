use crate::error::{ErrorKind, Result};

/// Keep one book and fold the others into it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MergeGroup {
    pub keep: i64,
    /// Books to absorb into `keep`, in the order they were given. Never
    /// empty, never contains `keep`.
    pub merge: Vec<i64>,
}

/// Merge groups waiting to be committed, in commit order.
#[derive(Clone, Debug, Default)]
pub struct Staging {
    groups: Vec<MergeGroup>,
}

impl Staging {
    /// Stage a group. `keep` and repeated ids are dropped from `merge`; a
    /// group left with nothing to absorb is rejected without touching the
    /// list.
    pub fn add(&mut self, keep: i64, merge: &[i64]) -> Result<&MergeGroup> {
        let mut ids = Vec::with_capacity(merge.len());
        for &id in merge {
            if id != keep && !ids.contains(&id) {
                ids.push(id);
            }
        }
        if ids.is_empty() {
            exn::bail!(ErrorKind::Staging { keep });
        }
        self.groups.push(MergeGroup { keep, merge: ids });
        Ok(&self.groups[self.groups.len() - 1])
    }

    /// Remove and return the most recently staged group.
    pub fn remove_last(&mut self) -> Option<MergeGroup> {
        self.groups.pop()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }

    pub fn list(&self) -> &[MergeGroup] {
        &self.groups
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}
