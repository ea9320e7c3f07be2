//! Per-entity reaction state: at most one reaction per user.
//!
//! Updates for a user overwrite that user's entry in arrival order. When the
//! storage layer stamps events with a revision, an update whose revision is
//! not newer than the last one seen for that user is stale and dropped, so a
//! late `LIKE` cannot resurrect a reaction that was already cleared. Cleared
//! entries are kept as tombstones for that comparison.

use std::collections::BTreeMap;

use shared::domain::{ReactionKind, UserId};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReactionEntry {
    pub kind: Option<ReactionKind>,
    pub revision: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReactionSet {
    entries: BTreeMap<UserId, ReactionEntry>,
}

impl ReactionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, user_id: UserId) -> Option<ReactionKind> {
        self.entries.get(&user_id).and_then(|entry| entry.kind)
    }

    pub fn entry(&self, user_id: UserId) -> ReactionEntry {
        self.entries.get(&user_id).copied().unwrap_or_default()
    }

    /// Merge a server-side reaction change. Returns whether state changed.
    pub fn apply(
        &mut self,
        user_id: UserId,
        kind: Option<ReactionKind>,
        revision: Option<u64>,
    ) -> bool {
        let current = self.entry(user_id);
        if let (Some(incoming), Some(seen)) = (revision, current.revision) {
            if incoming <= seen {
                return false;
            }
        }
        let next = ReactionEntry {
            kind,
            revision: revision.or(current.revision),
        };
        if next == current {
            return false;
        }
        self.entries.insert(user_id, next);
        true
    }

    /// Local user action: the same kind clears, a different kind replaces.
    /// Returns the previous entry so the caller can roll back.
    pub fn toggle(&mut self, user_id: UserId, kind: ReactionKind) -> ReactionEntry {
        let previous = self.entry(user_id);
        let next = if previous.kind == Some(kind) {
            None
        } else {
            Some(kind)
        };
        self.entries.insert(
            user_id,
            ReactionEntry {
                kind: next,
                revision: previous.revision,
            },
        );
        previous
    }

    /// Undo a [`toggle`](Self::toggle), unless a newer server revision has landed since.
    pub fn restore(&mut self, user_id: UserId, previous: ReactionEntry) {
        let current = self.entry(user_id);
        if current.revision != previous.revision {
            return;
        }
        self.entries.insert(user_id, previous);
    }

    pub fn total(&self) -> usize {
        self.entries.values().filter(|entry| entry.kind.is_some()).count()
    }

    pub fn counts(&self) -> BTreeMap<ReactionKind, usize> {
        let mut counts = BTreeMap::new();
        for kind in self.entries.values().filter_map(|entry| entry.kind) {
            *counts.entry(kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn reactors(&self) -> impl Iterator<Item = (UserId, ReactionKind)> + '_ {
        self.entries
            .iter()
            .filter_map(|(user, entry)| entry.kind.map(|kind| (*user, kind)))
    }
}

#[cfg(test)]
#[path = "tests/reactions_tests.rs"]
mod tests;
