//! Member lifecycle history for one guild.
//!
//! ```text
//!   (absent) --join--> Joined --leave--> Left --join--> Joined (rejoin_count += 1)
//!                        |                  ^
//!                        +--join (dup)------+  no rejoin, inviter refreshed
//! ```
//!
//! Entries are never removed. Absence means the member was never observed
//! joining this guild; leaves for such members are ignored.

use std::collections::HashMap;

use invtrack_schemas::{MemberHistoryEntry, UserId};

/// How a join was classified against the existing history.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum JoinKind {
    /// No prior entry.
    First,
    /// Prior entry had `left == true`.
    Rejoin,
    /// Prior entry was still active: a repeated delivery of the same join.
    Duplicate,
}

#[derive(Clone, Debug, Default)]
pub struct MemberHistoryLedger {
    entries: HashMap<UserId, MemberHistoryEntry>,
}

impl MemberHistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a (re)join.
    ///
    /// `inviter_id` is the inviter resolved for this join, if any. On a rejoin
    /// or duplicate, a resolved inviter replaces the stored one; an unresolved
    /// join keeps the previous value as the last known attribution. Callers
    /// pass the member's active credit, when one exists, ahead of a newly
    /// resolved inviter.
    pub fn record_join(&mut self, member: UserId, inviter_id: Option<UserId>) -> JoinKind {
        let Some(entry) = self.entries.get_mut(&member) else {
            self.entries
                .insert(member, MemberHistoryEntry::joined(inviter_id));
            return JoinKind::First;
        };

        let kind = if entry.left {
            entry.left = false;
            entry.rejoin_count = entry.rejoin_count.saturating_add(1);
            JoinKind::Rejoin
        } else {
            JoinKind::Duplicate
        };

        if inviter_id.is_some() {
            entry.inviter_id = inviter_id;
        }
        kind
    }

    /// Flag the member as left. Returns `false` if the member was never
    /// observed joining (nothing recorded).
    pub fn record_leave(&mut self, member: UserId) -> bool {
        match self.entries.get_mut(&member) {
            Some(entry) => {
                entry.left = true;
                true
            }
            None => false,
        }
    }

    pub fn lookup(&self, member: UserId) -> Option<&MemberHistoryEntry> {
        self.entries.get(&member)
    }

    /// `true` if the member has an entry and has not left since their last join.
    pub fn is_present(&self, member: UserId) -> bool {
        self.entries.get(&member).is_some_and(|e| !e.left)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
