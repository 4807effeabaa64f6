//! Inviter counters and the active-credit index for one guild.
//!
//! `counts[inviter]` is the number of members currently credited to that
//! inviter, plus any administrative adjustments. `active[member]` names the
//! inviter a present member is credited to.
//!
//! Administrative adjustments deliberately touch only `counts`, so after an
//! `adjust` or `reset` a counter no longer equals the number of `active`
//! entries pointing at that inviter. Uncredits against a counter already at 0
//! stay at 0.

use std::collections::HashMap;

use invtrack_schemas::UserId;

#[derive(Clone, Debug, Default)]
pub struct InviterCountLedger {
    /// inviter -> count
    counts: HashMap<UserId, u64>,
    /// member -> inviter currently credited
    active: HashMap<UserId, UserId>,
}

impl InviterCountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Credit `member`'s join to `inviter`.
    ///
    /// Returns `false` and changes nothing if the member already holds an
    /// active credit: a member is credited at most once per stay.
    pub fn credit(&mut self, member: UserId, inviter: UserId) -> bool {
        if self.active.contains_key(&member) {
            return false;
        }
        self.active.insert(member, inviter);
        let c = self.counts.entry(inviter).or_insert(0);
        *c = c.saturating_add(1);
        true
    }

    /// Remove `member`'s active credit, decrementing its inviter (clamped at 0).
    ///
    /// Returns the inviter that was uncredited, `None` if the member had no
    /// active credit.
    pub fn uncredit(&mut self, member: UserId) -> Option<UserId> {
        let inviter = self.active.remove(&member)?;
        if let Some(c) = self.counts.get_mut(&inviter) {
            *c = c.saturating_sub(1);
        }
        Some(inviter)
    }

    /// Administrative correction. Positive `delta` adds, negative subtracts
    /// with the result clamped at 0. Returns the new count.
    pub fn adjust(&mut self, inviter: UserId, delta: i64) -> u64 {
        let c = self.counts.entry(inviter).or_insert(0);
        *c = if delta >= 0 {
            c.saturating_add(delta.unsigned_abs())
        } else {
            c.saturating_sub(delta.unsigned_abs())
        };
        *c
    }

    /// Administrative reset to 0. Active credits are left in place.
    pub fn reset(&mut self, inviter: UserId) {
        self.counts.insert(inviter, 0);
    }

    /// Current count; 0 for unseen inviters.
    pub fn count(&self, inviter: UserId) -> u64 {
        self.counts.get(&inviter).copied().unwrap_or(0)
    }

    pub fn active_inviter(&self, member: UserId) -> Option<UserId> {
        self.active.get(&member).copied()
    }

    /// Number of members currently holding a credit.
    pub fn active_credits(&self) -> usize {
        self.active.len()
    }
}
