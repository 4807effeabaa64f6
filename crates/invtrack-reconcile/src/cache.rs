//! Per-guild invite snapshot cache.
//!
//! One `InviteSnapshotCache` exists per guild, owned by that guild's state in
//! the engine. Codes are kept in a `BTreeMap` so iteration (and therefore any
//! report built from the cache) is deterministic.
//!
//! `populated` records whether a full snapshot has ever been applied. A guild
//! whose initial fetch failed (missing permission) stays unpopulated until a
//! later successful fetch; single upserts from invite-create events do not
//! flip it.

use std::collections::BTreeMap;

use invtrack_schemas::{InviteRecord, UserId};

use crate::UsageDiff;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InviteSnapshotCache {
    /// code -> last observed record
    invites: BTreeMap<String, InviteRecord>,
    populated: bool,
}

impl InviteSnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wholesale replace from a full snapshot. Last write wins.
    ///
    /// Duplicate codes inside `records` collapse to the last occurrence.
    pub fn replace_snapshot(&mut self, records: impl IntoIterator<Item = InviteRecord>) {
        self.invites = records
            .into_iter()
            .map(|r| (r.code.clone(), r))
            .collect();
        self.populated = true;
    }

    /// Insert or overwrite a single record.
    pub fn upsert(&mut self, code: impl Into<String>, uses: u64, inviter_id: Option<UserId>) {
        let code = code.into();
        self.invites
            .insert(code.clone(), InviteRecord::new(code, uses, inviter_id));
    }

    /// Drop a record. Returns the removed record, `None` if the code was unknown.
    pub fn remove(&mut self, code: &str) -> Option<InviteRecord> {
        self.invites.remove(code)
    }

    /// Read-only view for diffing.
    pub fn get(&self) -> &BTreeMap<String, InviteRecord> {
        &self.invites
    }

    pub fn record(&self, code: &str) -> Option<&InviteRecord> {
        self.invites.get(code)
    }

    /// Adopt the reconciled contents produced by [`crate::resolve_usage`].
    ///
    /// A successful fresh fetch is a full snapshot, so this also marks the
    /// cache populated.
    pub fn apply(&mut self, diff: UsageDiff) {
        self.invites = diff.into_reconciled();
        self.populated = true;
    }

    pub fn is_populated(&self) -> bool {
        self.populated
    }

    pub fn len(&self) -> usize {
        self.invites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }
}
