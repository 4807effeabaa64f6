//! Usage diff: which invite did the new member consume?
//!
//! The event source reports a join without saying which invite was used. The
//! only evidence is the per-invite `uses` counter, so a fresh snapshot taken at
//! join time is compared against the cached one:
//!
//! 1. Walk the fresh list in order. For every code also present in the cache
//!    whose `uses` went up, record it as advanced.
//! 2. The **first** advanced code is the consumed invite. Further advances
//!    (bulk joins racing between two snapshots) are reported but not
//!    attributed.
//! 3. The reconciled cache is exactly the fresh snapshot: cached counters move
//!    to fresh values, codes missing from the fresh list are dropped (expired or
//!    deleted without an event), codes only in the fresh list are adopted.
//!
//! Codes that only appear in the fresh list are never candidates, even with
//! `uses > 0`: there is no baseline to compare against.

use std::collections::BTreeMap;

use invtrack_schemas::{InviteRecord, UserId};

/// The invite judged to have been consumed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attribution {
    pub code: String,
    /// `None` for vanity / widget invites: consumed, but nobody to credit.
    pub inviter_id: Option<UserId>,
}

/// Full result of one diff. Stable ordering: all code lists follow fresh-list
/// order, except `expired` which follows cache (sorted) order.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UsageDiff {
    pub consumed: Option<Attribution>,
    /// Every code whose counter advanced, first one is `consumed`.
    pub advanced: Vec<String>,
    /// Cached codes absent from the fresh snapshot.
    pub expired: Vec<String>,
    /// Fresh codes with no cached baseline.
    pub discovered: Vec<String>,
    changed: bool,
    reconciled: BTreeMap<String, InviteRecord>,
}

impl UsageDiff {
    /// Inviter to credit, if the consumed invite has one.
    pub fn credited_inviter(&self) -> Option<UserId> {
        self.consumed.as_ref().and_then(|a| a.inviter_id)
    }

    /// More than one counter advanced; only the first was attributed.
    pub fn is_ambiguous(&self) -> bool {
        self.advanced.len() > 1
    }

    /// Fresh snapshot equals the cached one exactly.
    pub fn is_unchanged(&self) -> bool {
        !self.changed
    }

    pub fn reconciled(&self) -> &BTreeMap<String, InviteRecord> {
        &self.reconciled
    }

    pub fn into_reconciled(self) -> BTreeMap<String, InviteRecord> {
        self.reconciled
    }
}

fn push_once(codes: &mut Vec<String>, code: &str) {
    if !codes.iter().any(|c| c == code) {
        codes.push(code.to_string());
    }
}

/// Diff `cached` against `fresh` and build the reconciled cache contents.
///
/// Does not mutate `cached`; hand the returned diff to
/// [`crate::InviteSnapshotCache::apply`] to commit it.
pub fn resolve_usage(cached: &BTreeMap<String, InviteRecord>, fresh: &[InviteRecord]) -> UsageDiff {
    let mut consumed: Option<Attribution> = None;
    let mut advanced: Vec<String> = Vec::new();
    let mut discovered: Vec<String> = Vec::new();

    for inv in fresh {
        match cached.get(&inv.code) {
            Some(prev) if inv.uses > prev.uses => {
                if consumed.is_none() {
                    consumed = Some(Attribution {
                        code: inv.code.clone(),
                        inviter_id: inv.inviter_id,
                    });
                }
                push_once(&mut advanced, &inv.code);
            }
            Some(_) => {}
            None => push_once(&mut discovered, &inv.code),
        }
    }

    let reconciled: BTreeMap<String, InviteRecord> = fresh
        .iter()
        .map(|r| (r.code.clone(), r.clone()))
        .collect();

    let expired: Vec<String> = cached
        .keys()
        .filter(|code| !reconciled.contains_key(*code))
        .cloned()
        .collect();

    let changed = reconciled != *cached;

    UsageDiff {
        consumed,
        advanced,
        expired,
        discovered,
        changed,
        reconciled,
    }
}
