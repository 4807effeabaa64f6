//! Scenario: cache reconciliation after a join-time fetch
//!
//! # Invariants under test
//!
//! 1. Cached `{A:3, B:5}` + fresh `{A:3, B:6}` names `B` and the cache ends as
//!    `{A:3, B:6}`.
//! 2. A fresh snapshot equal to the cache names nothing and leaves the cache
//!    untouched.
//! 3. Codes missing from the fresh snapshot are removed (expiry without an
//!    explicit delete event).
//! 4. For arbitrary inputs the committed cache equals the fresh snapshot, and
//!    any consumed code was present in both with a strictly larger fresh count.

use std::collections::BTreeMap;

use invtrack_reconcile::{resolve_usage, InviteSnapshotCache};
use invtrack_schemas::{InviteRecord, UserId};
use proptest::prelude::*;

fn seeded(records: &[InviteRecord]) -> InviteSnapshotCache {
    let mut cache = InviteSnapshotCache::new();
    cache.replace_snapshot(records.to_vec());
    cache
}

#[test]
fn consumed_invite_is_named_and_cache_advances() {
    let u = Some(UserId(100));
    let v = Some(UserId(200));
    let mut cache = seeded(&[InviteRecord::new("A", 3, u), InviteRecord::new("B", 5, v)]);

    let fresh = vec![InviteRecord::new("A", 3, u), InviteRecord::new("B", 6, v)];
    let diff = resolve_usage(cache.get(), &fresh);

    assert_eq!(diff.consumed.as_ref().map(|a| a.code.as_str()), Some("B"));
    assert_eq!(diff.credited_inviter(), v);

    cache.apply(diff);
    assert_eq!(cache.record("A").map(|r| r.uses), Some(3));
    assert_eq!(cache.record("B").map(|r| r.uses), Some(6));
}

#[test]
fn unchanged_snapshot_leaves_cache_untouched() {
    let records = vec![
        InviteRecord::new("A", 3, Some(UserId(1))),
        InviteRecord::new("B", 5, Some(UserId(2))),
    ];
    let mut cache = seeded(&records);
    let before = cache.clone();

    let diff = resolve_usage(cache.get(), &records);
    assert!(diff.consumed.is_none());
    assert!(diff.is_unchanged());

    cache.apply(diff);
    assert_eq!(cache, before);
}

#[test]
fn missing_codes_are_expired_on_commit() {
    let mut cache = seeded(&[
        InviteRecord::new("gone", 2, Some(UserId(1))),
        InviteRecord::new("stays", 2, Some(UserId(1))),
    ]);

    let diff = resolve_usage(cache.get(), &[InviteRecord::new("stays", 2, Some(UserId(1)))]);
    assert_eq!(diff.expired, vec!["gone".to_string()]);

    cache.apply(diff);
    assert!(cache.record("gone").is_none());
    assert_eq!(cache.len(), 1);
}

#[test]
fn first_fetch_populates_an_empty_cache_without_attribution() {
    let mut cache = InviteSnapshotCache::new();
    let fresh = vec![InviteRecord::new("A", 12, Some(UserId(1)))];

    let diff = resolve_usage(cache.get(), &fresh);
    assert!(diff.consumed.is_none());

    cache.apply(diff);
    assert!(cache.is_populated());
    assert_eq!(cache.record("A").map(|r| r.uses), Some(12));
}

fn arb_records() -> impl Strategy<Value = Vec<InviteRecord>> {
    prop::collection::btree_map("[a-e]", (0u64..20, prop::option::of(1u64..4)), 0..5).prop_map(
        |m| {
            m.into_iter()
                .map(|(code, (uses, inviter))| InviteRecord::new(code, uses, inviter.map(UserId)))
                .collect()
        },
    )
}

proptest! {
    #[test]
    fn committed_cache_always_equals_fresh(cached in arb_records(), fresh in arb_records()) {
        let mut cache = seeded(&cached);
        let baseline = cache.get().clone();

        let diff = resolve_usage(&baseline, &fresh);

        if let Some(a) = &diff.consumed {
            let prev = baseline.get(&a.code).map(|r| r.uses);
            let now = fresh.iter().find(|r| r.code == a.code).map(|r| r.uses);
            prop_assert!(prev.is_some());
            prop_assert!(now > prev);
        }

        cache.apply(diff);
        let expected: BTreeMap<String, InviteRecord> =
            fresh.iter().map(|r| (r.code.clone(), r.clone())).collect();
        prop_assert_eq!(cache.get(), &expected);
    }
}
