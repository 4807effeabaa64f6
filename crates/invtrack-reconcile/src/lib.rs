//! invtrack-reconcile
//!
//! Invite usage reconciliation.
//!
//! - [`InviteSnapshotCache`] holds one guild's last-observed invite usage.
//! - [`resolve_usage`] diffs the cache against a fresh snapshot, names the
//!   invite that was consumed (first advance wins) and produces the reconciled
//!   cache contents.
//!
//! Deterministic, pure logic. No IO. No fetches. No locking: callers hold the
//! guild's serialization token while using these types.

mod cache;
mod diff;

pub use cache::InviteSnapshotCache;
pub use diff::{resolve_usage, Attribution, UsageDiff};
