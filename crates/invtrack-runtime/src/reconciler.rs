//! One guild's state and the transitions applied to it.
//!
//! A [`GuildReconciler`] is only ever reached through its guild's lock in the
//! engine, so every method here takes `&mut self` and may await (the join path
//! fetches a fresh snapshot) without any other task observing a half-applied
//! join.

use std::time::Duration;

use invtrack_ledger::{InviterCountLedger, JoinKind, MemberHistoryLedger};
use invtrack_reconcile::{resolve_usage, InviteSnapshotCache};
use invtrack_schemas::{GuildEvent, GuildId, InviteRecord, UserId};
use tracing::{debug, info, warn};

use crate::source::{fetch_with_timeout, FetchError, SnapshotSource};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a join was recorded without crediting anyone.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UnattributedReason {
    /// No cached counter advanced (cache unpopulated, invite already gone,
    /// or the join raced a snapshot).
    NoAdvance,
    /// The consumed invite has no inviter (vanity / widget).
    NoInviter { code: String },
    /// An inviter was resolved but the member already holds an active credit.
    AlreadyCredited { code: String, inviter_id: UserId },
    /// The join-time snapshot could not be fetched; the cache was not touched.
    FetchFailed(FetchError),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JoinOutcome {
    Credited {
        code: String,
        inviter_id: UserId,
        kind: JoinKind,
    },
    Unattributed {
        kind: JoinKind,
        reason: UnattributedReason,
    },
}

impl JoinOutcome {
    pub fn kind(&self) -> JoinKind {
        match self {
            JoinOutcome::Credited { kind, .. } | JoinOutcome::Unattributed { kind, .. } => *kind,
        }
    }

    pub fn credited_inviter(&self) -> Option<UserId> {
        match self {
            JoinOutcome::Credited { inviter_id, .. } => Some(*inviter_id),
            JoinOutcome::Unattributed { .. } => None,
        }
    }
}

/// What one event did to its guild.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventOutcome {
    /// Cache replaced wholesale with `invites` entries.
    SnapshotReplaced { invites: usize },
    /// Snapshot fetch failed; cache left as it was.
    SnapshotUnavailable(FetchError),
    InviteCached { code: String },
    InviteRemoved { code: String, was_known: bool },
    Joined(JoinOutcome),
    /// Event addressed to another guild; nothing applied.
    Misrouted { event_guild_id: GuildId },
    Left {
        /// Inviter whose count was decremented, if the member held a credit.
        uncredited: Option<UserId>,
        /// Whether the member had a history entry at all.
        tracked: bool,
    },
}

// ---------------------------------------------------------------------------
// GuildReconciler
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct GuildReconciler {
    guild_id: GuildId,
    cache: InviteSnapshotCache,
    history: MemberHistoryLedger,
    counts: InviterCountLedger,
}

impl GuildReconciler {
    pub fn new(guild_id: GuildId) -> Self {
        Self {
            guild_id,
            cache: InviteSnapshotCache::new(),
            history: MemberHistoryLedger::new(),
            counts: InviterCountLedger::new(),
        }
    }

    pub fn guild_id(&self) -> GuildId {
        self.guild_id
    }

    pub fn cache(&self) -> &InviteSnapshotCache {
        &self.cache
    }

    pub fn history(&self) -> &MemberHistoryLedger {
        &self.history
    }

    pub fn counts(&self) -> &InviterCountLedger {
        &self.counts
    }

    pub(crate) fn counts_mut(&mut self) -> &mut InviterCountLedger {
        &mut self.counts
    }

    /// Apply one lifecycle event. Events addressed to another guild are a
    /// caller bug and are ignored with a warning.
    pub async fn apply(
        &mut self,
        event: GuildEvent,
        source: &dyn SnapshotSource,
        fetch_timeout: Duration,
    ) -> EventOutcome {
        if event.guild_id() != self.guild_id {
            warn!(
                guild_id = %self.guild_id,
                event_guild_id = %event.guild_id(),
                kind = event.kind(),
                "event routed to wrong guild; ignored"
            );
            return EventOutcome::Misrouted {
                event_guild_id: event.guild_id(),
            };
        }

        match event {
            GuildEvent::GuildReady { snapshot, .. } => self.replace_snapshot(snapshot),
            GuildEvent::GuildJoined { .. } => self.refresh(source, fetch_timeout).await,
            GuildEvent::InviteCreated {
                code,
                uses,
                inviter_id,
                ..
            } => self.invite_created(code, uses, inviter_id),
            GuildEvent::InviteDeleted { code, .. } => self.invite_deleted(&code),
            GuildEvent::MemberJoined { member_id, .. } => EventOutcome::Joined(
                self.member_joined(member_id, source, fetch_timeout).await,
            ),
            GuildEvent::MemberLeft { member_id, .. } => self.member_left(member_id),
        }
    }

    /// Replace the cache with an externally supplied snapshot.
    pub fn replace_snapshot(&mut self, snapshot: Vec<InviteRecord>) -> EventOutcome {
        self.cache.replace_snapshot(snapshot);
        info!(
            guild_id = %self.guild_id,
            invites = self.cache.len(),
            "invite snapshot cached"
        );
        EventOutcome::SnapshotReplaced {
            invites: self.cache.len(),
        }
    }

    /// Fetch and cache a full snapshot. On failure the cache is left as is
    /// (possibly unpopulated) and later joins resolve unattributed.
    pub async fn refresh(
        &mut self,
        source: &dyn SnapshotSource,
        fetch_timeout: Duration,
    ) -> EventOutcome {
        match fetch_with_timeout(source, self.guild_id, fetch_timeout).await {
            Ok(snapshot) => self.replace_snapshot(snapshot),
            Err(e) => {
                match &e {
                    FetchError::PermissionDenied(_) => warn!(
                        guild_id = %self.guild_id,
                        source = source.name(),
                        error = %e,
                        "missing permission to list invites; guild left unpopulated"
                    ),
                    FetchError::Transport(_) => warn!(
                        guild_id = %self.guild_id,
                        source = source.name(),
                        error = %e,
                        "invite snapshot fetch failed"
                    ),
                }
                EventOutcome::SnapshotUnavailable(e)
            }
        }
    }

    fn invite_created(
        &mut self,
        code: String,
        uses: u64,
        inviter_id: Option<UserId>,
    ) -> EventOutcome {
        debug!(guild_id = %self.guild_id, code = %code, uses, "invite created");
        self.cache.upsert(code.clone(), uses, inviter_id);
        EventOutcome::InviteCached { code }
    }

    fn invite_deleted(&mut self, code: &str) -> EventOutcome {
        let was_known = self.cache.remove(code).is_some();
        debug!(guild_id = %self.guild_id, code, was_known, "invite deleted");
        EventOutcome::InviteRemoved {
            code: code.to_string(),
            was_known,
        }
    }

    /// Resolve which invite `member_id` used, credit its inviter and record
    /// the join.
    ///
    /// A failed fetch records the join unattributed and leaves the cache
    /// untouched. A successful fetch always replaces the cache with the fresh
    /// snapshot, whatever the attribution result.
    pub async fn member_joined(
        &mut self,
        member_id: UserId,
        source: &dyn SnapshotSource,
        fetch_timeout: Duration,
    ) -> JoinOutcome {
        let fresh = match fetch_with_timeout(source, self.guild_id, fetch_timeout).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(
                    guild_id = %self.guild_id,
                    member_id = %member_id,
                    source = source.name(),
                    error = %e,
                    "join-time invite fetch failed; join recorded unattributed"
                );
                let kind = self.history.record_join(member_id, None);
                return JoinOutcome::Unattributed {
                    kind,
                    reason: UnattributedReason::FetchFailed(e),
                };
            }
        };

        let diff = resolve_usage(self.cache.get(), &fresh);
        if diff.is_ambiguous() {
            warn!(
                guild_id = %self.guild_id,
                member_id = %member_id,
                advanced = ?diff.advanced,
                "several invite counters advanced; crediting the first only"
            );
        }

        let consumed = diff.consumed.clone();
        let inviter = diff.credited_inviter();
        self.cache.apply(diff);

        // A member still holding a credit keeps that inviter in history, so
        // history and counts name the same inviter.
        let kind = self
            .history
            .record_join(member_id, self.counts.active_inviter(member_id).or(inviter));

        let Some(attribution) = consumed else {
            warn!(
                guild_id = %self.guild_id,
                member_id = %member_id,
                kind = ?kind,
                "no invite counter advanced; join recorded unattributed"
            );
            return JoinOutcome::Unattributed {
                kind,
                reason: UnattributedReason::NoAdvance,
            };
        };

        let Some(inviter_id) = attribution.inviter_id else {
            info!(
                guild_id = %self.guild_id,
                member_id = %member_id,
                code = %attribution.code,
                "join via invite without inviter; nobody credited"
            );
            return JoinOutcome::Unattributed {
                kind,
                reason: UnattributedReason::NoInviter {
                    code: attribution.code,
                },
            };
        };

        if !self.counts.credit(member_id, inviter_id) {
            warn!(
                guild_id = %self.guild_id,
                member_id = %member_id,
                inviter_id = %inviter_id,
                code = %attribution.code,
                "member already holds an active credit; not credited again"
            );
            return JoinOutcome::Unattributed {
                kind,
                reason: UnattributedReason::AlreadyCredited {
                    code: attribution.code,
                    inviter_id,
                },
            };
        }

        info!(
            guild_id = %self.guild_id,
            member_id = %member_id,
            inviter_id = %inviter_id,
            code = %attribution.code,
            kind = ?kind,
            count = self.counts.count(inviter_id),
            "join attributed"
        );
        JoinOutcome::Credited {
            code: attribution.code,
            inviter_id,
            kind,
        }
    }

    /// Record a departure and release the member's credit, if any.
    pub fn member_left(&mut self, member_id: UserId) -> EventOutcome {
        let tracked = self.history.record_leave(member_id);
        let uncredited = self.counts.uncredit(member_id);
        if !tracked {
            debug!(guild_id = %self.guild_id, member_id = %member_id, "leave for unseen member");
        }
        if let Some(inviter_id) = uncredited {
            info!(
                guild_id = %self.guild_id,
                member_id = %member_id,
                inviter_id = %inviter_id,
                count = self.counts.count(inviter_id),
                "credit released on leave"
            );
        }
        EventOutcome::Left {
            uncredited,
            tracked,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const G: GuildId = GuildId(1);
    const M: UserId = UserId(100);
    const U: UserId = UserId(10);
    const V: UserId = UserId(20);
    const TIMEOUT: Duration = Duration::from_secs(5);

    /// Hands out queued results in order; empty queue is a transport error.
    struct Queue(Mutex<Vec<Result<Vec<InviteRecord>, FetchError>>>);

    impl Queue {
        fn new(mut items: Vec<Result<Vec<InviteRecord>, FetchError>>) -> Self {
            items.reverse();
            Self(Mutex::new(items))
        }
    }

    #[async_trait]
    impl SnapshotSource for Queue {
        fn name(&self) -> &'static str {
            "queue"
        }

        async fn fetch_invite_snapshot(
            &self,
            _guild_id: GuildId,
        ) -> Result<Vec<InviteRecord>, FetchError> {
            self.0
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(FetchError::Transport("queue empty".into())))
        }
    }

    fn inv(code: &str, uses: u64, inviter: Option<UserId>) -> InviteRecord {
        InviteRecord::new(code, uses, inviter)
    }

    #[tokio::test]
    async fn join_credits_first_advanced_inviter() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("a", 3, Some(U)), inv("b", 5, Some(V))]);

        let src = Queue::new(vec![Ok(vec![inv("a", 4, Some(U)), inv("b", 5, Some(V))])]);
        let out = g.member_joined(M, &src, TIMEOUT).await;

        assert_eq!(
            out,
            JoinOutcome::Credited {
                code: "a".into(),
                inviter_id: U,
                kind: JoinKind::First
            }
        );
        assert_eq!(g.counts().count(U), 1);
        assert_eq!(g.cache().record("a").unwrap().uses, 4);
        assert_eq!(g.history().lookup(M).unwrap().inviter_id, Some(U));
    }

    #[tokio::test]
    async fn fetch_failure_records_unattributed_and_keeps_cache() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("a", 3, Some(U))]);
        let before = g.cache().clone();

        let src = Queue::new(vec![Err(FetchError::Transport("boom".into()))]);
        let out = g.member_joined(M, &src, TIMEOUT).await;

        assert!(matches!(
            out,
            JoinOutcome::Unattributed {
                reason: UnattributedReason::FetchFailed(FetchError::Transport(_)),
                kind: JoinKind::First
            }
        ));
        assert_eq!(g.cache(), &before);
        assert_eq!(g.counts().count(U), 0);
        let e = g.history().lookup(M).unwrap();
        assert_eq!(e.inviter_id, None);
        assert!(!e.left);
    }

    #[tokio::test]
    async fn vanity_join_consumes_but_credits_nobody() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("vanity", 10, None)]);

        let src = Queue::new(vec![Ok(vec![inv("vanity", 11, None)])]);
        let out = g.member_joined(M, &src, TIMEOUT).await;

        assert_eq!(
            out,
            JoinOutcome::Unattributed {
                kind: JoinKind::First,
                reason: UnattributedReason::NoInviter {
                    code: "vanity".into()
                }
            }
        );
        assert_eq!(g.cache().record("vanity").unwrap().uses, 11);
        assert_eq!(g.counts().active_credits(), 0);
    }

    #[tokio::test]
    async fn unpopulated_cache_adopts_fresh_snapshot_without_credit() {
        let mut g = GuildReconciler::new(G);
        assert!(!g.cache().is_populated());

        let src = Queue::new(vec![Ok(vec![inv("a", 7, Some(U))])]);
        let out = g.member_joined(M, &src, TIMEOUT).await;

        assert_eq!(
            out,
            JoinOutcome::Unattributed {
                kind: JoinKind::First,
                reason: UnattributedReason::NoAdvance
            }
        );
        assert!(g.cache().is_populated());
        assert_eq!(g.cache().record("a").unwrap().uses, 7);
    }

    #[tokio::test]
    async fn duplicate_join_does_not_double_credit() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("a", 0, Some(U))]);

        let src = Queue::new(vec![
            Ok(vec![inv("a", 1, Some(U))]),
            Ok(vec![inv("a", 2, Some(U))]),
        ]);
        g.member_joined(M, &src, TIMEOUT).await;
        let second = g.member_joined(M, &src, TIMEOUT).await;

        assert_eq!(second.kind(), JoinKind::Duplicate);
        assert!(matches!(
            second,
            JoinOutcome::Unattributed {
                reason: UnattributedReason::AlreadyCredited { .. },
                ..
            }
        ));
        assert_eq!(g.counts().count(U), 1);
        assert_eq!(g.history().lookup(M).unwrap().rejoin_count, 0);
    }

    #[tokio::test]
    async fn duplicate_join_via_other_invite_keeps_credited_inviter() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("a", 0, Some(U)), inv("b", 0, Some(V))]);

        let src = Queue::new(vec![
            Ok(vec![inv("a", 1, Some(U)), inv("b", 0, Some(V))]),
            Ok(vec![inv("a", 1, Some(U)), inv("b", 1, Some(V))]),
        ]);
        let first = g.member_joined(M, &src, TIMEOUT).await;
        assert_eq!(first.credited_inviter(), Some(U));

        let second = g.member_joined(M, &src, TIMEOUT).await;
        assert_eq!(second.kind(), JoinKind::Duplicate);
        assert!(matches!(
            second,
            JoinOutcome::Unattributed {
                reason: UnattributedReason::AlreadyCredited { inviter_id, .. },
                ..
            } if inviter_id == V
        ));
        assert_eq!(g.history().lookup(M).unwrap().inviter_id, Some(U));
        assert_eq!(g.counts().active_inviter(M), Some(U));
        assert_eq!(g.counts().count(V), 0);

        assert_eq!(
            g.member_left(M),
            EventOutcome::Left {
                uncredited: Some(U),
                tracked: true
            }
        );
        assert_eq!(g.history().lookup(M).unwrap().inviter_id, Some(U));
        assert_eq!(g.counts().count(U), 0);
        assert_eq!(g.counts().count(V), 0);
    }

    #[tokio::test]
    async fn leave_releases_credit_and_rejoin_counts() {
        let mut g = GuildReconciler::new(G);
        g.replace_snapshot(vec![inv("a", 0, Some(U)), inv("b", 0, Some(V))]);

        let src = Queue::new(vec![
            Ok(vec![inv("a", 1, Some(U)), inv("b", 0, Some(V))]),
            Ok(vec![inv("a", 1, Some(U)), inv("b", 1, Some(V))]),
        ]);
        g.member_joined(M, &src, TIMEOUT).await;

        assert_eq!(
            g.member_left(M),
            EventOutcome::Left {
                uncredited: Some(U),
                tracked: true
            }
        );
        assert_eq!(g.counts().count(U), 0);

        let out = g.member_joined(M, &src, TIMEOUT).await;
        assert_eq!(out.kind(), JoinKind::Rejoin);
        assert_eq!(out.credited_inviter(), Some(V));

        let e = g.history().lookup(M).unwrap();
        assert_eq!(e.rejoin_count, 1);
        assert_eq!(e.inviter_id, Some(V));
        assert!(!e.left);
    }

    #[test]
    fn leave_for_unknown_member_changes_nothing() {
        let mut g = GuildReconciler::new(G);
        assert_eq!(
            g.member_left(M),
            EventOutcome::Left {
                uncredited: None,
                tracked: false
            }
        );
        assert!(g.history().is_empty());
    }

    #[tokio::test]
    async fn invite_events_maintain_cache_without_marking_populated() {
        let mut g = GuildReconciler::new(G);
        let src = Queue::new(vec![]);

        g.apply(
            GuildEvent::InviteCreated {
                guild_id: G,
                code: "x".into(),
                uses: 0,
                inviter_id: Some(U),
            },
            &src,
            TIMEOUT,
        )
        .await;
        assert_eq!(g.cache().record("x").unwrap().inviter_id, Some(U));
        assert!(!g.cache().is_populated());

        let out = g
            .apply(
                GuildEvent::InviteDeleted {
                    guild_id: G,
                    code: "nope".into(),
                },
                &src,
                TIMEOUT,
            )
            .await;
        assert_eq!(
            out,
            EventOutcome::InviteRemoved {
                code: "nope".into(),
                was_known: false
            }
        );
        assert_eq!(g.cache().len(), 1);
    }

    #[tokio::test]
    async fn refresh_permission_denied_leaves_cache_unpopulated() {
        let mut g = GuildReconciler::new(G);
        let src = Queue::new(vec![Err(FetchError::PermissionDenied("manage_guild".into()))]);

        let out = g.refresh(&src, TIMEOUT).await;
        assert_eq!(
            out,
            EventOutcome::SnapshotUnavailable(FetchError::PermissionDenied("manage_guild".into()))
        );
        assert!(!g.cache().is_populated());
    }
}
