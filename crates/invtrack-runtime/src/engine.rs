//! Guild-keyed engine.
//!
//! One [`GuildReconciler`] per guild, each behind its own async mutex. The
//! mutex is the serialization boundary: a member join holds it across the
//! snapshot fetch, so two joins in the same guild can never diff against the
//! same cached baseline. Different guilds never contend.

use std::sync::Arc;

use dashmap::DashMap;
use futures_util::stream::{self, StreamExt};
use invtrack_config::EngineConfig;
use invtrack_ledger::positive_amount;
use invtrack_schemas::{GuildEvent, GuildId, MemberHistoryEntry, UserId};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::error::EngineError;
use crate::reconciler::{EventOutcome, GuildReconciler};
use crate::source::{FetchError, SnapshotSource};

type GuildSlot = Arc<Mutex<GuildReconciler>>;

/// Read-only view of one guild, for operators.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuildSummary {
    pub guild_id: GuildId,
    pub populated: bool,
    pub known_invites: usize,
    pub tracked_members: usize,
    pub active_credits: usize,
}

/// Result of [`InviteEngine::bootstrap`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BootstrapReport {
    /// Guilds whose snapshot was cached, with the number of invites.
    pub cached: Vec<(GuildId, usize)>,
    /// Guilds left unpopulated.
    pub failed: Vec<(GuildId, FetchError)>,
}

pub struct InviteEngine {
    guilds: DashMap<GuildId, GuildSlot>,
    source: Arc<dyn SnapshotSource>,
    config: EngineConfig,
}

impl InviteEngine {
    pub fn new(source: Arc<dyn SnapshotSource>, config: EngineConfig) -> Self {
        Self {
            guilds: DashMap::new(),
            source,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Guilds the engine holds state for, sorted.
    pub fn guild_ids(&self) -> Vec<GuildId> {
        let mut ids: Vec<GuildId> = self.guilds.iter().map(|e| *e.key()).collect();
        ids.sort();
        ids
    }

    // The shard guard from `entry`/`get` is dropped before returning, so no
    // map lock is ever held across an await.
    fn slot(&self, guild_id: GuildId) -> GuildSlot {
        self.guilds
            .entry(guild_id)
            .or_insert_with(|| Arc::new(Mutex::new(GuildReconciler::new(guild_id))))
            .value()
            .clone()
    }

    fn existing_slot(&self, guild_id: GuildId) -> Option<GuildSlot> {
        self.guilds.get(&guild_id).map(|e| e.value().clone())
    }

    // -----------------------------------------------------------------------
    // Event entry point
    // -----------------------------------------------------------------------

    /// Apply one lifecycle event under its guild's lock.
    pub async fn handle(&self, event: GuildEvent) -> EventOutcome {
        let slot = self.slot(event.guild_id());
        let mut guild = slot.lock().await;
        guild
            .apply(event, self.source.as_ref(), self.config.fetch_timeout())
            .await
    }

    /// Fetch and cache snapshots for every guild, at most
    /// `engine.bootstrap_concurrency` fetches in flight.
    ///
    /// Failures (including missing permissions) leave that guild unpopulated
    /// and do not stop the others.
    pub async fn bootstrap(&self, guild_ids: impl IntoIterator<Item = GuildId>) -> BootstrapReport {
        let concurrency = self.config.engine.bootstrap_concurrency.max(1);
        let mut results: Vec<(GuildId, EventOutcome)> = stream::iter(guild_ids)
            .map(|guild_id| async move {
                let outcome = self.handle(GuildEvent::GuildJoined { guild_id }).await;
                (guild_id, outcome)
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;
        results.sort_by_key(|(g, _)| *g);

        let mut report = BootstrapReport::default();
        for (guild_id, outcome) in results {
            match outcome {
                EventOutcome::SnapshotReplaced { invites } => report.cached.push((guild_id, invites)),
                EventOutcome::SnapshotUnavailable(e) => report.failed.push((guild_id, e)),
                other => warn!(guild_id = %guild_id, outcome = ?other, "unexpected bootstrap outcome"),
            }
        }

        info!(
            source = self.source.name(),
            cached = report.cached.len(),
            failed = report.failed.len(),
            "bootstrap complete"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Current count for `user_id`; 0 when never seen.
    pub async fn get_invite_count(&self, guild_id: GuildId, user_id: UserId) -> u64 {
        match self.existing_slot(guild_id) {
            Some(slot) => slot.lock().await.counts().count(user_id),
            None => 0,
        }
    }

    pub async fn get_inviter_info(
        &self,
        guild_id: GuildId,
        member_id: UserId,
    ) -> Option<MemberHistoryEntry> {
        let slot = self.existing_slot(guild_id)?;
        let guild = slot.lock().await;
        guild.history().lookup(member_id).cloned()
    }

    pub async fn guild_summary(&self, guild_id: GuildId) -> GuildSummary {
        let Some(slot) = self.existing_slot(guild_id) else {
            return GuildSummary {
                guild_id,
                populated: false,
                known_invites: 0,
                tracked_members: 0,
                active_credits: 0,
            };
        };
        let guild = slot.lock().await;
        GuildSummary {
            guild_id,
            populated: guild.cache().is_populated(),
            known_invites: guild.cache().len(),
            tracked_members: guild.history().len(),
            active_credits: guild.counts().active_credits(),
        }
    }

    // -----------------------------------------------------------------------
    // Administrative adjustments
    // -----------------------------------------------------------------------

    /// Set `user_id`'s count to 0. Active credits stay in place, so later
    /// leaves of members they invited clamp at 0.
    pub async fn reset_invites(&self, guild_id: GuildId, user_id: UserId) {
        let slot = self.slot(guild_id);
        slot.lock().await.counts_mut().reset(user_id);
        info!(guild_id = %guild_id, inviter_id = %user_id, "invite count reset");
    }

    /// Add `amount` (> 0) to `user_id`'s count. Returns the new count.
    pub async fn add_invites(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        amount: i64,
    ) -> Result<u64, EngineError> {
        let amount = positive_amount(amount)?;
        let slot = self.slot(guild_id);
        let total = slot.lock().await.counts_mut().adjust(user_id, amount);
        info!(guild_id = %guild_id, inviter_id = %user_id, amount, total, "invites added");
        Ok(total)
    }

    /// Subtract `amount` (> 0) from `user_id`'s count, clamped at 0. Returns
    /// the new count.
    pub async fn remove_invites(
        &self,
        guild_id: GuildId,
        user_id: UserId,
        amount: i64,
    ) -> Result<u64, EngineError> {
        let amount = positive_amount(amount)?;
        let slot = self.slot(guild_id);
        let total = slot.lock().await.counts_mut().adjust(user_id, -amount);
        info!(guild_id = %guild_id, inviter_id = %user_id, amount, total, "invites removed");
        Ok(total)
    }
}
