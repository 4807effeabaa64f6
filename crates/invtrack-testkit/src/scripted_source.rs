//! Deterministic stand-in for the chat platform's invite listing.
//!
//! No randomness, no network I/O. Fetch order of a guild's invites is the
//! order they were added, which is the order the usage diff walks.

use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use invtrack_runtime::{FetchError, SnapshotSource};
use invtrack_schemas::{GuildId, InviteRecord, UserId};
use serde::{Deserialize, Serialize};

/// Failure to inject into the next fetch of a guild.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptedFailure {
    PermissionDenied,
    Transport,
}

impl ScriptedFailure {
    fn to_fetch_error(self, guild_id: GuildId) -> FetchError {
        match self {
            ScriptedFailure::PermissionDenied => {
                FetchError::PermissionDenied(format!("scripted: guild {guild_id} denies invite listing"))
            }
            ScriptedFailure::Transport => {
                FetchError::Transport(format!("scripted: transport failure for guild {guild_id}"))
            }
        }
    }
}

#[derive(Debug, Default)]
struct GuildScript {
    invites: Vec<InviteRecord>,
    denied: bool,
    pending_failures: Vec<ScriptedFailure>,
    fetches: u64,
}

#[derive(Debug, Default)]
pub struct ScriptedSnapshotSource {
    guilds: DashMap<GuildId, GuildScript>,
    delay: Option<Duration>,
}

impl ScriptedSnapshotSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every fetch sleeps this long before answering.
    pub fn with_delay(delay: Duration) -> Self {
        Self {
            guilds: DashMap::new(),
            delay: Some(delay),
        }
    }

    /// Replace the live invite list of `guild_id`.
    pub fn set_invites(&self, guild_id: GuildId, invites: Vec<InviteRecord>) {
        self.guilds.entry(guild_id).or_default().invites = invites;
    }

    /// Add (or overwrite) one live invite, returning the record an
    /// invite-created event would carry.
    pub fn create_invite(
        &self,
        guild_id: GuildId,
        code: &str,
        inviter_id: Option<UserId>,
    ) -> InviteRecord {
        let record = InviteRecord::new(code, 0, inviter_id);
        let mut g = self.guilds.entry(guild_id).or_default();
        match g.invites.iter_mut().find(|i| i.code == code) {
            Some(existing) => *existing = record.clone(),
            None => g.invites.push(record.clone()),
        }
        record
    }

    /// Remove one live invite. Returns whether it existed.
    pub fn delete_invite(&self, guild_id: GuildId, code: &str) -> bool {
        let Some(mut g) = self.guilds.get_mut(&guild_id) else {
            return false;
        };
        let before = g.invites.len();
        g.invites.retain(|i| i.code != code);
        g.invites.len() != before
    }

    /// A member walks in through `code`: bump its counter. Returns `false`
    /// when the code is not live.
    pub fn consume(&self, guild_id: GuildId, code: &str) -> bool {
        let Some(mut g) = self.guilds.get_mut(&guild_id) else {
            return false;
        };
        match g.invites.iter_mut().find(|i| i.code == code) {
            Some(inv) => {
                inv.uses = inv.uses.saturating_add(1);
                true
            }
            None => false,
        }
    }

    /// Deny (or re-allow) invite listing for `guild_id` on every fetch.
    pub fn set_denied(&self, guild_id: GuildId, denied: bool) {
        self.guilds.entry(guild_id).or_default().denied = denied;
    }

    /// Fail the next fetch of `guild_id` once. Queued failures fire in order.
    pub fn fail_next(&self, guild_id: GuildId, failure: ScriptedFailure) {
        self.guilds
            .entry(guild_id)
            .or_default()
            .pending_failures
            .push(failure);
    }

    /// Current live list, as the next fetch would return it (ignoring
    /// failures).
    pub fn live_invites(&self, guild_id: GuildId) -> Vec<InviteRecord> {
        self.guilds
            .get(&guild_id)
            .map(|g| g.invites.clone())
            .unwrap_or_default()
    }

    pub fn fetch_count(&self, guild_id: GuildId) -> u64 {
        self.guilds.get(&guild_id).map(|g| g.fetches).unwrap_or(0)
    }

    fn answer(&self, guild_id: GuildId) -> Result<Vec<InviteRecord>, FetchError> {
        let mut g = self.guilds.entry(guild_id).or_default();
        g.fetches += 1;
        if !g.pending_failures.is_empty() {
            let failure = g.pending_failures.remove(0);
            return Err(failure.to_fetch_error(guild_id));
        }
        if g.denied {
            return Err(ScriptedFailure::PermissionDenied.to_fetch_error(guild_id));
        }
        Ok(g.invites.clone())
    }
}

#[async_trait]
impl SnapshotSource for ScriptedSnapshotSource {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn fetch_invite_snapshot(
        &self,
        guild_id: GuildId,
    ) -> Result<Vec<InviteRecord>, FetchError> {
        if let Some(d) = self.delay {
            tokio::time::sleep(d).await;
        }
        self.answer(guild_id)
    }
}
