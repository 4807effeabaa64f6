//! invtrack-schemas
//!
//! Shared vocabulary for the invite attribution workspace: identifiers, the
//! invite record observed in snapshots, the member history entry, and the typed
//! lifecycle events delivered by the push source.
//!
//! Plain data only. No IO, no locking, no policy.

use serde::{Deserialize, Serialize};
use std::fmt;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Community (guild) identity. The unit of isolation for all engine state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GuildId(pub u64);

impl GuildId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// User identity. Used both for members and for inviters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub u64);

impl UserId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Invite snapshot record
// ---------------------------------------------------------------------------

/// One invite as observed in a guild snapshot.
///
/// `inviter_id` is `None` for invites without an originating user
/// (vanity URL, widget).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InviteRecord {
    pub code: String,
    pub uses: u64,
    #[serde(default)]
    pub inviter_id: Option<UserId>,
}

impl InviteRecord {
    pub fn new(code: impl Into<String>, uses: u64, inviter_id: Option<UserId>) -> Self {
        Self {
            code: code.into(),
            uses,
            inviter_id,
        }
    }
}

// ---------------------------------------------------------------------------
// Member history
// ---------------------------------------------------------------------------

/// Lifecycle record for one (guild, member) pair that has been observed joining.
///
/// `rejoin_count` is cumulative: it only ever increments, and only on a
/// join that follows a recorded leave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberHistoryEntry {
    pub inviter_id: Option<UserId>,
    pub left: bool,
    pub rejoin_count: u32,
}

impl MemberHistoryEntry {
    pub fn joined(inviter_id: Option<UserId>) -> Self {
        Self {
            inviter_id,
            left: false,
            rejoin_count: 0,
        }
    }

    /// Reporting view of the entry.
    ///
    /// `Left` takes precedence over the rejoin count: a member who rejoined
    /// twice and then left again reports as `Left`.
    pub fn status(&self) -> MemberStatus {
        if self.left {
            MemberStatus::Left
        } else if self.rejoin_count > 0 {
            MemberStatus::Rejoined {
                times: self.rejoin_count,
            }
        } else {
            MemberStatus::Active
        }
    }
}

/// Status surfaced to reporting collaborators.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MemberStatus {
    Active,
    Left,
    Rejoined { times: u32 },
}

// ---------------------------------------------------------------------------
// Lifecycle events
// ---------------------------------------------------------------------------

/// Typed lifecycle events consumed by the engine's dispatch entry point.
///
/// The serde shape is internally tagged (`{"type": "member_joined", ...}`) so
/// that event scripts can be written as JSON lines.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GuildEvent {
    /// Guild became available with an already-fetched invite snapshot.
    GuildReady {
        guild_id: GuildId,
        snapshot: Vec<InviteRecord>,
    },
    /// Bot was added to a guild; the engine fetches the snapshot itself.
    GuildJoined { guild_id: GuildId },
    InviteCreated {
        guild_id: GuildId,
        code: String,
        #[serde(default)]
        uses: u64,
        #[serde(default)]
        inviter_id: Option<UserId>,
    },
    InviteDeleted { guild_id: GuildId, code: String },
    MemberJoined { guild_id: GuildId, member_id: UserId },
    MemberLeft { guild_id: GuildId, member_id: UserId },
}

impl GuildEvent {
    /// Guild this event is scoped to. Every event has exactly one.
    pub fn guild_id(&self) -> GuildId {
        match self {
            GuildEvent::GuildReady { guild_id, .. }
            | GuildEvent::GuildJoined { guild_id }
            | GuildEvent::InviteCreated { guild_id, .. }
            | GuildEvent::InviteDeleted { guild_id, .. }
            | GuildEvent::MemberJoined { guild_id, .. }
            | GuildEvent::MemberLeft { guild_id, .. } => *guild_id,
        }
    }

    /// Short stable name used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            GuildEvent::GuildReady { .. } => "guild_ready",
            GuildEvent::GuildJoined { .. } => "guild_joined",
            GuildEvent::InviteCreated { .. } => "invite_created",
            GuildEvent::InviteDeleted { .. } => "invite_deleted",
            GuildEvent::MemberJoined { .. } => "member_joined",
            GuildEvent::MemberLeft { .. } => "member_left",
        }
    }
}
