//! JSONL replay scripts.
//!
//! One [`ReplayStep`] per line, internally tagged by `"step"`. Blank lines and
//! lines starting with `#` are skipped. Steps that model the platform (a
//! member walking in, an invite being created) update the scripted source
//! first and then deliver the matching event, so scripts read like a
//! timeline:
//!
//! ```text
//! {"step":"invites","guild_id":1,"invites":[{"code":"a","uses":0,"inviter_id":10}]}
//! {"step":"ready","guild_id":1}
//! {"step":"join","guild_id":1,"member_id":100,"via":"a"}
//! {"step":"leave","guild_id":1,"member_id":100}
//! ```
//!
//! Steps are applied one at a time, in file order, through
//! [`InviteEngine::handle`], so a replay is fully deterministic.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use invtrack_config::EngineConfig;
use invtrack_runtime::{EventOutcome, GuildSummary, InviteEngine, JoinOutcome};
use invtrack_schemas::{GuildEvent, GuildId, InviteRecord, MemberStatus, UserId};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::scripted_source::{ScriptedFailure, ScriptedSnapshotSource};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ReplayStep {
    /// Set the platform's live invite list. The engine is not told.
    Invites {
        guild_id: GuildId,
        invites: Vec<InviteRecord>,
    },
    /// Deliver `guild_ready` carrying the current live list.
    Ready { guild_id: GuildId },
    /// Startup bootstrap over the listed guilds.
    Bootstrap { guild_ids: Vec<GuildId> },
    /// Platform creates an invite; deliver `invite_created`.
    CreateInvite {
        guild_id: GuildId,
        code: String,
        #[serde(default)]
        inviter_id: Option<UserId>,
    },
    /// Platform deletes an invite; deliver `invite_deleted`.
    DeleteInvite { guild_id: GuildId, code: String },
    /// Member walks in (through `via`, if given); deliver `member_joined`.
    Join {
        guild_id: GuildId,
        member_id: UserId,
        #[serde(default)]
        via: Option<String>,
    },
    Leave { guild_id: GuildId, member_id: UserId },
    /// Every later fetch of this guild is denied until `allow`.
    Deny { guild_id: GuildId },
    Allow { guild_id: GuildId },
    /// Fail only the next fetch of this guild.
    FailNext {
        guild_id: GuildId,
        failure: ScriptedFailure,
    },
    /// Deliver a raw event without touching the platform.
    Event { event: GuildEvent },
    Add {
        guild_id: GuildId,
        user_id: UserId,
        amount: i64,
    },
    Remove {
        guild_id: GuildId,
        user_id: UserId,
        amount: i64,
    },
    Reset { guild_id: GuildId, user_id: UserId },
}

pub fn parse_replay_script(raw: &str) -> Result<Vec<ReplayStep>> {
    let mut steps = Vec::new();
    for (idx, line) in raw.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let step: ReplayStep = serde_json::from_str(line)
            .with_context(|| format!("replay script line {}: invalid step", idx + 1))?;
        steps.push(step);
    }
    Ok(steps)
}

pub fn load_replay_script(path: impl AsRef<Path>) -> Result<Vec<ReplayStep>> {
    let path = path.as_ref();
    let raw = fs::read_to_string(path)
        .with_context(|| format!("read replay script: {}", path.display()))?;
    parse_replay_script(&raw)
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct InviterLine {
    pub user_id: UserId,
    pub count: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MemberLine {
    pub member_id: UserId,
    pub inviter_id: Option<UserId>,
    pub left: bool,
    pub rejoin_count: u32,
    #[serde(flatten)]
    pub status: MemberStatus,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct GuildReport {
    #[serde(flatten)]
    pub summary: GuildSummary,
    pub inviters: Vec<InviterLine>,
    pub members: Vec<MemberLine>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ReplayReport {
    pub steps: usize,
    pub joins_credited: usize,
    pub joins_unattributed: usize,
    pub fetch_failures: usize,
    pub rejected_adjustments: usize,
    pub guilds: Vec<GuildReport>,
}

impl ReplayReport {
    pub fn guild(&self, guild_id: GuildId) -> Option<&GuildReport> {
        self.guilds.iter().find(|g| g.summary.guild_id == guild_id)
    }

    pub fn count(&self, guild_id: GuildId, user_id: UserId) -> u64 {
        self.guild(guild_id)
            .and_then(|g| g.inviters.iter().find(|l| l.user_id == user_id))
            .map(|l| l.count)
            .unwrap_or(0)
    }

    pub fn member(&self, guild_id: GuildId, member_id: UserId) -> Option<&MemberLine> {
        self.guild(guild_id)
            .and_then(|g| g.members.iter().find(|m| m.member_id == member_id))
    }
}

// ---------------------------------------------------------------------------
// Runner
// ---------------------------------------------------------------------------

/// Users the script mentioned, per guild, so the report can enumerate them.
#[derive(Default)]
struct Seen {
    inviters: BTreeMap<GuildId, BTreeSet<UserId>>,
    members: BTreeMap<GuildId, BTreeSet<UserId>>,
}

impl Seen {
    fn inviter(&mut self, guild_id: GuildId, user_id: Option<UserId>) {
        if let Some(u) = user_id {
            self.inviters.entry(guild_id).or_default().insert(u);
        }
    }

    fn invites(&mut self, guild_id: GuildId, invites: &[InviteRecord]) {
        for inv in invites {
            self.inviter(guild_id, inv.inviter_id);
        }
    }

    fn member(&mut self, guild_id: GuildId, member_id: UserId) {
        self.members.entry(guild_id).or_default().insert(member_id);
    }

    fn event(&mut self, event: &GuildEvent) {
        match event {
            GuildEvent::GuildReady { guild_id, snapshot } => self.invites(*guild_id, snapshot),
            GuildEvent::InviteCreated {
                guild_id,
                inviter_id,
                ..
            } => self.inviter(*guild_id, *inviter_id),
            GuildEvent::MemberJoined {
                guild_id,
                member_id,
            }
            | GuildEvent::MemberLeft {
                guild_id,
                member_id,
            } => self.member(*guild_id, *member_id),
            GuildEvent::GuildJoined { .. } | GuildEvent::InviteDeleted { .. } => {}
        }
    }
}

fn tally(report: &mut ReplayReport, outcome: &EventOutcome) {
    match outcome {
        EventOutcome::Joined(JoinOutcome::Credited { .. }) => report.joins_credited += 1,
        EventOutcome::Joined(JoinOutcome::Unattributed { reason, .. }) => {
            report.joins_unattributed += 1;
            if matches!(reason, invtrack_runtime::UnattributedReason::FetchFailed(_)) {
                report.fetch_failures += 1;
            }
        }
        EventOutcome::SnapshotUnavailable(_) => report.fetch_failures += 1,
        _ => {}
    }
}

/// Run `steps` against a fresh engine over a fresh [`ScriptedSnapshotSource`].
pub async fn run_replay(steps: &[ReplayStep], config: EngineConfig) -> Result<ReplayReport> {
    config.validate().context("replay config")?;
    let source = Arc::new(ScriptedSnapshotSource::new());
    let engine = InviteEngine::new(source.clone(), config);
    let mut seen = Seen::default();
    let mut report = ReplayReport::default();

    for step in steps {
        report.steps += 1;
        match step.clone() {
            ReplayStep::Invites { guild_id, invites } => {
                seen.invites(guild_id, &invites);
                source.set_invites(guild_id, invites);
            }
            ReplayStep::Ready { guild_id } => {
                let snapshot = source.live_invites(guild_id);
                seen.invites(guild_id, &snapshot);
                let out = engine
                    .handle(GuildEvent::GuildReady { guild_id, snapshot })
                    .await;
                tally(&mut report, &out);
            }
            ReplayStep::Bootstrap { guild_ids } => {
                for g in &guild_ids {
                    seen.invites(*g, &source.live_invites(*g));
                }
                let boot = engine.bootstrap(guild_ids).await;
                report.fetch_failures += boot.failed.len();
            }
            ReplayStep::CreateInvite {
                guild_id,
                code,
                inviter_id,
            } => {
                let rec = source.create_invite(guild_id, &code, inviter_id);
                seen.inviter(guild_id, inviter_id);
                engine
                    .handle(GuildEvent::InviteCreated {
                        guild_id,
                        code: rec.code,
                        uses: rec.uses,
                        inviter_id: rec.inviter_id,
                    })
                    .await;
            }
            ReplayStep::DeleteInvite { guild_id, code } => {
                source.delete_invite(guild_id, &code);
                engine
                    .handle(GuildEvent::InviteDeleted { guild_id, code })
                    .await;
            }
            ReplayStep::Join {
                guild_id,
                member_id,
                via,
            } => {
                if let Some(code) = via.as_deref() {
                    if !source.consume(guild_id, code) {
                        warn!(guild_id = %guild_id, code, "replay: join via unknown invite");
                    }
                }
                seen.member(guild_id, member_id);
                let out = engine
                    .handle(GuildEvent::MemberJoined {
                        guild_id,
                        member_id,
                    })
                    .await;
                tally(&mut report, &out);
            }
            ReplayStep::Leave {
                guild_id,
                member_id,
            } => {
                seen.member(guild_id, member_id);
                engine
                    .handle(GuildEvent::MemberLeft {
                        guild_id,
                        member_id,
                    })
                    .await;
            }
            ReplayStep::Deny { guild_id } => source.set_denied(guild_id, true),
            ReplayStep::Allow { guild_id } => source.set_denied(guild_id, false),
            ReplayStep::FailNext { guild_id, failure } => source.fail_next(guild_id, failure),
            ReplayStep::Event { event } => {
                seen.event(&event);
                let out = engine.handle(event).await;
                tally(&mut report, &out);
            }
            ReplayStep::Add {
                guild_id,
                user_id,
                amount,
            } => {
                seen.inviter(guild_id, Some(user_id));
                if let Err(e) = engine.add_invites(guild_id, user_id, amount).await {
                    warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "replay: add rejected");
                    report.rejected_adjustments += 1;
                }
            }
            ReplayStep::Remove {
                guild_id,
                user_id,
                amount,
            } => {
                seen.inviter(guild_id, Some(user_id));
                if let Err(e) = engine.remove_invites(guild_id, user_id, amount).await {
                    warn!(guild_id = %guild_id, user_id = %user_id, error = %e, "replay: remove rejected");
                    report.rejected_adjustments += 1;
                }
            }
            ReplayStep::Reset { guild_id, user_id } => {
                seen.inviter(guild_id, Some(user_id));
                engine.reset_invites(guild_id, user_id).await;
            }
        }
    }

    for guild_id in engine.guild_ids() {
        let summary = engine.guild_summary(guild_id).await;

        let mut inviters = Vec::new();
        for user_id in seen.inviters.get(&guild_id).into_iter().flatten() {
            inviters.push(InviterLine {
                user_id: *user_id,
                count: engine.get_invite_count(guild_id, *user_id).await,
            });
        }

        let mut members = Vec::new();
        for member_id in seen.members.get(&guild_id).into_iter().flatten() {
            if let Some(entry) = engine.get_inviter_info(guild_id, *member_id).await {
                members.push(MemberLine {
                    member_id: *member_id,
                    inviter_id: entry.inviter_id,
                    left: entry.left,
                    rejoin_count: entry.rejoin_count,
                    status: entry.status(),
                });
            }
        }

        report.guilds.push(GuildReport {
            summary,
            inviters,
            members,
        });
    }

    info!(
        steps = report.steps,
        guilds = report.guilds.len(),
        credited = report.joins_credited,
        unattributed = report.joins_unattributed,
        "replay finished"
    );
    Ok(report)
}
