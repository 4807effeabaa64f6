//! invtrack-testkit
//!
//! Deterministic collaborators and a replay harness for exercising the engine
//! without a chat platform.
//!
//! - [`ScriptedSnapshotSource`] plays the platform: it holds each guild's live
//!   invite list, bumps counters when a scripted member walks in, and can be
//!   told to deny or fail fetches.
//! - [`ReplayStep`] is one line of a JSONL replay script; [`run_replay`] feeds a
//!   script through a fresh engine and returns a [`ReplayReport`].

mod replay;
mod scripted_source;

pub use replay::{
    load_replay_script, parse_replay_script, run_replay, GuildReport, InviterLine, MemberLine,
    ReplayReport, ReplayStep,
};
pub use scripted_source::{ScriptedFailure, ScriptedSnapshotSource};
