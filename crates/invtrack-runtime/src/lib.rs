//! invtrack-runtime
//!
//! The invite attribution engine: per-guild state behind per-guild locks,
//! driven by typed lifecycle events.
//!
//! - [`SnapshotSource`] is the collaborator that fetches a guild's invites.
//! - [`GuildReconciler`] owns one guild's cache and ledgers and applies events
//!   to them. It is only reachable through its guild's lock.
//! - [`InviteEngine`] is the guild-keyed store plus the exposed query and
//!   admin API.
//! - [`EventDispatcher`] fans a push stream out to one ordered queue per
//!   guild, so guilds progress in parallel while each guild sees its events
//!   strictly in delivery order.

mod dispatch;
mod engine;
mod error;
mod reconciler;
mod source;

pub use dispatch::{DispatchError, Dispatched, EventDispatcher};
pub use engine::{BootstrapReport, GuildSummary, InviteEngine};
pub use error::EngineError;
pub use reconciler::{EventOutcome, GuildReconciler, JoinOutcome, UnattributedReason};
pub use source::{FetchError, SnapshotSource};
