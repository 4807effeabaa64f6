//! Snapshot source boundary.
//!
//! The engine never talks to the chat platform itself. Whatever owns the
//! session implements [`SnapshotSource`] and hands it to the engine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use invtrack_schemas::{GuildId, InviteRecord};

/// Why a snapshot fetch failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    /// The bot may not enumerate this guild's invites.
    PermissionDenied(String),
    /// Network / transport failure, including fetch timeouts.
    Transport(String),
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FetchError::PermissionDenied(msg) => write!(f, "permission denied: {msg}"),
            FetchError::Transport(msg) => write!(f, "transport error: {msg}"),
        }
    }
}

impl std::error::Error for FetchError {}

/// Fetches the full invite list of a guild.
///
/// Implementations must be `Send + Sync`: the engine calls them from many
/// guild tasks at once (never twice at once for the same guild).
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Short name for logs (e.g. `"gateway"`, `"scripted"`).
    fn name(&self) -> &'static str;

    /// Fetch every invite currently visible in `guild_id`.
    ///
    /// The order of the returned list matters: the usage diff attributes the
    /// first advanced code in this order.
    async fn fetch_invite_snapshot(&self, guild_id: GuildId)
        -> Result<Vec<InviteRecord>, FetchError>;
}

/// Fetch with an upper bound. An expired fetch is reported as
/// [`FetchError::Transport`].
pub(crate) async fn fetch_with_timeout(
    source: &dyn SnapshotSource,
    guild_id: GuildId,
    timeout: Duration,
) -> Result<Vec<InviteRecord>, FetchError> {
    match tokio::time::timeout(timeout, source.fetch_invite_snapshot(guild_id)).await {
        Ok(res) => res,
        Err(_) => Err(FetchError::Transport(format!(
            "invite fetch timed out after {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stalled;

    #[async_trait]
    impl SnapshotSource for Stalled {
        fn name(&self) -> &'static str {
            "stalled"
        }

        async fn fetch_invite_snapshot(
            &self,
            _guild_id: GuildId,
        ) -> Result<Vec<InviteRecord>, FetchError> {
            tokio::time::sleep(Duration::from_secs(3600)).await;
            Ok(Vec::new())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_transport_error() {
        let err = fetch_with_timeout(&Stalled, GuildId(1), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            FetchError::Transport("invite fetch timed out after 50ms".to_string())
        );
    }

    #[test]
    fn display_names_the_kind() {
        assert_eq!(
            FetchError::PermissionDenied("manage_guild".into()).to_string(),
            "permission denied: manage_guild"
        );
        assert_eq!(
            FetchError::Transport("reset".into()).to_string(),
            "transport error: reset"
        );
    }

    #[test]
    fn source_is_object_safe() {
        let _s: Box<dyn SnapshotSource> = Box::new(Stalled);
    }
}
