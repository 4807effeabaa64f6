//! Push-event dispatcher.
//!
//! Every guild gets a bounded queue and one worker task draining it into the
//! engine. Delivery order is preserved per guild; guilds run in parallel.
//! Outcomes are published on a broadcast bus for whoever wants to watch
//! (tests, the CLI replay report). Lagging subscribers miss outcomes, the
//! engine never waits on them.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use dashmap::DashMap;
use futures_util::FutureExt;
use invtrack_schemas::{GuildEvent, GuildId};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_stream::{Stream, StreamExt};
use tracing::{debug, error, warn};

use crate::engine::InviteEngine;
use crate::reconciler::EventOutcome;

const OUTCOME_BUS_CAPACITY: usize = 1024;

/// One processed event, as published on the outcome bus.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dispatched {
    pub guild_id: GuildId,
    /// Sequence number of the event within its guild, starting at 0.
    pub seq: u64,
    pub kind: &'static str,
    pub outcome: EventOutcome,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    /// The guild's worker exited and its replacement refused the event too;
    /// the event was not applied.
    WorkerGone { guild_id: GuildId },
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::WorkerGone { guild_id } => {
                write!(f, "worker for guild {guild_id} is gone; event dropped")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

struct GuildQueue {
    tx: mpsc::Sender<GuildEvent>,
    worker: JoinHandle<()>,
}

pub struct EventDispatcher {
    engine: Arc<InviteEngine>,
    queues: DashMap<GuildId, GuildQueue>,
    capacity: usize,
    bus: broadcast::Sender<Dispatched>,
}

impl EventDispatcher {
    /// Queue capacity comes from `dispatch.queue_capacity` in the engine's
    /// config. Must be called inside a tokio runtime.
    pub fn new(engine: Arc<InviteEngine>) -> Self {
        let capacity = engine.config().dispatch.queue_capacity.max(1);
        let (bus, _) = broadcast::channel(OUTCOME_BUS_CAPACITY);
        Self {
            engine,
            queues: DashMap::new(),
            capacity,
            bus,
        }
    }

    pub fn engine(&self) -> &Arc<InviteEngine> {
        &self.engine
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Dispatched> {
        self.bus.subscribe()
    }

    fn spawn_queue(&self, guild_id: GuildId) -> GuildQueue {
        let (tx, rx) = mpsc::channel(self.capacity);
        let worker = tokio::spawn(guild_worker(
            guild_id,
            Arc::clone(&self.engine),
            rx,
            self.bus.clone(),
        ));
        debug!(guild_id = %guild_id, "guild worker started");
        GuildQueue { tx, worker }
    }

    /// Sender for the guild's queue. A worker that has exited is replaced;
    /// events still sitting in its queue are lost, later ones are applied.
    fn sender_for(&self, guild_id: GuildId) -> mpsc::Sender<GuildEvent> {
        let mut q = self
            .queues
            .entry(guild_id)
            .or_insert_with(|| self.spawn_queue(guild_id));
        if q.tx.is_closed() || q.worker.is_finished() {
            warn!(guild_id = %guild_id, "guild worker gone; starting a new one");
            *q = self.spawn_queue(guild_id);
        }
        q.tx.clone()
    }

    /// Enqueue one event on its guild's queue. Waits while that queue is
    /// full; other guilds are unaffected.
    pub async fn dispatch(&self, event: GuildEvent) -> Result<(), DispatchError> {
        let guild_id = event.guild_id();
        let tx = self.sender_for(guild_id);
        match tx.send(event).await {
            Ok(()) => Ok(()),
            // The worker died while we waited; retry once on a fresh one.
            Err(mpsc::error::SendError(event)) => self
                .sender_for(guild_id)
                .send(event)
                .await
                .map_err(|_| DispatchError::WorkerGone { guild_id }),
        }
    }

    /// Dispatch every event of `events` in order. Returns how many were
    /// enqueued.
    pub async fn drive<S>(&self, events: S) -> Result<usize, DispatchError>
    where
        S: Stream<Item = GuildEvent>,
    {
        tokio::pin!(events);
        let mut n = 0usize;
        while let Some(event) = events.next().await {
            self.dispatch(event).await?;
            n += 1;
        }
        Ok(n)
    }

    /// Close every queue and wait until all queued events are applied.
    pub async fn shutdown(self) {
        let workers: Vec<(GuildId, JoinHandle<()>)> = self
            .queues
            .into_iter()
            .map(|(guild_id, q)| {
                drop(q.tx);
                (guild_id, q.worker)
            })
            .collect();

        for (guild_id, worker) in workers {
            if let Err(e) = worker.await {
                warn!(guild_id = %guild_id, error = %e, "guild worker ended abnormally");
            }
        }
    }
}

async fn guild_worker(
    guild_id: GuildId,
    engine: Arc<InviteEngine>,
    mut rx: mpsc::Receiver<GuildEvent>,
    bus: broadcast::Sender<Dispatched>,
) {
    let mut seq = 0u64;
    while let Some(event) = rx.recv().await {
        let kind = event.kind();
        let outcome = match AssertUnwindSafe(engine.handle(event)).catch_unwind().await {
            Ok(outcome) => outcome,
            Err(_) => {
                error!(guild_id = %guild_id, seq, kind, "event handler panicked; event dropped");
                seq += 1;
                continue;
            }
        };
        debug!(guild_id = %guild_id, seq, kind, outcome = ?outcome, "event applied");
        // No subscribers is fine.
        let _ = bus.send(Dispatched {
            guild_id,
            seq,
            kind,
            outcome,
        });
        seq += 1;
    }
    debug!(guild_id = %guild_id, processed = seq, "guild worker stopped");
}
