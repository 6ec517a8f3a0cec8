//! Observer notifications.
//!
//! Each category of event gets its own `tokio::sync::broadcast` channel.
//! Any number of subscribers can listen; a subscriber that falls behind
//! sees `RecvError::Lagged` instead of slowing the registry down, and
//! emitting with nobody subscribed is not an error.

use rejoin_protocol::{
    ConnectionId, LocalPlayerConnectionState, ObjectId, PlayerConnectionState, Slot,
};
use tokio::sync::broadcast;

/// Buffered events per channel before slow subscribers start lagging.
pub const EVENT_CHANNEL_CAPACITY: usize = 64;

/// A player's connection state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerConnectionEvent {
    pub slot: Slot,
    /// The player's connection after the change. `None` once disconnected.
    pub connection: Option<ConnectionId>,
    pub state: PlayerConnectionState,
}

/// The local (client-side) player's connection state changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalPlayerEvent {
    pub slot: Slot,
    pub connection: Option<ConnectionId>,
    pub state: LocalPlayerConnectionState,
}

/// The session-level owner of an object changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OwnershipEvent {
    pub object: ObjectId,
    pub previous: Option<Slot>,
    pub next: Option<Slot>,
}

/// A player object was spawned for a player, together with its children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSpawnedEvent {
    pub slot: Slot,
    pub object: ObjectId,
    pub children: Vec<ObjectId>,
}

/// Session lifecycle transitions. Fired once per actual transition;
/// repeated `start_session` / `end_session` calls stay silent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    Started,
    Ended,
}

/// A single broadcast channel. Keeps the sender and hands out receivers.
#[derive(Debug)]
pub(crate) struct EventChannel<T> {
    tx: broadcast::Sender<T>,
}

impl<T: Clone> EventChannel<T> {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<T> {
        self.tx.subscribe()
    }

    /// Sends to every current subscriber. With none, the event is dropped.
    pub(crate) fn emit(&self, event: T) {
        let _ = self.tx.send(event);
    }
}
