//! Core protocol types for Rejoin's wire format.
//!
//! Everything in this module travels between the server's session registry
//! and a client's session mirror. The registry is the only author of
//! roster and ownership state; the client only ever sends
//! [`SessionMessage::AuthRequest`] and [`SessionMessage::ClientReady`].

use std::fmt;

use rejoin_transport::ConnectionId;
use serde::{Deserialize, Serialize};

use crate::ProtocolError;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Dense per-player number assigned by the registry on first connect.
///
/// A slot survives reconnects: the same durable identity keeps the same
/// slot for as long as it stays registered. Slots are handed out from 1
/// upward and are never reissued until the registry resets, so
/// [`Slot::UNSET`] (0) can mark "no player".
///
/// `#[serde(transparent)]` keeps it a plain number on the wire.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Slot(pub u32);

impl Slot {
    /// The slot of the empty player. Never assigned to a live identity.
    pub const UNSET: Slot = Slot(0);

    /// The first slot a fresh registry hands out.
    pub const FIRST: Slot = Slot(1);

    /// Returns `true` for [`Slot::UNSET`].
    pub fn is_unset(self) -> bool {
        self == Self::UNSET
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}", self.0)
    }
}

/// Identifier of a networked object, as assigned by the replication system.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "O-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Connection states
// ---------------------------------------------------------------------------

/// Connection state of a player as seen by the registry and by observers.
///
/// ```text
/// Connected ──→ TemporarilyDisconnected ──→ Reconnected ──┐
///     │                 ▲                                  │
///     │                 └──────────────────────────────────┘
///     └──────────(session not started)──→ PermanentlyDisconnected
/// ```
///
/// `PermanentlyDisconnected` is terminal. The next connection with the same
/// stable id becomes a brand-new player with a new slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PlayerConnectionState {
    /// Connected for the first time in this session.
    Connected,
    /// Came back after a temporary disconnect, same slot as before.
    Reconnected,
    /// Gone for good. Owned objects have already been released.
    PermanentlyDisconnected,
    /// Dropped while a session was running; may reconnect with the same
    /// stable id.
    TemporarilyDisconnected,
}

impl PlayerConnectionState {
    /// `Connected` and `Reconnected` both mean "online now".
    pub fn is_online(self) -> bool {
        matches!(self, Self::Connected | Self::Reconnected)
    }
}

impl fmt::Display for PlayerConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Connected => "Connected",
            Self::Reconnected => "Reconnected",
            Self::PermanentlyDisconnected => "PermanentlyDisconnected",
            Self::TemporarilyDisconnected => "TemporarilyDisconnected",
        };
        f.write_str(name)
    }
}

/// Connection state of the local player, reported by the client mirror.
///
/// There is no temporary/permanent split here: a disconnected client cannot
/// see whether the server had a session running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocalPlayerConnectionState {
    /// Authenticated for the first time.
    Connected,
    /// Authenticated again under an identity the server still remembered.
    Reconnected,
    /// The transport connection to the server is gone.
    Disconnected,
}

// ---------------------------------------------------------------------------
// SessionMessage
// ---------------------------------------------------------------------------

/// Every message the session layer puts on the wire.
///
/// `#[serde(tag = "type")]` produces internally tagged JSON, e.g.
/// `{ "type": "AuthResult", "accepted": true }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SessionMessage {
    /// Client → Server: "this is who I claim to be."
    ///
    /// `stable_id` is whatever the client's identity provider produced
    /// (device id, account id, sign-in token). The server's authenticator
    /// turns it into the durable identity.
    AuthRequest { stable_id: String },

    /// Server → Client: outcome of the authentication request.
    AuthResult { accepted: bool },

    /// Server → Client(s): a player's connection state changed.
    PlayerConnectionChange {
        slot: Slot,
        connection: Option<ConnectionId>,
        state: PlayerConnectionState,
    },

    /// Server → Client(s): the full roster. Parallel arrays, one entry per
    /// registered player; `connections[i]` is `None` while player
    /// `slots[i]` is temporarily disconnected.
    RosterSnapshot {
        slots: Vec<Slot>,
        connections: Vec<Option<ConnectionId>>,
    },

    /// Server → owning Client only: "this slot is you."
    ///
    /// `reconnected` tells the client whether the server resumed an
    /// existing identity or created a new one.
    PlayerIdentityAssigned {
        slot: Slot,
        connection: ConnectionId,
        reconnected: bool,
    },

    /// Server → previous/next owner: the session-level owner of an object
    /// changed. `owner: None` means nobody owns it any more.
    ObjectOwnerChanged { object: ObjectId, owner: Option<Slot> },

    /// Client → Server: the client finished loading the state it needs and
    /// can take control of its objects again.
    ClientReady,
}

impl SessionMessage {
    /// Builds a [`SessionMessage::RosterSnapshot`] from `(slot, connection)`
    /// pairs, keeping the two arrays aligned.
    pub fn roster_snapshot<I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (Slot, Option<ConnectionId>)>,
    {
        let (slots, connections) = entries.into_iter().unzip();
        Self::RosterSnapshot { slots, connections }
    }
}

/// Zips the parallel arrays of a roster snapshot back into entries.
///
/// # Errors
/// [`ProtocolError::InvalidMessage`] if the arrays differ in length or a
/// slot is [`Slot::UNSET`].
pub fn roster_entries(
    slots: &[Slot],
    connections: &[Option<ConnectionId>],
) -> Result<Vec<(Slot, Option<ConnectionId>)>, ProtocolError> {
    if slots.len() != connections.len() {
        return Err(ProtocolError::InvalidMessage(format!(
            "roster snapshot has {} slots but {} connections",
            slots.len(),
            connections.len()
        )));
    }
    if slots.iter().any(|s| s.is_unset()) {
        return Err(ProtocolError::InvalidMessage(
            "roster snapshot contains an unset slot".into(),
        ));
    }
    Ok(slots.iter().copied().zip(connections.iter().copied()).collect())
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level frame. Every message on the wire is an `Envelope`.
///
/// `seq` is a per-sender counter; each side numbers its own frames so a gap
/// or reordering shows up in logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Auto-incrementing sequence number.
    pub seq: u64,
    /// The session message carried by this frame.
    pub message: SessionMessage,
}

// =========================================================================
// Tests
// =========================================================================
