//! The durable identity record.
//!
//! A [`SessionPlayer`] binds three things together:
//! - WHO the player is (`stable_id`, supplied by the identity provider)
//! - WHERE the player is right now (`connection`, or `None` while away)
//! - WHAT the player owns (`owned_objects`)
//!
//! The `slot` is the glue: it is assigned once, survives reconnects, and is
//! what objects store instead of a reference to their owner.

use std::collections::BTreeSet;

use rejoin_protocol::{ConnectionId, ObjectId, Slot};

/// The empty player handed out by lookups that miss.
///
/// Keeping one shared instance lets every roster query return
/// `&SessionPlayer` instead of `Option<&SessionPlayer>`, so callers never
/// have to unwrap a player that vanished between two calls.
pub(crate) static EMPTY_PLAYER: SessionPlayer = SessionPlayer::empty();

/// A player known to the session layer.
///
/// ## Equality
///
/// Two players are equal when they share a slot and neither is empty. An
/// empty player is not even equal to itself, so `a == b` can never be true
/// because two lookups both missed. That is also why there is no `Eq` or
/// `Hash`.
#[derive(Debug, Clone)]
pub struct SessionPlayer {
    stable_id: Option<String>,
    slot: Slot,
    connection: Option<ConnectionId>,
    owned_objects: BTreeSet<ObjectId>,
    first_connection: bool,
}

impl SessionPlayer {
    /// A player with no slot, no identity, and no connection.
    pub const fn empty() -> Self {
        Self {
            stable_id: None,
            slot: Slot::UNSET,
            connection: None,
            owned_objects: BTreeSet::new(),
            first_connection: true,
        }
    }

    /// A freshly registered player on its first connection.
    pub(crate) fn new(stable_id: String, slot: Slot, connection: ConnectionId) -> Self {
        Self {
            stable_id: Some(stable_id),
            slot,
            connection: Some(connection),
            owned_objects: BTreeSet::new(),
            first_connection: true,
        }
    }

    /// A player the client only knows from roster messages. Clients never
    /// learn each other's stable ids.
    pub(crate) fn remote(slot: Slot, connection: Option<ConnectionId>) -> Self {
        Self {
            stable_id: None,
            slot,
            connection,
            owned_objects: BTreeSet::new(),
            first_connection: true,
        }
    }

    // -- Queries ----------------------------------------------------------

    /// The durable identity, if this side of the wire knows it.
    pub fn stable_id(&self) -> Option<&str> {
        self.stable_id.as_deref()
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// The live connection, or `None` while the player is disconnected.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.connection
    }

    /// Objects currently attached to this player, in id order.
    pub fn owned_objects(&self) -> &BTreeSet<ObjectId> {
        &self.owned_objects
    }

    /// `true` until the player reconnects for the first time.
    pub fn first_connection(&self) -> bool {
        self.first_connection
    }

    /// `false` for the empty player.
    pub fn is_valid(&self) -> bool {
        !self.slot.is_unset()
    }

    pub fn is_connected(&self) -> bool {
        self.is_valid() && self.connection.is_some()
    }

    // -- Mutations --------------------------------------------------------

    /// Attaches an object. Does nothing on the empty player.
    pub(crate) fn add_object(&mut self, object: ObjectId) {
        if self.is_valid() {
            self.owned_objects.insert(object);
        }
    }

    /// Detaches an object. On the empty player this clears the set instead,
    /// so it can never accumulate stray ids.
    pub(crate) fn remove_object(&mut self, object: ObjectId) {
        if self.is_valid() {
            self.owned_objects.remove(&object);
        } else {
            self.owned_objects.clear();
        }
    }

    pub(crate) fn set_connection(&mut self, connection: Option<ConnectionId>) {
        self.connection = connection;
    }

    /// Rebinds a returning player to its new connection.
    pub(crate) fn reconnect(&mut self, connection: ConnectionId) {
        self.connection = Some(connection);
        self.first_connection = false;
    }

    pub(crate) fn set_first_connection(&mut self, first: bool) {
        self.first_connection = first;
    }

    /// Wipes every field. Used when the player is destroyed so a stale copy
    /// reads as the empty player.
    pub(crate) fn clear(&mut self) {
        *self = Self::empty();
    }
}

impl Default for SessionPlayer {
    fn default() -> Self {
        Self::empty()
    }
}

impl PartialEq for SessionPlayer {
    fn eq(&self, other: &Self) -> bool {
        self.is_valid() && other.is_valid() && self.slot == other.slot
    }
}
