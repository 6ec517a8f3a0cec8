//! The client's reflection of the server's roster.
//!
//! A [`SessionMirror`] never decides anything. It applies whatever the
//! registry sends and re-publishes the changes as events, so client-side
//! game code can react to "player 3 dropped" or "you own object 12 now"
//! without parsing wire messages itself.

use std::collections::{BTreeMap, HashMap};

use rejoin_protocol::{
    ConnectionId, LocalPlayerConnectionState, ObjectId, PlayerConnectionState, ProtocolError,
    SessionMessage, Slot, roster_entries,
};
use tokio::sync::broadcast;

use crate::events::EventChannel;
use crate::player::EMPTY_PLAYER;
use crate::{
    LocalPlayerEvent, OwnershipEvent, PlayerConnectionEvent, Roster, SessionError, SessionPlayer,
};

/// Client-side roster, local identity, and object owners.
///
/// In owner-only mode the server only ever tells a client about itself, so
/// the roster holds just the local player.
pub struct SessionMirror {
    stable_id: String,
    local: SessionPlayer,
    players: BTreeMap<Slot, SessionPlayer>,
    by_connection: HashMap<ConnectionId, Slot>,
    object_owners: HashMap<ObjectId, Slot>,

    player_events: EventChannel<PlayerConnectionEvent>,
    local_events: EventChannel<LocalPlayerEvent>,
    ownership_events: EventChannel<OwnershipEvent>,
}

impl SessionMirror {
    /// Creates an empty mirror for a client that will authenticate as
    /// `stable_id`.
    pub fn new(stable_id: impl Into<String>) -> Self {
        Self {
            stable_id: stable_id.into(),
            local: SessionPlayer::empty(),
            players: BTreeMap::new(),
            by_connection: HashMap::new(),
            object_owners: HashMap::new(),
            player_events: EventChannel::new(),
            local_events: EventChannel::new(),
            ownership_events: EventChannel::new(),
        }
    }

    /// The identity this client authenticates with.
    pub fn stable_id(&self) -> &str {
        &self.stable_id
    }

    /// The local player, or the empty player before the server assigned one.
    pub fn local_player(&self) -> &SessionPlayer {
        &self.local
    }

    /// Session-level owner of `object`, as last announced to this client.
    pub fn owner_of(&self, object: ObjectId) -> Option<Slot> {
        self.object_owners.get(&object).copied()
    }

    /// Applies one server message.
    ///
    /// # Errors
    /// - [`SessionError::Protocol`] for a malformed roster snapshot, or for
    ///   a message only the server should receive.
    pub fn apply(&mut self, message: &SessionMessage) -> Result<(), SessionError> {
        match message {
            SessionMessage::PlayerConnectionChange {
                slot,
                connection,
                state,
            } => self.apply_connection_change(*slot, *connection, *state),

            SessionMessage::RosterSnapshot { slots, connections } => {
                let entries = roster_entries(slots, connections)?;
                self.apply_snapshot(entries);
            }

            SessionMessage::PlayerIdentityAssigned {
                slot,
                connection,
                reconnected,
            } => self.apply_identity(*slot, *connection, *reconnected),

            SessionMessage::ObjectOwnerChanged { object, owner } => {
                self.apply_owner_change(*object, *owner);
            }

            SessionMessage::AuthResult { accepted } => {
                tracing::debug!(accepted, "authentication result received");
            }

            SessionMessage::AuthRequest { .. } | SessionMessage::ClientReady => {
                return Err(ProtocolError::InvalidMessage(format!(
                    "client received a client-to-server message: {message:?}"
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Handles losing the connection to the server: reports `Disconnected`
    /// for the local player and forgets everything.
    pub fn on_disconnected(&mut self) {
        if self.local.is_valid() {
            self.local_events.emit(LocalPlayerEvent {
                slot: self.local.slot(),
                connection: None,
                state: LocalPlayerConnectionState::Disconnected,
            });
            tracing::info!(slot = %self.local.slot(), "local player disconnected");
        }
        self.local.clear();
        self.players.clear();
        self.by_connection.clear();
        self.object_owners.clear();
    }

    // -- Subscriptions ------------------------------------------------------

    pub fn subscribe_players(&self) -> broadcast::Receiver<PlayerConnectionEvent> {
        self.player_events.subscribe()
    }

    pub fn subscribe_local(&self) -> broadcast::Receiver<LocalPlayerEvent> {
        self.local_events.subscribe()
    }

    pub fn subscribe_ownership(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.ownership_events.subscribe()
    }

    // -- Message handlers ---------------------------------------------------

    fn apply_connection_change(
        &mut self,
        slot: Slot,
        connection: Option<ConnectionId>,
        state: PlayerConnectionState,
    ) {
        match state {
            PlayerConnectionState::Connected | PlayerConnectionState::Reconnected => {
                let player = self
                    .players
                    .entry(slot)
                    .or_insert_with(|| SessionPlayer::remote(slot, None));
                if let Some(old) = player.connection() {
                    self.by_connection.remove(&old);
                }
                player.set_connection(connection);
                if state == PlayerConnectionState::Reconnected {
                    player.set_first_connection(false);
                }
                if let Some(connection) = connection {
                    self.by_connection.insert(connection, slot);
                }
            }
            PlayerConnectionState::TemporarilyDisconnected => {
                if let Some(player) = self.players.get_mut(&slot) {
                    if let Some(old) = player.connection() {
                        self.by_connection.remove(&old);
                    }
                    player.set_connection(None);
                }
            }
            PlayerConnectionState::PermanentlyDisconnected => {
                self.forget_player(slot);
            }
        }

        tracing::debug!(%slot, ?connection, %state, "roster change applied");
        self.player_events.emit(PlayerConnectionEvent {
            slot,
            connection,
            state,
        });
    }

    /// Replaces the roster. Players that stay keep their owned objects.
    fn apply_snapshot(&mut self, entries: Vec<(Slot, Option<ConnectionId>)>) {
        let mut previous = std::mem::take(&mut self.players);
        self.by_connection.clear();

        for (slot, connection) in entries {
            let mut player = previous
                .remove(&slot)
                .unwrap_or_else(|| SessionPlayer::remote(slot, None));
            player.set_connection(connection);
            if let Some(connection) = connection {
                self.by_connection.insert(connection, slot);
            }
            self.players.insert(slot, player);
        }

        for (slot, mut gone) in previous {
            self.object_owners.retain(|_, owner| *owner != slot);
            gone.clear();
        }
    }

    fn apply_identity(&mut self, slot: Slot, connection: ConnectionId, reconnected: bool) {
        let mut local = SessionPlayer::new(self.stable_id.clone(), slot, connection);
        local.set_first_connection(!reconnected);
        for (&object, _) in self.object_owners.iter().filter(|(_, owner)| **owner == slot) {
            local.add_object(object);
        }
        self.local = local;

        let player = self
            .players
            .entry(slot)
            .or_insert_with(|| SessionPlayer::remote(slot, None));
        if let Some(old) = player.connection() {
            self.by_connection.remove(&old);
        }
        player.set_connection(Some(connection));
        self.by_connection.insert(connection, slot);

        let state = if reconnected {
            LocalPlayerConnectionState::Reconnected
        } else {
            LocalPlayerConnectionState::Connected
        };
        tracing::info!(%slot, %connection, ?state, "local identity assigned");
        self.local_events.emit(LocalPlayerEvent {
            slot,
            connection: Some(connection),
            state,
        });
    }

    fn apply_owner_change(&mut self, object: ObjectId, owner: Option<Slot>) {
        let previous = match owner {
            Some(slot) => self.object_owners.insert(object, slot),
            None => self.object_owners.remove(&object),
        };
        if previous == owner {
            return;
        }

        if let Some(slot) = previous {
            if let Some(player) = self.players.get_mut(&slot) {
                player.remove_object(object);
            }
            if slot == self.local.slot() {
                self.local.remove_object(object);
            }
        }
        if let Some(slot) = owner {
            if let Some(player) = self.players.get_mut(&slot) {
                player.add_object(object);
            }
            if slot == self.local.slot() {
                self.local.add_object(object);
            }
        }

        self.ownership_events.emit(OwnershipEvent {
            object,
            previous,
            next: owner,
        });
    }

    fn forget_player(&mut self, slot: Slot) {
        if let Some(mut player) = self.players.remove(&slot) {
            if let Some(connection) = player.connection() {
                self.by_connection.remove(&connection);
            }
            player.clear();
        }
        self.object_owners.retain(|_, owner| *owner != slot);
    }
}

impl Roster for SessionMirror {
    fn players(&self) -> Vec<&SessionPlayer> {
        self.players.values().collect()
    }

    fn player(&self, slot: Slot) -> &SessionPlayer {
        if slot == self.local.slot() && self.local.is_valid() {
            return &self.local;
        }
        self.players.get(&slot).unwrap_or(&EMPTY_PLAYER)
    }

    fn player_by_connection(&self, connection: ConnectionId) -> &SessionPlayer {
        match self.by_connection.get(&connection) {
            Some(&slot) => self.player(slot),
            None => &EMPTY_PLAYER,
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
