//! The session registry: the server's authoritative table of players.
//!
//! Responsibilities:
//! - Resolving a stable id to a slot on every connection (new player,
//!   returning player, or rejection)
//! - Deciding what a disconnect means (temporary while a session runs,
//!   permanent otherwise)
//! - Telling clients about roster changes, according to
//!   [`SessionConfig::share_ids`]
//!
//! Ownership handoff lives in `ownership.rs` as a second `impl` block on the
//! same type, since it needs the same maps.
//!
//! # Concurrency note
//!
//! `SessionRegistry` is a plain synchronous state machine. Every mutation
//! returns the messages it wants delivered as an ordered outbox
//! (`Vec<Outbound>`) instead of sending them itself. The server owns the
//! registry from a single actor task and does the sending; tests just
//! inspect the outbox.

use std::collections::{BTreeMap, HashMap, HashSet};

use rejoin_protocol::{ConnectionId, ObjectId, PlayerConnectionState, SessionMessage, Slot};
use tokio::sync::broadcast;

use crate::events::EventChannel;
use crate::player::EMPTY_PLAYER;
use crate::{
    OwnershipEvent, PlayerConnectionEvent, PlayerSpawnedEvent, PlayerSpawner, Replication, Roster,
    SessionConfig, SessionError, SessionEvent, SessionObject, SessionPlayer,
};

/// A message the registry wants delivered to one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub to: ConnectionId,
    pub message: SessionMessage,
}

impl Outbound {
    pub fn new(to: ConnectionId, message: SessionMessage) -> Self {
        Self { to, message }
    }
}

/// Authoritative player and object table.
///
/// ## Player lifecycle
///
/// ```text
/// authenticate() ──→ [Connected] ──on_connection_closed()──┐
///                         ▲                                 │
///                         │             session started?    │
///                         │            yes ┌────────────────┴──┐ no
///                         │                ▼                   ▼
///          authenticate() └──── [TemporarilyDisconnected]  [PermanentlyDisconnected]
///         (as Reconnected)                 │                   ▲
///                                          └───end_session()───┘
/// ```
///
/// The three indexes (`by_stable_id`, `players`, `by_connection`) always
/// agree: a slot is in `by_connection` exactly when its player has a
/// connection, and in `by_stable_id` exactly while it is registered.
pub struct SessionRegistry {
    pub(crate) config: SessionConfig,

    /// The player arena. `BTreeMap` keeps [`Roster::players`] in slot order.
    pub(crate) players: BTreeMap<Slot, SessionPlayer>,

    pub(crate) by_stable_id: HashMap<String, Slot>,

    pub(crate) by_connection: HashMap<ConnectionId, Slot>,

    /// Ownership records, keyed by object.
    pub(crate) objects: HashMap<ObjectId, SessionObject>,

    /// Next slot to hand out. Starts at 1 and only goes back on reset.
    next_slot: u32,

    session_started: bool,

    /// Reconnected connections whose client has not sent `ClientReady` yet.
    pub(crate) awaiting_load: HashSet<ConnectionId>,

    /// Spawns player objects on `ClientReady` when installed.
    pub(crate) spawner: Option<PlayerSpawner>,

    player_events: EventChannel<PlayerConnectionEvent>,
    session_events: EventChannel<SessionEvent>,
    pub(crate) ownership_events: EventChannel<OwnershipEvent>,
    pub(crate) spawned_events: EventChannel<PlayerSpawnedEvent>,
}

impl SessionRegistry {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            session_started: config.session_started_initially,
            config,
            players: BTreeMap::new(),
            by_stable_id: HashMap::new(),
            by_connection: HashMap::new(),
            objects: HashMap::new(),
            next_slot: Slot::FIRST.0,
            awaiting_load: HashSet::new(),
            spawner: None,
            player_events: EventChannel::new(),
            session_events: EventChannel::new(),
            ownership_events: EventChannel::new(),
            spawned_events: EventChannel::new(),
        }
    }

    // -- Session lifecycle --------------------------------------------------

    /// Starts a session: from now on, dropped players are kept so they can
    /// reconnect.
    ///
    /// Returns `false` (and notifies nobody) if a session was already running.
    pub fn start_session(&mut self) -> bool {
        if self.session_started {
            return false;
        }
        self.session_started = true;
        self.session_events.emit(SessionEvent::Started);
        tracing::info!("session started");
        true
    }

    /// Ends the session. Every player still disconnected is removed for
    /// good; connected players stay, and their next disconnect will be
    /// permanent.
    ///
    /// Does nothing if no session is running.
    pub fn end_session<R: Replication + ?Sized>(&mut self, repl: &mut R) -> Vec<Outbound> {
        if !self.session_started {
            return Vec::new();
        }
        self.session_started = false;

        let stale: Vec<Slot> = self
            .players
            .values()
            .filter(|p| p.connection().is_none())
            .map(SessionPlayer::slot)
            .collect();

        let mut outbox = Vec::new();
        for slot in stale {
            outbox.extend(self.remove_permanently(slot, repl));
        }

        self.session_events.emit(SessionEvent::Ended);
        tracing::info!("session ended");
        outbox
    }

    pub fn is_session_started(&self) -> bool {
        self.session_started
    }

    /// Forgets every player and object and starts counting slots from 1
    /// again. Sends nothing: this is for server shutdown or restart, when
    /// there is nobody left to tell.
    pub fn reset(&mut self) {
        for player in self.players.values_mut() {
            player.clear();
        }
        self.players.clear();
        self.by_stable_id.clear();
        self.by_connection.clear();
        self.objects.clear();
        self.awaiting_load.clear();
        if let Some(spawner) = self.spawner.as_mut() {
            spawner.clear();
        }
        self.next_slot = Slot::FIRST.0;
        self.session_started = self.config.session_started_initially;
        tracing::info!("session registry reset");
    }

    // -- Connections --------------------------------------------------------

    /// Binds `connection` to the player identified by `stable_id`.
    ///
    /// - Unknown id → a new player in a fresh slot, `Connected`.
    /// - Known id, currently disconnected → same slot, `Reconnected`. The
    ///   connection then waits for `ClientReady` before the player's objects
    ///   are handed back (see [`SessionRegistry::on_client_ready`]).
    ///
    /// The outbox always ends with, for `connection`:
    /// `PlayerIdentityAssigned`, one `ObjectOwnerChanged` per owned object
    /// the connection may know about, then `AuthResult { accepted: true }`.
    /// Roster broadcasts for the change come first.
    ///
    /// # Errors
    /// - [`SessionError::EmptyIdentity`]: `stable_id` is blank
    /// - [`SessionError::ConnectionInUse`]: `connection` already has a player
    /// - [`SessionError::AlreadyConnected`]: the player is online elsewhere;
    ///   its current connection is left alone
    pub fn authenticate(
        &mut self,
        stable_id: &str,
        connection: ConnectionId,
    ) -> Result<Vec<Outbound>, SessionError> {
        if stable_id.trim().is_empty() {
            return Err(SessionError::EmptyIdentity);
        }
        if self.by_connection.contains_key(&connection) {
            return Err(SessionError::ConnectionInUse(connection));
        }

        let returning = self
            .by_stable_id
            .get(stable_id)
            .and_then(|slot| self.players.get_mut(slot));

        let (slot, state) = match returning {
            Some(player) => {
                if player.connection().is_some() {
                    return Err(SessionError::AlreadyConnected(player.slot()));
                }
                player.reconnect(connection);
                self.awaiting_load.insert(connection);
                (player.slot(), PlayerConnectionState::Reconnected)
            }
            None => {
                let slot = self.allocate_slot();
                self.players.insert(
                    slot,
                    SessionPlayer::new(stable_id.to_owned(), slot, connection),
                );
                self.by_stable_id.insert(stable_id.to_owned(), slot);
                (slot, PlayerConnectionState::Connected)
            }
        };
        self.by_connection.insert(connection, slot);

        tracing::info!(%slot, %connection, stable_id, %state, "player authenticated");

        let mut outbox = self.broadcast_change(slot, Some(connection), state);
        outbox.push(Outbound::new(
            connection,
            SessionMessage::PlayerIdentityAssigned {
                slot,
                connection,
                reconnected: state == PlayerConnectionState::Reconnected,
            },
        ));
        outbox.extend(self.owner_state(connection, slot));
        outbox.push(Outbound::new(
            connection,
            SessionMessage::AuthResult { accepted: true },
        ));
        Ok(outbox)
    }

    /// Handles the transport reporting that `connection` closed.
    ///
    /// While a session runs the player is kept, with no connection and its
    /// objects still attached. Otherwise the player is removed: its objects
    /// are revoked and despawned first, then the roster hears about it.
    ///
    /// # Errors
    /// [`SessionError::UnknownConnection`] if no player is bound to
    /// `connection`. Callers must only report connections that
    /// authenticated successfully; anything else means the maps are out of
    /// sync with the transport.
    pub fn on_connection_closed<R: Replication + ?Sized>(
        &mut self,
        connection: ConnectionId,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, SessionError> {
        let slot = self
            .by_connection
            .remove(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;
        self.awaiting_load.remove(&connection);

        if !self.session_started {
            return Ok(self.remove_permanently(slot, repl));
        }

        let player = self
            .players
            .get_mut(&slot)
            .ok_or(SessionError::UnknownConnection(connection))?;
        player.set_connection(None);

        tracing::info!(%slot, %connection, "player temporarily disconnected");
        Ok(self.broadcast_change(slot, None, PlayerConnectionState::TemporarilyDisconnected))
    }

    /// Revokes and despawns everything the player owns, drops it from every
    /// index, then broadcasts `PermanentlyDisconnected`.
    fn remove_permanently<R: Replication + ?Sized>(
        &mut self,
        slot: Slot,
        repl: &mut R,
    ) -> Vec<Outbound> {
        let Some(player) = self.players.get_mut(&slot) else {
            return Vec::new();
        };
        if let Some(connection) = player.connection() {
            self.by_connection.remove(&connection);
            self.awaiting_load.remove(&connection);
        }
        player.set_connection(None);
        let owned: Vec<ObjectId> = player.owned_objects().iter().copied().collect();

        let mut outbox = Vec::new();
        for object in owned {
            outbox.extend(self.release_object(object, repl));
        }

        if let Some(mut player) = self.players.remove(&slot) {
            if let Some(stable_id) = player.stable_id() {
                self.by_stable_id.remove(stable_id);
            }
            player.clear();
        }
        if let Some(spawner) = self.spawner.as_mut() {
            spawner.forget(slot);
        }

        tracing::info!(%slot, "player permanently disconnected");
        outbox.extend(self.broadcast_change(
            slot,
            None,
            PlayerConnectionState::PermanentlyDisconnected,
        ));
        outbox
    }

    fn allocate_slot(&mut self) -> Slot {
        let slot = Slot(self.next_slot);
        self.next_slot += 1;
        slot
    }

    // -- Broadcasting -------------------------------------------------------

    /// Notifies observers of a connection change and builds the messages
    /// clients should get for it.
    ///
    /// Shared-roster mode: every connected player gets the change followed
    /// by a fresh snapshot. Owner-only mode: only the affected player, only
    /// when it (re)connected.
    fn broadcast_change(
        &self,
        slot: Slot,
        connection: Option<ConnectionId>,
        state: PlayerConnectionState,
    ) -> Vec<Outbound> {
        self.player_events.emit(PlayerConnectionEvent {
            slot,
            connection,
            state,
        });

        let change = SessionMessage::PlayerConnectionChange {
            slot,
            connection,
            state,
        };

        if !self.config.share_ids {
            return match connection {
                Some(to) if state.is_online() => vec![Outbound::new(to, change)],
                _ => Vec::new(),
            };
        }

        let snapshot = self.snapshot();
        let mut outbox = Vec::new();
        for to in self.players.values().filter_map(SessionPlayer::connection) {
            outbox.push(Outbound::new(to, change.clone()));
            outbox.push(Outbound::new(to, snapshot.clone()));
        }
        outbox
    }

    /// Session owners a freshly authenticated `connection` should know
    /// about, in object order: every owned object in shared-roster mode,
    /// only the objects of `slot` otherwise.
    fn owner_state(&self, to: ConnectionId, slot: Slot) -> Vec<Outbound> {
        let mut owned: Vec<(ObjectId, Slot)> = self
            .objects
            .values()
            .filter_map(|o| o.owner().map(|owner| (o.id(), owner)))
            .filter(|&(_, owner)| self.config.share_ids || owner == slot)
            .collect();
        owned.sort();
        owned
            .into_iter()
            .map(|(object, owner)| {
                Outbound::new(
                    to,
                    SessionMessage::ObjectOwnerChanged {
                        object,
                        owner: Some(owner),
                    },
                )
            })
            .collect()
    }

    /// The full roster as a `RosterSnapshot` message.
    pub fn snapshot(&self) -> SessionMessage {
        SessionMessage::roster_snapshot(
            self.players.values().map(|p| (p.slot(), p.connection())),
        )
    }

    // -- Queries ------------------------------------------------------------

    /// The player registered under `stable_id`, or the empty player.
    pub fn player_by_stable_id(&self, stable_id: &str) -> &SessionPlayer {
        self.by_stable_id
            .get(stable_id)
            .and_then(|slot| self.players.get(slot))
            .unwrap_or(&EMPTY_PLAYER)
    }

    /// The ownership record for `object`, if it is registered.
    pub fn object(&self, object: ObjectId) -> Option<&SessionObject> {
        self.objects.get(&object)
    }

    /// `true` while `connection` reconnected and has not sent `ClientReady`.
    pub fn is_awaiting_load(&self, connection: ConnectionId) -> bool {
        self.awaiting_load.contains(&connection)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    // -- Subscriptions ------------------------------------------------------

    /// Player connection changes, as they happen on the server.
    pub fn subscribe_players(&self) -> broadcast::Receiver<PlayerConnectionEvent> {
        self.player_events.subscribe()
    }

    /// Session start/end.
    pub fn subscribe_session(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_events.subscribe()
    }

    /// Session-level ownership changes.
    pub fn subscribe_ownership(&self) -> broadcast::Receiver<OwnershipEvent> {
        self.ownership_events.subscribe()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Roster for SessionRegistry {
    fn players(&self) -> Vec<&SessionPlayer> {
        self.players.values().collect()
    }

    fn player(&self, slot: Slot) -> &SessionPlayer {
        self.players.get(&slot).unwrap_or(&EMPTY_PLAYER)
    }

    fn player_by_connection(&self, connection: ConnectionId) -> &SessionPlayer {
        self.by_connection
            .get(&connection)
            .and_then(|slot| self.players.get(slot))
            .unwrap_or(&EMPTY_PLAYER)
    }
}

// =========================================================================
// Tests
// =========================================================================
