//! The ownership broker.
//!
//! Objects have two owners (see [`SessionObject`]). Game code only ever
//! sets the session owner, through [`SessionRegistry::grant`],
//! [`SessionRegistry::revoke`] or [`SessionRegistry::spawn`]. The broker keeps the
//! transport owner following it:
//!
//! ```text
//! session owner            transport owner
//! ─────────────            ───────────────
//! player, connected    →   player's connection
//! player, disconnected →   nobody (object is "reserved")
//! nobody               →   nobody
//! ```
//!
//! and re-attaches objects when a player comes back, using the
//! notifications drained by [`SessionRegistry::pump`].

use std::collections::BTreeSet;

use rejoin_protocol::{ConnectionId, ObjectId, SessionMessage, Slot};

use crate::{
    ChangeOrigin, Outbound, OwnershipError, OwnershipEvent, Replication, ReplicationEvent,
    SessionError, SessionObject, SessionRegistry,
};

/// Upper bound on notification rounds per [`SessionRegistry::pump`] call.
/// Each round can trigger transfers that produce the next round's events.
pub const MAX_PUMP_ROUNDS: usize = 16;

impl SessionRegistry {
    // -- Registration -------------------------------------------------------

    /// Starts tracking an object that is (or will be) spawned by someone
    /// else. It begins with no session owner.
    ///
    /// # Errors
    /// [`OwnershipError::AlreadyRegistered`] if the object is already tracked.
    pub fn register_object(&mut self, object: ObjectId) -> Result<&SessionObject, OwnershipError> {
        if self.objects.contains_key(&object) {
            return Err(OwnershipError::AlreadyRegistered(object));
        }
        self.objects.insert(object, SessionObject::new(object));
        tracing::debug!(%object, "object registered");
        Ok(self.objects.get(&object).expect("just inserted"))
    }

    /// Spawns `object` owned by `player` (or by nobody), registering it if
    /// needed.
    ///
    /// # Errors
    /// [`OwnershipError::AlreadyRegistered`] if the object is already spawned.
    pub fn spawn<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        player: Option<Slot>,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, OwnershipError> {
        self.spawn_with_children(object, &[], player, repl)
    }

    /// Spawns `object` and its child objects, all owned by the same player.
    ///
    /// Children are separate networked objects with their own ownership
    /// records. They are spawned right after the parent, in the order given.
    /// Nothing is spawned if any id is already spawned or listed twice.
    ///
    /// # Errors
    /// [`OwnershipError::AlreadyRegistered`] naming the first offending id.
    pub fn spawn_with_children<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        children: &[ObjectId],
        player: Option<Slot>,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, OwnershipError> {
        let mut seen = BTreeSet::new();
        for &id in std::iter::once(&object).chain(children) {
            if repl.is_spawned(id) || !seen.insert(id) {
                return Err(OwnershipError::AlreadyRegistered(id));
            }
        }

        let target = self.live_slot(player);
        let connection = self.connection_of(target);

        let mut outbox = Vec::new();
        for &id in std::iter::once(&object).chain(children) {
            self.objects
                .entry(id)
                .or_insert_with(|| SessionObject::new(id));
            outbox.extend(self.set_session_owner(id, target));

            if connection.is_some() {
                if let Some(record) = self.objects.get_mut(&id) {
                    record.expect_transfer(connection);
                }
            }
            repl.spawn(id, connection);
        }

        tracing::info!(%object, children = children.len(), owner = ?target, "object spawned");
        Ok(outbox)
    }

    // -- Grant / revoke -----------------------------------------------------

    /// Makes `player` the session owner of `object`.
    ///
    /// - Player connected → transport ownership moves to its connection.
    /// - Player disconnected → transport ownership is cleared; the object
    ///   waits for the player to come back.
    /// - `None` or a slot with no player → both owners are cleared.
    ///
    /// With `rebuild_observers == false`, a connection that cannot see the
    /// object yet only gets the session-level owner. The transport transfer
    /// happens once the object is spawned for it.
    ///
    /// # Errors
    /// [`OwnershipError::UnknownObject`] if the object is not registered.
    pub fn grant<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        player: Option<Slot>,
        rebuild_observers: bool,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, OwnershipError> {
        if !self.objects.contains_key(&object) {
            return Err(OwnershipError::UnknownObject(object));
        }

        let target = self.live_slot(player);
        if player.is_some() && target.is_none() {
            tracing::debug!(%object, ?player, "grant to unknown player clears ownership");
        }

        let outbox = self.set_session_owner(object, target);

        match self.connection_of(target) {
            Some(connection) if !rebuild_observers && !repl.is_observer(object, connection) => {
                tracing::debug!(%object, %connection, "transport transfer deferred until spawned for owner");
            }
            next => self.request_transport(object, next, repl),
        }
        Ok(outbox)
    }

    /// Clears both owners of `object`. Same as `grant(object, None, true)`.
    ///
    /// # Errors
    /// [`OwnershipError::UnknownObject`] if the object is not registered.
    pub fn revoke<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, OwnershipError> {
        self.grant(object, None, true, repl)
    }

    /// Revokes, despawns and forgets an object. Used when its owner leaves
    /// for good.
    pub(crate) fn release_object<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        repl: &mut R,
    ) -> Vec<Outbound> {
        let outbox = self.set_session_owner(object, None);
        self.request_transport(object, None, repl);
        if repl.is_spawned(object) {
            repl.despawn(object);
        }
        self.objects.remove(&object);
        tracing::debug!(%object, "object released");
        outbox
    }

    // -- Reconnection -------------------------------------------------------

    /// Handles `ClientReady` from `connection`.
    ///
    /// If the connection belongs to a reconnected player that was waiting to
    /// finish loading, transport ownership of everything the player owns is
    /// handed back. Then, with a [`PlayerSpawner`](crate::PlayerSpawner)
    /// installed, a player that has no player object yet gets one.
    ///
    /// # Errors
    /// [`SessionError::UnknownConnection`] if no player is bound to
    /// `connection`.
    pub fn on_client_ready<R: Replication + ?Sized>(
        &mut self,
        connection: ConnectionId,
        repl: &mut R,
    ) -> Result<Vec<Outbound>, SessionError> {
        let slot = *self
            .by_connection
            .get(&connection)
            .ok_or(SessionError::UnknownConnection(connection))?;

        if self.awaiting_load.remove(&connection) {
            let owned: Vec<ObjectId> = self
                .players
                .get(&slot)
                .map(|p| p.owned_objects().iter().copied().collect())
                .unwrap_or_default();

            for &object in &owned {
                self.request_transport(object, Some(connection), repl);
            }

            tracing::info!(%slot, %connection, objects = owned.len(), "ownership restored after reconnect");
        }

        Ok(self.spawn_player_object(slot, repl))
    }

    // -- Replication notifications -------------------------------------------

    /// Drains replication notifications until there are none left (or
    /// [`MAX_PUMP_ROUNDS`] is hit) and returns the messages they produced.
    pub fn pump<R: Replication + ?Sized>(&mut self, repl: &mut R) -> Vec<Outbound> {
        let mut outbox = Vec::new();
        for _ in 0..MAX_PUMP_ROUNDS {
            let events = repl.poll_events();
            if events.is_empty() {
                return outbox;
            }
            for event in events {
                outbox.extend(self.handle_replication_event(event, repl));
            }
        }
        tracing::warn!(rounds = MAX_PUMP_ROUNDS, "replication events still pending after pump");
        outbox
    }

    /// Reacts to one replication notification.
    pub fn handle_replication_event<R: Replication + ?Sized>(
        &mut self,
        event: ReplicationEvent,
        repl: &mut R,
    ) -> Vec<Outbound> {
        match event {
            ReplicationEvent::OwnershipChanged {
                object,
                origin: ChangeOrigin::Mirrored,
                ..
            } => {
                tracing::debug!(%object, "mirrored ownership change ignored");
                Vec::new()
            }

            ReplicationEvent::OwnershipChanged { object, next, .. } => {
                let Some(record) = self.objects.get_mut(&object) else {
                    return Vec::new();
                };
                if record.take_expected(next) {
                    return Vec::new();
                }
                if repl.transport_owner(object) != next {
                    tracing::debug!(%object, ?next, "stale ownership notification ignored");
                    return Vec::new();
                }
                let owner = record.owner();
                if owner.is_none() || self.connection_of(owner) == next {
                    return Vec::new();
                }
                tracing::info!(%object, ?next, "transport owner changed outside the broker, clearing session owner");
                self.set_session_owner(object, None)
            }

            ReplicationEvent::SpawnedFor { object, connection } => {
                let Some(owner) = self.objects.get(&object).map(SessionObject::owner) else {
                    return Vec::new();
                };
                if self.connection_of(owner) != Some(connection) {
                    return Vec::new();
                }
                let held = repl.transport_owner(object) == Some(connection);
                let Some(record) = self.objects.get_mut(&object) else {
                    return Vec::new();
                };
                if held {
                    if record.transfer_in_flight() {
                        tracing::debug!(%object, %connection, "owner already holds object, dropping unanswered transfers");
                        record.clear_expected();
                    }
                } else if !record.transfer_in_flight() {
                    tracing::debug!(%object, %connection, "re-asserting ownership on spawn");
                    self.request_transport(object, Some(connection), repl);
                }
                Vec::new()
            }

            ReplicationEvent::DespawnedFor { object, connection } => {
                let Some(record) = self.objects.get(&object) else {
                    return Vec::new();
                };
                if self.connection_of(record.owner()) == Some(connection)
                    && repl.transport_owner(object) == Some(connection)
                {
                    tracing::debug!(%object, %connection, "owner lost sight of object, revoking transport ownership");
                    self.request_transport(object, None, repl);
                }
                Vec::new()
            }

            ReplicationEvent::Stopped { object } => {
                if let Some(record) = self.objects.remove(&object) {
                    if let Some(player) = record.owner().and_then(|s| self.players.get_mut(&s)) {
                        player.remove_object(object);
                    }
                    if let Some(spawner) = self.spawner.as_mut() {
                        spawner.forget_object(object);
                    }
                    tracing::debug!(%object, "object left the network");
                }
                Vec::new()
            }
        }
    }

    // -- Internals ----------------------------------------------------------

    /// `slot` if it names a registered player.
    fn live_slot(&self, slot: Option<Slot>) -> Option<Slot> {
        slot.filter(|s| self.players.get(s).is_some_and(|p| p.is_valid()))
    }

    fn connection_of(&self, slot: Option<Slot>) -> Option<ConnectionId> {
        slot.and_then(|s| self.players.get(&s))
            .and_then(|p| p.connection())
    }

    /// Moves the session owner, keeps both players' `owned_objects` in step,
    /// and tells observers plus the two owners' clients.
    fn set_session_owner(&mut self, object: ObjectId, next: Option<Slot>) -> Vec<Outbound> {
        let Some(record) = self.objects.get_mut(&object) else {
            return Vec::new();
        };
        let previous = record.set_owner(next);
        if previous == next {
            return Vec::new();
        }

        if let Some(player) = previous.and_then(|s| self.players.get_mut(&s)) {
            player.remove_object(object);
        }
        if let Some(player) = next.and_then(|s| self.players.get_mut(&s)) {
            player.add_object(object);
        }

        self.ownership_events.emit(OwnershipEvent {
            object,
            previous,
            next,
        });
        tracing::debug!(%object, ?previous, ?next, "session owner changed");

        let message = SessionMessage::ObjectOwnerChanged { object, owner: next };
        let mut recipients: Vec<ConnectionId> = [previous, next]
            .into_iter()
            .filter_map(|slot| self.connection_of(slot))
            .collect();
        recipients.dedup();
        recipients
            .into_iter()
            .map(|to| Outbound::new(to, message.clone()))
            .collect()
    }

    /// Asks replication to move the transport owner to `next`, remembering
    /// the request so its echo is not mistaken for an external change.
    /// Nothing is requested when the owner would not change.
    fn request_transport<R: Replication + ?Sized>(
        &mut self,
        object: ObjectId,
        next: Option<ConnectionId>,
        repl: &mut R,
    ) {
        if !repl.is_spawned(object) || repl.transport_owner(object) == next {
            return;
        }
        let Some(record) = self.objects.get_mut(&object) else {
            return;
        };
        record.expect_transfer(next);
        match next {
            Some(connection) => repl.give_ownership(object, connection),
            None => repl.remove_ownership(object),
        }
    }
}

// =========================================================================
// Tests
// =========================================================================
