//! The seam between the session layer and the object replication system.
//!
//! The registry never spawns or transfers anything itself. It asks a
//! [`Replication`] implementation to do so, then reads back what actually
//! happened through [`Replication::poll_events`]. The registry holds
//! `&mut self` while it calls into replication, so replication cannot call
//! back into the registry. Notifications are queued instead and drained by
//! [`SessionRegistry::pump`].
//!
//! [`SessionRegistry::pump`]: crate::SessionRegistry::pump

use std::collections::{BTreeSet, HashMap, VecDeque};

use rejoin_protocol::{ConnectionId, ObjectId};

/// Who caused a transport ownership change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOrigin {
    /// The change was made on the server.
    Server,
    /// A local echo of a change already handled elsewhere. For example, a
    /// host that is server and client at once sees the same change twice.
    /// The broker ignores these.
    Mirrored,
}

/// Something the replication system did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplicationEvent {
    /// The transport-level owner of an object changed.
    OwnershipChanged {
        object: ObjectId,
        previous: Option<ConnectionId>,
        next: Option<ConnectionId>,
        origin: ChangeOrigin,
    },
    /// An object became visible to a connection.
    SpawnedFor {
        object: ObjectId,
        connection: ConnectionId,
    },
    /// An object stopped being visible to a connection.
    DespawnedFor {
        object: ObjectId,
        connection: ConnectionId,
    },
    /// An object left the network entirely.
    Stopped { object: ObjectId },
}

/// Operations the session layer needs from the replication system.
pub trait Replication {
    /// Puts `object` on the network, optionally owned by `owner`.
    ///
    /// An initial owner must be reported as an
    /// [`ReplicationEvent::OwnershipChanged`] like any other transfer.
    fn spawn(&mut self, object: ObjectId, owner: Option<ConnectionId>);

    /// Takes `object` off the network.
    fn despawn(&mut self, object: ObjectId);

    /// Makes `connection` the transport-level owner of `object`.
    fn give_ownership(&mut self, object: ObjectId, connection: ConnectionId);

    /// Leaves `object` with no transport-level owner.
    fn remove_ownership(&mut self, object: ObjectId);

    fn is_spawned(&self, object: ObjectId) -> bool;

    /// Current transport-level owner, `None` if unowned or not spawned.
    fn transport_owner(&self, object: ObjectId) -> Option<ConnectionId>;

    /// Whether `connection` currently sees `object`.
    fn is_observer(&self, object: ObjectId, connection: ConnectionId) -> bool;

    /// Drains the notifications produced since the last call.
    fn poll_events(&mut self) -> Vec<ReplicationEvent> {
        Vec::new()
    }

    /// The server calls this once a client finished loading and can start
    /// observing objects. Systems that track observers on their own can
    /// ignore it.
    fn connection_ready(&mut self, _connection: ConnectionId) {}

    /// The server calls this when a connection closed, before the registry
    /// handles the disconnect.
    fn connection_lost(&mut self, _connection: ConnectionId) {}
}

// ---------------------------------------------------------------------------
// LocalReplication
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct LocalObject {
    owner: Option<ConnectionId>,
}

/// In-memory [`Replication`] that records state and queues notifications.
///
/// The server uses it when no real replication system is plugged in, and
/// tests use it to watch what the broker asked for. Every spawned object is
/// visible to every connection added with [`LocalReplication::add_observer`].
#[derive(Debug, Default)]
pub struct LocalReplication {
    objects: HashMap<ObjectId, LocalObject>,
    observers: BTreeSet<ConnectionId>,
    events: VecDeque<ReplicationEvent>,
}

impl LocalReplication {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every spawned object visible to `connection`.
    ///
    /// Queues a [`ReplicationEvent::SpawnedFor`] per spawned object, in
    /// object id order.
    pub fn add_observer(&mut self, connection: ConnectionId) {
        if !self.observers.insert(connection) {
            return;
        }
        for object in self.sorted_objects() {
            self.events
                .push_back(ReplicationEvent::SpawnedFor { object, connection });
        }
    }

    /// Hides every spawned object from `connection`.
    pub fn remove_observer(&mut self, connection: ConnectionId) {
        if !self.observers.remove(&connection) {
            return;
        }
        for object in self.sorted_objects() {
            self.events
                .push_back(ReplicationEvent::DespawnedFor { object, connection });
        }
    }

    /// Changes the transport owner without going through the broker, the
    /// way game code poking the replication system directly would.
    pub fn transfer_directly(
        &mut self,
        object: ObjectId,
        next: Option<ConnectionId>,
        origin: ChangeOrigin,
    ) {
        if let Some(entry) = self.objects.get_mut(&object) {
            let previous = entry.owner;
            entry.owner = next;
            self.events.push_back(ReplicationEvent::OwnershipChanged {
                object,
                previous,
                next,
                origin,
            });
        }
    }

    /// Number of notifications waiting to be polled.
    pub fn pending_events(&self) -> usize {
        self.events.len()
    }

    fn sorted_objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self.objects.keys().copied().collect();
        ids.sort();
        ids
    }

    fn set_owner(&mut self, object: ObjectId, next: Option<ConnectionId>) {
        let Some(entry) = self.objects.get_mut(&object) else {
            tracing::debug!(%object, "ownership change for unspawned object ignored");
            return;
        };
        if entry.owner == next {
            return;
        }
        let previous = entry.owner;
        entry.owner = next;
        self.events.push_back(ReplicationEvent::OwnershipChanged {
            object,
            previous,
            next,
            origin: ChangeOrigin::Server,
        });
    }
}

impl Replication for LocalReplication {
    fn spawn(&mut self, object: ObjectId, owner: Option<ConnectionId>) {
        if self.objects.contains_key(&object) {
            return;
        }
        self.objects.insert(object, LocalObject::default());
        if owner.is_some() {
            self.set_owner(object, owner);
        }
        for &connection in &self.observers {
            self.events
                .push_back(ReplicationEvent::SpawnedFor { object, connection });
        }
    }

    fn despawn(&mut self, object: ObjectId) {
        if self.objects.remove(&object).is_none() {
            return;
        }
        for &connection in &self.observers {
            self.events
                .push_back(ReplicationEvent::DespawnedFor { object, connection });
        }
        self.events.push_back(ReplicationEvent::Stopped { object });
    }

    fn give_ownership(&mut self, object: ObjectId, connection: ConnectionId) {
        self.set_owner(object, Some(connection));
    }

    fn remove_ownership(&mut self, object: ObjectId) {
        self.set_owner(object, None);
    }

    fn is_spawned(&self, object: ObjectId) -> bool {
        self.objects.contains_key(&object)
    }

    fn transport_owner(&self, object: ObjectId) -> Option<ConnectionId> {
        self.objects.get(&object).and_then(|o| o.owner)
    }

    fn is_observer(&self, object: ObjectId, connection: ConnectionId) -> bool {
        self.objects.contains_key(&object) && self.observers.contains(&connection)
    }

    fn poll_events(&mut self) -> Vec<ReplicationEvent> {
        self.events.drain(..).collect()
    }

    fn connection_ready(&mut self, connection: ConnectionId) {
        self.add_observer(connection);
    }

    fn connection_lost(&mut self, connection: ConnectionId) {
        self.remove_observer(connection);
    }
}
