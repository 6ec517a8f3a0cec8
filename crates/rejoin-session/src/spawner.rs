//! Automatic player objects.
//!
//! A [`PlayerSpawner`] installed on the registry gives every player one
//! object (plus optional child objects) the first time its client sends
//! `ClientReady`. The object belongs to the player's slot, so it survives a
//! temporary disconnect and is not spawned again when the player comes back.
//! It goes away with the player on permanent removal.

use std::collections::BTreeMap;

use rejoin_protocol::{ObjectId, Slot};
use tokio::sync::broadcast;

use crate::{Outbound, PlayerSpawnedEvent, Replication, SessionRegistry};

/// Hands out player object ids and remembers which slot got which object.
#[derive(Debug, Clone)]
pub struct PlayerSpawner {
    /// Next id to try. Ids already in use are skipped.
    next_object: u64,
    /// Child objects spawned with each player object.
    children: usize,
    spawned: BTreeMap<Slot, ObjectId>,
}

impl PlayerSpawner {
    /// A spawner allocating ids upward from `first_object`.
    pub fn new(first_object: ObjectId) -> Self {
        Self {
            next_object: first_object.0,
            children: 0,
            spawned: BTreeMap::new(),
        }
    }

    /// Spawns `count` child objects with every player object.
    pub fn with_children(mut self, count: usize) -> Self {
        self.children = count;
        self
    }

    /// The player object of `slot`, if one was spawned.
    pub fn object_of(&self, slot: Slot) -> Option<ObjectId> {
        self.spawned.get(&slot).copied()
    }

    /// Every slot that has a player object, in slot order.
    pub fn spawned(&self) -> &BTreeMap<Slot, ObjectId> {
        &self.spawned
    }

    /// Picks ids for one player object and its children, skipping every id
    /// `taken` reports as in use.
    pub(crate) fn allocate(&mut self, taken: impl Fn(ObjectId) -> bool) -> (ObjectId, Vec<ObjectId>) {
        let object = self.next_free(&taken);
        let children = (0..self.children).map(|_| self.next_free(&taken)).collect();
        (object, children)
    }

    fn next_free(&mut self, taken: &impl Fn(ObjectId) -> bool) -> ObjectId {
        loop {
            let id = ObjectId(self.next_object);
            self.next_object += 1;
            if !taken(id) {
                return id;
            }
        }
    }

    pub(crate) fn record(&mut self, slot: Slot, object: ObjectId) {
        self.spawned.insert(slot, object);
    }

    pub(crate) fn forget(&mut self, slot: Slot) -> Option<ObjectId> {
        self.spawned.remove(&slot)
    }

    /// Forgets whichever slot `object` was the player object of.
    pub(crate) fn forget_object(&mut self, object: ObjectId) {
        self.spawned.retain(|_, o| *o != object);
    }

    pub(crate) fn clear(&mut self) {
        self.spawned.clear();
    }
}

impl SessionRegistry {
    /// Installs (or replaces) the spawner used on `ClientReady`.
    pub fn set_player_spawner(&mut self, spawner: PlayerSpawner) {
        self.spawner = Some(spawner);
    }

    pub fn player_spawner(&self) -> Option<&PlayerSpawner> {
        self.spawner.as_ref()
    }

    /// The player object of `slot`, if a spawner is installed and spawned one.
    pub fn player_object(&self, slot: Slot) -> Option<ObjectId> {
        self.spawner.as_ref().and_then(|s| s.object_of(slot))
    }

    /// Player objects as they are spawned.
    pub fn subscribe_spawned(&self) -> broadcast::Receiver<PlayerSpawnedEvent> {
        self.spawned_events.subscribe()
    }

    /// Spawns the player object of `slot` unless it already has one.
    pub(crate) fn spawn_player_object<R: Replication + ?Sized>(
        &mut self,
        slot: Slot,
        repl: &mut R,
    ) -> Vec<Outbound> {
        let Some(mut spawner) = self.spawner.take() else {
            return Vec::new();
        };

        let mut outbox = Vec::new();
        if spawner.object_of(slot).is_none() {
            let (object, children) =
                spawner.allocate(|id| self.objects.contains_key(&id) || repl.is_spawned(id));
            match self.spawn_with_children(object, &children, Some(slot), repl) {
                Ok(messages) => {
                    spawner.record(slot, object);
                    tracing::info!(%slot, %object, children = children.len(), "player object spawned");
                    self.spawned_events.emit(PlayerSpawnedEvent {
                        slot,
                        object,
                        children,
                    });
                    outbox = messages;
                }
                Err(e) => {
                    tracing::warn!(%slot, %object, error = %e, "player object spawn failed");
                }
            }
        }

        self.spawner = Some(spawner);
        outbox
    }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LocalReplication, Roster, SessionConfig};
    use rejoin_protocol::ConnectionId;

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    /// A registry with a running session, a spawner starting at object 100,
    /// and player "a" in slot 1 on conn 1, loaded and observing.
    fn setup(children: usize) -> (SessionRegistry, LocalReplication) {
        let mut reg = SessionRegistry::new(SessionConfig::default());
        let mut repl = LocalReplication::new();
        reg.set_player_spawner(PlayerSpawner::new(ObjectId(100)).with_children(children));
        reg.start_session();
        reg.authenticate("a", conn(1)).unwrap();
        repl.add_observer(conn(1));
        (reg, repl)
    }

    // =====================================================================
    // allocate()
    // =====================================================================

    #[test]
    fn test_allocate_skips_taken_ids() {
        let mut spawner = PlayerSpawner::new(ObjectId(1)).with_children(2);

        let (object, children) = spawner.allocate(|id| id == ObjectId(2));

        assert_eq!(object, ObjectId(1));
        assert_eq!(children, vec![ObjectId(3), ObjectId(4)]);
    }

    #[test]
    fn test_forget_object_clears_its_slot() {
        let mut spawner = PlayerSpawner::new(ObjectId(1));
        spawner.record(Slot(1), ObjectId(1));
        spawner.record(Slot(2), ObjectId(2));

        spawner.forget_object(ObjectId(2));

        assert_eq!(spawner.object_of(Slot(1)), Some(ObjectId(1)));
        assert_eq!(spawner.object_of(Slot(2)), None);
    }

    // =====================================================================
    // on_client_ready() with a spawner
    // =====================================================================

    #[test]
    fn test_client_ready_spawns_player_object_owned_by_player() {
        let (mut reg, mut repl) = setup(0);
        let mut spawned = reg.subscribe_spawned();

        let outbox = reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);

        assert_eq!(reg.player_object(Slot(1)), Some(ObjectId(100)));
        assert_eq!(reg.object(ObjectId(100)).unwrap().owner(), Some(Slot(1)));
        assert_eq!(repl.transport_owner(ObjectId(100)), Some(conn(1)));
        assert_eq!(
            outbox,
            vec![Outbound::new(
                conn(1),
                rejoin_protocol::SessionMessage::ObjectOwnerChanged {
                    object: ObjectId(100),
                    owner: Some(Slot(1)),
                }
            )]
        );
        assert_eq!(
            spawned.try_recv().unwrap(),
            PlayerSpawnedEvent {
                slot: Slot(1),
                object: ObjectId(100),
                children: Vec::new(),
            }
        );
    }

    #[test]
    fn test_client_ready_twice_spawns_once() {
        let (mut reg, mut repl) = setup(0);
        reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);

        let outbox = reg.on_client_ready(conn(1), &mut repl).unwrap();

        assert!(outbox.is_empty());
        assert_eq!(reg.player(Slot(1)).owned_objects().len(), 1);
    }

    #[test]
    fn test_client_ready_after_reconnect_keeps_same_object() {
        let (mut reg, mut repl) = setup(0);
        reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);
        repl.remove_observer(conn(1));
        reg.pump(&mut repl);
        reg.on_connection_closed(conn(1), &mut repl).unwrap();

        reg.authenticate("a", conn(5)).unwrap();
        repl.add_observer(conn(5));
        reg.on_client_ready(conn(5), &mut repl).unwrap();
        reg.pump(&mut repl);

        assert_eq!(reg.player_object(Slot(1)), Some(ObjectId(100)));
        assert!(!repl.is_spawned(ObjectId(101)));
        assert_eq!(repl.transport_owner(ObjectId(100)), Some(conn(5)));
    }

    #[test]
    fn test_client_ready_spawns_children_with_same_owner() {
        let (mut reg, mut repl) = setup(2);
        let mut spawned = reg.subscribe_spawned();

        reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);

        let event = spawned.try_recv().unwrap();
        assert_eq!(event.object, ObjectId(100));
        assert_eq!(event.children, vec![ObjectId(101), ObjectId(102)]);
        for id in [ObjectId(100), ObjectId(101), ObjectId(102)] {
            assert_eq!(reg.object(id).unwrap().owner(), Some(Slot(1)));
            assert_eq!(repl.transport_owner(id), Some(conn(1)));
        }
    }

    #[test]
    fn test_client_ready_skips_ids_already_in_use() {
        let (mut reg, mut repl) = setup(0);
        reg.spawn(ObjectId(100), None, &mut repl).unwrap();

        reg.on_client_ready(conn(1), &mut repl).unwrap();

        assert_eq!(reg.player_object(Slot(1)), Some(ObjectId(101)));
        assert_eq!(reg.object(ObjectId(100)).unwrap().owner(), None);
    }

    #[test]
    fn test_client_ready_without_spawner_spawns_nothing() {
        let mut reg = SessionRegistry::new(SessionConfig::default());
        let mut repl = LocalReplication::new();
        reg.authenticate("a", conn(1)).unwrap();

        let outbox = reg.on_client_ready(conn(1), &mut repl).unwrap();

        assert!(outbox.is_empty());
        assert!(reg.player_object(Slot(1)).is_none());
        assert!(reg.player(Slot(1)).owned_objects().is_empty());
    }

    // =====================================================================
    // Forgetting
    // =====================================================================

    #[test]
    fn test_permanent_removal_forgets_player_object() {
        let (mut reg, mut repl) = setup(1);
        reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);
        reg.end_session(&mut repl);

        reg.on_connection_closed(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);

        assert!(reg.player_object(Slot(1)).is_none());
        assert!(!repl.is_spawned(ObjectId(100)));
        assert!(!repl.is_spawned(ObjectId(101)));
    }

    #[test]
    fn test_stopped_player_object_is_spawned_again_on_next_ready() {
        let (mut reg, mut repl) = setup(0);
        reg.on_client_ready(conn(1), &mut repl).unwrap();
        reg.pump(&mut repl);

        repl.despawn(ObjectId(100));
        reg.pump(&mut repl);
        assert!(reg.player_object(Slot(1)).is_none());

        reg.on_client_ready(conn(1), &mut repl).unwrap();

        assert_eq!(reg.player_object(Slot(1)), Some(ObjectId(101)));
    }

    #[test]
    fn test_reset_clears_spawned_map() {
        let (mut reg, mut repl) = setup(0);
        reg.on_client_ready(conn(1), &mut repl).unwrap();

        reg.reset();

        assert!(reg.player_spawner().unwrap().spawned().is_empty());
    }
}
