//! End-to-end session scenarios without a network.
//!
//! A registry and one mirror per client are wired together by delivering
//! the registry's outbox by hand, the way the server's actor would.

use std::collections::HashMap;

use rejoin_protocol::{
    ConnectionId, LocalPlayerConnectionState, ObjectId, PlayerConnectionState, SessionMessage,
    Slot,
};
use rejoin_session::{
    LocalReplication, Outbound, PlayerSpawner, Replication, Roster, SessionConfig, SessionMirror,
    SessionRegistry,
};

fn conn(id: u64) -> ConnectionId {
    ConnectionId::new(id)
}

/// A registry, its replication, and the mirrors of every client connection.
struct World {
    registry: SessionRegistry,
    repl: LocalReplication,
    clients: HashMap<ConnectionId, SessionMirror>,
}

impl World {
    fn new(config: SessionConfig) -> Self {
        Self {
            registry: SessionRegistry::new(config),
            repl: LocalReplication::new(),
            clients: HashMap::new(),
        }
    }

    fn deliver(&mut self, outbox: Vec<Outbound>) {
        for Outbound { to, message } in outbox {
            if let Some(mirror) = self.clients.get_mut(&to) {
                mirror.apply(&message).expect("server messages apply cleanly");
            }
        }
    }

    fn connect(&mut self, stable_id: &str, id: u64) {
        self.clients.insert(conn(id), SessionMirror::new(stable_id));
        let outbox = self
            .registry
            .authenticate(stable_id, conn(id))
            .expect("authentication succeeds");
        self.deliver(outbox);
        self.repl.add_observer(conn(id));
        let outbox = self.registry.pump(&mut self.repl);
        self.deliver(outbox);
    }

    fn ready(&mut self, id: u64) {
        let outbox = self
            .registry
            .on_client_ready(conn(id), &mut self.repl)
            .expect("ready from a known connection");
        self.deliver(outbox);
        let outbox = self.registry.pump(&mut self.repl);
        self.deliver(outbox);
    }

    fn disconnect(&mut self, id: u64) {
        if let Some(mut mirror) = self.clients.remove(&conn(id)) {
            mirror.on_disconnected();
        }
        self.repl.remove_observer(conn(id));
        let mut outbox = self.registry.pump(&mut self.repl);
        outbox.extend(
            self.registry
                .on_connection_closed(conn(id), &mut self.repl)
                .expect("closing a known connection"),
        );
        outbox.extend(self.registry.pump(&mut self.repl));
        self.deliver(outbox);
    }

    fn mirror(&self, id: u64) -> &SessionMirror {
        &self.clients[&conn(id)]
    }
}

#[test]
fn test_connect_before_session_then_leave_is_permanent() {
    let mut world = World::new(SessionConfig::default());

    world.connect("abc", 1);
    assert_eq!(world.registry.player_by_stable_id("abc").slot(), Slot(1));
    assert_eq!(world.mirror(1).local_player().slot(), Slot(1));

    world.disconnect(1);
    assert_eq!(world.registry.player_count(), 0);

    world.connect("abc", 2);
    assert_eq!(world.registry.player_by_stable_id("abc").slot(), Slot(2));
    assert!(world.mirror(2).local_player().first_connection());
}

#[test]
fn test_reconnect_during_session_restores_slot_and_objects() {
    let mut world = World::new(SessionConfig::default());
    world.registry.start_session();
    world.connect("abc", 1);

    let outbox = world
        .registry
        .spawn(ObjectId(100), Some(Slot(1)), &mut world.repl)
        .unwrap();
    world.deliver(outbox);
    let outbox = world.registry.pump(&mut world.repl);
    world.deliver(outbox);
    assert_eq!(world.repl.transport_owner(ObjectId(100)), Some(conn(1)));
    assert!(world.mirror(1).local_player().owned_objects().contains(&ObjectId(100)));

    world.disconnect(1);
    let player = world.registry.player(Slot(1));
    assert!(player.is_valid());
    assert_eq!(player.connection(), None);
    assert_eq!(world.repl.transport_owner(ObjectId(100)), None);

    world.connect("abc", 2);
    let local = world.mirror(2).local_player();
    assert_eq!(local.slot(), Slot(1));
    assert!(!local.first_connection());
    assert!(local.owned_objects().contains(&ObjectId(100)));
    assert_eq!(world.mirror(2).owner_of(ObjectId(100)), Some(Slot(1)));
    assert!(!world.registry.player(Slot(1)).first_connection());

    world.ready(2);
    assert_eq!(world.repl.transport_owner(ObjectId(100)), Some(conn(2)));
    assert_eq!(
        world.registry.object(ObjectId(100)).unwrap().owner(),
        Some(Slot(1))
    );
}

#[test]
fn test_late_joiner_learns_existing_owners_in_shared_mode() {
    let mut world = World::new(SessionConfig::default());
    world.connect("a", 1);
    let outbox = world
        .registry
        .spawn(ObjectId(7), Some(Slot(1)), &mut world.repl)
        .unwrap();
    world.deliver(outbox);

    world.connect("b", 2);

    assert_eq!(world.mirror(2).owner_of(ObjectId(7)), Some(Slot(1)));
    assert!(world.mirror(2).local_player().owned_objects().is_empty());
}

#[test]
fn test_player_spawner_gives_one_object_that_survives_reconnect() {
    let mut world = World::new(SessionConfig::default());
    world
        .registry
        .set_player_spawner(PlayerSpawner::new(ObjectId(500)));
    world.registry.start_session();
    world.connect("a", 1);
    world.ready(1);
    world.connect("b", 2);
    world.ready(2);

    assert_eq!(world.registry.player_object(Slot(1)), Some(ObjectId(500)));
    assert_eq!(world.registry.player_object(Slot(2)), Some(ObjectId(501)));
    assert!(world.mirror(1).local_player().owned_objects().contains(&ObjectId(500)));
    assert_eq!(world.mirror(2).owner_of(ObjectId(500)), Some(Slot(1)));

    world.disconnect(1);
    world.connect("a", 3);
    world.ready(3);

    assert!(!world.repl.is_spawned(ObjectId(502)));
    assert_eq!(world.repl.transport_owner(ObjectId(500)), Some(conn(3)));
    assert!(world.mirror(3).local_player().owned_objects().contains(&ObjectId(500)));
}

#[test]
fn test_shared_roster_mirrors_converge() {
    let mut world = World::new(SessionConfig::default());
    world.registry.start_session();
    let mut a_events = {
        world.connect("a", 1);
        world.mirror(1).subscribe_players()
    };

    world.connect("b", 2);

    for id in [1, 2] {
        let slots: Vec<_> = world.mirror(id).players().iter().map(|p| p.slot()).collect();
        assert_eq!(slots, vec![Slot(1), Slot(2)], "client {id} roster");
    }
    let event = a_events.try_recv().unwrap();
    assert_eq!(event.slot, Slot(2));
    assert_eq!(event.state, PlayerConnectionState::Connected);

    world.disconnect(2);
    let b = world.mirror(1).player(Slot(2));
    assert!(b.is_valid());
    assert_eq!(b.connection(), None);

    world.registry.end_session(&mut world.repl);
}

#[test]
fn test_end_session_removes_absent_players_from_mirrors() {
    let mut world = World::new(SessionConfig::default());
    world.registry.start_session();
    world.connect("a", 1);
    world.connect("b", 2);
    world.disconnect(2);

    let outbox = world.registry.end_session(&mut world.repl);
    world.deliver(outbox);

    assert!(!world.mirror(1).player(Slot(2)).is_valid());
    assert_eq!(world.mirror(1).player_count(), 1);
}

#[test]
fn test_owner_only_clients_see_only_themselves() {
    let mut world = World::new(SessionConfig {
        share_ids: false,
        ..SessionConfig::default()
    });
    world.connect("a", 1);
    world.connect("b", 2);

    assert_eq!(world.mirror(1).player_count(), 1);
    assert_eq!(world.mirror(2).player_count(), 1);
    assert_eq!(world.mirror(2).local_player().slot(), Slot(2));
}

#[test]
fn test_duplicate_login_is_rejected_without_side_effects() {
    let mut world = World::new(SessionConfig::default());
    world.connect("abc", 1);
    let outbox = world
        .registry
        .spawn(ObjectId(1), Some(Slot(1)), &mut world.repl)
        .unwrap();
    world.deliver(outbox);

    let mut intruder = SessionMirror::new("abc");
    let mut local = intruder.subscribe_local();
    let result = world.registry.authenticate("abc", conn(2));

    assert!(result.is_err());
    assert!(intruder.apply(&SessionMessage::AuthResult { accepted: false }).is_ok());
    assert!(local.try_recv().is_err());
    let player = world.registry.player(Slot(1));
    assert_eq!(player.connection(), Some(conn(1)));
    assert!(player.owned_objects().contains(&ObjectId(1)));
    assert_eq!(
        world.mirror(1).local_player().slot(),
        Slot(1),
        "existing client is untouched"
    );
}

#[test]
fn test_local_disconnect_event_on_mirror() {
    let mut mirror = SessionMirror::new("abc");
    let mut rx = mirror.subscribe_local();
    mirror
        .apply(&SessionMessage::PlayerIdentityAssigned {
            slot: Slot(4),
            connection: conn(9),
            reconnected: false,
        })
        .unwrap();

    mirror.on_disconnected();

    let states: Vec<_> = std::iter::from_fn(|| rx.try_recv().ok())
        .map(|e| e.state)
        .collect();
    assert_eq!(
        states,
        vec![
            LocalPlayerConnectionState::Connected,
            LocalPlayerConnectionState::Disconnected,
        ]
    );
}
