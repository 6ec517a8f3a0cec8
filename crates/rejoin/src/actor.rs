//! Session actor: the one Tokio task that owns the registry.
//!
//! Connection handlers never lock the registry. They send commands through
//! an mpsc channel and the actor applies them one at a time, so the order
//! in which the registry sees connects, disconnects and ownership requests
//! is exactly the order they arrived in. Messages the registry produces are
//! routed back to each connection's handler through its own unbounded
//! channel.

use std::collections::{HashMap, HashSet};
use std::ops::ControlFlow;

use rejoin_protocol::{ConnectionId, ObjectId, SessionMessage, Slot};
use rejoin_session::{
    OwnershipError, OwnershipEvent, Outbound, PlayerConnectionEvent, PlayerSpawnedEvent,
    PlayerSpawner, Replication, Roster, SessionConfig, SessionError, SessionEvent, SessionPlayer,
    SessionRegistry,
};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::RejoinError;

/// What the actor asks a connection handler to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Outgoing {
    /// Encode and send this message.
    Message(SessionMessage),
    /// Close the connection after everything queued before it.
    Close,
}

/// Channel sender for delivering outgoing messages to one connection.
pub(crate) type ConnectionSender = mpsc::UnboundedSender<Outgoing>;

/// Receivers for every registry event stream.
#[derive(Debug)]
pub struct Subscriptions {
    pub players: broadcast::Receiver<PlayerConnectionEvent>,
    pub session: broadcast::Receiver<SessionEvent>,
    pub ownership: broadcast::Receiver<OwnershipEvent>,
    pub spawned: broadcast::Receiver<PlayerSpawnedEvent>,
}

/// Commands sent to the session actor through its channel.
pub(crate) enum SessionCommand {
    /// A transport connection was accepted.
    Open {
        connection: ConnectionId,
        sender: ConnectionSender,
    },
    /// The authenticator finished for `connection`.
    AuthResolved {
        connection: ConnectionId,
        result: Result<String, SessionError>,
    },
    /// A transport connection closed.
    Closed { connection: ConnectionId },
    /// The client on `connection` finished loading.
    ClientReady { connection: ConnectionId },

    StartSession {
        reply: oneshot::Sender<bool>,
    },
    EndSession {
        reply: oneshot::Sender<()>,
    },

    Spawn {
        object: ObjectId,
        owner: Option<Slot>,
        reply: oneshot::Sender<Result<(), OwnershipError>>,
    },
    Grant {
        object: ObjectId,
        owner: Option<Slot>,
        rebuild_observers: bool,
        reply: oneshot::Sender<Result<(), OwnershipError>>,
    },
    Revoke {
        object: ObjectId,
        reply: oneshot::Sender<Result<(), OwnershipError>>,
    },

    Players {
        reply: oneshot::Sender<Vec<SessionPlayer>>,
    },
    PlayerByConnection {
        connection: ConnectionId,
        reply: oneshot::Sender<SessionPlayer>,
    },
    ObjectOwner {
        object: ObjectId,
        reply: oneshot::Sender<Option<Slot>>,
    },
    TransportOwner {
        object: ObjectId,
        reply: oneshot::Sender<Option<ConnectionId>>,
    },
    PlayerObject {
        slot: Slot,
        reply: oneshot::Sender<Option<ObjectId>>,
    },
    Subscribe {
        reply: oneshot::Sender<Subscriptions>,
    },

    /// Stop the actor.
    Shutdown,
}

/// Handle to the running session actor.
///
/// Cheap to clone: it is just an `mpsc::Sender` wrapper. Every method fails
/// with [`RejoinError::SessionUnavailable`] once the actor has stopped.
#[derive(Clone)]
pub struct SessionHandle {
    sender: mpsc::Sender<SessionCommand>,
}

impl SessionHandle {
    async fn send(&self, command: SessionCommand) -> Result<(), RejoinError> {
        self.sender
            .send(command)
            .await
            .map_err(|_| RejoinError::SessionUnavailable)
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> SessionCommand,
    ) -> Result<T, RejoinError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(command(reply_tx)).await?;
        reply_rx.await.map_err(|_| RejoinError::SessionUnavailable)
    }

    // -- Connection plumbing (used by the handler) ---------------------------

    pub(crate) async fn open(
        &self,
        connection: ConnectionId,
        sender: ConnectionSender,
    ) -> Result<(), RejoinError> {
        self.send(SessionCommand::Open { connection, sender }).await
    }

    pub(crate) async fn auth_resolved(
        &self,
        connection: ConnectionId,
        result: Result<String, SessionError>,
    ) -> Result<(), RejoinError> {
        self.send(SessionCommand::AuthResolved { connection, result })
            .await
    }

    pub(crate) async fn closed(&self, connection: ConnectionId) -> Result<(), RejoinError> {
        self.send(SessionCommand::Closed { connection }).await
    }

    pub(crate) async fn client_ready(&self, connection: ConnectionId) -> Result<(), RejoinError> {
        self.send(SessionCommand::ClientReady { connection }).await
    }

    // -- Session lifecycle ---------------------------------------------------

    /// Starts a session. Returns `false` if one was already running.
    pub async fn start_session(&self) -> Result<bool, RejoinError> {
        self.request(|reply| SessionCommand::StartSession { reply })
            .await
    }

    /// Ends the session, removing every player that is still away.
    pub async fn end_session(&self) -> Result<(), RejoinError> {
        self.request(|reply| SessionCommand::EndSession { reply })
            .await
    }

    // -- Ownership -----------------------------------------------------------

    /// Spawns `object` owned by the player in `owner` (or by nobody).
    pub async fn spawn(&self, object: ObjectId, owner: Option<Slot>) -> Result<(), RejoinError> {
        self.request(|reply| SessionCommand::Spawn {
            object,
            owner,
            reply,
        })
        .await??;
        Ok(())
    }

    /// Makes the player in `owner` the owner of `object`.
    pub async fn grant(
        &self,
        object: ObjectId,
        owner: Option<Slot>,
        rebuild_observers: bool,
    ) -> Result<(), RejoinError> {
        self.request(|reply| SessionCommand::Grant {
            object,
            owner,
            rebuild_observers,
            reply,
        })
        .await??;
        Ok(())
    }

    /// Clears every owner of `object`.
    pub async fn revoke(&self, object: ObjectId) -> Result<(), RejoinError> {
        self.request(|reply| SessionCommand::Revoke { object, reply })
            .await??;
        Ok(())
    }

    // -- Queries -------------------------------------------------------------

    /// A copy of every registered player, in slot order.
    pub async fn players(&self) -> Result<Vec<SessionPlayer>, RejoinError> {
        self.request(|reply| SessionCommand::Players { reply })
            .await
    }

    /// A copy of the player on `connection` (the empty player on a miss).
    pub async fn player_by_connection(
        &self,
        connection: ConnectionId,
    ) -> Result<SessionPlayer, RejoinError> {
        self.request(|reply| SessionCommand::PlayerByConnection { connection, reply })
            .await
    }

    /// Session-level owner of `object`.
    pub async fn object_owner(&self, object: ObjectId) -> Result<Option<Slot>, RejoinError> {
        self.request(|reply| SessionCommand::ObjectOwner { object, reply })
            .await
    }

    /// Transport-level owner of `object`, as the replication system sees it.
    pub async fn transport_owner(
        &self,
        object: ObjectId,
    ) -> Result<Option<ConnectionId>, RejoinError> {
        self.request(|reply| SessionCommand::TransportOwner { object, reply })
            .await
    }

    /// The object the player spawner gave the player in `slot`, if any.
    pub async fn player_object(&self, slot: Slot) -> Result<Option<ObjectId>, RejoinError> {
        self.request(|reply| SessionCommand::PlayerObject { slot, reply })
            .await
    }

    /// Subscribes to the registry's event streams.
    pub async fn subscribe(&self) -> Result<Subscriptions, RejoinError> {
        self.request(|reply| SessionCommand::Subscribe { reply })
            .await
    }

    /// Tells the actor to stop.
    pub async fn shutdown(&self) -> Result<(), RejoinError> {
        self.send(SessionCommand::Shutdown).await
    }

    /// Resolves once the actor has stopped.
    pub async fn stopped(&self) {
        self.sender.closed().await;
    }
}

/// The internal actor state. Runs inside a Tokio task.
struct SessionActor<R> {
    registry: SessionRegistry,
    repl: R,
    /// Per-connection outgoing channels, for every open connection.
    senders: HashMap<ConnectionId, ConnectionSender>,
    /// Connections the registry has bound to a player.
    authenticated: HashSet<ConnectionId>,
    disconnect_on_rejection: bool,
    receiver: mpsc::Receiver<SessionCommand>,
}

impl<R: Replication> SessionActor<R> {
    /// Runs the actor loop, processing commands until shutdown or until the
    /// registry reports that it lost track of a connection.
    async fn run(mut self) {
        tracing::info!("session actor started");

        while let Some(command) = self.receiver.recv().await {
            match self.handle(command) {
                Ok(ControlFlow::Continue(())) => {}
                Ok(ControlFlow::Break(())) => {
                    tracing::info!("session actor shutting down");
                    break;
                }
                Err(e) => {
                    tracing::error!(error = %e, "session registry out of sync with transport, stopping");
                    break;
                }
            }
        }

        self.registry.reset();
        tracing::info!("session actor stopped");
    }

    fn handle(&mut self, command: SessionCommand) -> Result<ControlFlow<()>, SessionError> {
        match command {
            SessionCommand::Open { connection, sender } => {
                self.senders.insert(connection, sender);
                tracing::debug!(%connection, "connection opened");
            }

            SessionCommand::AuthResolved { connection, result } => {
                self.handle_auth_resolved(connection, result);
            }

            SessionCommand::Closed { connection } => {
                self.senders.remove(&connection);
                if !self.authenticated.remove(&connection) {
                    tracing::debug!(%connection, "unauthenticated connection closed");
                    return Ok(ControlFlow::Continue(()));
                }
                self.repl.connection_lost(connection);
                self.pump();
                let outbox = self
                    .registry
                    .on_connection_closed(connection, &mut self.repl)?;
                self.deliver(outbox);
                self.pump();
            }

            SessionCommand::ClientReady { connection } => {
                if !self.authenticated.contains(&connection) {
                    tracing::debug!(%connection, "ClientReady before authentication ignored");
                    return Ok(ControlFlow::Continue(()));
                }
                self.repl.connection_ready(connection);
                let outbox = self.registry.on_client_ready(connection, &mut self.repl)?;
                self.deliver(outbox);
                self.pump();
            }

            SessionCommand::StartSession { reply } => {
                let _ = reply.send(self.registry.start_session());
            }

            SessionCommand::EndSession { reply } => {
                let outbox = self.registry.end_session(&mut self.repl);
                self.deliver(outbox);
                self.pump();
                let _ = reply.send(());
            }

            SessionCommand::Spawn {
                object,
                owner,
                reply,
            } => {
                let result = self.registry.spawn(object, owner, &mut self.repl);
                let _ = reply.send(self.settle(result));
            }

            SessionCommand::Grant {
                object,
                owner,
                rebuild_observers,
                reply,
            } => {
                let result =
                    self.registry
                        .grant(object, owner, rebuild_observers, &mut self.repl);
                let _ = reply.send(self.settle(result));
            }

            SessionCommand::Revoke { object, reply } => {
                let result = self.registry.revoke(object, &mut self.repl);
                let _ = reply.send(self.settle(result));
            }

            SessionCommand::Players { reply } => {
                let players = self.registry.players().into_iter().cloned().collect();
                let _ = reply.send(players);
            }

            SessionCommand::PlayerByConnection { connection, reply } => {
                let _ = reply.send(self.registry.player_by_connection(connection).clone());
            }

            SessionCommand::ObjectOwner { object, reply } => {
                let owner = self.registry.object(object).and_then(|o| o.owner());
                let _ = reply.send(owner);
            }

            SessionCommand::TransportOwner { object, reply } => {
                let _ = reply.send(self.repl.transport_owner(object));
            }

            SessionCommand::PlayerObject { slot, reply } => {
                let _ = reply.send(self.registry.player_object(slot));
            }

            SessionCommand::Subscribe { reply } => {
                let _ = reply.send(Subscriptions {
                    players: self.registry.subscribe_players(),
                    session: self.registry.subscribe_session(),
                    ownership: self.registry.subscribe_ownership(),
                    spawned: self.registry.subscribe_spawned(),
                });
            }

            SessionCommand::Shutdown => return Ok(ControlFlow::Break(())),
        }
        Ok(ControlFlow::Continue(()))
    }

    fn handle_auth_resolved(
        &mut self,
        connection: ConnectionId,
        result: Result<String, SessionError>,
    ) {
        if !self.senders.contains_key(&connection) {
            tracing::debug!(%connection, "authentication finished after disconnect, discarding");
            return;
        }

        let outcome =
            result.and_then(|stable_id| self.registry.authenticate(&stable_id, connection));

        match outcome {
            Ok(outbox) => {
                self.authenticated.insert(connection);
                self.deliver(outbox);
                self.pump();
            }
            Err(e) => {
                tracing::warn!(%connection, error = %e, "authentication rejected");
                self.send_to(
                    connection,
                    Outgoing::Message(SessionMessage::AuthResult { accepted: false }),
                );
                if self.disconnect_on_rejection {
                    self.send_to(connection, Outgoing::Close);
                }
            }
        }
    }

    /// Delivers an ownership call's outbox plus whatever replication
    /// reported in response, and strips the outbox from the reply.
    fn settle(
        &mut self,
        result: Result<Vec<Outbound>, OwnershipError>,
    ) -> Result<(), OwnershipError> {
        let outbox = result?;
        self.deliver(outbox);
        self.pump();
        Ok(())
    }

    fn pump(&mut self) {
        let outbox = self.registry.pump(&mut self.repl);
        self.deliver(outbox);
    }

    fn deliver(&self, outbox: Vec<Outbound>) {
        for Outbound { to, message } in outbox {
            self.send_to(to, Outgoing::Message(message));
        }
    }

    /// Sends to one connection's handler. Silently drops if the handler is
    /// gone (connection closed).
    fn send_to(&self, connection: ConnectionId, outgoing: Outgoing) {
        if let Some(sender) = self.senders.get(&connection) {
            let _ = sender.send(outgoing);
        }
    }
}

/// Spawns the session actor and returns a handle to it.
///
/// `channel_size` bounds the command queue; when it fills up, senders wait.
pub(crate) fn spawn_session<R>(
    config: SessionConfig,
    repl: R,
    spawner: Option<PlayerSpawner>,
    disconnect_on_rejection: bool,
    channel_size: usize,
) -> SessionHandle
where
    R: Replication + Send + 'static,
{
    let (tx, rx) = mpsc::channel(channel_size);

    let mut registry = SessionRegistry::new(config);
    if let Some(spawner) = spawner {
        registry.set_player_spawner(spawner);
    }

    let actor = SessionActor {
        registry,
        repl,
        senders: HashMap::new(),
        authenticated: HashSet::new(),
        disconnect_on_rejection,
        receiver: rx,
    };

    tokio::spawn(actor.run());

    SessionHandle { sender: tx }
}

// =========================================================================
// Tests
// =========================================================================

#[cfg(test)]
mod tests {
    //! Drives the actor directly through its handle, with plain channels
    //! standing in for connection handlers.

    use std::time::Duration;

    use rejoin_protocol::PlayerConnectionState;
    use rejoin_session::LocalReplication;

    use super::*;

    fn conn(id: u64) -> ConnectionId {
        ConnectionId::new(id)
    }

    fn start(config: SessionConfig) -> SessionHandle {
        spawn_session(config, LocalReplication::new(), None, true, 64)
    }

    /// Opens a connection and returns the receiving end of its channel.
    async fn open(handle: &SessionHandle, id: u64) -> mpsc::UnboundedReceiver<Outgoing> {
        let (tx, rx) = mpsc::unbounded_channel();
        handle.open(conn(id), tx).await.unwrap();
        rx
    }

    /// Receives until `AuthResult`, returning everything seen.
    async fn until_auth_result(rx: &mut mpsc::UnboundedReceiver<Outgoing>) -> Vec<Outgoing> {
        let mut seen = Vec::new();
        loop {
            let next = tokio::time::timeout(Duration::from_secs(1), rx.recv())
                .await
                .expect("actor should answer")
                .expect("channel open");
            let done = matches!(
                next,
                Outgoing::Message(SessionMessage::AuthResult { .. })
            );
            seen.push(next);
            if done {
                return seen;
            }
        }
    }

    #[tokio::test]
    async fn test_auth_resolved_accepts_and_assigns_identity() {
        let handle = start(SessionConfig::default());
        let mut rx = open(&handle, 1).await;

        handle.auth_resolved(conn(1), Ok("abc".into())).await.unwrap();
        let seen = until_auth_result(&mut rx).await;

        assert!(seen.contains(&Outgoing::Message(SessionMessage::PlayerIdentityAssigned {
            slot: Slot(1),
            connection: conn(1),
            reconnected: false,
        })));
        assert_eq!(
            seen.last(),
            Some(&Outgoing::Message(SessionMessage::AuthResult { accepted: true }))
        );
    }

    #[tokio::test]
    async fn test_auth_resolved_rejection_sends_result_then_close() {
        let handle = start(SessionConfig::default());
        let mut rx = open(&handle, 1).await;

        handle
            .auth_resolved(conn(1), Err(SessionError::AuthFailed("banned".into())))
            .await
            .unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outgoing::Message(SessionMessage::AuthResult { accepted: false }))
        );
        assert_eq!(rx.recv().await, Some(Outgoing::Close));
    }

    #[tokio::test]
    async fn test_auth_resolved_after_close_is_discarded() {
        let handle = start(SessionConfig::default());
        let _rx = open(&handle, 1).await;
        handle.closed(conn(1)).await.unwrap();

        handle.auth_resolved(conn(1), Ok("abc".into())).await.unwrap();

        assert!(handle.players().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_closed_during_session_keeps_player() {
        let handle = start(SessionConfig::default());
        handle.start_session().await.unwrap();
        let mut rx = open(&handle, 1).await;
        handle.auth_resolved(conn(1), Ok("abc".into())).await.unwrap();
        until_auth_result(&mut rx).await;
        let mut subs = handle.subscribe().await.unwrap();

        handle.closed(conn(1)).await.unwrap();

        let event = tokio::time::timeout(Duration::from_secs(1), subs.players.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.state, PlayerConnectionState::TemporarilyDisconnected);
        let players = handle.players().await.unwrap();
        assert_eq!(players.len(), 1);
        assert_eq!(players[0].connection(), None);
    }

    #[tokio::test]
    async fn test_spawn_and_grant_through_handle() {
        let handle = start(SessionConfig::default());
        let mut rx = open(&handle, 1).await;
        handle.auth_resolved(conn(1), Ok("abc".into())).await.unwrap();
        until_auth_result(&mut rx).await;

        handle.spawn(ObjectId(5), None).await.unwrap();
        handle.grant(ObjectId(5), Some(Slot(1)), true).await.unwrap();

        assert_eq!(handle.object_owner(ObjectId(5)).await.unwrap(), Some(Slot(1)));
        assert_eq!(
            handle.transport_owner(ObjectId(5)).await.unwrap(),
            Some(conn(1))
        );
        assert_eq!(
            rx.recv().await,
            Some(Outgoing::Message(SessionMessage::ObjectOwnerChanged {
                object: ObjectId(5),
                owner: Some(Slot(1)),
            }))
        );
    }

    #[tokio::test]
    async fn test_client_ready_with_spawner_delivers_player_object() {
        let handle = spawn_session(
            SessionConfig::default(),
            LocalReplication::new(),
            Some(PlayerSpawner::new(ObjectId(50))),
            true,
            64,
        );
        let mut subs = handle.subscribe().await.unwrap();
        let mut rx = open(&handle, 1).await;
        handle.auth_resolved(conn(1), Ok("abc".into())).await.unwrap();
        until_auth_result(&mut rx).await;

        handle.client_ready(conn(1)).await.unwrap();

        assert_eq!(
            rx.recv().await,
            Some(Outgoing::Message(SessionMessage::ObjectOwnerChanged {
                object: ObjectId(50),
                owner: Some(Slot(1)),
            }))
        );
        let event = subs.spawned.recv().await.unwrap();
        assert_eq!(event.slot, Slot(1));
        assert_eq!(handle.player_object(Slot(1)).await.unwrap(), Some(ObjectId(50)));
        assert_eq!(
            handle.transport_owner(ObjectId(50)).await.unwrap(),
            Some(conn(1))
        );
    }

    #[tokio::test]
    async fn test_grant_unknown_object_returns_ownership_error() {
        let handle = start(SessionConfig::default());

        let result = handle.grant(ObjectId(9), None, true).await;

        assert!(matches!(
            result,
            Err(RejoinError::Ownership(OwnershipError::UnknownObject(_)))
        ));
    }

    #[tokio::test]
    async fn test_shutdown_makes_handle_unavailable() {
        let handle = start(SessionConfig::default());

        handle.shutdown().await.unwrap();
        handle.stopped().await;

        assert!(matches!(
            handle.players().await,
            Err(RejoinError::SessionUnavailable)
        ));
    }
}
