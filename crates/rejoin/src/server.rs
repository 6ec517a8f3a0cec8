//! `RejoinServer` builder and server loop.
//!
//! This is the entry point for running a Rejoin session server. It ties
//! together all the layers: transport → protocol → session actor.

use std::sync::Arc;
use std::time::Duration;

use rejoin_protocol::{Codec, JsonCodec};
use rejoin_session::{Authenticator, LocalReplication, PlayerSpawner, Replication, SessionConfig};
use rejoin_transport::{Transport, WebSocketTransport};

use crate::RejoinError;
use crate::actor::{SessionHandle, spawn_session};
use crate::handler::handle_connection;

/// Server-level settings. Session behavior lives in [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub bind: String,
    /// Close connections whose authentication was rejected.
    pub disconnect_on_rejection: bool,
    /// How long a new connection has to send its `AuthRequest`.
    pub handshake_timeout: Duration,
    /// Close a connection that sends nothing for this long. `None` keeps
    /// quiet connections open.
    pub idle_timeout: Option<Duration>,
    /// Capacity of the session actor's command queue.
    pub channel_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:8080".to_string(),
            disconnect_on_rejection: true,
            handshake_timeout: Duration::from_secs(5),
            idle_timeout: None,
            channel_size: 64,
        }
    }
}

/// Shared server state passed to each connection handler task.
///
/// Wrapped in `Arc` so it can be cheaply cloned across tasks. There is no
/// lock in here: all session state sits behind the actor's handle.
pub(crate) struct ServerState<A: Authenticator, C: Codec> {
    pub(crate) session: SessionHandle,
    pub(crate) auth: A,
    pub(crate) codec: C,
    pub(crate) config: ServerConfig,
}

/// Builder for configuring and starting a Rejoin server.
///
/// # Example
///
/// ```rust,ignore
/// use rejoin::prelude::*;
///
/// let server = RejoinServer::<PassthroughAuthenticator>::builder()
///     .bind("0.0.0.0:8080")
///     .session_config(SessionConfig { share_ids: false, ..Default::default() })
///     .build(PassthroughAuthenticator)
///     .await?;
/// server.run().await
/// ```
pub struct RejoinServerBuilder {
    config: ServerConfig,
    session_config: SessionConfig,
    player_spawner: Option<PlayerSpawner>,
}

impl RejoinServerBuilder {
    /// Creates a new builder with default settings.
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            session_config: SessionConfig::default(),
            player_spawner: None,
        }
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind = addr.to_string();
        self
    }

    /// Sets the session configuration.
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session_config = config;
        self
    }

    /// Gives every player an object of its own once its client is ready.
    pub fn player_spawner(mut self, spawner: PlayerSpawner) -> Self {
        self.player_spawner = Some(spawner);
        self
    }

    pub fn disconnect_on_rejection(mut self, enabled: bool) -> Self {
        self.config.disconnect_on_rejection = enabled;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.idle_timeout = timeout;
        self
    }

    /// Sets the session actor's command queue capacity.
    pub fn channel_size(mut self, size: usize) -> Self {
        self.config.channel_size = size.max(1);
        self
    }

    /// Builds and starts the server with the given authenticator.
    ///
    /// Objects are tracked by an in-process [`LocalReplication`]; use
    /// [`build_with_replication`](Self::build_with_replication) to plug in
    /// a real replication system.
    pub async fn build<A: Authenticator>(
        self,
        auth: A,
    ) -> Result<RejoinServer<A, JsonCodec>, RejoinError> {
        self.build_with_replication(auth, LocalReplication::new())
            .await
    }

    /// Builds and starts the server, handing ownership requests to `repl`.
    pub async fn build_with_replication<A, R>(
        self,
        auth: A,
        repl: R,
    ) -> Result<RejoinServer<A, JsonCodec>, RejoinError>
    where
        A: Authenticator,
        R: Replication + Send + 'static,
    {
        let transport = WebSocketTransport::bind(&self.config.bind).await?;

        let session = spawn_session(
            self.session_config,
            repl,
            self.player_spawner,
            self.config.disconnect_on_rejection,
            self.config.channel_size,
        );

        let state = Arc::new(ServerState {
            session,
            auth,
            codec: JsonCodec,
            config: self.config,
        });

        Ok(RejoinServer { transport, state })
    }
}

impl Default for RejoinServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Rejoin session server.
///
/// Call [`run()`](Self::run) to start accepting connections. Control the
/// session (start/end, spawn, grant) through [`session()`](Self::session).
pub struct RejoinServer<A: Authenticator, C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    state: Arc<ServerState<A, C>>,
}

impl<A, C> RejoinServer<A, C>
where
    A: Authenticator,
    C: Codec,
{
    /// Creates a new builder.
    pub fn builder() -> RejoinServerBuilder {
        RejoinServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.transport.local_addr()
    }

    /// A handle to the session actor. Stays valid after `run()` takes the
    /// server.
    pub fn session(&self) -> SessionHandle {
        self.state.session.clone()
    }

    /// Runs the server accept loop.
    ///
    /// Spawns a handler task per accepted connection. Returns
    /// [`RejoinError::SessionUnavailable`] once the session actor stops.
    pub async fn run(mut self) -> Result<(), RejoinError> {
        tracing::info!(bind = %self.state.config.bind, "Rejoin server running");

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = self.state.session.stopped() => {
                    tracing::info!("session actor stopped, server exiting");
                    return Err(RejoinError::SessionUnavailable);
                }
            }
        }
    }
}
