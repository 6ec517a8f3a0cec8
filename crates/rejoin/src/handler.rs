//! Per-connection handler: auth handshake and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Register the connection with the session actor
//!   2. Receive `AuthRequest` → run the authenticator on a separate task
//!   3. Loop: forward `ClientReady` to the actor, write whatever the actor
//!      routes to this connection
//!
//! The handler never decides who a player is. It only moves frames between
//! the socket and the actor.

use std::sync::Arc;
use std::time::Duration;

use rejoin_protocol::{Codec, ConnectionId, Envelope, ProtocolError, SessionMessage};
use rejoin_session::Authenticator;
use rejoin_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;

use crate::RejoinError;
use crate::actor::{Outgoing, SessionHandle};
use crate::server::ServerState;

/// Drop guard that reports the connection closed when the handler exits.
///
/// This ensures cleanup happens even if the handler panics. Since `Drop`
/// is synchronous, we spawn a fire-and-forget task to reach the actor.
struct CloseGuard {
    connection: ConnectionId,
    session: SessionHandle,
}

impl Drop for CloseGuard {
    fn drop(&mut self) {
        let connection = self.connection;
        let session = self.session.clone();
        tokio::spawn(async move {
            let _ = session.closed(connection).await;
        });
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<A, C>(
    conn: WebSocketConnection,
    state: Arc<ServerState<A, C>>,
) -> Result<(), RejoinError>
where
    A: Authenticator,
    C: Codec,
{
    let connection = conn.id();
    tracing::debug!(%connection, "handling new connection");

    let (tx, mut rx) = mpsc::unbounded_channel();
    state.session.open(connection, tx).await?;
    let _guard = CloseGuard {
        connection,
        session: state.session.clone(),
    };

    // --- Step 1: AuthRequest ---
    let identity = match receive_auth_request(&conn, &state).await {
        Ok(identity) => identity,
        Err(e) => {
            let _ = conn.close().await;
            return Err(e);
        }
    };

    let auth_state = Arc::clone(&state);
    tokio::spawn(async move {
        let result = auth_state.auth.authenticate(&identity).await;
        if auth_state
            .session
            .auth_resolved(connection, result)
            .await
            .is_err()
        {
            tracing::debug!(%connection, "session actor gone before authentication finished");
        }
    });

    // --- Step 2: Message loop ---
    let mut seq: u64 = 1;

    loop {
        tokio::select! {
            received = recv_frame(&conn, state.config.idle_timeout) => {
                let data = match received {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%connection, "connection closed cleanly");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%connection, error = %e, "connection ended");
                        break;
                    }
                };

                let envelope: Envelope = match state.codec.decode(&data) {
                    Ok(env) => env,
                    Err(e) => {
                        tracing::debug!(%connection, error = %e, "failed to decode envelope");
                        continue;
                    }
                };

                match envelope.message {
                    SessionMessage::ClientReady => {
                        state.session.client_ready(connection).await?;
                    }
                    other => {
                        tracing::debug!(%connection, message = ?other, "ignoring unexpected message");
                    }
                }
            }

            outgoing = rx.recv() => match outgoing {
                Some(Outgoing::Message(message)) => {
                    let envelope = Envelope { seq: next_seq(&mut seq), message };
                    let bytes = state.codec.encode(&envelope)?;
                    conn.send(&bytes).await?;
                }
                Some(Outgoing::Close) | None => {
                    tracing::info!(%connection, "closing connection");
                    let _ = conn.close().await;
                    break;
                }
            },
        }
    }

    // _guard drops here → the actor hears about the close.
    Ok(())
}

/// Waits for the first frame, which must be an `AuthRequest`, and returns
/// the identity it carries.
async fn receive_auth_request<A, C>(
    conn: &WebSocketConnection,
    state: &ServerState<A, C>,
) -> Result<String, RejoinError>
where
    A: Authenticator,
    C: Codec,
{
    let data = match tokio::time::timeout(state.config.handshake_timeout, conn.recv()).await {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => {
            return Err(ProtocolError::InvalidMessage(
                "connection closed before AuthRequest".into(),
            )
            .into());
        }
        Ok(Err(e)) => return Err(RejoinError::Transport(e)),
        Err(_) => {
            return Err(ProtocolError::InvalidMessage("AuthRequest timed out".into()).into());
        }
    };

    let envelope: Envelope = state.codec.decode(&data)?;

    match envelope.message {
        SessionMessage::AuthRequest { stable_id } => Ok(stable_id),
        other => {
            tracing::debug!(connection = %conn.id(), message = ?other, "first message was not AuthRequest");
            Err(ProtocolError::InvalidMessage("first message must be AuthRequest".into()).into())
        }
    }
}

/// Receives one frame, giving up after `idle` if set.
async fn recv_frame(
    conn: &WebSocketConnection,
    idle: Option<Duration>,
) -> Result<Option<Vec<u8>>, RejoinError> {
    match idle {
        Some(limit) => match tokio::time::timeout(limit, conn.recv()).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(ProtocolError::InvalidMessage("connection idle too long".into()).into()),
        },
        None => Ok(conn.recv().await?),
    }
}

/// Increments and returns the next sequence number.
fn next_seq(seq: &mut u64) -> u64 {
    let current = *seq;
    *seq += 1;
    current
}
