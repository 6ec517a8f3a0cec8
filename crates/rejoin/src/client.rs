//! Client side of a Rejoin session.
//!
//! [`SessionClient`] dials a server, authenticates, and feeds everything the
//! server sends into a [`SessionMirror`]. Game code reads the roster and
//! ownership from the mirror and subscribes to its events.

use rejoin_protocol::{Codec, Envelope, JsonCodec, SessionMessage};
use rejoin_session::SessionMirror;
use rejoin_transport::{Connection, TransportError, WebSocketConnection};

use rand::Rng;

use crate::RejoinError;

/// A connected client and its view of the session.
pub struct SessionClient {
    conn: WebSocketConnection,
    codec: JsonCodec,
    mirror: SessionMirror,
    seq: u64,
}

impl SessionClient {
    /// Connects to `addr` (`host:port`) as `stable_id`. Nothing is sent
    /// until [`authenticate`](Self::authenticate).
    pub async fn connect(addr: &str, stable_id: impl Into<String>) -> Result<Self, RejoinError> {
        let conn = WebSocketConnection::connect(addr).await?;
        Ok(Self {
            conn,
            codec: JsonCodec,
            mirror: SessionMirror::new(stable_id),
            seq: 1,
        })
    }

    /// Sends `AuthRequest` and applies server messages until the
    /// `AuthResult` arrives. Returns whether the server accepted us.
    ///
    /// # Errors
    /// [`TransportError::ConnectionClosed`] if the server hangs up first.
    pub async fn authenticate(&mut self) -> Result<bool, RejoinError> {
        let stable_id = self.mirror.stable_id().to_owned();
        self.send(SessionMessage::AuthRequest { stable_id }).await?;

        loop {
            match self.recv().await? {
                Some(SessionMessage::AuthResult { accepted }) => return Ok(accepted),
                Some(_) => {}
                None => {
                    return Err(TransportError::ConnectionClosed(
                        "server closed before AuthResult".into(),
                    )
                    .into());
                }
            }
        }
    }

    /// Tells the server this client finished loading.
    pub async fn ready(&mut self) -> Result<(), RejoinError> {
        self.send(SessionMessage::ClientReady).await
    }

    /// Receives the next server message and applies it to the mirror.
    ///
    /// Returns `Ok(None)` once the connection is closed; the mirror has
    /// already raised its local disconnect event by then.
    pub async fn recv(&mut self) -> Result<Option<SessionMessage>, RejoinError> {
        let Some(data) = self.conn.recv().await? else {
            self.mirror.on_disconnected();
            return Ok(None);
        };
        let envelope: Envelope = self.codec.decode(&data)?;
        self.mirror.apply(&envelope.message)?;
        Ok(Some(envelope.message))
    }

    /// This client's view of the session.
    pub fn mirror(&self) -> &SessionMirror {
        &self.mirror
    }

    /// Closes the connection.
    pub async fn close(self) -> Result<(), RejoinError> {
        self.conn.close().await?;
        Ok(())
    }

    async fn send(&mut self, message: SessionMessage) -> Result<(), RejoinError> {
        let envelope = Envelope {
            seq: self.seq,
            message,
        };
        self.seq += 1;
        let bytes = self.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }
}

/// Generates a random 32-character hex identity (128 bits of entropy), for
/// clients that have no account or device id of their own.
pub fn generate_stable_id() -> String {
    let mut rng = rand::rng();
    let bytes: [u8; 16] = rng.random();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
