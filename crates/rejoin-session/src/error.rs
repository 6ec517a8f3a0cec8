//! Error types for the session layer.

use rejoin_protocol::{ConnectionId, ObjectId, ProtocolError, Slot};

/// Errors raised by the registry, the mirror, and authenticators.
///
/// Everything except [`SessionError::UnknownConnection`] is recoverable:
/// the caller rejects the request and carries on. `UnknownConnection` means
/// the registry's maps no longer agree with the transport, and the server
/// stops rather than keep serving from a corrupt roster.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The [`Authenticator`](crate::Authenticator) rejected the identity.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// The declared identity was empty or whitespace only.
    #[error("identity must not be empty")]
    EmptyIdentity,

    /// The identity is already bound to a live connection.
    /// The existing player keeps its connection and objects.
    #[error("player {0} is already connected")]
    AlreadyConnected(Slot),

    /// The connection is already bound to another player.
    #[error("{0} is already bound to a player")]
    ConnectionInUse(ConnectionId),

    /// A connection the registry was told about has no player.
    #[error("no player is bound to {0}")]
    UnknownConnection(ConnectionId),

    /// The mirror received a message it cannot apply.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

impl SessionError {
    /// Returns `true` for errors that mean the registry lost track of a
    /// connection. The server actor stops on these.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::UnknownConnection(_))
    }
}

/// Errors raised by the ownership broker.
#[derive(Debug, thiserror::Error)]
pub enum OwnershipError {
    /// The object was never registered with the broker (or was already
    /// forgotten after leaving the network).
    #[error("object {0} is not registered")]
    UnknownObject(ObjectId),

    /// The object is already registered or already spawned.
    #[error("object {0} is already registered")]
    AlreadyRegistered(ObjectId),
}
