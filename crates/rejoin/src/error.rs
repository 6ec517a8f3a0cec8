//! Unified error type for Rejoin.

use rejoin_protocol::ProtocolError;
use rejoin_session::{OwnershipError, SessionError};
use rejoin_transport::TransportError;

/// Top-level error that wraps all crate-specific errors.
///
/// When using the `rejoin` meta-crate, you deal with this single error type
/// instead of importing errors from each sub-crate. The `#[from]` attribute
/// on each variant auto-generates `From` impls, so `?` converts sub-crate
/// errors automatically.
#[derive(Debug, thiserror::Error)]
pub enum RejoinError {
    /// A transport-level error (bind, connect, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A protocol-level error (encode, decode, invalid message).
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session-level error (rejected identity, lost connection mapping).
    #[error(transparent)]
    Session(#[from] SessionError),

    /// An ownership request the broker refused.
    #[error(transparent)]
    Ownership(#[from] OwnershipError),

    /// The session actor has stopped and no longer accepts commands.
    #[error("session actor is unavailable")]
    SessionUnavailable,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let rejoin_err: RejoinError = err.into();
        assert!(matches!(rejoin_err, RejoinError::Transport(_)));
        assert!(rejoin_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let rejoin_err: RejoinError = err.into();
        assert!(matches!(rejoin_err, RejoinError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error() {
        let err = SessionError::AuthFailed("nope".into());
        let rejoin_err: RejoinError = err.into();
        assert!(matches!(rejoin_err, RejoinError::Session(_)));
    }

    #[test]
    fn test_from_ownership_error() {
        let err = OwnershipError::UnknownObject(rejoin_protocol::ObjectId(1));
        let rejoin_err: RejoinError = err.into();
        assert!(matches!(rejoin_err, RejoinError::Ownership(_)));
    }
}
