//! Error types for the protocol layer.
//!
//! Each crate in Rejoin defines its own error enum. A `ProtocolError` always
//! means "the bytes or the message shape were wrong", never "the session
//! state was wrong"; that is `SessionError`'s job.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields, an unknown
    /// message `type` tag, or truncated frames.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The message decoded fine but violates protocol rules, e.g. a roster
    /// snapshot whose slot and connection arrays differ in length.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}
