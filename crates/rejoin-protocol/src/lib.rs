//! Wire protocol for Rejoin.
//!
//! This crate defines what the session registry (server) and the session
//! mirror (client) say to each other:
//!
//! - **Types** ([`SessionMessage`], [`Envelope`], [`Slot`], [`ObjectId`],
//!   the connection-state enums): the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]): how those structures are
//!   converted to/from bytes.
//! - **Errors** ([`ProtocolError`]).
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (registry / mirror)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use rejoin_transport::ConnectionId;
pub use types::{
    Envelope, LocalPlayerConnectionState, ObjectId, PlayerConnectionState,
    SessionMessage, Slot, roster_entries,
};
