//! # Rejoin
//!
//! Reconnect-aware player identity and object ownership for multiplayer
//! servers.
//!
//! Players authenticate with a stable identity and get a dense slot that
//! survives dropped connections. Objects belong to slots, so a player who
//! comes back during a session gets back everything it owned. Clients keep
//! a mirror of the roster that the server keeps in sync.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use rejoin::prelude::*;
//!
//! # async fn run() -> Result<(), RejoinError> {
//! let server = RejoinServer::<PassthroughAuthenticator>::builder()
//!     .bind("0.0.0.0:8080")
//!     .build(PassthroughAuthenticator)
//!     .await?;
//!
//! let session = server.session();
//! tokio::spawn(server.run());
//!
//! // Once everyone is in:
//! session.start_session().await?;
//! # Ok(())
//! # }
//! ```

mod actor;
pub mod client;
mod error;
mod handler;
mod server;

pub use actor::{SessionHandle, Subscriptions};
pub use error::RejoinError;
pub use server::{RejoinServer, RejoinServerBuilder, ServerConfig};

pub mod prelude {
    //! Everything a server or client usually needs, in one import.

    pub use crate::client::{SessionClient, generate_stable_id};
    pub use crate::{
        RejoinError, RejoinServer, RejoinServerBuilder, ServerConfig, SessionHandle,
        Subscriptions,
    };

    pub use rejoin_protocol::{
        Codec, ConnectionId, Envelope, JsonCodec, LocalPlayerConnectionState, ObjectId,
        PlayerConnectionState, ProtocolError, SessionMessage, Slot,
    };
    pub use rejoin_session::{
        Authenticator, ChangeOrigin, LocalPlayerEvent, LocalReplication, OwnershipError,
        OwnershipEvent, PassthroughAuthenticator, PlayerConnectionEvent, PlayerSpawnedEvent,
        PlayerSpawner, Replication, ReplicationEvent, Roster, SessionConfig, SessionError,
        SessionEvent, SessionMirror, SessionPlayer,
    };
}
