//! Session identity and ownership handoff for Rejoin.
//!
//! Transport connections come and go; players should not. This crate keeps
//! the two apart:
//!
//! 1. **Identity**: a [`SessionPlayer`] per stable id, in a dense slot that
//!    survives reconnects ([`SessionRegistry`]).
//! 2. **Lifecycle**: while a session runs, a dropped player is only
//!    temporarily gone; otherwise it is removed for good.
//! 3. **Ownership**: objects belong to slots, not connections, and are
//!    handed back when their owner returns (the ownership broker, see
//!    [`SessionRegistry::grant`]).
//! 4. **Client view**: a [`SessionMirror`] that applies what the registry
//!    broadcasts.
//! 5. **Player objects**: an optional [`PlayerSpawner`] that gives each
//!    player one object the first time its client finishes loading.
//!
//! # How it fits in the stack
//!
//! ```text
//! Server shell (above)  ← owns the registry in an actor, delivers its outbox
//!     ↕
//! Session Layer (this crate)  ← identity, roster, ownership
//!     ↕
//! Protocol Layer (below)  ← Slot, ObjectId, SessionMessage
//! ```
//!
//! Nothing in here does I/O. Every mutation returns the messages to send,
//! and the replication system is reached through the [`Replication`] trait.

#![allow(async_fn_in_trait)]

mod auth;
mod config;
mod error;
mod events;
mod mirror;
mod object;
mod ownership;
mod player;
mod registry;
mod replication;
mod roster;
mod spawner;

pub use auth::{Authenticator, PassthroughAuthenticator};
pub use config::SessionConfig;
pub use error::{OwnershipError, SessionError};
pub use events::{
    EVENT_CHANNEL_CAPACITY, LocalPlayerEvent, OwnershipEvent, PlayerConnectionEvent,
    PlayerSpawnedEvent, SessionEvent,
};
pub use mirror::SessionMirror;
pub use object::SessionObject;
pub use ownership::MAX_PUMP_ROUNDS;
pub use player::SessionPlayer;
pub use registry::{Outbound, SessionRegistry};
pub use replication::{ChangeOrigin, LocalReplication, Replication, ReplicationEvent};
pub use roster::Roster;
pub use spawner::PlayerSpawner;
