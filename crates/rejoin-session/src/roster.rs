//! Read access to "who is playing", shared by server and client.
//!
//! Game code that only needs to resolve a connection to a player (for
//! example to decide which player sent an input) is written against
//! [`Roster`] and runs unchanged on the server's
//! [`SessionRegistry`](crate::SessionRegistry) and the client's
//! [`SessionMirror`](crate::SessionMirror).

use rejoin_protocol::{ConnectionId, Slot};

use crate::SessionPlayer;

/// A queryable set of players.
///
/// Lookups never fail: a miss returns the empty player (see
/// [`SessionPlayer::is_valid`]).
pub trait Roster {
    /// Every registered player, ordered by slot.
    fn players(&self) -> Vec<&SessionPlayer>;

    /// The player in `slot`, or the empty player.
    fn player(&self, slot: Slot) -> &SessionPlayer;

    /// The player currently bound to `connection`, or the empty player.
    fn player_by_connection(&self, connection: ConnectionId) -> &SessionPlayer;

    /// Number of registered players, connected or not.
    fn player_count(&self) -> usize {
        self.players().len()
    }

    /// Number of players with a live connection.
    fn connected_count(&self) -> usize {
        self.players().iter().filter(|p| p.is_connected()).count()
    }
}
