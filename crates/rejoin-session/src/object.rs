//! Per-object ownership records kept by the broker.

use std::collections::VecDeque;

use rejoin_protocol::{ConnectionId, ObjectId, Slot};

/// The broker's view of one networked object.
///
/// Two owners are tracked separately:
/// - the **session owner** (`owner`), a slot that survives the player
///   dropping and coming back, and
/// - the **transport owner**, which lives in the replication system and
///   is always a live connection (or nothing).
///
/// `pending` holds the transport transfers the broker requested and has not
/// yet seen echoed back by [`ReplicationEvent::OwnershipChanged`]. An echo
/// that matches an entry is the broker's own doing and is consumed. Anything
/// else came from outside.
///
/// [`ReplicationEvent::OwnershipChanged`]: crate::ReplicationEvent::OwnershipChanged
#[derive(Debug, Clone)]
pub struct SessionObject {
    id: ObjectId,
    owner: Option<Slot>,
    pending: VecDeque<Option<ConnectionId>>,
}

impl SessionObject {
    pub(crate) fn new(id: ObjectId) -> Self {
        Self {
            id,
            owner: None,
            pending: VecDeque::new(),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    /// The session-level owner.
    pub fn owner(&self) -> Option<Slot> {
        self.owner
    }

    /// `true` while a broker-requested transfer has not been echoed yet.
    pub fn transfer_in_flight(&self) -> bool {
        !self.pending.is_empty()
    }

    pub(crate) fn set_owner(&mut self, owner: Option<Slot>) -> Option<Slot> {
        std::mem::replace(&mut self.owner, owner)
    }

    pub(crate) fn expect_transfer(&mut self, next: Option<ConnectionId>) {
        self.pending.push_back(next);
    }

    /// Consumes the oldest pending transfer to `next`, together with any
    /// older entries the replication system collapsed away. Returns `false`
    /// when `next` was not requested by the broker.
    pub(crate) fn take_expected(&mut self, next: Option<ConnectionId>) -> bool {
        match self.pending.iter().position(|p| *p == next) {
            Some(pos) => {
                self.pending.drain(..=pos);
                true
            }
            None => false,
        }
    }

    /// Forgets every pending transfer. Used once the transport owner is
    /// already where the broker wants it, so requests the replication system
    /// never answered stop counting as in flight.
    pub(crate) fn clear_expected(&mut self) {
        self.pending.clear();
    }
}
