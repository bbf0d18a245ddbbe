//! Room router: per-delivery fan-out groups.
//!
//! A room is the set of connections tracking one delivery. Rooms are created
//! lazily on first join and dropped when their last member leaves; an absent
//! entry and an empty room are indistinguishable. Bidirectional maps give
//! O(1) lookups in both directions: members of a room (for broadcast) and
//! rooms of a connection (for disconnect cleanup).
//!
//! Broadcast itself is the executor's job; [`RoomRouter::members`] returns a
//! point-in-time snapshot, so a connection that left strictly before the
//! snapshot receives nothing and every member in the snapshot receives
//! exactly one copy.
//!
//! # Locking
//!
//! The two maps are sharded; no operation holds guards into both maps at
//! once, so concurrent joins/leaves on different keys never deadlock. A
//! single connection's own membership is only ever mutated from its own
//! task, which keeps the two maps mutually consistent for that connection.

use std::collections::HashSet;

use dashmap::DashMap;

/// Subscription groups keyed by delivery id.
#[derive(Debug, Default)]
pub struct RoomRouter {
    /// delivery id -> subscribed connection ids
    members: DashMap<u64, HashSet<u64>>,
    /// connection id -> subscribed delivery ids
    joined: DashMap<u64, HashSet<u64>>,
}

impl RoomRouter {
    /// Create an empty router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe a connection to a delivery's room.
    ///
    /// Returns `false` if it was already a member.
    pub fn join(&self, delivery_id: u64, connection_id: u64) -> bool {
        let inserted = self.members.entry(delivery_id).or_default().insert(connection_id);
        if inserted {
            self.joined.entry(connection_id).or_default().insert(delivery_id);
        }
        inserted
    }

    /// Unsubscribe a connection from a delivery's room.
    ///
    /// Returns `true` if the connection was a member. An emptied room is
    /// dropped.
    pub fn leave(&self, delivery_id: u64, connection_id: u64) -> bool {
        let removed = self
            .members
            .get_mut(&delivery_id)
            .is_some_and(|mut set| set.remove(&connection_id));

        if removed {
            self.members.remove_if(&delivery_id, |_, set| set.is_empty());

            if let Some(mut rooms) = self.joined.get_mut(&connection_id) {
                rooms.remove(&delivery_id);
            }
            self.joined.remove_if(&connection_id, |_, rooms| rooms.is_empty());
        }

        removed
    }

    /// Remove a connection from every room it joined (disconnect hook).
    ///
    /// Returns the delivery ids it was subscribed to.
    pub fn leave_all(&self, connection_id: u64) -> Vec<u64> {
        let Some((_, rooms)) = self.joined.remove(&connection_id) else {
            return Vec::new();
        };

        let mut left = Vec::with_capacity(rooms.len());
        for delivery_id in rooms {
            let removed = self
                .members
                .get_mut(&delivery_id)
                .is_some_and(|mut set| set.remove(&connection_id));
            if removed {
                self.members.remove_if(&delivery_id, |_, set| set.is_empty());
                left.push(delivery_id);
            }
        }
        left
    }

    /// Whether a connection is subscribed to a delivery's room.
    #[must_use]
    pub fn is_member(&self, delivery_id: u64, connection_id: u64) -> bool {
        self.members.get(&delivery_id).is_some_and(|set| set.contains(&connection_id))
    }

    /// Snapshot of the room's current members.
    #[must_use]
    pub fn members(&self, delivery_id: u64) -> Vec<u64> {
        self.members
            .get(&delivery_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Number of members in a room. Zero for unknown rooms.
    #[must_use]
    pub fn member_count(&self, delivery_id: u64) -> usize {
        self.members.get(&delivery_id).map_or(0, |set| set.len())
    }

    /// Number of rooms with at least one member.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.members.len()
    }
}
