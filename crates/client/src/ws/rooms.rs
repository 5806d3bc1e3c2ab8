//! Desired room membership.
//!
//! The server forgets membership when a socket goes away, so the client keeps
//! the set it wants and replays it after every successful handshake.

use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct RoomTracker {
    desired: BTreeSet<String>,
}

impl RoomTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the room was not already wanted.
    pub fn join(&mut self, room: &str) -> bool {
        self.desired.insert(room.to_string())
    }

    /// Returns `true` if the room was wanted.
    pub fn leave(&mut self, room: &str) -> bool {
        self.desired.remove(room)
    }

    /// Rooms in a stable order, used for replay.
    pub fn to_vec(&self) -> Vec<String> {
        self.desired.iter().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.desired.is_empty()
    }
}
