//! Application state shared across request handlers.

use std::collections::HashMap;
use std::sync::Arc;

use bms_shared::{Namespace, RealtimeEvent};
use tokio::sync::{broadcast, RwLock};

use crate::config::ServerConfig;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub hub: RoomHub,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let hub = RoomHub::new(config.room_capacity);
        Self {
            config: Arc::new(config),
            hub,
        }
    }
}

type RoomKey = (Namespace, String);

/// Broadcast channel per room. Rooms in different namespaces never mix.
#[derive(Clone)]
pub struct RoomHub {
    rooms: Arc<RwLock<HashMap<RoomKey, broadcast::Sender<RealtimeEvent>>>>,
    capacity: usize,
}

impl RoomHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            rooms: Arc::new(RwLock::new(HashMap::new())),
            capacity: capacity.max(1),
        }
    }

    /// Get or create the broadcast channel for a room and subscribe to it.
    pub async fn subscribe(&self, namespace: Namespace, room: &str) -> broadcast::Receiver<RealtimeEvent> {
        let key = (namespace, room.to_string());
        {
            let rooms = self.rooms.read().await;
            if let Some(sender) = rooms.get(&key) {
                return sender.subscribe();
            }
        }

        let mut rooms = self.rooms.write().await;
        rooms
            .entry(key)
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }

    /// Deliver an event to everyone in the room. Returns how many sockets
    /// received it. Rooms nobody listens to any more are dropped.
    pub async fn publish(&self, namespace: Namespace, room: &str, event: RealtimeEvent) -> usize {
        let key = (namespace, room.to_string());
        let mut rooms = self.rooms.write().await;
        let Some(sender) = rooms.get(&key) else {
            return 0;
        };
        match sender.send(event) {
            Ok(delivered) => delivered,
            Err(_) => {
                rooms.remove(&key);
                0
            }
        }
    }

    /// Forget the room if nobody is subscribed any more. Called after a
    /// socket leaves or disconnects.
    pub async fn release(&self, namespace: Namespace, room: &str) -> bool {
        let key = (namespace, room.to_string());
        let mut rooms = self.rooms.write().await;
        if rooms.get(&key).is_some_and(|sender| sender.receiver_count() == 0) {
            rooms.remove(&key);
            return true;
        }
        false
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }
}
