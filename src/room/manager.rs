//! Room registry: dense id assignment, lookup, and the idle sweep.
//!
//! Lock order is registry → room; the sweep collects room handles under
//! the registry lock and inspects each room only after releasing it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;

use crate::db::UserStore;
use crate::protocol::RoomSummary;

use super::room::{GameRoom, RoomConfig};

pub struct RoomManager {
    rooms: RwLock<HashMap<i32, Arc<GameRoom>>>,
    next_room_id: AtomicI32,
    config: RoomConfig,
    store: Arc<dyn UserStore>,
}

impl RoomManager {
    pub fn new(config: RoomConfig, store: Arc<dyn UserStore>) -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
            next_room_id: AtomicI32::new(1),
            config,
            store,
        }
    }

    pub async fn create_room(
        &self,
        name: &str,
        is_private: bool,
        password: Option<String>,
    ) -> Arc<GameRoom> {
        let room_id = self.next_room_id.fetch_add(1, Ordering::Relaxed);
        let room = Arc::new(GameRoom::new(
            room_id,
            name.to_string(),
            is_private,
            password,
            self.config,
            Arc::clone(&self.store),
        ));
        self.rooms.write().await.insert(room_id, Arc::clone(&room));
        tracing::info!(room_id, %name, is_private, "Room created");
        room
    }

    pub async fn get_room(&self, room_id: i32) -> Option<Arc<GameRoom>> {
        self.rooms.read().await.get(&room_id).cloned()
    }

    /// Remove and tear down one room.
    pub async fn remove_room(&self, room_id: i32) {
        let removed = self.rooms.write().await.remove(&room_id);
        if let Some(room) = removed {
            room.destroy().await;
            tracing::info!(room_id, "Room removed");
        }
    }

    pub async fn room_count(&self) -> usize {
        self.rooms.read().await.len()
    }

    /// Summaries for `ROOM_LIST`, ordered by id.
    pub async fn list_summaries(&self) -> Vec<RoomSummary> {
        let rooms: Vec<Arc<GameRoom>> = self.rooms.read().await.values().cloned().collect();
        let mut summaries = Vec::with_capacity(rooms.len());
        for room in rooms {
            summaries.push(room.summary().await);
        }
        summaries.sort_by_key(|summary| summary.room_id);
        summaries
    }

    /// Periodic sweep: drop empty rooms and waiting rooms idle past the
    /// threshold. Returns the number of rooms removed.
    pub async fn cleanup_rooms(&self, inactive_threshold: Duration) -> usize {
        let rooms: Vec<Arc<GameRoom>> = self.rooms.read().await.values().cloned().collect();

        let mut to_remove = Vec::new();
        for room in rooms {
            room.cleanup_disconnected_players().await;
            if room.is_empty().await || room.is_inactive(inactive_threshold).await {
                to_remove.push(room.room_id());
            }
        }

        let mut removed = 0;
        for room_id in to_remove {
            let room = self.rooms.write().await.remove(&room_id);
            if let Some(room) = room {
                room.destroy().await;
                removed += 1;
            }
        }
        if removed > 0 {
            tracing::info!(removed, "Swept idle rooms");
        }
        removed
    }
}
