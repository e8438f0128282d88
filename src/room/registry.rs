//! Registry of active rooms

use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;
use uuid::Uuid;

use super::authoritative::{AuthoritativeRoom, RoomOptions};
use super::task::{RoomHandle, RoomTask};

/// Registry of all active rooms
pub struct RoomRegistry {
    rooms: DashMap<Uuid, RoomHandle>,
    options: RoomOptions,
}

impl RoomRegistry {
    pub fn new(options: RoomOptions) -> Self {
        Self {
            rooms: DashMap::new(),
            options,
        }
    }

    /// Options new rooms are created with
    pub fn options(&self) -> &RoomOptions {
        &self.options
    }

    /// Spawn a room task with the registry's options. The room unregisters
    /// itself when its task ends.
    pub fn create_room(self: &Arc<Self>) -> RoomHandle {
        self.create_room_with(self.options)
    }

    pub fn create_room_with(self: &Arc<Self>, options: RoomOptions) -> RoomHandle {
        let id = Uuid::new_v4();
        let (task, handle) = RoomTask::new(AuthoritativeRoom::new(id, options));
        self.rooms.insert(id, handle.clone());

        let registry = Arc::clone(self);
        tokio::spawn(async move {
            task.run().await;
            registry.remove(&id);
        });

        info!(room_id = %id, active_rooms = self.active_rooms(), "Room created");
        handle
    }

    pub fn get(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.get(id).map(|r| r.value().clone())
    }

    pub fn remove(&self, id: &Uuid) -> Option<RoomHandle> {
        self.rooms.remove(id).map(|(_, h)| h)
    }

    pub fn active_rooms(&self) -> usize {
        self.rooms.len()
    }

    pub fn total_players(&self) -> usize {
        self.rooms.iter().map(|r| r.value().player_count()).sum()
    }

    /// Find a room a newcomer can join. Rooms whose only free seat is held
    /// for a departed player are skipped.
    pub fn find_available_room(&self) -> Option<RoomHandle> {
        self.rooms
            .iter()
            .find(|r| {
                let room = r.value();
                !room.is_closed()
                    && room.player_count() < self.options.max_players
                    && room.open_seats() > 0
            })
            .map(|r| r.value().clone())
    }

    /// Stop every room task
    pub async fn shutdown_all(&self) {
        let handles: Vec<RoomHandle> = self.rooms.iter().map(|r| r.value().clone()).collect();
        for handle in handles {
            handle.shutdown().await;
        }
    }
}
