//! Game rooms: per-room state machines and the room registry.

pub mod manager;
pub mod player;
#[allow(clippy::module_inception)]
pub mod room;

pub use manager::RoomManager;
pub use player::PlayerInfo;
pub use room::{GameRoom, RoomConfig, RoomError, RoomState};
