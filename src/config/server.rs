//! Server behavior configuration.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_afk_timeout_threshold, default_inactive_room_timeout, default_max_clients,
    default_port, default_room_cleanup_interval, default_session_idle_timeout,
    default_session_sweep_interval, default_thread_pool_size, default_turn_time_limit,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// TCP listen port.
    #[serde(default = "default_port")]
    pub port: u16,
    /// Maximum concurrently connected clients.
    #[serde(default = "default_max_clients")]
    pub max_clients: usize,
    /// Worker threads for the tokio runtime.
    #[serde(default = "default_thread_pool_size")]
    pub thread_pool_size: usize,
    /// Seconds of client silence before the idle sweep disconnects.
    #[serde(default = "default_session_idle_timeout")]
    pub session_idle_timeout: u64,
    /// Interval of the session/auth sweeps (seconds).
    #[serde(default = "default_session_sweep_interval")]
    pub session_sweep_interval: u64,
    /// Interval of the room sweep (seconds).
    #[serde(default = "default_room_cleanup_interval")]
    pub room_cleanup_interval: u64,
    /// Seconds after last activity before an idle waiting room is removed.
    #[serde(default = "default_inactive_room_timeout")]
    pub inactive_room_timeout: u64,
    /// Per-turn time limit (seconds), echoed in `TURN_CHANGED`.
    #[serde(default = "default_turn_time_limit")]
    pub turn_time_limit: u64,
    /// Consecutive turn timeouts before a seat goes AFK.
    #[serde(default = "default_afk_timeout_threshold")]
    pub afk_timeout_threshold: u32,
    #[serde(default)]
    pub debug_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            max_clients: default_max_clients(),
            thread_pool_size: default_thread_pool_size(),
            session_idle_timeout: default_session_idle_timeout(),
            session_sweep_interval: default_session_sweep_interval(),
            room_cleanup_interval: default_room_cleanup_interval(),
            inactive_room_timeout: default_inactive_room_timeout(),
            turn_time_limit: default_turn_time_limit(),
            afk_timeout_threshold: default_afk_timeout_threshold(),
            debug_mode: false,
        }
    }
}
