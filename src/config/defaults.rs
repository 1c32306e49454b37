//! Default value functions for configuration fields.
//!
//! These back serde's `#[serde(default = ...)]` attributes and the env
//! loader's fallbacks. Functions are grouped by config area.

use super::logging::LogFormat;

// =============================================================================
// Server
// =============================================================================

pub const fn default_port() -> u16 {
    7777
}

pub const fn default_max_clients() -> usize {
    1000
}

pub const fn default_thread_pool_size() -> usize {
    4
}

/// Seconds a connection may sit idle before the sweep disconnects it.
pub const fn default_session_idle_timeout() -> u64 {
    600
}

pub const fn default_session_sweep_interval() -> u64 {
    60
}

pub const fn default_room_cleanup_interval() -> u64 {
    60
}

/// Seconds after last activity before an idle waiting room is destroyed.
pub const fn default_inactive_room_timeout() -> u64 {
    3600
}

pub const fn default_turn_time_limit() -> u64 {
    30
}

/// Consecutive turn timeouts before a seat enters AFK mode.
pub const fn default_afk_timeout_threshold() -> u32 {
    3
}

// =============================================================================
// Database
// =============================================================================

pub fn default_db_host() -> String {
    "localhost".to_string()
}

pub const fn default_db_port() -> u16 {
    5432
}

pub fn default_db_user() -> String {
    "admin".to_string()
}

pub fn default_db_password() -> String {
    "admin".to_string()
}

pub fn default_db_name() -> String {
    "blokus_online".to_string()
}

pub const fn default_db_pool_size() -> u32 {
    10
}

pub fn default_db_backend() -> String {
    "postgres".to_string()
}

// =============================================================================
// Auth / JWT
// =============================================================================

pub const fn default_session_timeout_hours() -> u64 {
    24
}

pub const fn default_password_salt_rounds() -> u32 {
    12
}

pub const fn default_min_password_length() -> usize {
    6
}

pub const fn default_jwks_cache_minutes() -> u64 {
    10
}

pub const fn default_jwks_refresh_interval_secs() -> u64 {
    300
}

pub const fn default_jwt_grace_period_secs() -> u64 {
    30
}

pub const fn default_jwks_fetch_timeout_secs() -> u64 {
    5
}

// =============================================================================
// Logging
// =============================================================================

pub fn default_log_dir() -> String {
    "logs".to_string()
}

pub fn default_log_filename() -> String {
    "server.log".to_string()
}

pub fn default_log_rotation() -> String {
    "daily".to_string()
}

pub const fn default_log_format() -> LogFormat {
    LogFormat::Text
}

// =============================================================================
// Version / compatibility
// =============================================================================

pub fn default_server_version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

pub fn default_min_client_version() -> String {
    "0.1.0".to_string()
}

pub fn default_download_url() -> String {
    "https://blokus-online.example.com/download".to_string()
}

pub const fn default_update_grace_period_hours() -> u64 {
    72
}
