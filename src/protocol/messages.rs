//! Server reply vocabulary.
//!
//! Replies are uppercase opcodes followed by `:`-separated fields; larger
//! payloads (game state, results, AFK notices, stats) are a single JSON
//! field. Builders here return the line body without the trailing newline;
//! the session write path frames it.

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Write as _;

use crate::game::GameSnapshot;

/// Normalize a wire color index into `[1..4]`. Defensive tolerance for
/// out-of-range indices, not something the server itself produces.
pub fn normalize_color_index(index: i32) -> i32 {
    (index - 1).rem_euclid(4) + 1
}

/// One room's line in `ROOM_LIST`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomSummary {
    pub room_id: i32,
    pub name: String,
    pub host_name: String,
    pub player_count: usize,
    pub max_players: usize,
    pub is_private: bool,
    pub is_playing: bool,
    pub mode: String,
}

/// One seat's fields inside `ROOM_INFO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerSummary {
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub is_host: bool,
    pub is_ready: bool,
    pub color_index: i32,
}

/// Full `ROOM_INFO` view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfoView {
    pub room_id: i32,
    pub name: String,
    pub host_name: String,
    pub max_players: usize,
    pub is_private: bool,
    pub is_playing: bool,
    pub mode: String,
    pub players: Vec<PlayerSummary>,
}

fn flag(value: bool) -> i32 {
    i32::from(value)
}

// ---------------------------------------------------------------------------
// Handshake / auth
// ---------------------------------------------------------------------------

pub fn version_ok(server_version: &str, features: &[String]) -> String {
    format!("VERSION_OK:{server_version}:{}", features.join(","))
}

pub fn version_incompatible(min_required: &str, download_url: &str, force_update: bool) -> String {
    format!(
        "VERSION_INCOMPATIBLE:{min_required}:{download_url}:{}",
        flag(force_update)
    )
}

pub fn auth_success(username: &str, session_token: &str) -> String {
    format!("AUTH_SUCCESS:{username}:{session_token}")
}

pub fn register_success(username: &str, user_id: i64) -> String {
    format!("REGISTER_SUCCESS:{username}:{user_id}")
}

pub fn logout_success() -> String {
    "LOGOUT_SUCCESS".to_string()
}

pub fn session_valid(username: &str) -> String {
    format!("SESSION_VALID:{username}")
}

pub fn session_invalid() -> String {
    "SESSION_INVALID".to_string()
}

// ---------------------------------------------------------------------------
// Lobby
// ---------------------------------------------------------------------------

pub fn lobby_entered() -> String {
    "LOBBY_ENTERED".to_string()
}

pub fn lobby_left() -> String {
    "LOBBY_LEFT".to_string()
}

pub fn lobby_user_list(usernames: &[String]) -> String {
    format!("LOBBY_USER_LIST:{}:{}", usernames.len(), usernames.join(","))
}

pub fn lobby_user_joined(username: &str) -> String {
    format!("LOBBY_USER_JOINED:{username}")
}

pub fn lobby_user_left(username: &str) -> String {
    format!("LOBBY_USER_LEFT:{username}")
}

// ---------------------------------------------------------------------------
// Rooms
// ---------------------------------------------------------------------------

pub fn room_created(room_id: i32, name: &str) -> String {
    format!("ROOM_CREATED:{room_id}:{name}")
}

pub fn room_joined(room_id: i32, name: &str) -> String {
    format!("ROOM_JOINED:{room_id}:{name}")
}

pub fn room_left() -> String {
    "ROOM_LEFT".to_string()
}

fn write_room_summary(out: &mut String, room: &RoomSummary) {
    let _ = write!(
        out,
        "{},{},{},{},{},{},{},{}",
        room.room_id,
        room.name,
        room.host_name,
        room.player_count,
        room.max_players,
        flag(room.is_private),
        flag(room.is_playing),
        room.mode
    );
}

pub fn room_list(rooms: &[RoomSummary]) -> String {
    let mut out = format!("ROOM_LIST:{}", rooms.len());
    for room in rooms {
        out.push(':');
        write_room_summary(&mut out, room);
    }
    out
}

pub fn room_info(view: &RoomInfoView) -> String {
    let mut out = format!(
        "ROOM_INFO:{}:{}:{}:{}:{}:{}:{}:{}",
        view.room_id,
        view.name,
        view.host_name,
        view.players.len(),
        view.max_players,
        flag(view.is_private),
        flag(view.is_playing),
        view.mode
    );
    for player in &view.players {
        let _ = write!(
            out,
            ":{},{},{},{},{},{}",
            player.user_id,
            player.username,
            player.display_name,
            flag(player.is_host),
            flag(player.is_ready),
            normalize_color_index(player.color_index)
        );
    }
    out
}

pub fn player_joined(username: &str) -> String {
    format!("PLAYER_JOINED:{username}")
}

pub fn player_left(username: &str) -> String {
    format!("PLAYER_LEFT:{username}")
}

pub fn player_ready(username: &str, ready: bool) -> String {
    format!("PLAYER_READY:{username}:{}", flag(ready))
}

pub fn host_changed(username: &str) -> String {
    format!("HOST_CHANGED:{username}")
}

// ---------------------------------------------------------------------------
// Game
// ---------------------------------------------------------------------------

pub fn game_started() -> String {
    "GAME_STARTED".to_string()
}

pub fn game_state_update(snapshot: &GameSnapshot) -> String {
    let body = serde_json::to_string(snapshot).unwrap_or_else(|_| "{}".to_string());
    format!("GAME_STATE_UPDATE:{body}")
}

#[allow(clippy::too_many_arguments)]
pub fn turn_changed(
    username: &str,
    color_index: i32,
    turn_number: u32,
    time_limit_secs: u64,
    remaining_secs: u64,
    previous_timed_out: bool,
) -> String {
    format!(
        "TURN_CHANGED:{username}:{color_index}:{turn_number}:{time_limit_secs}:{remaining_secs}:{previous_timed_out}"
    )
}

#[allow(clippy::too_many_arguments)]
pub fn block_placed(
    username: &str,
    block_id: u8,
    row: i32,
    col: i32,
    rotation_degrees: i32,
    flip_code: i32,
    color_index: i32,
    score_gained: i32,
) -> String {
    format!(
        "BLOCK_PLACED:{username}:{block_id}:{row}:{col}:{rotation_degrees}:{flip_code}:{color_index}:{score_gained}"
    )
}

pub fn turn_timeout(username: &str, color_index: i32) -> String {
    format!("TURN_TIMEOUT:{username}:{color_index}")
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AfkNotice {
    pub reason: String,
    pub timeout_count: u32,
    pub max_count: u32,
}

pub fn afk_mode_activated(notice: &AfkNotice) -> String {
    let body = serde_json::to_string(notice).unwrap_or_else(|_| "{}".to_string());
    format!("AFK_MODE_ACTIVATED:{body}")
}

pub fn afk_unblock_success() -> String {
    "AFK_UNBLOCK_SUCCESS".to_string()
}

pub fn afk_unblock_error(reason: &str, message: &str) -> String {
    format!("AFK_UNBLOCK_ERROR:{reason}:{message}")
}

#[derive(Debug, Clone, Serialize)]
pub struct GameResultBody {
    pub scores: BTreeMap<String, i32>,
    pub winners: Vec<String>,
}

pub fn game_result(result: &GameResultBody) -> String {
    let body = serde_json::to_string(result).unwrap_or_else(|_| "{}".to_string());
    format!("GAME_RESULT:{body}")
}

pub fn game_ended() -> String {
    "GAME_ENDED".to_string()
}

// ---------------------------------------------------------------------------
// Misc
// ---------------------------------------------------------------------------

pub fn chat(username: &str, text: &str) -> String {
    format!("CHAT:{username}:{text}")
}

pub fn system(text: &str) -> String {
    format!("SYSTEM:{text}")
}

pub fn error(text: &str) -> String {
    format!("ERROR:{text}")
}

pub fn pong() -> String {
    "pong".to_string()
}

pub fn user_stats(stats: &serde_json::Value) -> String {
    format!("USER_STATS:{stats}")
}

pub fn settings(settings: &serde_json::Value) -> String {
    format!("SETTINGS:{settings}")
}

pub fn settings_updated() -> String {
    "SETTINGS_UPDATED".to_string()
}
