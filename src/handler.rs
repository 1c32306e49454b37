//! Opcode dispatch.
//!
//! Each incoming line is parsed, gated on the session's connection state,
//! and routed to the owning service. Success replies go to the sender;
//! room/lobby deltas fan out through the coordinators. Protocol failures
//! reply `ERROR:` and never terminate the connection.

use std::sync::Arc;

use serde_json::json;

use crate::auth::AuthError;
use crate::db::{UserAccount, UserSettings};
use crate::game::{BlockType, Flip, Rotation};
use crate::protocol::{messages, parse_line, Opcode, ParseError, ServerErrorCode};
use crate::room::{GameRoom, RoomError};
use crate::server::AppState;
use crate::session::{ConnectionState, Session, NO_ROOM};

const MAX_ROOM_NAME_LEN: usize = 50;

pub struct MessageHandler {
    state: Arc<AppState>,
}

impl MessageHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    pub async fn handle_line(&self, session: &Arc<Session>, line: &str) {
        session.touch();
        if let Some(token) = session.auth_token() {
            // Activity keeps the auth session alive.
            self.state.auth.refresh_session(&token).await;
        }

        let parsed = match parse_line(line) {
            Ok(parsed) => parsed,
            Err(ParseError::Empty) => return,
            Err(ParseError::UnknownOpcode) => {
                session.send(messages::error("unknown opcode"));
                return;
            }
        };
        let params = parsed.params;

        match parsed.opcode {
            Opcode::VersionCheck => self.handle_version_check(session, &params),
            Opcode::Auth => self.handle_auth(session, &params).await,
            Opcode::Register => self.handle_register(session, &params).await,
            Opcode::Guest => self.handle_guest(session, &params).await,
            Opcode::Jwt => self.handle_jwt(session, &params).await,
            Opcode::Logout => self.handle_logout(session).await,
            Opcode::SessionValidate => self.handle_session_validate(session, &params).await,
            Opcode::Ping => session.send(messages::pong()),
            Opcode::LobbyEnter => self.handle_lobby_enter(session).await,
            Opcode::LobbyLeave => self.handle_lobby_leave(session).await,
            Opcode::LobbyList => self.handle_lobby_list(session).await,
            Opcode::RoomCreate => self.handle_room_create(session, &params).await,
            Opcode::RoomJoin => self.handle_room_join(session, &params).await,
            Opcode::RoomLeave => self.handle_room_leave(session).await,
            Opcode::RoomList => self.handle_room_list(session).await,
            Opcode::RoomReady => self.handle_room_ready(session, &params).await,
            Opcode::RoomStart => self.handle_room_start(session).await,
            Opcode::RoomTransfer => self.handle_room_transfer(session, &params).await,
            Opcode::GameMove => self.handle_game_move(session, &params).await,
            Opcode::AfkUnblock => self.handle_afk_unblock(session).await,
            Opcode::Chat => self.handle_chat(session, &params).await,
            Opcode::UserStats => self.handle_user_stats(session, &params).await,
            Opcode::SettingsGet => self.handle_settings_get(session).await,
            Opcode::SettingsUpdate => self.handle_settings_update(session, &params).await,
        }
    }

    /// Socket-level teardown: leave the lobby, vacate waiting-room seats.
    /// A seat in a running game stays and is skipped via the AFK path.
    pub async fn handle_disconnect(&self, session: &Arc<Session>) {
        self.state.lobby.leave(session.id()).await;

        let room_id = session.room_id();
        if room_id == NO_ROOM {
            return;
        }
        let Some(room) = self.state.rooms.get_room(room_id).await else {
            return;
        };
        if session.connection_state() == ConnectionState::InGame {
            tracing::info!(
                room_id,
                username = %session.username().unwrap_or_default(),
                "Player disconnected mid-game; seat kept for AFK skipping"
            );
            return;
        }
        if let Some(user_id) = session.user_id() {
            if let Ok(true) = room.remove_player(user_id).await {
                self.state.rooms.remove_room(room_id).await;
            }
            self.broadcast_room_list().await;
        }
    }

    // -----------------------------------------------------------------------
    // Handshake / auth
    // -----------------------------------------------------------------------

    fn handle_version_check(&self, session: &Arc<Session>, params: &[&str]) {
        let Some(client_version) = params.first().filter(|v| !v.is_empty()) else {
            session.send(messages::error("version:check requires a client version"));
            return;
        };
        let info = self.state.version.check_compatibility(client_version);
        if info.compatible {
            session.send(messages::version_ok(
                self.state.version.server_version(),
                self.state.version.features(),
            ));
        } else {
            session.send(messages::version_incompatible(
                &info.min_required_version,
                &info.download_url,
                info.force_update,
            ));
        }
    }

    async fn handle_auth(&self, session: &Arc<Session>, params: &[&str]) {
        if session.is_authenticated() {
            session.send(messages::error("already authenticated"));
            return;
        }
        let [username, password] = params else {
            session.send(messages::error("auth requires username and password"));
            return;
        };
        match self.state.auth.login_user(username, password).await {
            Ok(success) => {
                session.bind_user(success.user_id, &success.username, &success.session_token);
                session.send(messages::auth_success(
                    &success.username,
                    &success.session_token,
                ));
            }
            Err(err) => session.send(auth_error_line(&err)),
        }
    }

    async fn handle_register(&self, session: &Arc<Session>, params: &[&str]) {
        // `register:<user>:<password>` or `register:<user>:<email>:<password>`
        // with `::` when the email is omitted.
        let (username, email, password) = match params {
            [username, password] => (*username, None, *password),
            [username, email, password] => (*username, Some(*email), *password),
            _ => {
                session.send(messages::error("register requires username and password"));
                return;
            }
        };
        match self
            .state
            .auth
            .register_user(username, email, password)
            .await
        {
            Ok(account) => session.send(messages::register_success(
                &account.username,
                account.user_id,
            )),
            Err(err) => session.send(auth_error_line(&err)),
        }
    }

    async fn handle_guest(&self, session: &Arc<Session>, params: &[&str]) {
        if session.is_authenticated() {
            session.send(messages::error("already authenticated"));
            return;
        }
        let guest_name = params.first().copied().filter(|name| !name.is_empty());
        match self.state.auth.login_guest(guest_name).await {
            Ok(success) => {
                session.bind_user(success.user_id, &success.username, &success.session_token);
                session.send(messages::auth_success(
                    &success.username,
                    &success.session_token,
                ));
            }
            Err(err) => session.send(auth_error_line(&err)),
        }
    }

    async fn handle_jwt(&self, session: &Arc<Session>, params: &[&str]) {
        if session.is_authenticated() {
            session.send(messages::error("already authenticated"));
            return;
        }
        let [token] = params else {
            session.send(messages::error("jwt requires a token"));
            return;
        };
        match self.state.auth.login_with_jwt(token).await {
            Ok(success) => {
                session.bind_user(success.user_id, &success.username, &success.session_token);
                session.send(messages::auth_success(
                    &success.username,
                    &success.session_token,
                ));
            }
            Err(err) => session.send(auth_error_line(&err)),
        }
    }

    async fn handle_logout(&self, session: &Arc<Session>) {
        if !session.is_authenticated() {
            session.send(messages::error("not authenticated"));
            return;
        }
        if let Some(token) = session.auth_token() {
            self.state.auth.logout(&token).await;
        }
        // Vacate whatever the session was doing first.
        self.leave_current_room(session).await;
        self.state.lobby.leave(session.id()).await;
        session.clear_user();
        session.send(messages::logout_success());
    }

    async fn handle_session_validate(&self, session: &Arc<Session>, params: &[&str]) {
        let [token] = params else {
            session.send(messages::error("session:validate requires a token"));
            return;
        };
        match self.state.auth.validate_session(token).await {
            Some(info) => session.send(messages::session_valid(&info.username)),
            None => session.send(messages::session_invalid()),
        }
    }

    // -----------------------------------------------------------------------
    // Lobby
    // -----------------------------------------------------------------------

    async fn handle_lobby_enter(&self, session: &Arc<Session>) {
        if !session.is_authenticated() {
            session.send(messages::error("not authenticated"));
            return;
        }
        if !session.connection_state().can_enter_lobby() {
            session.send(messages::error("cannot enter lobby in current state"));
            return;
        }
        session.set_connection_state(ConnectionState::InLobby);
        session.send(messages::lobby_entered());
        self.state.lobby.enter(Arc::clone(session)).await;
        let summaries = self.state.rooms.list_summaries().await;
        session.send(messages::room_list(&summaries));
    }

    async fn handle_lobby_leave(&self, session: &Arc<Session>) {
        if session.connection_state() != ConnectionState::InLobby {
            session.send(messages::error("not in lobby"));
            return;
        }
        self.state.lobby.leave(session.id()).await;
        session.set_connection_state(ConnectionState::Connected);
        session.send(messages::lobby_left());
    }

    async fn handle_lobby_list(&self, session: &Arc<Session>) {
        if session.connection_state() != ConnectionState::InLobby {
            session.send(messages::error("not in lobby"));
            return;
        }
        let usernames = self.state.lobby.usernames().await;
        session.send(messages::lobby_user_list(&usernames));
    }

    // -----------------------------------------------------------------------
    // Rooms
    // -----------------------------------------------------------------------

    async fn handle_room_create(&self, session: &Arc<Session>, params: &[&str]) {
        if !session.connection_state().can_create_room() {
            session.send(messages::error("must be in lobby to create a room"));
            return;
        }
        let Some(name) = params.first().map(|n| n.trim()).filter(|n| !n.is_empty())
        else {
            session.send(messages::error("room name required"));
            return;
        };
        if name.len() > MAX_ROOM_NAME_LEN {
            session.send(messages::error("room name too long"));
            return;
        }
        let is_private = params.get(1).is_some_and(|flag| *flag == "1");
        let password = params
            .get(2)
            .filter(|pw| !pw.is_empty())
            .map(|pw| pw.to_string());

        let room = self
            .state
            .rooms
            .create_room(name, is_private, password)
            .await;
        if let Err(err) = room.add_player(Arc::clone(session), None).await {
            // Freshly created rooms only fail on identity problems.
            self.state.rooms.remove_room(room.room_id()).await;
            session.send(room_error_line(&err));
            return;
        }

        self.state.lobby.leave(session.id()).await;
        session.set_connection_state(ConnectionState::InRoom);
        session.set_room_id(room.room_id());
        session.send(messages::room_created(room.room_id(), room.name()));
        room.send_room_info_to(session).await;
        self.broadcast_room_list().await;
    }

    async fn handle_room_join(&self, session: &Arc<Session>, params: &[&str]) {
        if !session.connection_state().can_join_room() {
            session.send(messages::error("must be in lobby to join a room"));
            return;
        }
        let Some(room_id) = params.first().and_then(|id| id.parse::<i32>().ok()) else {
            session.send(messages::error("room:join requires a room id"));
            return;
        };
        let password = params.get(1).copied().filter(|pw| !pw.is_empty());

        let Some(room) = self.state.rooms.get_room(room_id).await else {
            session.send(messages::error("room not found"));
            return;
        };
        if let Err(err) = room.add_player(Arc::clone(session), password).await {
            session.send(room_error_line(&err));
            return;
        }

        self.state.lobby.leave(session.id()).await;
        session.set_connection_state(ConnectionState::InRoom);
        session.set_room_id(room_id);
        session.send(messages::room_joined(room_id, room.name()));
        room.send_room_info_to(session).await;
        self.broadcast_room_list().await;
    }

    async fn handle_room_leave(&self, session: &Arc<Session>) {
        if !session.connection_state().is_in_room() {
            session.send(messages::error("not in a room"));
            return;
        }
        self.leave_current_room(session).await;
        session.send(messages::room_left());
        session.set_connection_state(ConnectionState::InLobby);
        self.state.lobby.enter(Arc::clone(session)).await;
        self.broadcast_room_list().await;
    }

    async fn handle_room_list(&self, session: &Arc<Session>) {
        if session.connection_state() != ConnectionState::InLobby {
            session.send(messages::error("not in lobby"));
            return;
        }
        let summaries = self.state.rooms.list_summaries().await;
        session.send(messages::room_list(&summaries));
    }

    async fn handle_room_ready(&self, session: &Arc<Session>, params: &[&str]) {
        let Some(room) = self.current_room_checked(session, ConnectionState::InRoom).await
        else {
            return;
        };
        let ready = params.first().is_none_or(|flag| *flag != "0");
        let user_id = session.user_id().unwrap_or_default();
        if let Err(err) = room.set_player_ready(user_id, ready).await {
            session.send(room_error_line(&err));
        }
    }

    async fn handle_room_start(&self, session: &Arc<Session>) {
        if !session.connection_state().can_start_game() {
            session.send(messages::error("cannot start a game in current state"));
            return;
        }
        let Some(room) = self.current_room(session).await else {
            session.send(messages::error("not in a room"));
            return;
        };
        let user_id = session.user_id().unwrap_or_default();
        if let Err(err) = room.start_game(user_id).await {
            session.send(room_error_line(&err));
            return;
        }
        self.broadcast_room_list().await;
    }

    async fn handle_room_transfer(&self, session: &Arc<Session>, params: &[&str]) {
        let Some(room) = self.current_room_checked(session, ConnectionState::InRoom).await
        else {
            return;
        };
        let [target] = params else {
            session.send(messages::error("room:transfer requires a username"));
            return;
        };
        let user_id = session.user_id().unwrap_or_default();
        if let Err(err) = room.transfer_host(user_id, target).await {
            session.send(room_error_line(&err));
        }
    }

    // -----------------------------------------------------------------------
    // Game
    // -----------------------------------------------------------------------

    async fn handle_game_move(&self, session: &Arc<Session>, params: &[&str]) {
        if !session.connection_state().can_make_game_move() {
            session.send(messages::error("game is not active"));
            return;
        }
        let Some(room) = self.current_room(session).await else {
            session.send(messages::error("not in a room"));
            return;
        };

        let parsed = parse_move_params(params);
        let Some((block, row, col, rotation, flip)) = parsed else {
            session.send(messages::error("invalid move"));
            return;
        };

        let user_id = session.user_id().unwrap_or_default();
        match room
            .handle_block_placement(user_id, block, row, col, rotation, flip)
            .await
        {
            Ok(()) => {}
            Err(RoomError::NotYourTurn) => session.send(messages::error("not your turn")),
            Err(RoomError::InvalidMove) => session.send(messages::error("invalid move")),
            Err(RoomError::GameNotActive) => session.send(messages::error("game is not active")),
            Err(err) => session.send(room_error_line(&err)),
        }
    }

    async fn handle_afk_unblock(&self, session: &Arc<Session>) {
        if !session.connection_state().is_in_room() {
            session.send(messages::afk_unblock_error(
                "game_not_active",
                "not in a game room",
            ));
            return;
        }
        let Some(room) = self.current_room(session).await else {
            session.send(messages::afk_unblock_error(
                "game_not_active",
                "room not found",
            ));
            return;
        };
        let user_id = session.user_id().unwrap_or_default();
        match room.afk_unblock(user_id).await {
            Ok(()) => session.send(messages::afk_unblock_success()),
            Err(RoomError::GameNotActive) => session.send(messages::afk_unblock_error(
                "game_not_active",
                "no game is currently running",
            )),
            Err(err) => session.send(room_error_line(&err)),
        }
    }

    // -----------------------------------------------------------------------
    // Chat / queries
    // -----------------------------------------------------------------------

    async fn handle_chat(&self, session: &Arc<Session>, params: &[&str]) {
        if !session.is_authenticated() {
            session.send(messages::error("not authenticated"));
            return;
        }
        let Some(text) = params.first().map(|t| t.trim()).filter(|t| !t.is_empty()) else {
            return;
        };
        let username = session.username().unwrap_or_default();
        match session.connection_state() {
            ConnectionState::InLobby => {
                self.state.lobby.broadcast_chat(&username, text).await;
            }
            ConnectionState::InRoom | ConnectionState::InGame => {
                if let Some(room) = self.current_room(session).await {
                    room.broadcast_chat(&username, text).await;
                }
            }
            ConnectionState::Connected => {
                session.send(messages::error("not in lobby or room"));
            }
        }
    }

    async fn handle_user_stats(&self, session: &Arc<Session>, params: &[&str]) {
        if !session.is_authenticated() {
            session.send(messages::error("not authenticated"));
            return;
        }
        let target = params.first().copied().filter(|name| !name.is_empty());
        let account = match target {
            Some(username) => self.state.store.get_user_by_username(username).await,
            None => match session.user_id() {
                Some(user_id) if user_id > 0 => self.state.store.get_user_by_id(user_id).await,
                _ => {
                    session.send(messages::error("guests have no stats"));
                    return;
                }
            },
        };
        match account {
            Ok(Some(account)) => session.send(messages::user_stats(&stats_json(&account))),
            Ok(None) => session.send(messages::error("user not found")),
            Err(err) => {
                tracing::error!(error = %err, "Stats lookup failed");
                session.send(messages::error("internal"));
            }
        }
    }

    async fn handle_settings_get(&self, session: &Arc<Session>) {
        let Some(user_id) = session.user_id() else {
            session.send(messages::error("not authenticated"));
            return;
        };
        match self.state.store.get_user_settings(user_id).await {
            Ok(settings) => {
                let body = serde_json::to_value(&settings).unwrap_or_else(|_| json!({}));
                session.send(messages::settings(&body));
            }
            Err(err) => {
                // Settings reads fall back to defaults on storage trouble.
                tracing::error!(error = %err, user_id, "Settings read failed, serving defaults");
                let body = serde_json::to_value(UserSettings::default())
                    .unwrap_or_else(|_| json!({}));
                session.send(messages::settings(&body));
            }
        }
    }

    async fn handle_settings_update(&self, session: &Arc<Session>, params: &[&str]) {
        let Some(user_id) = session.user_id() else {
            session.send(messages::error("not authenticated"));
            return;
        };
        let Some(body) = params.first() else {
            session.send(messages::error("settings:update requires a body"));
            return;
        };
        let Ok(settings) = serde_json::from_str::<UserSettings>(body) else {
            session.send(messages::error("invalid settings"));
            return;
        };
        match self.state.store.update_user_settings(user_id, &settings).await {
            Ok(()) => session.send(messages::settings_updated()),
            Err(err) => {
                tracing::error!(error = %err, user_id, "Settings update failed");
                session.send(messages::error("internal"));
            }
        }
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn current_room(&self, session: &Arc<Session>) -> Option<Arc<GameRoom>> {
        let room_id = session.room_id();
        if room_id == NO_ROOM {
            return None;
        }
        self.state.rooms.get_room(room_id).await
    }

    async fn current_room_checked(
        &self,
        session: &Arc<Session>,
        required: ConnectionState,
    ) -> Option<Arc<GameRoom>> {
        if session.connection_state() != required {
            session.send(messages::error("not allowed in current state"));
            return None;
        }
        match self.current_room(session).await {
            Some(room) => Some(room),
            None => {
                session.send(messages::error("not in a room"));
                None
            }
        }
    }

    /// Remove the session's seat from its current room, destroying the
    /// room when it empties.
    async fn leave_current_room(&self, session: &Arc<Session>) {
        let room_id = session.room_id();
        if room_id == NO_ROOM {
            return;
        }
        if let Some(room) = self.state.rooms.get_room(room_id).await {
            if let Some(user_id) = session.user_id() {
                if let Ok(true) = room.remove_player(user_id).await {
                    self.state.rooms.remove_room(room_id).await;
                }
            }
        }
        session.set_room_id(NO_ROOM);
    }

    async fn broadcast_room_list(&self) {
        let summaries = self.state.rooms.list_summaries().await;
        self.state.lobby.broadcast_room_list(&summaries).await;
    }
}

fn parse_move_params(params: &[&str]) -> Option<(BlockType, i32, i32, Rotation, Flip)> {
    let [block, row, col, rotation, flip] = params else {
        return None;
    };
    let block = BlockType::from_id(block.parse().ok()?)?;
    let row = row.parse().ok()?;
    let col = col.parse().ok()?;
    let rotation = Rotation::from_degrees(rotation.parse().ok()?)?;
    let flip = Flip::from_code(flip.parse().ok()?)?;
    Some((block, row, col, rotation, flip))
}

fn auth_error_line(err: &AuthError) -> String {
    match err {
        AuthError::Database(inner) => {
            tracing::error!(code = %ServerErrorCode::Database, error = %inner, "Auth database failure");
            messages::error("internal")
        }
        other => {
            tracing::debug!(code = %ServerErrorCode::Authentication, error = %other, "Auth rejected");
            messages::error(&other.to_string())
        }
    }
}

fn room_error_code(err: &RoomError) -> ServerErrorCode {
    match err {
        RoomError::RoomFull => ServerErrorCode::Capacity,
        RoomError::GameNotActive | RoomError::NotYourTurn | RoomError::InvalidMove => {
            ServerErrorCode::GameState
        }
        _ => ServerErrorCode::RoomState,
    }
}

fn room_error_line(err: &RoomError) -> String {
    tracing::debug!(code = %room_error_code(err), error = %err, "Room operation rejected");
    messages::error(&err.to_string())
}

fn stats_json(account: &UserAccount) -> serde_json::Value {
    json!({
        "username": account.username,
        "displayName": account.display_name,
        "totalGames": account.total_games,
        "wins": account.wins,
        "losses": account.losses,
        "draws": account.draws,
        "winRate": account.win_rate(),
        "level": account.level,
        "experiencePoints": account.experience_points,
        "totalScore": account.total_score,
        "bestScore": account.best_score,
        "averageScore": account.average_score(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_move_params() {
        let (block, row, col, rotation, flip) =
            parse_move_params(&["1", "0", "0", "0", "0"]).unwrap();
        assert_eq!(block, BlockType::Single);
        assert_eq!((row, col), (0, 0));
        assert_eq!(rotation, Rotation::R0);
        assert_eq!(flip, Flip::None);

        assert!(parse_move_params(&["1", "0", "0", "0"]).is_none());
        assert!(parse_move_params(&["22", "0", "0", "0", "0"]).is_none());
        assert!(parse_move_params(&["1", "0", "0", "45", "0"]).is_none());
        assert!(parse_move_params(&["1", "0", "0", "0", "2"]).is_none());
        assert!(parse_move_params(&["x", "0", "0", "0", "0"]).is_none());
    }

    #[test]
    fn test_stats_json_fields() {
        let mut account = UserAccount::new(1, "alice", "salt:hash");
        account.total_games = 2;
        account.wins = 1;
        account.total_score = 60;
        let body = stats_json(&account);
        assert_eq!(body["username"], "alice");
        assert_eq!(body["totalGames"], 2);
        assert_eq!(body["winRate"], 0.5);
        assert_eq!(body["averageScore"], 30.0);
    }
}
