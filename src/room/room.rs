//! Game room: membership, ready gating, and the running game.
//!
//! One mutex guards the whole room (seats, game state, timer bookkeeping).
//! Mutating operations collect their outgoing messages under the lock and
//! deliver them after it is released; per-recipient ordering follows the
//! order messages were enqueued. Database work never runs under the lock.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::db::{
    calculate_experience_gain, GameResultRecord, UserStore,
};
use crate::game::{
    BlockPlacement, BlockType, Flip, GameState, PlacementError, PlayerColor, Rotation, TurnAdvance,
};
use crate::protocol::messages::{self, AfkNotice, GameResultBody, PlayerSummary, RoomInfoView, RoomSummary};
use crate::session::Session;

use super::player::PlayerInfo;

/// Current lifecycle of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    Waiting,
    Playing,
    Disbanded,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RoomError {
    #[error("room is full")]
    RoomFull,
    #[error("wrong password")]
    WrongPassword,
    #[error("room is not accepting players")]
    NotWaiting,
    #[error("game is not active")]
    GameNotActive,
    #[error("only the host can do that")]
    NotHost,
    #[error("need at least 2 players")]
    NotEnoughPlayers,
    #[error("all players must be ready")]
    PlayersNotReady,
    #[error("player not in this room")]
    NotInRoom,
    #[error("not your turn")]
    NotYourTurn,
    #[error("invalid move")]
    InvalidMove,
    #[error("already joined")]
    AlreadyJoined,
}

/// Behavior knobs injected from config.
#[derive(Debug, Clone, Copy)]
pub struct RoomConfig {
    pub turn_time_limit: Duration,
    pub afk_timeout_threshold: u32,
}

#[derive(Debug, Default, Clone, Copy)]
struct AfkState {
    timeout_count: u32,
    afk_mode: bool,
}

struct RoomInner {
    state: RoomState,
    host_user_id: i64,
    players: Vec<PlayerInfo>,
    game: Option<GameState>,
    afk: HashMap<PlayerColor, AfkState>,
    last_activity: DateTime<Utc>,
    game_started_at: Option<DateTime<Utc>>,
    has_completed_game: bool,
    timer_task: Option<tokio::task::JoinHandle<()>>,
}

/// Messages collected under the room lock, delivered after release.
#[derive(Default)]
struct MessageBatch {
    outgoing: Vec<(Arc<Session>, String)>,
}

impl MessageBatch {
    fn to(&mut self, session: &Arc<Session>, line: impl Into<String>) {
        self.outgoing.push((Arc::clone(session), line.into()));
    }

    /// Enqueue one line to every seat in a single pass, preserving event
    /// order per recipient.
    fn all(&mut self, players: &[PlayerInfo], line: &str) {
        for player in players {
            self.outgoing
                .push((Arc::clone(player.session()), line.to_string()));
        }
    }

    fn all_except(&mut self, players: &[PlayerInfo], except_user: i64, line: &str) {
        for player in players {
            if player.user_id() != except_user {
                self.outgoing
                    .push((Arc::clone(player.session()), line.to_string()));
            }
        }
    }

    fn deliver(self) {
        for (session, line) in self.outgoing {
            session.send(line);
        }
    }
}

pub struct GameRoom {
    room_id: i32,
    name: String,
    is_private: bool,
    password: Option<String>,
    created_at: DateTime<Utc>,
    config: RoomConfig,
    store: Arc<dyn UserStore>,
    inner: Mutex<RoomInner>,
    /// Bumped on every (re)schedule; a firing timer with a stale
    /// generation is a cancelled timer.
    timer_generation: AtomicU64,
}

impl GameRoom {
    pub fn new(
        room_id: i32,
        name: String,
        is_private: bool,
        password: Option<String>,
        config: RoomConfig,
        store: Arc<dyn UserStore>,
    ) -> Self {
        Self {
            room_id,
            name,
            is_private,
            password: password.filter(|p| !p.is_empty()),
            created_at: Utc::now(),
            config,
            store,
            inner: Mutex::new(RoomInner {
                state: RoomState::Waiting,
                host_user_id: 0,
                players: Vec::new(),
                game: None,
                afk: HashMap::new(),
                last_activity: Utc::now(),
                game_started_at: None,
                has_completed_game: false,
                timer_task: None,
            }),
            timer_generation: AtomicU64::new(0),
        }
    }

    pub fn room_id(&self) -> i32 {
        self.room_id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_private(&self) -> bool {
        self.is_private
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    // -----------------------------------------------------------------------
    // Membership
    // -----------------------------------------------------------------------

    /// Seat a player. The first player becomes host; colors are assigned
    /// first-available in canonical order and never reshuffled.
    pub async fn add_player(
        &self,
        session: Arc<Session>,
        password: Option<&str>,
    ) -> Result<(), RoomError> {
        let mut batch = MessageBatch::default();
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Waiting {
                return Err(RoomError::NotWaiting);
            }
            if inner.players.len() >= crate::game::MAX_PLAYERS {
                return Err(RoomError::RoomFull);
            }
            if let Some(expected) = &self.password {
                if password != Some(expected.as_str()) {
                    return Err(RoomError::WrongPassword);
                }
            }
            let user_id = session.user_id().unwrap_or_default();
            if inner.players.iter().any(|p| p.user_id() == user_id) {
                return Err(RoomError::AlreadyJoined);
            }

            let color = next_free_color(&inner.players).ok_or(RoomError::RoomFull)?;
            let mut player = PlayerInfo::new(session);
            player.set_color(color);
            if inner.players.is_empty() {
                player.set_host(true);
                inner.host_user_id = user_id;
            }
            let username = player.username();
            inner.players.push(player);
            inner.last_activity = Utc::now();

            // Existing members hear about the join; the newcomer's own
            // ROOM_JOINED + ROOM_INFO replies come from the handler so they
            // arrive in protocol order.
            batch.all_except(&inner.players, user_id, &messages::player_joined(&username));
            let info = messages::room_info(&room_info_view_locked(self, &inner));
            batch.all_except(&inner.players, user_id, &info);
            tracing::info!(room_id = self.room_id, %username, ?color, "Player joined room");
        }
        batch.deliver();
        Ok(())
    }

    /// Remove a seat. Elects a new host if the host left and others
    /// remain; returns true when the room is now empty.
    pub async fn remove_player(self: &Arc<Self>, user_id: i64) -> Result<bool, RoomError> {
        let mut batch = MessageBatch::default();
        let mut needs_turn_advance = false;
        let empty;
        {
            let mut inner = self.inner.lock().await;
            let idx = inner
                .players
                .iter()
                .position(|p| p.user_id() == user_id)
                .ok_or(RoomError::NotInRoom)?;
            let removed = inner.players.remove(idx);
            let username = removed.username();
            let was_host = removed.is_host();
            inner.last_activity = Utc::now();

            batch.all(&inner.players, &messages::player_left(&username));

            if was_host {
                if let Some(new_host_name) = elect_first_player_host(&mut inner) {
                    batch.all(&inner.players, &messages::host_changed(&new_host_name));
                    tracing::info!(
                        room_id = self.room_id,
                        new_host = %new_host_name,
                        "Host left, elected new host"
                    );
                }
            }

            if inner.state == RoomState::Playing {
                if let (Some(color), Some(game)) = (removed.color(), inner.game.as_ref()) {
                    if game.current_player() == Some(color) {
                        needs_turn_advance = true;
                    }
                }
            }

            empty = inner.players.is_empty();
            if !empty {
                let info = messages::room_info(&room_info_view_locked(self, &inner));
                batch.all(&inner.players, &info);
            }
            tracing::info!(room_id = self.room_id, %username, "Player left room");
        }
        batch.deliver();
        if needs_turn_advance {
            // The departing player held the turn; move play along.
            self.advance_after_departure().await;
        }
        Ok(empty)
    }

    pub async fn has_player(&self, user_id: i64) -> bool {
        let inner = self.inner.lock().await;
        inner.players.iter().any(|p| p.user_id() == user_id)
    }

    // -----------------------------------------------------------------------
    // Ready / host management
    // -----------------------------------------------------------------------

    pub async fn set_player_ready(&self, user_id: i64, ready: bool) -> Result<(), RoomError> {
        let mut batch = MessageBatch::default();
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Waiting {
                return Err(RoomError::NotWaiting);
            }
            let player = inner
                .players
                .iter_mut()
                .find(|p| p.user_id() == user_id)
                .ok_or(RoomError::NotInRoom)?;
            let username = player.username();
            let changed = player.set_ready(ready);
            let effective = player.is_ready();
            inner.last_activity = Utc::now();

            if changed {
                batch.all(&inner.players, &messages::player_ready(&username, effective));
                let info = messages::room_info(&room_info_view_locked(self, &inner));
                batch.all(&inner.players, &info);
            }
        }
        batch.deliver();
        Ok(())
    }

    /// Host-initiated transfer to a named seated player.
    pub async fn transfer_host(
        &self,
        requester_id: i64,
        target_username: &str,
    ) -> Result<(), RoomError> {
        let mut batch = MessageBatch::default();
        {
            let mut inner = self.inner.lock().await;
            if inner.host_user_id != requester_id {
                return Err(RoomError::NotHost);
            }
            let target_idx = inner
                .players
                .iter()
                .position(|p| p.username() == target_username)
                .ok_or(RoomError::NotInRoom)?;

            for player in &mut inner.players {
                player.set_host(false);
            }
            let new_host_id = {
                let new_host = &mut inner.players[target_idx];
                new_host.set_host(true);
                new_host.user_id()
            };
            inner.host_user_id = new_host_id;
            inner.last_activity = Utc::now();

            batch.all(&inner.players, &messages::host_changed(target_username));
            let info = messages::room_info(&room_info_view_locked(self, &inner));
            batch.all(&inner.players, &info);
            tracing::info!(room_id = self.room_id, new_host = %target_username, "Host transferred");
        }
        batch.deliver();
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Game lifecycle
    // -----------------------------------------------------------------------

    /// Host starts the game: >= 2 seats, every non-host ready.
    pub async fn start_game(self: &Arc<Self>, initiator_id: i64) -> Result<(), RoomError> {
        let mut batch = MessageBatch::default();
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Waiting {
                return Err(RoomError::NotWaiting);
            }
            if inner.host_user_id != initiator_id {
                return Err(RoomError::NotHost);
            }
            if inner.players.len() < 2 {
                return Err(RoomError::NotEnoughPlayers);
            }
            if !inner.players.iter().all(PlayerInfo::is_ready) {
                return Err(RoomError::PlayersNotReady);
            }

            let seated: Vec<PlayerColor> =
                inner.players.iter().filter_map(PlayerInfo::color).collect();
            let game = GameState::new(&seated);

            for player in &mut inner.players {
                player.reset_for_game_start();
                player
                    .session()
                    .set_connection_state(crate::session::ConnectionState::InGame);
            }
            inner.afk.clear();
            inner.state = RoomState::Playing;
            inner.game_started_at = Some(Utc::now());
            inner.last_activity = Utc::now();

            let first = game.current_player();
            batch.all(&inner.players, &messages::game_started());
            batch.all(&inner.players, &messages::game_state_update(&game.snapshot()));
            inner.game = Some(game);
            if let Some(first) = first {
                let line = self.turn_changed_line_locked(&inner, first, false);
                batch.all(&inner.players, &line);
            }
            tracing::info!(
                room_id = self.room_id,
                players = inner.players.len(),
                "Game started"
            );
        }
        batch.deliver();
        self.schedule_turn_timer().await;
        Ok(())
    }

    /// The six-step placement sequence: validate, apply, broadcast, advance,
    /// maybe end, rearm the timer.
    pub async fn handle_block_placement(
        self: &Arc<Self>,
        user_id: i64,
        block: BlockType,
        row: i32,
        col: i32,
        rotation: Rotation,
        flip: Flip,
    ) -> Result<(), RoomError> {
        let mut batch = MessageBatch::default();
        let mut continue_play = false;
        let mut finish: Option<FinishedGame> = None;
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Playing {
                return Err(RoomError::GameNotActive);
            }
            let player = inner
                .players
                .iter()
                .find(|p| p.user_id() == user_id)
                .ok_or(RoomError::NotInRoom)?;
            let color = player.color().ok_or(RoomError::NotInRoom)?;
            let username = player.username();

            let placement = BlockPlacement {
                block,
                row,
                col,
                rotation,
                flip,
                player: color,
            };

            let game = inner.game.as_mut().ok_or(RoomError::GameNotActive)?;
            let gained = game.place(&placement).map_err(|err| match err {
                PlacementError::NotYourTurn => RoomError::NotYourTurn,
                PlacementError::IllegalMove | PlacementError::BlockAlreadyUsed => {
                    RoomError::InvalidMove
                }
            })?;

            let remaining = game.remaining_count(color);
            let snapshot = game.snapshot();
            // A successful move resets the consecutive-timeout counter.
            inner.afk.entry(color).or_default().timeout_count = 0;

            if let Some(player) = inner.players.iter_mut().find(|p| p.user_id() == user_id) {
                player.add_score(gained);
                player.set_remaining_blocks(remaining);
            }
            inner.last_activity = Utc::now();

            batch.all(
                &inner.players,
                &messages::block_placed(
                    &username,
                    block.id(),
                    row,
                    col,
                    rotation.degrees(),
                    flip.code(),
                    color.index(),
                    gained,
                ),
            );
            batch.all(&inner.players, &messages::game_state_update(&snapshot));

            match self.advance_turn_locked(&mut inner) {
                TurnAdvance::Next { player: next, .. } => {
                    let line = self.turn_changed_line_locked(&inner, next, false);
                    batch.all(&inner.players, &line);
                    continue_play = true;
                }
                TurnAdvance::NoOneCanMove => {
                    finish = Some(self.end_game_locked(&mut inner, &mut batch));
                }
            }
        }
        batch.deliver();
        if continue_play {
            self.schedule_turn_timer().await;
        }
        if let Some(finished) = finish {
            self.persist_results(finished);
        }
        Ok(())
    }

    /// Clear a seat's AFK mode. Fails when no game is active so the
    /// counter is left untouched.
    pub async fn afk_unblock(&self, user_id: i64) -> Result<(), RoomError> {
        let mut inner = self.inner.lock().await;
        if inner.state != RoomState::Playing || inner.game.is_none() {
            return Err(RoomError::GameNotActive);
        }
        let color = inner
            .players
            .iter()
            .find(|p| p.user_id() == user_id)
            .and_then(PlayerInfo::color)
            .ok_or(RoomError::NotInRoom)?;
        let afk = inner.afk.entry(color).or_default();
        afk.afk_mode = false;
        afk.timeout_count = 0;
        tracing::info!(room_id = self.room_id, user_id, "AFK mode cleared");
        Ok(())
    }

    /// Turn timer expiry. Stale generations are cancelled timers.
    async fn on_turn_timeout(self: &Arc<Self>, generation: u64) {
        if self.timer_generation.load(Ordering::Acquire) != generation {
            return;
        }
        let mut batch = MessageBatch::default();
        let mut continue_play = false;
        let mut finish: Option<FinishedGame> = None;
        {
            let mut inner = self.inner.lock().await;
            if self.timer_generation.load(Ordering::Acquire) != generation
                || inner.state != RoomState::Playing
            {
                return;
            }
            let Some(current) = inner.game.as_ref().and_then(GameState::current_player) else {
                return;
            };

            let afk = inner.afk.entry(current).or_default();
            afk.timeout_count += 1;
            let count = afk.timeout_count;
            let went_afk = count >= self.config.afk_timeout_threshold && !afk.afk_mode;
            if went_afk {
                afk.afk_mode = true;
            }

            let username = inner
                .players
                .iter()
                .find(|p| p.color() == Some(current))
                .map_or_else(String::new, PlayerInfo::username);
            tracing::info!(
                room_id = self.room_id,
                %username,
                count,
                afk = went_afk,
                "Turn timed out"
            );

            batch.all(&inner.players, &messages::turn_timeout(&username, current.index()));
            if went_afk {
                let notice = messages::afk_mode_activated(&AfkNotice {
                    reason: "timeout".to_string(),
                    timeout_count: count,
                    max_count: self.config.afk_timeout_threshold,
                });
                if let Some(player) = inner.players.iter().find(|p| p.color() == Some(current)) {
                    batch.to(player.session(), notice);
                }
            }

            match self.advance_turn_locked(&mut inner) {
                TurnAdvance::Next { player: next, .. } => {
                    let line = self.turn_changed_line_locked(&inner, next, true);
                    batch.all(&inner.players, &line);
                    continue_play = true;
                }
                TurnAdvance::NoOneCanMove => {
                    finish = Some(self.end_game_locked(&mut inner, &mut batch));
                }
            }
        }
        batch.deliver();
        if continue_play {
            self.schedule_turn_timer().await;
        }
        if let Some(finished) = finish {
            self.persist_results(finished);
        }
    }

    /// Cancel any outstanding timer and mark the room disbanded.
    pub async fn destroy(&self) {
        self.timer_generation.fetch_add(1, Ordering::AcqRel);
        let mut inner = self.inner.lock().await;
        if let Some(task) = inner.timer_task.take() {
            task.abort();
        }
        inner.state = RoomState::Disbanded;
        inner.game = None;
        inner.players.clear();
    }

    /// Drop seats whose session is gone. Only meaningful while waiting;
    /// in-game departures stay seated and are skipped via the AFK path.
    pub async fn cleanup_disconnected_players(&self) -> usize {
        let mut batch = MessageBatch::default();
        let removed;
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Waiting {
                return 0;
            }
            let before = inner.players.len();
            inner.players.retain(PlayerInfo::is_connected);
            removed = before - inner.players.len();
            if removed > 0 {
                let host_gone = !inner
                    .players
                    .iter()
                    .any(|p| p.user_id() == inner.host_user_id);
                if host_gone {
                    if let Some(name) = elect_first_player_host(&mut inner) {
                        batch.all(&inner.players, &messages::host_changed(&name));
                    }
                }
                if !inner.players.is_empty() {
                    let info = messages::room_info(&room_info_view_locked(self, &inner));
                    batch.all(&inner.players, &info);
                }
            }
        }
        batch.deliver();
        removed
    }

    // -----------------------------------------------------------------------
    // Chat / queries
    // -----------------------------------------------------------------------

    /// Re-broadcast chat to every seat, sender included (no local echo on
    /// the client; everyone sees the identical line).
    pub async fn broadcast_chat(&self, username: &str, text: &str) {
        let mut batch = MessageBatch::default();
        {
            let inner = self.inner.lock().await;
            batch.all(&inner.players, &messages::chat(username, text));
        }
        batch.deliver();
    }

    pub async fn send_room_info_to(&self, session: &Arc<Session>) {
        let line = {
            let inner = self.inner.lock().await;
            messages::room_info(&room_info_view_locked(self, &inner))
        };
        session.send(line);
    }

    pub async fn summary(&self) -> RoomSummary {
        let inner = self.inner.lock().await;
        RoomSummary {
            room_id: self.room_id,
            name: self.name.clone(),
            host_name: host_name_locked(&inner),
            player_count: inner.players.len(),
            max_players: crate::game::MAX_PLAYERS,
            is_private: self.is_private,
            is_playing: inner.state == RoomState::Playing,
            mode: "classic".to_string(),
        }
    }

    pub async fn state(&self) -> RoomState {
        self.inner.lock().await.state
    }

    pub async fn player_count(&self) -> usize {
        self.inner.lock().await.players.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.lock().await.players.is_empty()
    }

    pub async fn has_completed_game(&self) -> bool {
        self.inner.lock().await.has_completed_game
    }

    pub async fn is_inactive(&self, threshold: Duration) -> bool {
        let inner = self.inner.lock().await;
        if inner.state == RoomState::Playing {
            return false;
        }
        let idle = Utc::now() - inner.last_activity;
        idle.to_std().map_or(false, |idle| idle > threshold)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn advance_turn_locked(&self, inner: &mut RoomInner) -> TurnAdvance {
        let seated: Vec<PlayerColor> =
            inner.players.iter().filter_map(PlayerInfo::color).collect();
        let afk = inner.afk.clone();
        let Some(game) = inner.game.as_mut() else {
            return TurnAdvance::NoOneCanMove;
        };
        game.advance_turn(|color| {
            !seated.contains(&color) || afk.get(&color).is_some_and(|a| a.afk_mode)
        })
    }

    fn turn_changed_line_locked(
        &self,
        inner: &RoomInner,
        next: PlayerColor,
        previous_timed_out: bool,
    ) -> String {
        let username = inner
            .players
            .iter()
            .find(|p| p.color() == Some(next))
            .map_or_else(String::new, PlayerInfo::username);
        let turn_number = inner.game.as_ref().map_or(0, GameState::turn_number);
        let limit = self.config.turn_time_limit.as_secs();
        messages::turn_changed(
            &username,
            next.index(),
            turn_number,
            limit,
            limit,
            previous_timed_out,
        )
    }

    /// Compute results, broadcast them, and reset the room to waiting.
    /// Persistence inputs are returned so the caller can write them after
    /// the lock is gone.
    fn end_game_locked(&self, inner: &mut RoomInner, batch: &mut MessageBatch) -> FinishedGame {
        // A firing timer for the finished game must be ignored.
        self.timer_generation.fetch_add(1, Ordering::AcqRel);
        if let Some(task) = inner.timer_task.take() {
            task.abort();
        }

        let Some(game) = inner.game.take() else {
            return FinishedGame::default();
        };
        let finals = game.final_scores();
        let winner_colors = game.winners();

        let mut scores = std::collections::BTreeMap::new();
        let mut participants = Vec::new();
        for player in &inner.players {
            let Some(color) = player.color() else { continue };
            let Some(&score) = finals.get(&color) else { continue };
            let won = winner_colors.contains(&color);
            scores.insert(player.username(), score);
            participants.push((player.user_id(), score, won));
        }
        let winners: Vec<String> = inner
            .players
            .iter()
            .filter(|p| p.color().is_some_and(|c| winner_colors.contains(&c)))
            .map(PlayerInfo::username)
            .collect();
        let is_draw = winners.len() > 1;

        batch.all(
            &inner.players,
            &messages::game_result(&GameResultBody {
                scores,
                winners: winners.clone(),
            }),
        );
        batch.all(&inner.players, &messages::game_ended());

        // Reset to waiting; non-host ready flags drop, dead seats leave.
        inner.state = RoomState::Waiting;
        inner.afk.clear();
        inner.has_completed_game = true;
        inner.game_started_at = None;
        inner.last_activity = Utc::now();
        for player in &mut inner.players {
            player.reset_after_game();
            player
                .session()
                .set_connection_state(crate::session::ConnectionState::InRoom);
        }
        inner.players.retain(PlayerInfo::is_connected);
        let host_gone = !inner
            .players
            .iter()
            .any(|p| p.user_id() == inner.host_user_id);
        if host_gone {
            if let Some(name) = elect_first_player_host(inner) {
                batch.all(&inner.players, &messages::host_changed(&name));
            }
        }
        if !inner.players.is_empty() {
            let info = messages::room_info(&room_info_view_locked(self, &inner));
            batch.all(&inner.players, &info);
        }

        tracing::info!(
            room_id = self.room_id,
            winners = ?winners,
            is_draw,
            "Game finished"
        );

        FinishedGame {
            participants,
            is_draw,
        }
    }

    /// Best-effort persistence; failures are logged and never block the
    /// result broadcast (which already happened).
    fn persist_results(&self, finished: FinishedGame) {
        let store = Arc::clone(&self.store);
        let room_id = self.room_id;
        tokio::spawn(async move {
            // Guests carry synthetic negative ids and are not persisted.
            let persisted: Vec<_> = finished
                .participants
                .iter()
                .filter(|(user_id, _, _)| *user_id > 0)
                .cloned()
                .collect();
            if persisted.is_empty() {
                return;
            }

            let record = GameResultRecord {
                player_ids: persisted.iter().map(|(id, _, _)| *id).collect(),
                scores: persisted.iter().map(|(_, score, _)| *score).collect(),
                is_winner: persisted.iter().map(|(_, _, won)| *won).collect(),
                is_draw: finished.is_draw,
            };
            if let Err(err) = store.save_game_results(&record).await {
                tracing::error!(room_id, error = %err, "Failed to save game results");
            }

            for (user_id, score, won) in persisted {
                if let Err(err) = store
                    .update_game_stats(user_id, won, finished.is_draw, score)
                    .await
                {
                    tracing::error!(room_id, user_id, error = %err, "Failed to update stats");
                    continue;
                }
                let gain = calculate_experience_gain(won, score, true);
                if let Err(err) = store.update_player_experience(user_id, gain).await {
                    tracing::error!(room_id, user_id, error = %err, "Failed to grant experience");
                    continue;
                }
                if let Err(err) = store.check_and_process_level_up(user_id).await {
                    tracing::error!(room_id, user_id, error = %err, "Failed to process level-up");
                }
            }
        });
    }

    /// Arm the single-shot turn timer; rescheduling cancels the previous
    /// instance via the generation counter and abort.
    fn schedule_turn_timer(
        self: &Arc<Self>,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let generation = self.timer_generation.fetch_add(1, Ordering::AcqRel) + 1;
            let room = Arc::clone(self);
            let delay = self.config.turn_time_limit;
            let task = tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                room.on_turn_timeout(generation).await;
            });
            let mut inner = self.inner.lock().await;
            if let Some(previous) = inner.timer_task.replace(task) {
                previous.abort();
            }
        })
    }

    /// A mid-game departure by the current player passes the turn.
    async fn advance_after_departure(self: &Arc<Self>) {
        let mut batch = MessageBatch::default();
        let mut continue_play = false;
        let mut finish = None;
        {
            let mut inner = self.inner.lock().await;
            if inner.state != RoomState::Playing || inner.game.is_none() {
                return;
            }
            match self.advance_turn_locked(&mut inner) {
                TurnAdvance::Next { player: next, .. } => {
                    let line = self.turn_changed_line_locked(&inner, next, false);
                    batch.all(&inner.players, &line);
                    continue_play = true;
                }
                TurnAdvance::NoOneCanMove => {
                    finish = Some(self.end_game_locked(&mut inner, &mut batch));
                }
            }
        }
        batch.deliver();
        if continue_play {
            self.schedule_turn_timer().await;
        }
        if let Some(finished) = finish {
            self.persist_results(finished);
        }
    }

    #[cfg(test)]
    async fn force_timeout(self: &Arc<Self>) {
        let generation = self.timer_generation.load(Ordering::Acquire);
        self.on_turn_timeout(generation).await;
    }
}

#[derive(Default)]
struct FinishedGame {
    /// `(user_id, final_score, is_winner)` per seated player.
    participants: Vec<(i64, i32, bool)>,
    is_draw: bool,
}

/// Make the first remaining seat the host (join order, no voting).
/// Returns the new host's username.
fn elect_first_player_host(inner: &mut RoomInner) -> Option<String> {
    let (name, user_id) = {
        let new_host = inner.players.first_mut()?;
        new_host.set_host(true);
        (new_host.username(), new_host.user_id())
    };
    inner.host_user_id = user_id;
    Some(name)
}

fn next_free_color(players: &[PlayerInfo]) -> Option<PlayerColor> {
    PlayerColor::ALL
        .into_iter()
        .find(|color| !players.iter().any(|p| p.color() == Some(*color)))
}

fn host_name_locked(inner: &RoomInner) -> String {
    inner
        .players
        .iter()
        .find(|p| p.is_host())
        .map_or_else(String::new, PlayerInfo::username)
}

fn room_info_view_locked(room: &GameRoom, inner: &RoomInner) -> RoomInfoView {
    RoomInfoView {
        room_id: room.room_id,
        name: room.name.clone(),
        host_name: host_name_locked(inner),
        max_players: crate::game::MAX_PLAYERS,
        is_private: room.is_private,
        is_playing: inner.state == RoomState::Playing,
        mode: "classic".to_string(),
        players: inner
            .players
            .iter()
            .map(|p| PlayerSummary {
                user_id: p.user_id(),
                username: p.username(),
                display_name: p.display_name(),
                is_host: p.is_host(),
                is_ready: p.is_ready(),
                color_index: p.color().map_or(1, PlayerColor::index),
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::InMemoryStore;
    use crate::session::Session;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn test_config() -> RoomConfig {
        RoomConfig {
            turn_time_limit: Duration::from_secs(30),
            afk_timeout_threshold: 3,
        }
    }

    fn new_room() -> Arc<GameRoom> {
        Arc::new(GameRoom::new(
            1,
            "Test Room".to_string(),
            false,
            None,
            test_config(),
            Arc::new(InMemoryStore::new()),
        ))
    }

    fn client(user_id: i64, name: &str) -> (Arc<Session>, UnboundedReceiver<String>) {
        let (session, rx) = Session::new("127.0.0.1:40000".parse().unwrap());
        session.bind_user(user_id, name, "token");
        (session, rx)
    }

    fn drain(rx: &mut UnboundedReceiver<String>) -> Vec<String> {
        let mut lines = Vec::new();
        while let Ok(line) = rx.try_recv() {
            lines.push(line);
        }
        lines
    }

    #[tokio::test]
    async fn test_capacity_four_seats() {
        let room = new_room();
        let mut channels = Vec::new();
        for i in 1..=4 {
            let (session, rx) = client(i, &format!("user{i}"));
            room.add_player(session, None).await.unwrap();
            channels.push(rx);
        }
        assert_eq!(room.player_count().await, 4);

        let (fifth, _rx) = client(5, "user5");
        assert_eq!(
            room.add_player(fifth, None).await.unwrap_err(),
            RoomError::RoomFull
        );
    }

    #[tokio::test]
    async fn test_first_player_is_host_with_first_color() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        room.add_player(Arc::clone(&alice), None).await.unwrap();

        let summary = room.summary().await;
        assert_eq!(summary.host_name, "alice");
        assert_eq!(summary.player_count, 1);

        // The joiner's own info reply comes on request, with the host seat
        // ready on Blue.
        room.send_room_info_to(&alice).await;
        let lines = drain(&mut alice_rx);
        assert!(lines.iter().any(|l| l.contains(":1,alice,alice,1,1,1")));
    }

    #[tokio::test]
    async fn test_join_broadcasts() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        drain(&mut alice_rx);

        room.add_player(Arc::clone(&bob), None).await.unwrap();
        let alice_lines = drain(&mut alice_rx);
        assert!(alice_lines.contains(&"PLAYER_JOINED:bob".to_string()));
        assert!(alice_lines.iter().any(|l| l.starts_with("ROOM_INFO:")));

        // The joiner hears nothing from the seat change itself; their info
        // reply is requested by the handler.
        assert!(drain(&mut bob_rx).is_empty());
        room.send_room_info_to(&bob).await;
        let bob_lines = drain(&mut bob_rx);
        assert!(
            bob_lines.iter().any(|l| l.contains("2,bob,bob,0,0,2")),
            "bob seated on yellow: {bob_lines:?}"
        );
    }

    #[tokio::test]
    async fn test_duplicate_join_rejected() {
        let room = new_room();
        let (alice, _rx) = client(1, "alice");
        room.add_player(Arc::clone(&alice), None).await.unwrap();
        assert_eq!(
            room.add_player(alice, None).await.unwrap_err(),
            RoomError::AlreadyJoined
        );
    }

    #[tokio::test]
    async fn test_private_room_password() {
        let store: Arc<dyn UserStore> = Arc::new(InMemoryStore::new());
        let room = Arc::new(GameRoom::new(
            2,
            "Secret".to_string(),
            true,
            Some("hunter2".to_string()),
            test_config(),
            store,
        ));
        let (alice, _rx) = client(1, "alice");
        assert_eq!(
            room.add_player(Arc::clone(&alice), None).await.unwrap_err(),
            RoomError::WrongPassword
        );
        assert_eq!(
            room.add_player(Arc::clone(&alice), Some("wrong")).await.unwrap_err(),
            RoomError::WrongPassword
        );
        room.add_player(alice, Some("hunter2")).await.unwrap();
    }

    #[tokio::test]
    async fn test_host_election_on_leave() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        drain(&mut bob_rx);

        let empty = room.remove_player(1).await.unwrap();
        assert!(!empty);
        let lines = drain(&mut bob_rx);
        assert!(lines.contains(&"PLAYER_LEFT:alice".to_string()));
        assert!(lines.contains(&"HOST_CHANGED:bob".to_string()));
        assert_eq!(room.summary().await.host_name, "bob");
    }

    #[tokio::test]
    async fn test_remove_last_player_reports_empty() {
        let room = new_room();
        let (alice, _rx) = client(1, "alice");
        room.add_player(alice, None).await.unwrap();
        assert!(room.remove_player(1).await.unwrap());
        assert!(room.is_empty().await);
    }

    #[tokio::test]
    async fn test_start_requires_host_count_and_ready() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        room.add_player(alice, None).await.unwrap();

        // One player is not enough.
        assert_eq!(
            room.start_game(1).await.unwrap_err(),
            RoomError::NotEnoughPlayers
        );

        let (bob, _b) = client(2, "bob");
        room.add_player(bob, None).await.unwrap();

        // Bob has not readied up.
        assert_eq!(
            room.start_game(1).await.unwrap_err(),
            RoomError::PlayersNotReady
        );

        room.set_player_ready(2, true).await.unwrap();
        // Only the host may start.
        assert_eq!(room.start_game(2).await.unwrap_err(), RoomError::NotHost);

        room.start_game(1).await.unwrap();
        assert_eq!(room.state().await, RoomState::Playing);

        // Starting again is refused.
        assert_eq!(room.start_game(1).await.unwrap_err(), RoomError::NotWaiting);
    }

    #[tokio::test]
    async fn test_start_broadcast_sequence() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(2, true).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        room.start_game(1).await.unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let lines = drain(rx);
            assert_eq!(lines[0], "GAME_STARTED");
            assert!(lines[1].starts_with("GAME_STATE_UPDATE:"));
            assert_eq!(lines[2], "TURN_CHANGED:alice:1:1:30:30:false");
        }
    }

    #[tokio::test]
    async fn test_first_move_flow() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(2, true).await.unwrap();
        room.start_game(1).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        room.handle_block_placement(1, BlockType::Single, 0, 0, Rotation::R0, Flip::None)
            .await
            .unwrap();

        for rx in [&mut alice_rx, &mut bob_rx] {
            let lines = drain(rx);
            assert_eq!(lines[0], "BLOCK_PLACED:alice:1:0:0:0:0:1:1");
            assert!(lines[1].starts_with("GAME_STATE_UPDATE:"));
            assert_eq!(lines[2], "TURN_CHANGED:bob:2:2:30:30:false");
        }
    }

    #[tokio::test]
    async fn test_illegal_move_rejected_sender_only() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(2, true).await.unwrap();
        room.start_game(1).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Not covering Blue's starting corner.
        let err = room
            .handle_block_placement(1, BlockType::Single, 5, 5, Rotation::R0, Flip::None)
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::InvalidMove);

        // Nobody saw a broadcast.
        assert!(drain(&mut alice_rx).is_empty());
        assert!(drain(&mut bob_rx).is_empty());
    }

    #[tokio::test]
    async fn test_out_of_turn_rejected() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        let (bob, _b) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(2, true).await.unwrap();
        room.start_game(1).await.unwrap();

        let err = room
            .handle_block_placement(2, BlockType::Single, 0, 19, Rotation::R0, Flip::None)
            .await
            .unwrap_err();
        assert_eq!(err, RoomError::NotYourTurn);
    }

    #[tokio::test]
    async fn test_timeouts_escalate_to_afk() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(2, true).await.unwrap();
        room.start_game(1).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Alice (Blue) times out three times in a row.
        for expected_count in 1..=3u32 {
            room.force_timeout().await;
            let lines = drain(&mut alice_rx);
            assert!(
                lines.contains(&"TURN_TIMEOUT:alice:1".to_string()),
                "timeout {expected_count}: {lines:?}"
            );
            if expected_count == 3 {
                assert!(
                    lines.iter().any(|l| l.starts_with("AFK_MODE_ACTIVATED:")),
                    "third timeout activates AFK: {lines:?}"
                );
            } else {
                assert!(!lines.iter().any(|l| l.starts_with("AFK_MODE_ACTIVATED:")));
            }
            // Turn passes to bob with previous_timed_out flag.
            assert!(lines
                .iter()
                .any(|l| l.starts_with("TURN_CHANGED:bob:") && l.ends_with(":true")));

            // Bob sees the timeout but never the AFK notice.
            let bob_lines = drain(&mut bob_rx);
            assert!(bob_lines.contains(&"TURN_TIMEOUT:alice:1".to_string()));
            assert!(!bob_lines.iter().any(|l| l.starts_with("AFK_MODE_ACTIVATED:")));

            // Bob plays a legal move to hand the turn back to alice (who is
            // skipped once AFK). Each placement corner-touches his previous
            // pieces without sharing an edge.
            let bob_moves = [
                (0, 19, BlockType::Single),
                (1, 17, BlockType::Domino),
                (2, 14, BlockType::TrioLine),
            ];
            let (row, col, block) = bob_moves[(expected_count - 1) as usize];
            room.handle_block_placement(2, block, row, col, Rotation::R0, Flip::None)
                .await
                .unwrap();
            drain(&mut alice_rx);
            drain(&mut bob_rx);
        }

        // After AFK, the turn returns straight to bob.
        let inner = room.inner.lock().await;
        let current = inner.game.as_ref().unwrap().current_player();
        assert_eq!(current, Some(PlayerColor::Yellow));
        drop(inner);

        // Unblock clears the counter so alice rejoins the rotation.
        room.afk_unblock(1).await.unwrap();
        let inner = room.inner.lock().await;
        let afk = inner.afk.get(&PlayerColor::Blue).copied().unwrap_or_default();
        assert!(!afk.afk_mode);
        assert_eq!(afk.timeout_count, 0);
    }

    #[tokio::test]
    async fn test_afk_unblock_requires_active_game() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        room.add_player(alice, None).await.unwrap();
        assert_eq!(
            room.afk_unblock(1).await.unwrap_err(),
            RoomError::GameNotActive
        );
    }

    #[tokio::test]
    async fn test_ready_toggle_broadcasts_once() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, _b) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        drain(&mut alice_rx);

        room.set_player_ready(2, true).await.unwrap();
        assert!(drain(&mut alice_rx)
            .contains(&"PLAYER_READY:bob:1".to_string()));

        // Second identical toggle is a no-op.
        room.set_player_ready(2, true).await.unwrap();
        assert!(drain(&mut alice_rx).is_empty());
    }

    #[tokio::test]
    async fn test_transfer_host() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        drain(&mut bob_rx);

        assert_eq!(
            room.transfer_host(2, "alice").await.unwrap_err(),
            RoomError::NotHost
        );
        room.transfer_host(1, "bob").await.unwrap();
        assert!(drain(&mut bob_rx).contains(&"HOST_CHANGED:bob".to_string()));
        assert_eq!(room.summary().await.host_name, "bob");
        assert_eq!(
            room.transfer_host(1, "bob").await.unwrap_err(),
            RoomError::NotHost
        );
    }

    #[tokio::test]
    async fn test_chat_reaches_everyone_including_sender() {
        let room = new_room();
        let (alice, mut alice_rx) = client(1, "alice");
        let (bob, mut bob_rx) = client(2, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        room.broadcast_chat("alice", "hello all").await;
        assert!(drain(&mut alice_rx).contains(&"CHAT:alice:hello all".to_string()));
        assert!(drain(&mut bob_rx).contains(&"CHAT:alice:hello all".to_string()));
    }

    #[tokio::test]
    async fn test_game_ends_when_nobody_can_move() {
        let store = Arc::new(InMemoryStore::new());
        let alice_account = store.create_user("alice", "h").await.unwrap();
        let bob_account = store.create_user("bob", "h").await.unwrap();

        let room = Arc::new(GameRoom::new(
            1,
            "Endgame".to_string(),
            false,
            None,
            test_config(),
            Arc::clone(&store) as Arc<dyn UserStore>,
        ));
        let (alice, mut alice_rx) = client(alice_account.user_id, "alice");
        let (bob, mut bob_rx) = client(bob_account.user_id, "bob");
        room.add_player(alice, None).await.unwrap();
        room.add_player(bob, None).await.unwrap();
        room.set_player_ready(bob_account.user_id, true).await.unwrap();
        room.start_game(alice_account.user_id).await.unwrap();
        drain(&mut alice_rx);
        drain(&mut bob_rx);

        // Nobody ever moves; alternating timeouts drive both seats into
        // AFK mode, at which point no one can act and the game ends in a
        // 0-0 draw (both at -21 after remaining-block penalties).
        for _ in 0..6 {
            room.force_timeout().await;
        }

        let alice_lines = drain(&mut alice_rx);
        let result_line = alice_lines
            .iter()
            .find(|l| l.starts_with("GAME_RESULT:"))
            .expect("game result broadcast");
        let body: serde_json::Value =
            serde_json::from_str(result_line.strip_prefix("GAME_RESULT:").unwrap()).unwrap();
        assert_eq!(body["scores"]["alice"], -21);
        assert_eq!(body["scores"]["bob"], -21);
        assert_eq!(body["winners"].as_array().unwrap().len(), 2);
        assert!(alice_lines.contains(&"GAME_ENDED".to_string()));
        assert!(drain(&mut bob_rx).contains(&"GAME_ENDED".to_string()));

        // Room resets to waiting; the non-host must ready up again.
        assert_eq!(room.state().await, RoomState::Waiting);
        assert!(room.has_completed_game().await);
        assert_eq!(
            room.start_game(alice_account.user_id).await.unwrap_err(),
            RoomError::PlayersNotReady
        );

        // Persistence is spawned off the lock; give it a moment.
        for _ in 0..50 {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let stats = store.get_stats().await.unwrap();
            if stats.total_games == 1 {
                break;
            }
        }
        let stats = store.get_stats().await.unwrap();
        assert_eq!(stats.total_games, 1);
        let alice_row = store
            .get_user_by_id(alice_account.user_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(alice_row.total_games, 1);
        assert_eq!(alice_row.draws, 1);
        assert_eq!(alice_row.wins, 0);
    }

    #[tokio::test]
    async fn test_cleanup_disconnected_players() {
        let room = new_room();
        let (alice, _a) = client(1, "alice");
        let (bob, _b) = client(2, "bob");
        room.add_player(Arc::clone(&alice), None).await.unwrap();
        room.add_player(bob, None).await.unwrap();

        alice.close();
        let removed = room.cleanup_disconnected_players().await;
        assert_eq!(removed, 1);
        assert_eq!(room.player_count().await, 1);
        // Host moved to the surviving player.
        assert_eq!(room.summary().await.host_name, "bob");
    }
}
