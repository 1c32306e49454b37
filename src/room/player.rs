//! Room-local player state.
//!
//! A seat references its TCP session without owning it; identity is read
//! through the session at call time so nothing here goes stale if the
//! connection is swapped or closed.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::game::{PlayerColor, BLOCKS_PER_PLAYER};
use crate::session::Session;

#[derive(Debug, Clone)]
pub struct PlayerInfo {
    session: Arc<Session>,
    color: Option<PlayerColor>,
    is_host: bool,
    is_ready: bool,
    is_ai: bool,
    ai_difficulty: u8,
    score: i32,
    remaining_blocks: usize,
    last_activity: DateTime<Utc>,
}

impl PlayerInfo {
    pub fn new(session: Arc<Session>) -> Self {
        Self {
            session,
            color: None,
            is_host: false,
            is_ready: false,
            is_ai: false,
            ai_difficulty: 2,
            score: 0,
            remaining_blocks: BLOCKS_PER_PLAYER,
            last_activity: Utc::now(),
        }
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    /// Identity flows through the session, never a copied snapshot.
    pub fn user_id(&self) -> i64 {
        self.session.user_id().unwrap_or_default()
    }

    pub fn username(&self) -> String {
        self.session.username().unwrap_or_default()
    }

    pub fn display_name(&self) -> String {
        self.username()
    }

    pub fn is_connected(&self) -> bool {
        !self.session.is_closed()
    }

    pub fn send(&self, line: impl Into<String>) {
        self.session.send(line);
    }

    pub fn color(&self) -> Option<PlayerColor> {
        self.color
    }

    pub fn set_color(&mut self, color: PlayerColor) {
        self.color = Some(color);
        self.touch();
    }

    pub fn is_host(&self) -> bool {
        self.is_host
    }

    /// Hosts are always considered ready.
    pub fn set_host(&mut self, host: bool) {
        self.is_host = host;
        if host {
            self.is_ready = true;
        }
        self.touch();
    }

    pub fn is_ready(&self) -> bool {
        self.is_host || self.is_ready
    }

    /// Returns true when the flag actually changed (ready toggles are
    /// idempotent). The host's flag never drops.
    pub fn set_ready(&mut self, ready: bool) -> bool {
        let effective = if self.is_host { true } else { ready };
        let changed = self.is_ready != effective;
        self.is_ready = effective;
        self.touch();
        changed
    }

    pub fn is_ai(&self) -> bool {
        self.is_ai
    }

    pub fn ai_difficulty(&self) -> u8 {
        self.ai_difficulty
    }

    pub fn set_ai(&mut self, is_ai: bool, difficulty: u8) {
        self.is_ai = is_ai;
        if is_ai {
            self.ai_difficulty = difficulty.clamp(1, 5);
            self.is_ready = true;
        }
        self.touch();
    }

    pub fn score(&self) -> i32 {
        self.score
    }

    pub fn add_score(&mut self, gained: i32) {
        self.score += gained;
        self.touch();
    }

    pub fn remaining_blocks(&self) -> usize {
        self.remaining_blocks
    }

    pub fn set_remaining_blocks(&mut self, remaining: usize) {
        self.remaining_blocks = remaining;
    }

    /// Reset per-game fields when a new game starts.
    pub fn reset_for_game_start(&mut self) {
        self.score = 0;
        self.remaining_blocks = BLOCKS_PER_PLAYER;
        self.touch();
    }

    /// Reset after a game finishes: non-host seats must ready up again.
    pub fn reset_after_game(&mut self) {
        if !self.is_host {
            self.is_ready = false;
        }
        self.touch();
    }

    pub fn last_activity(&self) -> DateTime<Utc> {
        self.last_activity
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}
