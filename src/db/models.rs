//! Persistent data shapes: accounts, per-user settings, aggregate stats.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row of `users`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserAccount {
    #[sqlx(rename = "id")]
    pub user_id: i64,
    pub username: String,
    pub display_name: String,
    pub password_hash: String,
    pub total_games: i32,
    pub wins: i32,
    pub losses: i32,
    pub draws: i32,
    pub level: i32,
    pub experience_points: i32,
    pub total_score: i64,
    pub best_score: i32,
    pub is_active: bool,
    pub last_login: Option<DateTime<Utc>>,
}

impl UserAccount {
    /// Fresh account with level-1 defaults.
    pub fn new(user_id: i64, username: &str, password_hash: &str) -> Self {
        Self {
            user_id,
            username: username.to_string(),
            display_name: username.to_string(),
            password_hash: password_hash.to_string(),
            total_games: 0,
            wins: 0,
            losses: 0,
            draws: 0,
            level: 1,
            experience_points: 0,
            total_score: 0,
            best_score: 0,
            is_active: true,
            last_login: None,
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_games == 0 {
            0.0
        } else {
            f64::from(self.wins) / f64::from(self.total_games)
        }
    }

    pub fn average_score(&self) -> f64 {
        if self.total_games == 0 {
            0.0
        } else {
            self.total_score as f64 / f64::from(self.total_games)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    #[default]
    Light,
    Dark,
}

impl Theme {
    pub fn as_str(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
        }
    }

    pub fn parse(raw: &str) -> Option<Theme> {
        match raw.to_ascii_lowercase().as_str() {
            "light" => Some(Theme::Light),
            "dark" => Some(Theme::Dark),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Korean,
    English,
}

impl Language {
    pub fn as_str(self) -> &'static str {
        match self {
            Language::Korean => "korean",
            Language::English => "english",
        }
    }

    pub fn parse(raw: &str) -> Option<Language> {
        match raw.to_ascii_lowercase().as_str() {
            "korean" => Some(Language::Korean),
            "english" => Some(Language::English),
            _ => None,
        }
    }
}

/// Per-user client settings. A missing row reads as `Default`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserSettings {
    pub theme: Theme,
    pub language: Language,
    pub bgm_mute: bool,
    pub bgm_volume: u8,
    pub effect_mute: bool,
    pub effect_volume: u8,
    pub game_invite_notifications: bool,
    pub friend_online_notifications: bool,
    pub system_notifications: bool,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            theme: Theme::Light,
            language: Language::Korean,
            bgm_mute: false,
            bgm_volume: 50,
            effect_mute: false,
            effect_volume: 50,
            game_invite_notifications: true,
            friend_online_notifications: true,
            system_notifications: true,
        }
    }
}

impl UserSettings {
    /// Clamp volumes into `0..=100`.
    pub fn clamped(mut self) -> Self {
        self.bgm_volume = self.bgm_volume.min(100);
        self.effect_volume = self.effect_volume.min(100);
        self
    }
}

/// Aggregate system counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    pub total_users: i64,
    pub active_users: i64,
    pub online_users: i64,
    pub total_games: i64,
}

/// Inputs for persisting one finished game.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameResultRecord {
    pub player_ids: Vec<i64>,
    pub scores: Vec<i32>,
    pub is_winner: Vec<bool>,
    pub is_draw: bool,
}
