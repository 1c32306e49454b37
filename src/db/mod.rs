//! Database gateway.
//!
//! Storage sits behind the [`UserStore`] trait: the production
//! implementation is a Postgres pool via sqlx, and an in-memory
//! implementation backs tests and `DB_BACKEND=memory` development runs.
//! Every public operation is one logical transaction; callers never hold a
//! room or session lock across these calls.

pub mod models;
pub mod progression;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::Mutex;

use crate::config::DatabaseConfig;
pub use models::{DatabaseStats, GameResultRecord, Language, Theme, UserAccount, UserSettings};
pub use progression::{apply_level_ups, calculate_experience_gain, required_exp_for_level};

/// Window in which a recent login counts as "online" for gateway queries.
const ONLINE_WINDOW_MINUTES: i64 = 60;

/// Columns whitelisted for `get_ranking`; anything else falls back to level.
const RANKING_COLUMNS: [&str; 5] = [
    "level",
    "wins",
    "total_score",
    "best_score",
    "experience_points",
];

/// Storage abstraction for accounts, settings, and game results.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Open connections and bootstrap the schema.
    async fn initialize(&self) -> Result<()>;

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>>;
    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserAccount>>;
    async fn create_user(&self, username: &str, password_hash: &str) -> Result<UserAccount>;
    async fn is_username_available(&self, username: &str) -> Result<bool>;
    /// Active user whose stored hash matches exactly.
    async fn authenticate_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<UserAccount>>;
    async fn update_user_last_login(&self, user_id: i64) -> Result<()>;
    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<()>;

    async fn update_game_stats(
        &self,
        user_id: i64,
        won: bool,
        draw: bool,
        score: i32,
    ) -> Result<()>;
    /// Persist one finished game and its participants.
    async fn save_game_results(&self, record: &GameResultRecord) -> Result<()>;
    async fn update_player_experience(&self, user_id: i64, exp_gained: i32) -> Result<()>;
    /// Consume banked experience; returns the (possibly unchanged) level.
    async fn check_and_process_level_up(&self, user_id: i64) -> Result<i32>;

    async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings>;
    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()>;
    async fn delete_user_settings(&self, user_id: i64) -> Result<()>;

    async fn get_stats(&self) -> Result<DatabaseStats>;
    async fn get_ranking(
        &self,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserAccount>>;
    async fn get_online_users(&self) -> Result<Vec<String>>;

    async fn health_check(&self) -> bool;
}

/// Build the configured store. Fails fast when Postgres is unreachable.
pub async fn connect(config: &DatabaseConfig) -> Result<Arc<dyn UserStore>> {
    let store: Arc<dyn UserStore> = if config.is_memory_backend() {
        tracing::info!("Using in-memory user store");
        Arc::new(InMemoryStore::new())
    } else {
        tracing::info!(
            host = %config.host,
            port = config.port,
            db = %config.name,
            pool_size = config.pool_size,
            "Connecting to Postgres"
        );
        Arc::new(PostgresGateway::connect(config).await?)
    };
    store.initialize().await?;
    Ok(store)
}

fn ranking_column(order_by: &str) -> &'static str {
    RANKING_COLUMNS
        .iter()
        .find(|col| col.eq_ignore_ascii_case(order_by))
        .copied()
        .unwrap_or("level")
}

const USER_COLUMNS: &str = "id, username, display_name, password_hash, total_games, wins, \
     losses, draws, level, experience_points, total_score, best_score, is_active, last_login";

// ---------------------------------------------------------------------------
// Postgres implementation
// ---------------------------------------------------------------------------

pub struct PostgresGateway {
    pool: PgPool,
    log_sql: bool,
}

impl PostgresGateway {
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_size)
            .connect(&config.connection_url())
            .await
            .context("failed to connect to Postgres")?;
        Ok(Self {
            pool,
            log_sql: config.enable_sql_logging,
        })
    }

    fn trace(&self, op: &str) {
        if self.log_sql {
            tracing::debug!(%op, "sql");
        }
    }
}

#[async_trait]
impl UserStore for PostgresGateway {
    async fn initialize(&self) -> Result<()> {
        self.trace("initialize");
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS users (
                 id BIGSERIAL PRIMARY KEY,
                 username TEXT NOT NULL UNIQUE,
                 display_name TEXT NOT NULL,
                 password_hash TEXT NOT NULL,
                 total_games INT NOT NULL DEFAULT 0,
                 wins INT NOT NULL DEFAULT 0,
                 losses INT NOT NULL DEFAULT 0,
                 draws INT NOT NULL DEFAULT 0,
                 level INT NOT NULL DEFAULT 1,
                 experience_points INT NOT NULL DEFAULT 0,
                 total_score BIGINT NOT NULL DEFAULT 0,
                 best_score INT NOT NULL DEFAULT 0,
                 is_active BOOLEAN NOT NULL DEFAULT TRUE,
                 last_login TIMESTAMPTZ
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_settings (
                 user_id BIGINT PRIMARY KEY REFERENCES users(id) ON DELETE CASCADE,
                 theme TEXT NOT NULL,
                 language TEXT NOT NULL,
                 bgm_mute BOOLEAN NOT NULL,
                 bgm_volume INT NOT NULL,
                 effect_mute BOOLEAN NOT NULL,
                 effect_volume INT NOT NULL,
                 invite_notif BOOLEAN NOT NULL,
                 friend_notif BOOLEAN NOT NULL,
                 system_notif BOOLEAN NOT NULL
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS games (
                 id BIGSERIAL PRIMARY KEY,
                 finished_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                 is_draw BOOLEAN NOT NULL DEFAULT FALSE
             )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS game_participants (
                 game_id BIGINT NOT NULL REFERENCES games(id) ON DELETE CASCADE,
                 user_id BIGINT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                 score INT NOT NULL,
                 is_winner BOOLEAN NOT NULL,
                 PRIMARY KEY (game_id, user_id)
             )",
        )
        .execute(&self.pool)
        .await?;

        tracing::info!("Database schema ready");
        Ok(())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        self.trace("get_user_by_username");
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE username = $1"
        ))
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserAccount>> {
        self.trace("get_user_by_id");
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE id = $1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<UserAccount> {
        self.trace("create_user");
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            "INSERT INTO users (username, display_name, password_hash)
             VALUES ($1, $1, $2)
             RETURNING {USER_COLUMNS}"
        ))
        .bind(username)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await?;
        Ok(account)
    }

    async fn is_username_available(&self, username: &str) -> Result<bool> {
        self.trace("is_username_available");
        let taken: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE username = $1")
            .bind(username)
            .fetch_optional(&self.pool)
            .await?;
        Ok(taken.is_none())
    }

    async fn authenticate_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<UserAccount>> {
        self.trace("authenticate_user");
        let account = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users
             WHERE username = $1 AND password_hash = $2 AND is_active"
        ))
        .bind(username)
        .bind(password_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn update_user_last_login(&self, user_id: i64) -> Result<()> {
        self.trace("update_user_last_login");
        sqlx::query("UPDATE users SET last_login = NOW() WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<()> {
        self.trace("set_user_active");
        sqlx::query("UPDATE users SET is_active = $2 WHERE id = $1")
            .bind(user_id)
            .bind(active)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_game_stats(
        &self,
        user_id: i64,
        won: bool,
        draw: bool,
        score: i32,
    ) -> Result<()> {
        self.trace("update_game_stats");
        let win_inc = i32::from(won && !draw);
        let draw_inc = i32::from(draw);
        let loss_inc = i32::from(!won && !draw);
        sqlx::query(
            "UPDATE users SET
                 total_games = total_games + 1,
                 wins = wins + $2,
                 draws = draws + $3,
                 losses = losses + $4,
                 total_score = total_score + $5,
                 best_score = GREATEST(best_score, $5)
             WHERE id = $1",
        )
        .bind(user_id)
        .bind(win_inc)
        .bind(draw_inc)
        .bind(loss_inc)
        .bind(score)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_game_results(&self, record: &GameResultRecord) -> Result<()> {
        self.trace("save_game_results");
        if record.player_ids.len() != record.scores.len()
            || record.player_ids.len() != record.is_winner.len()
        {
            return Err(anyhow!("game result arrays must have equal lengths"));
        }

        let mut tx = self.pool.begin().await?;
        let game_id: i64 =
            sqlx::query_scalar("INSERT INTO games (is_draw) VALUES ($1) RETURNING id")
                .bind(record.is_draw)
                .fetch_one(&mut *tx)
                .await?;

        for idx in 0..record.player_ids.len() {
            sqlx::query(
                "INSERT INTO game_participants (game_id, user_id, score, is_winner)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(game_id)
            .bind(record.player_ids[idx])
            .bind(record.scores[idx])
            .bind(record.is_winner[idx])
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn update_player_experience(&self, user_id: i64, exp_gained: i32) -> Result<()> {
        self.trace("update_player_experience");
        sqlx::query(
            "UPDATE users SET experience_points = experience_points + $2 WHERE id = $1",
        )
        .bind(user_id)
        .bind(exp_gained.max(0))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn check_and_process_level_up(&self, user_id: i64) -> Result<i32> {
        self.trace("check_and_process_level_up");
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "SELECT level, experience_points FROM users WHERE id = $1 FOR UPDATE",
        )
        .bind(user_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(row) = row else {
            tx.rollback().await?;
            return Err(anyhow!("user {user_id} not found"));
        };

        let level: i32 = row.try_get("level")?;
        let exp: i32 = row.try_get("experience_points")?;
        let (new_level, new_exp) = apply_level_ups(level, exp);
        if new_level != level {
            sqlx::query("UPDATE users SET level = $2, experience_points = $3 WHERE id = $1")
                .bind(user_id)
                .bind(new_level)
                .bind(new_exp)
                .execute(&mut *tx)
                .await?;
            tracing::info!(%user_id, from = level, to = new_level, "Level up");
        }
        tx.commit().await?;
        Ok(new_level)
    }

    async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings> {
        self.trace("get_user_settings");
        let row = sqlx::query(
            "SELECT theme, language, bgm_mute, bgm_volume, effect_mute, effect_volume,
                    invite_notif, friend_notif, system_notif
             FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(UserSettings::default());
        };

        let theme: String = row.try_get("theme")?;
        let language: String = row.try_get("language")?;
        Ok(UserSettings {
            theme: Theme::parse(&theme).unwrap_or_default(),
            language: Language::parse(&language).unwrap_or_default(),
            bgm_mute: row.try_get("bgm_mute")?,
            bgm_volume: row.try_get::<i32, _>("bgm_volume")?.clamp(0, 100) as u8,
            effect_mute: row.try_get("effect_mute")?,
            effect_volume: row.try_get::<i32, _>("effect_volume")?.clamp(0, 100) as u8,
            game_invite_notifications: row.try_get("invite_notif")?,
            friend_online_notifications: row.try_get("friend_notif")?,
            system_notifications: row.try_get("system_notif")?,
        })
    }

    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()> {
        self.trace("update_user_settings");
        let settings = settings.clone().clamped();
        sqlx::query(
            "INSERT INTO user_settings (user_id, theme, language, bgm_mute, bgm_volume,
                                        effect_mute, effect_volume, invite_notif,
                                        friend_notif, system_notif)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             ON CONFLICT (user_id) DO UPDATE SET
                 theme = EXCLUDED.theme,
                 language = EXCLUDED.language,
                 bgm_mute = EXCLUDED.bgm_mute,
                 bgm_volume = EXCLUDED.bgm_volume,
                 effect_mute = EXCLUDED.effect_mute,
                 effect_volume = EXCLUDED.effect_volume,
                 invite_notif = EXCLUDED.invite_notif,
                 friend_notif = EXCLUDED.friend_notif,
                 system_notif = EXCLUDED.system_notif",
        )
        .bind(user_id)
        .bind(settings.theme.as_str())
        .bind(settings.language.as_str())
        .bind(settings.bgm_mute)
        .bind(i32::from(settings.bgm_volume))
        .bind(settings.effect_mute)
        .bind(i32::from(settings.effect_volume))
        .bind(settings.game_invite_notifications)
        .bind(settings.friend_online_notifications)
        .bind(settings.system_notifications)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_user_settings(&self, user_id: i64) -> Result<()> {
        self.trace("delete_user_settings");
        sqlx::query("DELETE FROM user_settings WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_stats(&self) -> Result<DatabaseStats> {
        self.trace("get_stats");
        let total_users: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
            .fetch_one(&self.pool)
            .await?;
        let active_users: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE is_active")
                .fetch_one(&self.pool)
                .await?;
        let online_users: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM users
             WHERE last_login IS NOT NULL AND last_login > NOW() - make_interval(mins => $1)",
        )
        .bind(ONLINE_WINDOW_MINUTES as i32)
        .fetch_one(&self.pool)
        .await?;
        let total_games: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM games")
            .fetch_one(&self.pool)
            .await?;
        Ok(DatabaseStats {
            total_users,
            active_users,
            online_users,
            total_games,
        })
    }

    async fn get_ranking(
        &self,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserAccount>> {
        self.trace("get_ranking");
        let column = ranking_column(order_by);
        let accounts = sqlx::query_as::<_, UserAccount>(&format!(
            "SELECT {USER_COLUMNS} FROM users WHERE is_active
             ORDER BY {column} DESC, id ASC LIMIT $1 OFFSET $2"
        ))
        .bind(limit.clamp(1, 500))
        .bind(offset.max(0))
        .fetch_all(&self.pool)
        .await?;
        Ok(accounts)
    }

    async fn get_online_users(&self) -> Result<Vec<String>> {
        self.trace("get_online_users");
        let usernames: Vec<String> = sqlx::query_scalar(
            "SELECT username FROM users
             WHERE last_login IS NOT NULL AND last_login > NOW() - make_interval(mins => $1)",
        )
        .bind(ONLINE_WINDOW_MINUTES as i32)
        .fetch_all(&self.pool)
        .await?;
        Ok(usernames)
    }

    async fn health_check(&self) -> bool {
        sqlx::query_scalar::<_, i32>("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .is_ok()
    }
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryTables {
    users: HashMap<i64, UserAccount>,
    settings: HashMap<i64, UserSettings>,
    games: Vec<(bool, Vec<(i64, i32, bool)>)>,
    next_user_id: i64,
}

/// Hash-map backed store for tests and development runs without Postgres.
pub struct InMemoryStore {
    tables: Mutex<MemoryTables>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(MemoryTables {
                next_user_id: 1,
                ..MemoryTables::default()
            }),
        }
    }
}

#[async_trait]
impl UserStore for InMemoryStore {
    async fn initialize(&self) -> Result<()> {
        Ok(())
    }

    async fn get_user_by_username(&self, username: &str) -> Result<Option<UserAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username)
            .cloned())
    }

    async fn get_user_by_id(&self, user_id: i64) -> Result<Option<UserAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables.users.get(&user_id).cloned())
    }

    async fn create_user(&self, username: &str, password_hash: &str) -> Result<UserAccount> {
        let mut tables = self.tables.lock().await;
        if tables.users.values().any(|u| u.username == username) {
            return Err(anyhow!("username already taken: {username}"));
        }
        let user_id = tables.next_user_id;
        tables.next_user_id += 1;
        let account = UserAccount::new(user_id, username, password_hash);
        tables.users.insert(user_id, account.clone());
        Ok(account)
    }

    async fn is_username_available(&self, username: &str) -> Result<bool> {
        let tables = self.tables.lock().await;
        Ok(!tables.users.values().any(|u| u.username == username))
    }

    async fn authenticate_user(
        &self,
        username: &str,
        password_hash: &str,
    ) -> Result<Option<UserAccount>> {
        let tables = self.tables.lock().await;
        Ok(tables
            .users
            .values()
            .find(|u| u.username == username && u.password_hash == password_hash && u.is_active)
            .cloned())
    }

    async fn update_user_last_login(&self, user_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.last_login = Some(Utc::now());
        }
        Ok(())
    }

    async fn set_user_active(&self, user_id: i64, active: bool) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.is_active = active;
        }
        Ok(())
    }

    async fn update_game_stats(
        &self,
        user_id: i64,
        won: bool,
        draw: bool,
        score: i32,
    ) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user {user_id} not found"))?;
        user.total_games += 1;
        if draw {
            user.draws += 1;
        } else if won {
            user.wins += 1;
        } else {
            user.losses += 1;
        }
        user.total_score += i64::from(score);
        user.best_score = user.best_score.max(score);
        Ok(())
    }

    async fn save_game_results(&self, record: &GameResultRecord) -> Result<()> {
        if record.player_ids.len() != record.scores.len()
            || record.player_ids.len() != record.is_winner.len()
        {
            return Err(anyhow!("game result arrays must have equal lengths"));
        }
        let mut tables = self.tables.lock().await;
        let participants = record
            .player_ids
            .iter()
            .zip(&record.scores)
            .zip(&record.is_winner)
            .map(|((&id, &score), &winner)| (id, score, winner))
            .collect();
        tables.games.push((record.is_draw, participants));
        Ok(())
    }

    async fn update_player_experience(&self, user_id: i64, exp_gained: i32) -> Result<()> {
        let mut tables = self.tables.lock().await;
        if let Some(user) = tables.users.get_mut(&user_id) {
            user.experience_points += exp_gained.max(0);
        }
        Ok(())
    }

    async fn check_and_process_level_up(&self, user_id: i64) -> Result<i32> {
        let mut tables = self.tables.lock().await;
        let user = tables
            .users
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("user {user_id} not found"))?;
        let (level, exp) = apply_level_ups(user.level, user.experience_points);
        user.level = level;
        user.experience_points = exp;
        Ok(level)
    }

    async fn get_user_settings(&self, user_id: i64) -> Result<UserSettings> {
        let tables = self.tables.lock().await;
        Ok(tables
            .settings
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn update_user_settings(&self, user_id: i64, settings: &UserSettings) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.settings.insert(user_id, settings.clone().clamped());
        Ok(())
    }

    async fn delete_user_settings(&self, user_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.settings.remove(&user_id);
        Ok(())
    }

    async fn get_stats(&self) -> Result<DatabaseStats> {
        let tables = self.tables.lock().await;
        let cutoff = Utc::now() - Duration::minutes(ONLINE_WINDOW_MINUTES);
        Ok(DatabaseStats {
            total_users: tables.users.len() as i64,
            active_users: tables.users.values().filter(|u| u.is_active).count() as i64,
            online_users: tables
                .users
                .values()
                .filter(|u| u.last_login.is_some_and(|t| t > cutoff))
                .count() as i64,
            total_games: tables.games.len() as i64,
        })
    }

    async fn get_ranking(
        &self,
        order_by: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UserAccount>> {
        let tables = self.tables.lock().await;
        let column = ranking_column(order_by);
        let mut accounts: Vec<UserAccount> = tables
            .users
            .values()
            .filter(|u| u.is_active)
            .cloned()
            .collect();
        accounts.sort_by(|a, b| {
            let key = |u: &UserAccount| match column {
                "wins" => i64::from(u.wins),
                "total_score" => u.total_score,
                "best_score" => i64::from(u.best_score),
                "experience_points" => i64::from(u.experience_points),
                _ => i64::from(u.level),
            };
            key(b).cmp(&key(a)).then(a.user_id.cmp(&b.user_id))
        });
        Ok(accounts
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.clamp(1, 500) as usize)
            .collect())
    }

    async fn get_online_users(&self) -> Result<Vec<String>> {
        let tables = self.tables.lock().await;
        let cutoff = Utc::now() - Duration::minutes(ONLINE_WINDOW_MINUTES);
        Ok(tables
            .users
            .values()
            .filter(|u| u.last_login.is_some_and(|t| t > cutoff))
            .map(|u| u.username.clone())
            .collect())
    }

    async fn health_check(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_and_fetch_user() {
        let store = InMemoryStore::new();
        let created = store.create_user("alice", "salt:hash").await.unwrap();
        assert_eq!(created.username, "alice");
        assert_eq!(created.level, 1);

        let by_name = store.get_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(by_name.user_id, created.user_id);
        let by_id = store.get_user_by_id(created.user_id).await.unwrap().unwrap();
        assert_eq!(by_id.username, "alice");

        assert!(!store.is_username_available("alice").await.unwrap());
        assert!(store.is_username_available("bob").await.unwrap());
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected() {
        let store = InMemoryStore::new();
        store.create_user("alice", "h").await.unwrap();
        assert!(store.create_user("alice", "h2").await.is_err());
    }

    #[tokio::test]
    async fn test_authenticate_matches_hash_and_active() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "salt:good").await.unwrap();

        assert!(store
            .authenticate_user("alice", "salt:good")
            .await
            .unwrap()
            .is_some());
        assert!(store
            .authenticate_user("alice", "salt:bad")
            .await
            .unwrap()
            .is_none());

        store.set_user_active(user.user_id, false).await.unwrap();
        assert!(store
            .authenticate_user("alice", "salt:good")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_game_stats_accumulate() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "h").await.unwrap();

        store
            .update_game_stats(user.user_id, true, false, 42)
            .await
            .unwrap();
        store
            .update_game_stats(user.user_id, false, true, 30)
            .await
            .unwrap();
        store
            .update_game_stats(user.user_id, false, false, 10)
            .await
            .unwrap();

        let user = store.get_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(user.total_games, 3);
        assert_eq!(user.wins, 1);
        assert_eq!(user.draws, 1);
        assert_eq!(user.losses, 1);
        assert_eq!(user.total_score, 82);
        assert_eq!(user.best_score, 42);
    }

    #[tokio::test]
    async fn test_experience_and_level_up() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "h").await.unwrap();

        store
            .update_player_experience(user.user_id, 120)
            .await
            .unwrap();
        let level = store.check_and_process_level_up(user.user_id).await.unwrap();
        assert_eq!(level, 2);

        let user = store.get_user_by_id(user.user_id).await.unwrap().unwrap();
        assert_eq!(user.level, 2);
        assert_eq!(user.experience_points, 20);
    }

    #[tokio::test]
    async fn test_settings_round_trip_and_defaults() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "h").await.unwrap();

        // Missing row reads as defaults.
        let defaults = store.get_user_settings(user.user_id).await.unwrap();
        assert_eq!(defaults, UserSettings::default());

        let custom = UserSettings {
            theme: Theme::Dark,
            language: Language::English,
            bgm_volume: 80,
            ..UserSettings::default()
        };
        store
            .update_user_settings(user.user_id, &custom)
            .await
            .unwrap();
        let fetched = store.get_user_settings(user.user_id).await.unwrap();
        assert_eq!(fetched, custom);

        store.delete_user_settings(user.user_id).await.unwrap();
        let after_delete = store.get_user_settings(user.user_id).await.unwrap();
        assert_eq!(after_delete, UserSettings::default());
    }

    #[tokio::test]
    async fn test_save_game_results_validates_lengths() {
        let store = InMemoryStore::new();
        let record = GameResultRecord {
            player_ids: vec![1, 2],
            scores: vec![10],
            is_winner: vec![true, false],
            is_draw: false,
        };
        assert!(store.save_game_results(&record).await.is_err());
    }

    #[tokio::test]
    async fn test_ranking_order_and_paging() {
        let store = InMemoryStore::new();
        for (name, wins) in [("a", 3), ("b", 9), ("c", 6)] {
            let user = store.create_user(name, "h").await.unwrap();
            for _ in 0..wins {
                store
                    .update_game_stats(user.user_id, true, false, 1)
                    .await
                    .unwrap();
            }
        }

        let ranking = store.get_ranking("wins", 2, 0).await.unwrap();
        assert_eq!(ranking.len(), 2);
        assert_eq!(ranking[0].username, "b");
        assert_eq!(ranking[1].username, "c");

        let next_page = store.get_ranking("wins", 2, 2).await.unwrap();
        assert_eq!(next_page.len(), 1);
        assert_eq!(next_page[0].username, "a");

        // Unknown column falls back instead of erroring.
        assert!(store.get_ranking("anything", 10, 0).await.is_ok());
    }

    #[tokio::test]
    async fn test_online_users_window() {
        let store = InMemoryStore::new();
        let user = store.create_user("alice", "h").await.unwrap();
        assert!(store.get_online_users().await.unwrap().is_empty());

        store.update_user_last_login(user.user_id).await.unwrap();
        assert_eq!(store.get_online_users().await.unwrap(), vec!["alice"]);
    }
}
