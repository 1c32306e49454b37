//! Environment-driven configuration loading.
//!
//! Every setting has a dedicated environment variable; unset variables fall
//! back to the compiled-in defaults. Parse failures are reported to stderr
//! and the default is used, so `load()` always returns a `Config`.

use std::env;

use super::logging::{LogFormat, LogLevel};
use super::Config;

fn env_string(name: &str, default: impl Into<String>) -> String {
    env::var(name).unwrap_or_else(|_| default.into())
}

fn env_opt_string(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            eprintln!("Invalid value for {name}: {raw:?}, using default");
            default
        }),
        Err(_) => default,
    }
}

fn env_bool(name: &str, default: bool) -> bool {
    match env::var(name) {
        Ok(raw) => matches!(raw.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        Err(_) => default,
    }
}

/// Comma-separated list variable; empty/unset yields an empty vec.
fn env_list(name: &str) -> Vec<String> {
    env::var(name)
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Build a [`Config`] from the process environment.
#[must_use]
pub fn load() -> Config {
    let mut config = Config::default();

    // Server
    config.server.port = env_parse("SERVER_PORT", config.server.port);
    config.server.max_clients = env_parse("SERVER_MAX_CLIENTS", config.server.max_clients);
    config.server.thread_pool_size =
        env_parse("SERVER_THREAD_POOL_SIZE", config.server.thread_pool_size);
    config.server.session_idle_timeout = env_parse(
        "SESSION_IDLE_TIMEOUT_SECS",
        config.server.session_idle_timeout,
    );
    config.server.session_sweep_interval = env_parse(
        "SESSION_SWEEP_INTERVAL_SECS",
        config.server.session_sweep_interval,
    );
    config.server.room_cleanup_interval = env_parse(
        "ROOM_CLEANUP_INTERVAL_SECS",
        config.server.room_cleanup_interval,
    );
    config.server.inactive_room_timeout = env_parse(
        "INACTIVE_ROOM_TIMEOUT_SECS",
        config.server.inactive_room_timeout,
    );
    config.server.turn_time_limit =
        env_parse("TURN_TIME_LIMIT_SECS", config.server.turn_time_limit);
    config.server.afk_timeout_threshold =
        env_parse("AFK_TIMEOUT_THRESHOLD", config.server.afk_timeout_threshold);
    config.server.debug_mode = env_bool("DEBUG_MODE", config.server.debug_mode);

    // Database
    config.database.backend = env_string("DB_BACKEND", config.database.backend);
    config.database.host = env_string("DB_HOST", config.database.host);
    config.database.port = env_parse("DB_PORT", config.database.port);
    config.database.user = env_string("DB_USER", config.database.user);
    config.database.password = env_string("DB_PASSWORD", config.database.password);
    config.database.name = env_string("DB_NAME", config.database.name);
    config.database.pool_size = env_parse("DB_POOL_SIZE", config.database.pool_size);
    config.database.enable_sql_logging =
        env_bool("ENABLE_SQL_LOGGING", config.database.enable_sql_logging);

    // Auth / JWT
    config.auth.jwt_secret = env_opt_string("JWT_SECRET");
    config.auth.session_timeout_hours =
        env_parse("SESSION_TIMEOUT_HOURS", config.auth.session_timeout_hours);
    config.auth.password_salt_rounds =
        env_parse("PASSWORD_SALT_ROUNDS", config.auth.password_salt_rounds);
    config.auth.jwks_url = env_opt_string("JWKS_URL");
    config.auth.jwt_issuer = env_string("JWT_ISSUER", config.auth.jwt_issuer);
    config.auth.jwt_audiences = env_list("JWT_AUDIENCES");
    config.auth.jwks_cache_minutes =
        env_parse("JWKS_CACHE_MINUTES", config.auth.jwks_cache_minutes);
    config.auth.jwks_refresh_interval_secs = env_parse(
        "JWKS_REFRESH_INTERVAL_SECS",
        config.auth.jwks_refresh_interval_secs,
    );
    config.auth.jwt_grace_period_secs = env_parse(
        "JWT_GRACE_PERIOD_SECS",
        config.auth.jwt_grace_period_secs,
    );

    // Logging
    if let Some(raw) = env_opt_string("LOG_LEVEL") {
        match LogLevel::parse(&raw) {
            Some(level) => config.logging.level = Some(level),
            None => eprintln!("Invalid LOG_LEVEL {raw:?}, deferring to RUST_LOG"),
        }
    }
    config.logging.dir = env_string("LOG_DIRECTORY", config.logging.dir);
    config.logging.filename = env_string("LOG_FILENAME", config.logging.filename);
    config.logging.rotation = env_string("LOG_ROTATION", config.logging.rotation);
    config.logging.enable_file_logging =
        env_bool("ENABLE_FILE_LOGGING", config.logging.enable_file_logging);
    if env_string("LOG_FORMAT", "text").eq_ignore_ascii_case("json") {
        config.logging.format = LogFormat::Json;
    }

    // Version / compatibility
    config.version.server_version = env_string("SERVER_VERSION", config.version.server_version);
    config.version.build_date = env_string("BUILD_DATE", config.version.build_date);
    config.version.git_commit = env_string("GIT_COMMIT", config.version.git_commit);
    config.version.git_branch = env_string("GIT_BRANCH", config.version.git_branch);
    config.version.is_production = env_bool("IS_PRODUCTION", config.version.is_production);
    config.version.min_client_version =
        env_string("MIN_CLIENT_VERSION", config.version.min_client_version);
    config.version.download_url = env_string("DOWNLOAD_URL", config.version.download_url);
    config.version.force_update = env_bool("FORCE_UPDATE", config.version.force_update);
    config.version.update_grace_period_hours = env_parse(
        "UPDATE_GRACE_PERIOD_HOURS",
        config.version.update_grace_period_hours,
    );

    config
}
