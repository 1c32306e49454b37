//! Boot-time configuration validation.

use std::fmt::Write as _;

use super::Config;

/// Validate settings that would otherwise fail at an awkward moment later.
/// Returns a newline-separated list of problems on failure.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut problems = String::new();

    if config.server.port == 0 {
        let _ = writeln!(problems, "SERVER_PORT must be non-zero");
    }
    if config.server.max_clients == 0 {
        let _ = writeln!(problems, "SERVER_MAX_CLIENTS must be non-zero");
    }
    if config.server.turn_time_limit == 0 {
        let _ = writeln!(problems, "TURN_TIME_LIMIT_SECS must be non-zero");
    }
    if config.server.afk_timeout_threshold == 0 {
        let _ = writeln!(problems, "AFK_TIMEOUT_THRESHOLD must be non-zero");
    }

    if !config.database.is_memory_backend() {
        if config.database.host.is_empty() {
            let _ = writeln!(problems, "DB_HOST must be set");
        }
        if config.database.user.is_empty() {
            let _ = writeln!(problems, "DB_USER must be set");
        }
        if config.database.name.is_empty() {
            let _ = writeln!(problems, "DB_NAME must be set");
        }
        if config.database.pool_size == 0 {
            let _ = writeln!(problems, "DB_POOL_SIZE must be non-zero");
        }
    }

    if config.auth.jwt_enabled() {
        if config.auth.jwt_issuer.is_empty() {
            let _ = writeln!(problems, "JWT_ISSUER must be set when JWKS_URL is configured");
        }
        if let Some(url) = &config.auth.jwks_url {
            if url::Url::parse(url).is_err() {
                let _ = writeln!(problems, "JWKS_URL is not a valid URL: {url}");
            }
        }
    }

    if config.version.is_production && config.auth.jwt_secret.is_none() {
        let _ = writeln!(
            problems,
            "JWT_SECRET should be set in production (local password pepper)"
        );
    }

    if problems.is_empty() {
        Ok(())
    } else {
        Err(problems.trim_end().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = Config::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_zero_port_rejected() {
        let mut config = Config::default();
        config.server.port = 0;
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("SERVER_PORT"));
    }

    #[test]
    fn test_memory_backend_skips_db_checks() {
        let mut config = Config::default();
        config.database.backend = "memory".to_string();
        config.database.host = String::new();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_jwt_requires_issuer() {
        let mut config = Config::default();
        config.auth.jwks_url = Some("https://idp.example.com/jwks".to_string());
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("JWT_ISSUER"));

        config.auth.jwt_issuer = "https://idp.example.com/realms/blokus".to_string();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_bad_jwks_url_rejected() {
        let mut config = Config::default();
        config.auth.jwks_url = Some("not a url".to_string());
        config.auth.jwt_issuer = "issuer".to_string();
        let err = validate_config(&config).unwrap_err();
        assert!(err.contains("JWKS_URL"));
    }
}
