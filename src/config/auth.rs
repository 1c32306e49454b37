//! Authentication, session, and JWT verification configuration.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_jwks_cache_minutes, default_jwks_fetch_timeout_secs,
    default_jwks_refresh_interval_secs, default_jwt_grace_period_secs,
    default_min_password_length, default_password_salt_rounds, default_session_timeout_hours,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuthConfig {
    /// Optional pepper mixed into local password hashes.
    #[serde(default)]
    pub jwt_secret: Option<String>,
    #[serde(default = "default_session_timeout_hours")]
    pub session_timeout_hours: u64,
    #[serde(default = "default_password_salt_rounds")]
    pub password_salt_rounds: u32,
    #[serde(default = "default_min_password_length")]
    pub min_password_length: usize,
    /// JWT verification; absent URL disables the `jwt:` login path.
    #[serde(default)]
    pub jwks_url: Option<String>,
    #[serde(default)]
    pub jwt_issuer: String,
    /// Allowed audiences; empty set skips the aud check.
    #[serde(default)]
    pub jwt_audiences: Vec<String>,
    #[serde(default = "default_jwks_cache_minutes")]
    pub jwks_cache_minutes: u64,
    #[serde(default = "default_jwks_refresh_interval_secs")]
    pub jwks_refresh_interval_secs: u64,
    #[serde(default = "default_jwt_grace_period_secs")]
    pub jwt_grace_period_secs: u64,
    #[serde(default = "default_jwks_fetch_timeout_secs")]
    pub jwks_fetch_timeout_secs: u64,
}

impl AuthConfig {
    /// JWT logins are only offered when a JWKS endpoint is configured.
    pub fn jwt_enabled(&self) -> bool {
        self.jwks_url.as_deref().is_some_and(|url| !url.is_empty())
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: None,
            session_timeout_hours: default_session_timeout_hours(),
            password_salt_rounds: default_password_salt_rounds(),
            min_password_length: default_min_password_length(),
            jwks_url: None,
            jwt_issuer: String::new(),
            jwt_audiences: Vec::new(),
            jwks_cache_minutes: default_jwks_cache_minutes(),
            jwks_refresh_interval_secs: default_jwks_refresh_interval_secs(),
            jwt_grace_period_secs: default_jwt_grace_period_secs(),
            jwks_fetch_timeout_secs: default_jwks_fetch_timeout_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jwt_disabled_by_default() {
        let cfg = AuthConfig::default();
        assert!(!cfg.jwt_enabled());
    }

    #[test]
    fn test_jwt_enabled_with_url() {
        let cfg = AuthConfig {
            jwks_url: Some("https://idp.example.com/jwks".to_string()),
            ..AuthConfig::default()
        };
        assert!(cfg.jwt_enabled());
    }
}
