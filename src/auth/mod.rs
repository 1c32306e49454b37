//! Authentication service: local credentials, guest logins, JWT logins,
//! and the in-memory auth-session map.
//!
//! Auth sessions are opaque 64-hex tokens handed to the client at login,
//! independent of the TCP connection object. The map lives behind one
//! mutex; expired entries are removed on validation and by the periodic
//! sweep.

pub mod error;
pub mod jwt;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use rand::RngCore as _;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;

use crate::config::AuthConfig;
use crate::db::{UserAccount, UserStore};
pub use error::AuthError;
pub use jwt::{JwtClaims, JwtError, JwtVerifier};

const MIN_USERNAME_LEN: usize = 3;
const MAX_USERNAME_LEN: usize = 20;
/// Stored in place of a password hash for accounts created via JWT; it can
/// never match a computed `salt:hex` digest.
const JWT_ACCOUNT_SENTINEL: &str = "*";

/// One auth-session entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub user_id: i64,
    pub username: String,
    pub expires_at: DateTime<Utc>,
}

/// Successful login result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthSuccess {
    pub user_id: i64,
    pub username: String,
    pub session_token: String,
}

pub struct AuthenticationService {
    store: Arc<dyn UserStore>,
    jwt_verifier: Option<Arc<JwtVerifier>>,
    sessions: Mutex<HashMap<String, SessionInfo>>,
    guest_name_counter: AtomicU32,
    guest_id_counter: AtomicI64,
    session_duration: Duration,
    pepper: Option<String>,
    min_password_length: usize,
}

impl AuthenticationService {
    pub fn new(
        store: Arc<dyn UserStore>,
        jwt_verifier: Option<Arc<JwtVerifier>>,
        config: &AuthConfig,
    ) -> Self {
        Self {
            store,
            jwt_verifier,
            sessions: Mutex::new(HashMap::new()),
            guest_name_counter: AtomicU32::new(1),
            guest_id_counter: AtomicI64::new(-1),
            session_duration: Duration::hours(config.session_timeout_hours as i64),
            pepper: config.jwt_secret.clone(),
            min_password_length: config.min_password_length,
        }
    }

    // -----------------------------------------------------------------------
    // Registration / login
    // -----------------------------------------------------------------------

    pub async fn register_user(
        &self,
        username: &str,
        email: Option<&str>,
        password: &str,
    ) -> Result<UserAccount, AuthError> {
        let username = username.trim();
        if !validate_username(username) {
            return Err(AuthError::InvalidUsername);
        }
        if let Some(email) = email.map(str::trim).filter(|e| !e.is_empty()) {
            if !validate_email(email) {
                return Err(AuthError::InvalidEmail);
            }
        }
        if password.len() < self.min_password_length {
            return Err(AuthError::PasswordTooShort(self.min_password_length));
        }
        if !self.store.is_username_available(username).await? {
            return Err(AuthError::UsernameTaken);
        }

        let salt = self.generate_salt();
        let hash = self.hash_password(password, &salt);
        let account = self.store.create_user(username, &hash).await?;
        tracing::info!(username = %account.username, user_id = account.user_id, "User registered");
        Ok(account)
    }

    pub async fn login_user(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthSuccess, AuthError> {
        let username = username.trim();
        if username.is_empty() || password.is_empty() {
            return Err(AuthError::InvalidCredentials);
        }

        let account = self
            .store
            .get_user_by_username(username)
            .await?
            .filter(|account| account.is_active)
            .ok_or(AuthError::InvalidCredentials)?;

        let Some(salt) = account.password_hash.split(':').next().filter(|s| !s.is_empty())
        else {
            return Err(AuthError::InvalidCredentials);
        };
        let computed = self.hash_password(password, salt);
        let account = self
            .store
            .authenticate_user(username, &computed)
            .await?
            .ok_or(AuthError::InvalidCredentials)?;

        if let Err(err) = self.store.update_user_last_login(account.user_id).await {
            tracing::warn!(error = %err, user_id = account.user_id, "Failed to record last login");
        }

        let token = self.issue_session(account.user_id, &account.username).await;
        tracing::info!(username = %account.username, user_id = account.user_id, "Login");
        Ok(AuthSuccess {
            user_id: account.user_id,
            username: account.username,
            session_token: token,
        })
    }

    /// Guests get `Guest<n>` names from a monotonic counter, negative
    /// synthetic user ids, and no persisted account.
    pub async fn login_guest(&self, guest_name: Option<&str>) -> Result<AuthSuccess, AuthError> {
        let username = match guest_name.map(str::trim).filter(|n| !n.is_empty()) {
            Some(name) if validate_username(name) => name.to_string(),
            _ => format!(
                "Guest{}",
                self.guest_name_counter.fetch_add(1, Ordering::Relaxed)
            ),
        };
        let user_id = self.guest_id_counter.fetch_sub(1, Ordering::Relaxed);

        let token = self.issue_session(user_id, &username).await;
        tracing::info!(%username, user_id, "Guest login");
        Ok(AuthSuccess {
            user_id,
            username,
            session_token: token,
        })
    }

    /// Verify an externally issued token and map its subject onto a local
    /// account, creating one on first sight. The mapping is idempotent.
    pub async fn login_with_jwt(&self, token: &str) -> Result<AuthSuccess, AuthError> {
        let verifier = self.jwt_verifier.as_ref().ok_or(AuthError::JwtDisabled)?;
        let claims = verifier
            .verify(token)
            .await
            .map_err(|err| AuthError::Jwt(err.to_string()))?;

        let username = claims
            .preferred_username
            .clone()
            .filter(|name| validate_username(name))
            .unwrap_or_else(|| jwt_fallback_username(&claims.sub));

        let account = match self.store.get_user_by_username(&username).await? {
            Some(account) if account.is_active => account,
            Some(_) => return Err(AuthError::InvalidCredentials),
            None => {
                let account = self
                    .store
                    .create_user(&username, JWT_ACCOUNT_SENTINEL)
                    .await?;
                tracing::info!(
                    %username,
                    user_id = account.user_id,
                    sub = %claims.sub,
                    "Created account for first-seen JWT subject"
                );
                account
            }
        };

        if let Err(err) = self.store.update_user_last_login(account.user_id).await {
            tracing::warn!(error = %err, user_id = account.user_id, "Failed to record last login");
        }

        let session_token = self.issue_session(account.user_id, &account.username).await;
        tracing::info!(username = %account.username, sub = %claims.sub, "JWT login");
        Ok(AuthSuccess {
            user_id: account.user_id,
            username: account.username,
            session_token,
        })
    }

    pub async fn logout(&self, session_token: &str) -> bool {
        let removed = self.sessions.lock().await.remove(session_token).is_some();
        if removed {
            let prefix = session_token.get(..8).unwrap_or(session_token);
            tracing::debug!(token_prefix = %prefix, "Logout");
        }
        removed
    }

    // -----------------------------------------------------------------------
    // Session management
    // -----------------------------------------------------------------------

    /// Returns the session if it exists and has not expired; expired
    /// entries are removed as a side effect.
    pub async fn validate_session(&self, session_token: &str) -> Option<SessionInfo> {
        if session_token.is_empty() {
            return None;
        }
        let mut sessions = self.sessions.lock().await;
        match sessions.get(session_token) {
            Some(info) if info.expires_at > Utc::now() => Some(info.clone()),
            Some(_) => {
                sessions.remove(session_token);
                None
            }
            None => None,
        }
    }

    /// Extend a live session's expiry to `now + session_duration`.
    pub async fn refresh_session(&self, session_token: &str) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(session_token) {
            Some(info) => {
                info.expires_at = Utc::now() + self.session_duration;
                true
            }
            None => false,
        }
    }

    /// Drop every session belonging to a user. Used on password change and
    /// deactivation.
    pub async fn invalidate_all_user_sessions(&self, user_id: i64) -> usize {
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, info| info.user_id != user_id);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(user_id, removed, "Invalidated user sessions");
        }
        removed
    }

    /// Periodic sweep of expired sessions.
    pub async fn cleanup_expired_sessions(&self) -> usize {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().await;
        let before = sessions.len();
        sessions.retain(|_, info| info.expires_at > now);
        let removed = before - sessions.len();
        if removed > 0 {
            tracing::info!(removed, "Cleaned up expired sessions");
        }
        removed
    }

    pub async fn active_session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn issue_session(&self, user_id: i64, username: &str) -> String {
        let token = self.generate_session_token();
        let info = SessionInfo {
            user_id,
            username: username.to_string(),
            expires_at: Utc::now() + self.session_duration,
        };
        self.sessions.lock().await.insert(token.clone(), info);
        token
    }

    /// `salt:hex(SHA256(password || salt || pepper))`.
    pub fn hash_password(&self, password: &str, salt: &str) -> String {
        let mut hasher = Sha256::new();
        hasher.update(password.as_bytes());
        hasher.update(salt.as_bytes());
        if let Some(pepper) = &self.pepper {
            hasher.update(pepper.as_bytes());
        }
        format!("{salt}:{}", hex::encode(hasher.finalize()))
    }

    /// Verify a password against a stored `salt:hex` hash.
    pub fn verify_password(&self, password: &str, stored: &str) -> bool {
        let Some((salt, _)) = stored.split_once(':') else {
            return false;
        };
        self.hash_password(password, salt) == stored
    }

    fn generate_salt(&self) -> String {
        hex::encode(random_bytes(16))
    }

    fn generate_session_token(&self) -> String {
        hex::encode(random_bytes(32))
    }
}

/// CSPRNG bytes; falls back to the thread RNG with a logged warning if the
/// OS entropy source fails.
fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    if let Err(err) = getrandom::fill(&mut buf) {
        tracing::warn!(error = %err, "OS RNG unavailable, falling back to thread RNG");
        rand::rng().fill_bytes(&mut buf);
    }
    buf
}

/// 3-20 chars from `[A-Za-z0-9_]`.
pub fn validate_username(username: &str) -> bool {
    (MIN_USERNAME_LEN..=MAX_USERNAME_LEN).contains(&username.len())
        && username
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub fn validate_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 100 {
        return false;
    }
    let Some((local, domain)) = email.split_once('@') else {
        return false;
    };
    !local.is_empty() && domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.')
}

fn jwt_fallback_username(sub: &str) -> String {
    let cleaned: String = sub
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_')
        .take(MAX_USERNAME_LEN)
        .collect();
    if cleaned.len() >= MIN_USERNAME_LEN {
        cleaned
    } else {
        format!("oidc_{}", hex::encode(random_bytes(6)))
    }
}
