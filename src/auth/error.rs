//! Authentication failure types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid username format (3-20 chars, letters/digits/underscore)")]
    InvalidUsername,
    #[error("invalid email format")]
    InvalidEmail,
    #[error("password must be at least {0} characters")]
    PasswordTooShort(usize),
    #[error("username already taken")]
    UsernameTaken,
    #[error("invalid username or password")]
    InvalidCredentials,
    #[error("jwt login is not enabled on this server")]
    JwtDisabled,
    #[error("jwt verification failed: {0}")]
    Jwt(String),
    #[error("database error")]
    Database(#[from] anyhow::Error),
}
