//! Configuration module.
//!
//! Settings are read from environment variables once at boot
//! (`SERVER_PORT`, `DB_HOST`, `JWKS_URL`, ...) into a [`Config`] struct
//! that is injected into every component.
//!
//! # Module Structure
//!
//! - [`types`]: Root `Config` struct
//! - [`server`]: Server behavior (port, capacity, timers, AFK threshold)
//! - [`database`]: Connection pool settings
//! - [`auth`]: Sessions, password hashing, JWT/JWKS verification
//! - [`logging`]: Logging configuration
//! - [`version`]: Server version and client compatibility strings
//! - [`loader`]: Environment loading
//! - [`validation`]: Boot-time validation
//! - [`defaults`]: Default value functions

pub mod auth;
pub mod database;
pub mod defaults;
pub mod loader;
pub mod logging;
pub mod server;
pub mod types;
pub mod validation;
pub mod version;

pub use auth::AuthConfig;
pub use database::DatabaseConfig;
pub use loader::load;
pub use logging::{LogFormat, LogLevel, LoggingConfig};
pub use server::ServerConfig;
pub use types::Config;
pub use validation::validate_config;
pub use version::VersionConfig;
