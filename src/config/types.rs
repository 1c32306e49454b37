//! Root configuration struct.

use serde::{Deserialize, Serialize};

use super::auth::AuthConfig;
use super::database::DatabaseConfig;
use super::logging::LoggingConfig;
use super::server::ServerConfig;
use super::version::VersionConfig;

/// Boot-time settings, built once from the environment and injected into
/// every component. Read-only after boot.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub version: VersionConfig,
}
