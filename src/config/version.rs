//! Server version and client compatibility configuration.

use serde::{Deserialize, Serialize};

use super::defaults::{
    default_download_url, default_min_client_version, default_server_version,
    default_update_grace_period_hours,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VersionConfig {
    #[serde(default = "default_server_version")]
    pub server_version: String,
    #[serde(default)]
    pub build_date: String,
    #[serde(default)]
    pub git_commit: String,
    #[serde(default)]
    pub git_branch: String,
    #[serde(default)]
    pub is_production: bool,
    /// Oldest client version still admitted.
    #[serde(default = "default_min_client_version")]
    pub min_client_version: String,
    #[serde(default = "default_download_url")]
    pub download_url: String,
    /// When set, incompatible clients must update before connecting.
    #[serde(default)]
    pub force_update: bool,
    #[serde(default = "default_update_grace_period_hours")]
    pub update_grace_period_hours: u64,
}

impl Default for VersionConfig {
    fn default() -> Self {
        Self {
            server_version: default_server_version(),
            build_date: String::new(),
            git_commit: String::new(),
            git_branch: String::new(),
            is_production: false,
            min_client_version: default_min_client_version(),
            download_url: default_download_url(),
            force_update: false,
            update_grace_period_hours: default_update_grace_period_hours(),
        }
    }
}
