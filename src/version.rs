//! Version gate: compares the client's reported version against the
//! server's minimum and advertises update information.

use semver::Version;

use crate::config::VersionConfig;

/// Outcome of a `version:check` handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompatibilityInfo {
    pub compatible: bool,
    pub update_required: bool,
    pub update_recommended: bool,
    pub message: String,
    pub min_required_version: String,
    pub download_url: String,
    pub force_update: bool,
    pub grace_period_hours: u64,
}

pub struct VersionManager {
    config: VersionConfig,
    features: Vec<String>,
}

impl VersionManager {
    pub fn new(config: VersionConfig) -> Self {
        let mut features = vec![
            "multiplayer".to_string(),
            "chat".to_string(),
            "statistics".to_string(),
            "user_management".to_string(),
        ];
        if config.is_production {
            features.push("ssl".to_string());
            features.push("monitoring".to_string());
        } else {
            features.push("debug".to_string());
            features.push("development_tools".to_string());
        }
        tracing::info!(
            server_version = %config.server_version,
            build_date = %config.build_date,
            git_commit = %config.git_commit,
            git_branch = %config.git_branch,
            min_client = %config.min_client_version,
            production = config.is_production,
            "Version manager initialized"
        );
        Self { config, features }
    }

    pub fn server_version(&self) -> &str {
        &self.config.server_version
    }

    pub fn features(&self) -> &[String] {
        &self.features
    }

    pub fn check_compatibility(&self, client_version: &str) -> CompatibilityInfo {
        let meets_minimum =
            compare_versions(client_version, &self.config.min_client_version) >= 0;
        let same_major = major_of(client_version) == major_of(&self.config.server_version);
        let compatible = meets_minimum && same_major;
        let update_recommended =
            compare_versions(&self.config.server_version, client_version) > 0;

        let message = if !compatible {
            if meets_minimum {
                "Client version is not compatible with this server".to_string()
            } else {
                format!(
                    "Client version too old; at least {} is required",
                    self.config.min_client_version
                )
            }
        } else if update_recommended {
            "A newer client version is available".to_string()
        } else {
            "Client is up to date".to_string()
        };

        tracing::debug!(
            client = %client_version,
            compatible,
            update_required = !meets_minimum,
            "Version check"
        );

        CompatibilityInfo {
            compatible,
            update_required: !meets_minimum,
            update_recommended,
            message,
            min_required_version: self.config.min_client_version.clone(),
            download_url: self.config.download_url.clone(),
            force_update: self.config.force_update,
            grace_period_hours: self.config.update_grace_period_hours,
        }
    }
}

/// Numeric dotted comparison with `v`-prefix tolerance; well-formed
/// triples take the semver path. Returns -1/0/1.
pub fn compare_versions(left: &str, right: &str) -> i32 {
    let left = left.trim().trim_start_matches(['v', 'V']);
    let right = right.trim().trim_start_matches(['v', 'V']);

    if let (Ok(left), Ok(right)) = (Version::parse(left), Version::parse(right)) {
        return match left.cmp(&right) {
            std::cmp::Ordering::Less => -1,
            std::cmp::Ordering::Equal => 0,
            std::cmp::Ordering::Greater => 1,
        };
    }

    // Fallback: compare numeric segments, treating missing parts as zero.
    let parse = |value: &str| -> Vec<u64> {
        value
            .split('.')
            .map_while(|part| part.parse().ok())
            .collect()
    };
    let left_parts = parse(left);
    let right_parts = parse(right);
    for i in 0..left_parts.len().max(right_parts.len()) {
        let l = left_parts.get(i).copied().unwrap_or(0);
        let r = right_parts.get(i).copied().unwrap_or(0);
        if l != r {
            return if l < r { -1 } else { 1 };
        }
    }
    0
}

fn major_of(version: &str) -> u64 {
    version
        .trim()
        .trim_start_matches(['v', 'V'])
        .split('.')
        .next()
        .and_then(|part| part.parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(server: &str, min: &str) -> VersionManager {
        VersionManager::new(VersionConfig {
            server_version: server.to_string(),
            min_client_version: min.to_string(),
            ..VersionConfig::default()
        })
    }

    #[test]
    fn test_compare_versions() {
        assert_eq!(compare_versions("1.0.0", "1.0.0"), 0);
        assert_eq!(compare_versions("1.0.1", "1.0.0"), 1);
        assert_eq!(compare_versions("1.0.0", "1.2.0"), -1);
        assert_eq!(compare_versions("v1.2.0", "1.2.0"), 0);
        // Short forms fall back to numeric comparison.
        assert_eq!(compare_versions("1.2", "1.2.0"), 0);
        assert_eq!(compare_versions("1.10", "1.9"), 1);
    }

    #[test]
    fn test_compatible_client() {
        let manager = manager("1.2.0", "1.0.0");
        let info = manager.check_compatibility("1.1.0");
        assert!(info.compatible);
        assert!(!info.update_required);
        assert!(info.update_recommended);
    }

    #[test]
    fn test_up_to_date_client() {
        let manager = manager("1.2.0", "1.0.0");
        let info = manager.check_compatibility("1.2.0");
        assert!(info.compatible);
        assert!(!info.update_recommended);
        assert_eq!(info.message, "Client is up to date");
    }

    #[test]
    fn test_too_old_client() {
        let manager = manager("1.2.0", "1.1.0");
        let info = manager.check_compatibility("1.0.5");
        assert!(!info.compatible);
        assert!(info.update_required);
        assert!(info.message.contains("1.1.0"));
    }

    #[test]
    fn test_major_mismatch() {
        let manager = manager("2.0.0", "1.0.0");
        let info = manager.check_compatibility("1.5.0");
        assert!(!info.compatible);
        assert!(!info.update_required, "meets minimum but wrong major");
    }

    #[test]
    fn test_features_by_environment() {
        let dev = manager("1.0.0", "1.0.0");
        assert!(dev.features().contains(&"debug".to_string()));

        let prod = VersionManager::new(VersionConfig {
            is_production: true,
            ..VersionConfig::default()
        });
        assert!(prod.features().contains(&"ssl".to_string()));
        assert!(!prod.features().contains(&"debug".to_string()));
    }
}
