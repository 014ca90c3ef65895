//! Broker configuration
//!
//! Loaded from a TOML file, then overridden by `PROXBOX_*` environment
//! variables, then validated.

use crate::errors::{ProxboxError, Result};
use crate::identity::DEFAULT_MAX_ATTEMPTS;
use crate::rule_store::RoutingConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::debug;

/// Prefix of environment variables overriding file settings
pub const ENV_PREFIX: &str = "PROXBOX_";

/// Lowest port the broker will lease
const MIN_BASE_PORT: u16 = 1024;

/// Settings for the registration broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxboxConfig {
    /// Host written into backend URLs
    pub gateway_host: String,
    /// Domain under which cluster hostnames are published
    pub root_domain: String,
    /// First port leased on an empty rule table
    pub base_port: u16,
    /// `authorized_keys` file consumed by sshd
    pub authorized_keys_path: PathBuf,
    /// Rule file consumed by the reverse proxy
    pub rules_path: PathBuf,
    /// Identity generator retry cap
    pub identity_attempts: u32,
    /// Host named in `permitopen` restrictions
    pub permit_open_host: String,
}

impl Default for ProxboxConfig {
    fn default() -> Self {
        Self {
            gateway_host: "127.0.0.1".to_string(),
            root_domain: "proxbox.local".to_string(),
            base_port: 8890,
            authorized_keys_path: PathBuf::from("host_ssh/authorized_keys"),
            rules_path: PathBuf::from("rules.toml"),
            identity_attempts: DEFAULT_MAX_ATTEMPTS,
            permit_open_host: "0.0.0.0".to_string(),
        }
    }
}

impl ProxboxConfig {
    /// Load from a TOML file; a missing file yields the defaults
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file missing, using defaults");
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxboxError::config(format!("Failed to read config file {}: {e}", path.display()))
        })?;
        toml::from_str(&content).map_err(|e| {
            ProxboxError::config(format!("Failed to parse config file {}: {e}", path.display()))
        })
    }

    /// Apply `PROXBOX_*` overrides from the process environment
    pub fn merge_with_env(&mut self) -> Result<()> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `PROXBOX_*` overrides from the given variables
    pub fn merge_with_vars<I, K, V>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        for (key, value) in vars {
            let Some(name) = key.as_ref().strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let value = value.into();
            match name {
                "GATEWAY_HOST" => self.gateway_host = value,
                "ROOT_DOMAIN" => self.root_domain = value,
                "BASE_PORT" => {
                    self.base_port = value.parse().map_err(|_| {
                        ProxboxError::config(format!("Invalid {ENV_PREFIX}BASE_PORT: {value}"))
                    })?;
                }
                "AUTHORIZED_KEYS_PATH" => self.authorized_keys_path = PathBuf::from(value),
                "RULES_PATH" => self.rules_path = PathBuf::from(value),
                "IDENTITY_ATTEMPTS" => {
                    self.identity_attempts = value.parse().map_err(|_| {
                        ProxboxError::config(format!(
                            "Invalid {ENV_PREFIX}IDENTITY_ATTEMPTS: {value}"
                        ))
                    })?;
                }
                "PERMIT_OPEN_HOST" => self.permit_open_host = value,
                _ => {}
            }
        }
        Ok(())
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<()> {
        url::Host::parse(&self.gateway_host).map_err(|e| {
            ProxboxError::config(format!("Invalid gateway host {}: {e}", self.gateway_host))
        })?;
        if self.root_domain.is_empty() || self.root_domain.starts_with('.') {
            return Err(ProxboxError::config("Root domain must be a hostname"));
        }
        if self.permit_open_host.is_empty() {
            return Err(ProxboxError::config("permitopen host cannot be empty"));
        }
        if self.base_port < MIN_BASE_PORT {
            return Err(ProxboxError::config(format!(
                "Base port must be at least {MIN_BASE_PORT}"
            )));
        }
        if self.identity_attempts == 0 {
            return Err(ProxboxError::config("Identity attempts must be positive"));
        }
        if self.authorized_keys_path == self.rules_path {
            return Err(ProxboxError::config(
                "Key file and rule file must be different paths",
            ));
        }
        Ok(())
    }

    /// Routing settings used when writing rules
    pub fn routing(&self) -> RoutingConfig {
        RoutingConfig {
            gateway_host: self.gateway_host.clone(),
            root_domain: self.root_domain.clone(),
        }
    }
}

/// Address of the default route's gateway, via `ip route show default`
///
/// Inside a container this is the docker host, which is where the SSH
/// tunnels terminate.
pub async fn detect_default_gateway() -> Result<String> {
    let output = Command::new("ip")
        .args(["route", "show", "default"])
        .output()
        .await
        .map_err(|e| ProxboxError::config(format!("Failed to run ip: {e}")))?;
    if !output.status.success() {
        return Err(ProxboxError::config("ip route show default failed"));
    }
    parse_default_route(&String::from_utf8_lossy(&output.stdout))
}

fn parse_default_route(output: &str) -> Result<String> {
    // "default via 172.17.0.1 dev eth0"
    output
        .split_whitespace()
        .nth(2)
        .map(str::to_string)
        .ok_or_else(|| ProxboxError::config("No default route found"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_validate() {
        let config = ProxboxConfig::default();
        config.validate().unwrap();
        assert_eq!(config.base_port, 8890);
    }

    #[test]
    fn test_load_partial_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("proxbox.toml");
        std::fs::write(
            &path,
            "gateway_host = \"172.17.0.1\"\nroot_domain = \"proxbox.example\"\n",
        )
        .unwrap();

        let config = ProxboxConfig::load_from_file(&path).unwrap();
        assert_eq!(config.gateway_host, "172.17.0.1");
        assert_eq!(config.root_domain, "proxbox.example");
        assert_eq!(config.rules_path, PathBuf::from("rules.toml"));
    }

    #[test]
    fn test_missing_file_is_default() {
        let config = ProxboxConfig::load_from_file(Path::new("/nonexistent/proxbox.toml")).unwrap();
        assert_eq!(config, ProxboxConfig::default());
    }

    #[test]
    fn test_bad_file_is_config_error() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("proxbox.toml");
        std::fs::write(&path, "base_port = \"lots\"").unwrap();
        assert!(matches!(
            ProxboxConfig::load_from_file(&path),
            Err(ProxboxError::Config { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = ProxboxConfig::default();
        config
            .merge_with_vars([
                ("PROXBOX_BASE_PORT", "9000"),
                ("PROXBOX_RULES_PATH", "/etc/traefik/rules.toml"),
                ("HOME", "/root"),
            ])
            .unwrap();
        assert_eq!(config.base_port, 9000);
        assert_eq!(config.rules_path, PathBuf::from("/etc/traefik/rules.toml"));

        assert!(config
            .merge_with_vars([("PROXBOX_BASE_PORT", "high")])
            .is_err());
    }

    #[test]
    fn test_validation_failures() {
        let mut config = ProxboxConfig {
            base_port: 22,
            ..ProxboxConfig::default()
        };
        assert!(config.validate().is_err());

        config.base_port = 8890;
        config.gateway_host = "not a host".to_string();
        assert!(config.validate().is_err());

        config.gateway_host = "10.0.0.1".to_string();
        config.rules_path = config.authorized_keys_path.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_default_route() {
        assert_eq!(
            parse_default_route("default via 172.17.0.1 dev eth0\n").unwrap(),
            "172.17.0.1"
        );
        assert!(parse_default_route("").is_err());
    }
}
