//! Reverse-proxy rule table storage
//!
//! The rule file uses the Traefik file-provider layout: a `backends` table
//! mapping a name to a single server URL, and a `frontends` table mapping a
//! name to a host rule and a backend. Each cluster owns one backend and one
//! frontend per leased port, named `{identity}-{role}`. Port leases are not
//! stored separately; they are read back out of the backend URLs.

use crate::errors::{ProxboxError, Result};
use crate::types::{ClusterIdentity, PortLease, PortRole};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Key of the single server inside each backend
const SERVER_KEY: &str = "server";

/// Key of the single route inside each frontend
const ROUTE_KEY: &str = "route";

/// Addresses used when building routing entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingConfig {
    /// Host the reverse proxy forwards to; tunnels terminate here
    pub gateway_host: String,
    /// Domain under which per-cluster hostnames are published
    pub root_domain: String,
}

impl RoutingConfig {
    /// Rule and backend name for one half of a lease
    pub fn rule_name(identity: &ClusterIdentity, role: PortRole) -> String {
        format!("{identity}-{role}")
    }

    /// Backend URL for a leased port
    pub fn backend_url(&self, port: u16) -> String {
        format!("http://{}:{port}", self.gateway_host)
    }

    /// Frontend host rule for one half of a lease
    pub fn frontend_rule(&self, identity: &ClusterIdentity, role: PortRole) -> String {
        format!("Host: {identity}-{role}.{}", self.root_domain)
    }
}

/// A single upstream server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Server {
    /// Upstream URL, `http://{gateway_host}:{port}`
    pub url: String,
    /// Settings this crate does not manage
    #[serde(flatten)]
    pub other: toml::Table,
}

/// A named backend
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Backend {
    /// Servers keyed by name; cluster backends hold exactly one
    #[serde(default)]
    pub servers: BTreeMap<String, Server>,
    /// Settings this crate does not manage
    #[serde(flatten)]
    pub other: toml::Table,
}

impl Backend {
    fn single(url: String) -> Self {
        Self {
            servers: BTreeMap::from([(
                SERVER_KEY.to_string(),
                Server {
                    url,
                    other: toml::Table::new(),
                },
            )]),
            other: toml::Table::new(),
        }
    }

    /// Explicit port of the primary server URL
    pub fn port(&self) -> Option<u16> {
        let server = self.servers.get(SERVER_KEY)?;
        Url::parse(&server.url).ok()?.port()
    }
}

/// A host-matching route
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Route {
    /// Matcher expression, e.g. `Host: name.domain`
    pub rule: String,
}

/// A named frontend routing a hostname to a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frontend {
    /// Name of the backend receiving matched traffic; empty if the entry names none
    #[serde(default)]
    pub backend: String,
    /// Routes keyed by name
    #[serde(default)]
    pub routes: BTreeMap<String, Route>,
    /// Settings this crate does not manage
    #[serde(flatten)]
    pub other: toml::Table,
}

/// In-memory copy of the rule file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleTable {
    /// Backends keyed by name
    #[serde(default)]
    pub backends: BTreeMap<String, Backend>,
    /// Frontends keyed by name
    #[serde(default)]
    pub frontends: BTreeMap<String, Frontend>,
    /// Other top-level sections, preserved across rewrites
    #[serde(flatten)]
    pub other: toml::Table,
}

impl RuleTable {
    /// Add one backend and one frontend per leased port
    pub fn add_cluster(mut self, routing: &RoutingConfig, lease: &PortLease) -> Self {
        for role in PortRole::ALL {
            let name = RoutingConfig::rule_name(&lease.identity, role);
            self.backends.insert(
                name.clone(),
                Backend::single(routing.backend_url(lease.port(role))),
            );
            self.frontends.insert(
                name.clone(),
                Frontend {
                    backend: name,
                    routes: BTreeMap::from([(
                        ROUTE_KEY.to_string(),
                        Route {
                            rule: routing.frontend_rule(&lease.identity, role),
                        },
                    )]),
                    other: toml::Table::new(),
                },
            );
        }
        self
    }

    /// Recover the lease for `identity` from its two backend URLs
    pub fn get_ports(&self, identity: &ClusterIdentity) -> Result<PortLease> {
        let port = |role: PortRole| {
            let name = RoutingConfig::rule_name(identity, role);
            self.backends
                .get(&name)
                .and_then(Backend::port)
                .ok_or_else(|| {
                    ProxboxError::not_found(format!("No valid {role} backend for {identity}"))
                })
        };
        Ok(PortLease::new(
            identity.clone(),
            port(PortRole::Primary)?,
            port(PortRole::Secondary)?,
        ))
    }

    /// Identities that own at least one backend
    pub fn identities(&self) -> BTreeSet<ClusterIdentity> {
        self.backends
            .keys()
            .filter_map(|name| {
                PortRole::ALL.iter().find_map(|role| {
                    name.strip_suffix(&format!("-{role}"))
                        .and_then(|id| ClusterIdentity::parse(id).ok())
                })
            })
            .collect()
    }

    /// Every complete lease in the table
    pub fn leases(&self) -> Vec<PortLease> {
        self.identities()
            .iter()
            .filter_map(|identity| match self.get_ports(identity) {
                Ok(lease) => Some(lease),
                Err(e) => {
                    warn!(%identity, error = %e, "Skipping incomplete lease");
                    None
                }
            })
            .collect()
    }

    /// Every port referenced by any backend, complete lease or not
    pub fn leased_ports(&self) -> Vec<u16> {
        self.backends.values().filter_map(Backend::port).collect()
    }
}

/// File-backed rule table with atomic replacement
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    /// Create a store over the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the table; a missing file is an empty table
    pub async fn load(&self) -> Result<RuleTable> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "Rule file missing, using empty table");
                return Ok(RuleTable::default());
            }
            Err(e) => {
                return Err(ProxboxError::storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };
        let table: RuleTable = toml::from_str(&content)?;
        for (name, frontend) in &table.frontends {
            if frontend.backend.is_empty() {
                warn!(path = %self.path.display(), frontend = %name, "Frontend names no backend");
            }
        }
        Ok(table)
    }

    /// Replace the file with `table` via temp file and rename
    pub async fn save(&self, table: &RuleTable) -> Result<()> {
        let data = toml::to_string(table)?;

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to create rule directory: {e}")))?;

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                ProxboxError::storage(format!("Invalid rule file path: {}", self.path.display()))
            })?;
        let temp_path = dir.join(format!(".{file_name}.{}.tmp", uuid::Uuid::new_v4()));

        if let Err(e) = Self::write_and_rename(&temp_path, &self.path, data.as_bytes()).await {
            // Best effort: a stray temp file is harmless but untidy.
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        debug!(
            path = %self.path.display(),
            backends = table.backends.len(),
            "Saved rule table"
        );
        Ok(())
    }

    async fn write_and_rename(temp_path: &Path, path: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to create temp file: {e}")))?;
        file.write_all(data)
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to write rules: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to sync rules: {e}")))?;
        drop(file);

        fs::rename(temp_path, path)
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to rename temp file: {e}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn routing() -> RoutingConfig {
        RoutingConfig {
            gateway_host: "10.0.0.1".to_string(),
            root_domain: "proxbox.example".to_string(),
        }
    }

    fn lease(id: &str, primary: u16) -> PortLease {
        PortLease::new(ClusterIdentity::parse(id).unwrap(), primary, primary + 1)
    }

    #[test]
    fn test_add_cluster_entries() {
        let table = RuleTable::default().add_cluster(&routing(), &lease("calm-river-a1b2c3", 8890));

        let backend = &table.backends["calm-river-a1b2c3-primary"];
        assert_eq!(backend.servers["server"].url, "http://10.0.0.1:8890");
        assert_eq!(
            table.backends["calm-river-a1b2c3-secondary"].servers["server"].url,
            "http://10.0.0.1:8891"
        );

        let frontend = &table.frontends["calm-river-a1b2c3-secondary"];
        assert_eq!(frontend.backend, "calm-river-a1b2c3-secondary");
        assert_eq!(
            frontend.routes["route"].rule,
            "Host: calm-river-a1b2c3-secondary.proxbox.example"
        );
    }

    #[test]
    fn test_get_ports_round_trip() {
        let l = lease("calm-river-a1b2c3", 8890);
        let table = RuleTable::default().add_cluster(&routing(), &l);
        assert_eq!(table.get_ports(&l.identity).unwrap(), l);

        let ghost = ClusterIdentity::parse("ghost-id").unwrap();
        assert!(matches!(
            table.get_ports(&ghost),
            Err(ProxboxError::NotFound { .. })
        ));
    }

    #[test]
    fn test_half_missing_lease() {
        let l = lease("calm-river-a1b2c3", 8890);
        let mut table = RuleTable::default().add_cluster(&routing(), &l);
        table.backends.remove("calm-river-a1b2c3-secondary");

        assert!(matches!(
            table.get_ports(&l.identity),
            Err(ProxboxError::NotFound { .. })
        ));
        assert!(table.leases().is_empty());
        // The surviving port still counts towards allocation.
        assert_eq!(table.leased_ports(), vec![8890]);
    }

    #[test]
    fn test_malformed_url_is_not_found() {
        let l = lease("calm-river-a1b2c3", 8890);
        let mut table = RuleTable::default().add_cluster(&routing(), &l);
        if let Some(server) = table
            .backends
            .get_mut("calm-river-a1b2c3-primary")
            .and_then(|b| b.servers.get_mut("server"))
        {
            server.url = "not a url".to_string();
        }
        assert!(table.get_ports(&l.identity).is_err());
    }

    #[test]
    fn test_portless_url_is_not_found() {
        let l = lease("calm-river-a1b2c3", 8890);
        let mut table = RuleTable::default().add_cluster(&routing(), &l);
        if let Some(server) = table
            .backends
            .get_mut("calm-river-a1b2c3-primary")
            .and_then(|b| b.servers.get_mut("server"))
        {
            server.url = "http://10.0.0.1".to_string();
        }
        assert!(matches!(
            table.get_ports(&l.identity),
            Err(ProxboxError::NotFound { .. })
        ));
        assert_eq!(table.leased_ports(), vec![8891]);
    }

    #[tokio::test]
    async fn test_missing_file_loads_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = RuleStore::new(temp_dir.path().join("rules.toml"));
        let table = store.load().await.unwrap();
        assert!(table.backends.is_empty());
        assert!(table.frontends.is_empty());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let store = RuleStore::new(temp_dir.path().join("conf/rules.toml"));
        let table = RuleTable::default()
            .add_cluster(&routing(), &lease("calm-river-a1b2c3", 8890))
            .add_cluster(&routing(), &lease("bold-moon-00ff00", 8892));

        store.save(&table).await.unwrap();
        let loaded = store.load().await.unwrap();
        assert_eq!(loaded, table);
        assert_eq!(loaded.leases().len(), 2);

        // No temp files left behind.
        let mut entries = tokio::fs::read_dir(temp_dir.path().join("conf")).await.unwrap();
        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await.unwrap() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
        assert_eq!(names, vec!["rules.toml".to_string()]);
    }

    #[tokio::test]
    async fn test_frontend_without_backend_still_loads() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rules.toml");
        tokio::fs::write(
            &path,
            r#"
[frontends.half-edited]
passHostHeader = true

[backends.calm-river-a1b2c3-primary.servers.server]
url = "http://10.0.0.1:8890"

[backends.calm-river-a1b2c3-secondary.servers.server]
url = "http://10.0.0.1:8891"
"#,
        )
        .await
        .unwrap();

        let store = RuleStore::new(&path);
        let table = store.load().await.unwrap();
        assert_eq!(table.frontends["half-edited"].backend, "");
        let identity = ClusterIdentity::parse("calm-river-a1b2c3").unwrap();
        assert_eq!(table.get_ports(&identity).unwrap().ports(), [8890, 8891]);

        // Rewriting keeps the entry for the operator to fix.
        let table = table.add_cluster(&routing(), &lease("bold-moon-00ff00", 8892));
        store.save(&table).await.unwrap();
        assert!(store.load().await.unwrap().frontends.contains_key("half-edited"));
    }

    #[tokio::test]
    async fn test_unmanaged_sections_survive_rewrite() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("rules.toml");
        tokio::fs::write(
            &path,
            r#"
[backends.dashboard.servers.server]
url = "http://127.0.0.1:8080"
weight = 10

[frontends.dashboard]
backend = "dashboard"
passHostHeader = true

[frontends.dashboard.routes.route]
rule = "Host: dashboard.proxbox.example"

[tls]
minVersion = "VersionTLS12"
"#,
        )
        .await
        .unwrap();

        let store = RuleStore::new(&path);
        let table = store
            .load()
            .await
            .unwrap()
            .add_cluster(&routing(), &lease("calm-river-a1b2c3", 8890));
        store.save(&table).await.unwrap();

        let reloaded = store.load().await.unwrap();
        assert!(reloaded.other.contains_key("tls"));
        assert_eq!(
            reloaded.frontends["dashboard"].other.get("passHostHeader"),
            Some(&toml::Value::Boolean(true))
        );
        assert_eq!(
            reloaded.backends["dashboard"].servers["server"].other.get("weight"),
            Some(&toml::Value::Integer(10))
        );
        // Unmanaged backends still count as taken ports, but are not leases.
        assert!(reloaded.leased_ports().contains(&8080));
        assert_eq!(reloaded.leases().len(), 1);
    }
}
