//! Access-control file backed registry of cluster keys
//!
//! The backing file is an OpenSSH `authorized_keys` file. The registry only
//! ever appends to it; revocation is done by hand. Every call re-reads the
//! file so it stays the single source of truth.

use crate::errors::{ProxboxError, Result};
use crate::keys::{AuthorizedKey, KeyEntry, PublicKey};
use crate::types::ClusterIdentity;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

/// Registry of cluster keys stored in an `authorized_keys` file
#[derive(Debug, Clone)]
pub struct KeyRegistry {
    path: PathBuf,
}

impl KeyRegistry {
    /// Create a registry over the given file
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Every parseable key line, including keys not owned by a cluster
    pub async fn authorized_keys(&self) -> Result<Vec<AuthorizedKey>> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(ProxboxError::storage(format!(
                    "Failed to read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let mut keys = Vec::new();
        for (index, line) in content.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match AuthorizedKey::parse(line) {
                Ok(key) => keys.push(key),
                Err(e) => warn!(
                    path = %self.path.display(),
                    line = index + 1,
                    error = %e,
                    "Skipping malformed authorized_keys line"
                ),
            }
        }
        Ok(keys)
    }

    /// All cluster key entries
    pub async fn list(&self) -> Result<Vec<KeyEntry>> {
        Ok(self
            .authorized_keys()
            .await?
            .into_iter()
            .filter_map(|line| KeyEntry::try_from(line).ok())
            .collect())
    }

    /// Identities of all registered clusters
    pub async fn identities(&self) -> Result<HashSet<ClusterIdentity>> {
        Ok(self
            .authorized_keys()
            .await?
            .iter()
            .filter_map(AuthorizedKey::identity)
            .collect())
    }

    /// Look up the entry registered under `identity`
    pub async fn find(&self, identity: &ClusterIdentity) -> Result<Option<KeyEntry>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .find(|entry| &entry.identity == identity))
    }

    /// Whether the exact key material is already present in the file
    pub async fn contains_key(&self, candidate: &PublicKey) -> Result<bool> {
        Ok(self
            .authorized_keys()
            .await?
            .iter()
            .any(|line| line.key.same_key(candidate)))
    }

    /// Append an entry, creating the file and its directory if needed
    pub async fn append(&self, entry: &KeyEntry) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).await.map_err(|e| {
                ProxboxError::storage(format!("Failed to create key directory: {e}"))
            })?;
        }

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| {
                ProxboxError::storage(format!("Failed to open {}: {e}", self.path.display()))
            })?;

        // Leading newline guards against a hand-edited file lacking a trailing one.
        let line = format!("\n{}\n", entry.to_authorized_key());
        file.write_all(line.as_bytes())
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to append key: {e}")))?;
        file.sync_all()
            .await
            .map_err(|e| ProxboxError::storage(format!("Failed to sync key file: {e}")))?;

        debug!(identity = %entry.identity, path = %self.path.display(), "Appended key entry");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::SshRestrictions;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use tempfile::TempDir;

    fn key(body: &[u8]) -> PublicKey {
        let mut blob = 7u32.to_be_bytes().to_vec();
        blob.extend_from_slice(b"ssh-rsa");
        blob.extend_from_slice(body);
        PublicKey::parse(&format!("ssh-rsa {} someone@laptop", STANDARD.encode(blob))).unwrap()
    }

    fn entry(id: &str, body: &[u8]) -> KeyEntry {
        let identity = ClusterIdentity::parse(id).unwrap();
        KeyEntry {
            restrictions: SshRestrictions::tunnel_only(&identity, "0.0.0.0", [9000, 9001]),
            identity,
            public_key: key(body),
        }
    }

    #[tokio::test]
    async fn test_missing_file_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let registry = KeyRegistry::new(temp_dir.path().join("nope/authorized_keys"));
        assert!(registry.list().await.unwrap().is_empty());
        assert!(!registry.contains_key(&key(b"a")).await.unwrap());
    }

    #[tokio::test]
    async fn test_append_creates_directory_and_round_trips() {
        let temp_dir = TempDir::new().unwrap();
        let registry = KeyRegistry::new(temp_dir.path().join("host_ssh/authorized_keys"));

        let first = entry("calm-river-a1b2c3", b"one");
        registry.append(&first).await.unwrap();
        registry.append(&entry("bold-moon-000001", b"two")).await.unwrap();

        let listed = registry.list().await.unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].identity, first.identity);
        assert_eq!(listed[0].restrictions, first.restrictions);
        // The stored comment is the identity, not the submitted comment.
        assert_eq!(listed[0].public_key.comment(), Some("calm-river-a1b2c3"));

        let found = registry.find(&first.identity).await.unwrap().unwrap();
        assert!(found.public_key.same_key(&first.public_key));
        assert!(registry.contains_key(&key(b"two")).await.unwrap());
        assert!(!registry.contains_key(&key(b"three")).await.unwrap());
    }

    #[tokio::test]
    async fn test_every_accepted_key_reads_back() {
        let temp_dir = TempDir::new().unwrap();
        let registry = KeyRegistry::new(temp_dir.path().join("authorized_keys"));

        let key_types = ["ssh-rsa", "ssh-ed25519", "ecdsa-sha2-nistp384"];
        for (index, key_type) in key_types.iter().enumerate() {
            let mut blob = (key_type.len() as u32).to_be_bytes().to_vec();
            blob.extend_from_slice(key_type.as_bytes());
            blob.push(index as u8);
            let text = format!("{key_type} {} \"quoted\" comment", STANDARD.encode(blob));
            let public_key = PublicKey::parse(&text).unwrap();
            let identity = ClusterIdentity::parse(&format!("calm-river-00000{index}")).unwrap();
            registry
                .append(&KeyEntry {
                    restrictions: SshRestrictions::tunnel_only(&identity, "0.0.0.0", [9000, 9001]),
                    identity,
                    public_key: public_key.clone(),
                })
                .await
                .unwrap();
            assert!(registry.contains_key(&public_key).await.unwrap());
        }
        assert_eq!(registry.list().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_comments_and_malformed_lines_are_skipped() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("authorized_keys");
        let operator = key(b"operator").to_string();
        tokio::fs::write(
            &path,
            format!("# managed by proxbox\n\nnot a key at all\n{operator}"),
        )
        .await
        .unwrap();

        let registry = KeyRegistry::new(&path);
        // The operator key has a non-identity comment: not a cluster, but still taken.
        assert!(registry.list().await.unwrap().is_empty());
        assert!(registry.contains_key(&key(b"operator")).await.unwrap());

        // Appending after a line with no trailing newline keeps both lines intact.
        registry.append(&entry("calm-river-a1b2c3", b"one")).await.unwrap();
        assert_eq!(registry.authorized_keys().await.unwrap().len(), 2);
        assert_eq!(registry.identities().await.unwrap().len(), 1);
    }
}
