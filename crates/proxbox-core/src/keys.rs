//! OpenSSH public keys and `authorized_keys` lines
//!
//! An `authorized_keys` line is `[options] <key-type> <base64-blob> [comment]`.
//! Options are comma separated and may carry double-quoted values that
//! contain spaces and commas, so they are tokenized by hand rather than split
//! on whitespace.

use crate::errors::{ProxboxError, Result};
use crate::types::ClusterIdentity;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use std::fmt;

/// Public key algorithms accepted for registration
const KEY_TYPES: &[&str] = &[
    "ssh-rsa",
    "ssh-dss",
    "ssh-ed25519",
    "ecdsa-sha2-nistp256",
    "ecdsa-sha2-nistp384",
    "ecdsa-sha2-nistp521",
    "sk-ssh-ed25519@openssh.com",
    "sk-ecdsa-sha2-nistp256@openssh.com",
];

fn is_key_type(token: &str) -> bool {
    KEY_TYPES.contains(&token)
}

/// An OpenSSH public key as submitted by a cluster
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicKey {
    key_type: String,
    blob: Vec<u8>,
    comment: Option<String>,
}

impl PublicKey {
    /// Parse `<key-type> <base64-blob> [comment]`
    pub fn parse(text: &str) -> Result<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ProxboxError::validation("Missing pubkey parameter"));
        }

        let mut parts = text.split_whitespace();
        let key_type = parts
            .next()
            .ok_or_else(|| ProxboxError::validation("Missing key type"))?;
        if !is_key_type(key_type) {
            return Err(ProxboxError::validation(format!(
                "Unsupported key type: {key_type}"
            )));
        }

        let encoded = parts
            .next()
            .ok_or_else(|| ProxboxError::validation("Missing key data"))?;
        let blob = STANDARD
            .decode(encoded)
            .map_err(|e| ProxboxError::validation(format!("Key data is not valid base64: {e}")))?;
        Self::check_blob(key_type, &blob)?;

        let comment = parts.collect::<Vec<_>>().join(" ");
        Ok(Self {
            key_type: key_type.to_string(),
            blob,
            comment: (!comment.is_empty()).then_some(comment),
        })
    }

    /// The wire blob starts with the length-prefixed key type name
    fn check_blob(key_type: &str, blob: &[u8]) -> Result<()> {
        let header: [u8; 4] = blob
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| ProxboxError::validation("Key data too short"))?;
        let len = u32::from_be_bytes(header) as usize;
        let embedded = blob
            .get(4..4 + len)
            .ok_or_else(|| ProxboxError::validation("Key data truncated"))?;
        if embedded != key_type.as_bytes() {
            return Err(ProxboxError::validation(format!(
                "Key data does not match key type {key_type}"
            )));
        }
        Ok(())
    }

    /// Key algorithm name, e.g. `ssh-rsa`
    pub fn key_type(&self) -> &str {
        &self.key_type
    }

    /// Decoded key blob
    pub fn blob(&self) -> &[u8] {
        &self.blob
    }

    /// Trailing comment, if any
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    /// Same key material with a different comment
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Whether two keys carry the same key material, ignoring comments
    pub fn same_key(&self, other: &PublicKey) -> bool {
        self.key_type == other.key_type && self.blob == other.blob
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.key_type, STANDARD.encode(&self.blob))?;
        if let Some(comment) = &self.comment {
            write!(f, " {comment}")?;
        }
        Ok(())
    }
}

/// SSH forwarding restrictions attached to a registered key
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SshRestrictions {
    /// Forced command run instead of any requested command
    pub command: Option<String>,
    /// `no-agent-forwarding`
    pub no_agent_forwarding: bool,
    /// `no-X11-forwarding`
    pub no_x11_forwarding: bool,
    /// `permitopen="host:port"` destinations
    pub permit_open: Vec<(String, u16)>,
    /// Options this type does not model, kept verbatim
    pub extra: Vec<String>,
}

impl SshRestrictions {
    /// Restrictions for a tunnel that may only forward to `ports` on `host`
    pub fn tunnel_only(identity: &ClusterIdentity, host: &str, ports: [u16; 2]) -> Self {
        Self {
            command: Some(format!(
                "echo 'This account can only port forward to {identity}'"
            )),
            no_agent_forwarding: true,
            no_x11_forwarding: true,
            permit_open: ports.iter().map(|p| (host.to_string(), *p)).collect(),
            extra: Vec::new(),
        }
    }

    /// Whether no options are set
    pub fn is_empty(&self) -> bool {
        self.command.is_none()
            && !self.no_agent_forwarding
            && !self.no_x11_forwarding
            && self.permit_open.is_empty()
            && self.extra.is_empty()
    }

    /// Ports named in `permitopen` options
    pub fn permitted_ports(&self) -> Vec<u16> {
        self.permit_open.iter().map(|(_, port)| *port).collect()
    }

    /// Parse a comma separated options field
    pub fn parse(options: &str) -> Result<Self> {
        let mut restrictions = Self::default();
        for option in split_unquoted(options, |c| c == ',')? {
            let (name, value) = match option.split_once('=') {
                Some((name, value)) => (name, Some(value)),
                None => (option.as_str(), None),
            };

            match (name.to_ascii_lowercase().as_str(), value) {
                ("command", Some(cmd)) => restrictions.command = Some(unquote(cmd)?),
                ("no-agent-forwarding", None) => restrictions.no_agent_forwarding = true,
                ("no-x11-forwarding", None) => restrictions.no_x11_forwarding = true,
                ("permitopen", Some(dest)) => {
                    let dest = unquote(dest)?;
                    let (host, port) = dest.rsplit_once(':').ok_or_else(|| {
                        ProxboxError::validation(format!("Invalid permitopen value: {dest}"))
                    })?;
                    let port = port.parse::<u16>().map_err(|_| {
                        ProxboxError::validation(format!("Invalid permitopen port: {dest}"))
                    })?;
                    restrictions.permit_open.push((host.to_string(), port));
                }
                _ => restrictions.extra.push(option.clone()),
            }
        }
        Ok(restrictions)
    }
}

impl fmt::Display for SshRestrictions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut options = Vec::new();
        if let Some(command) = &self.command {
            options.push(format!("command=\"{}\"", command.replace('"', "\\\"")));
        }
        if self.no_agent_forwarding {
            options.push("no-agent-forwarding".to_string());
        }
        if self.no_x11_forwarding {
            options.push("no-X11-forwarding".to_string());
        }
        for (host, port) in &self.permit_open {
            options.push(format!("permitopen=\"{host}:{port}\""));
        }
        options.extend(self.extra.iter().cloned());
        f.write_str(&options.join(","))
    }
}

/// Split on `is_sep` characters that are outside double quotes
fn split_unquoted(input: &str, is_sep: impl Fn(char) -> bool) -> Result<Vec<String>> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut escaped = false;

    for c in input.chars() {
        if escaped {
            current.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => {
                current.push(c);
                escaped = true;
            }
            '"' => {
                current.push(c);
                in_quotes = !in_quotes;
            }
            c if !in_quotes && is_sep(c) => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }

    if in_quotes {
        return Err(ProxboxError::validation("Unterminated quote in key options"));
    }
    if !current.is_empty() {
        parts.push(current);
    }
    Ok(parts)
}

fn unquote(value: &str) -> Result<String> {
    let inner = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .ok_or_else(|| ProxboxError::validation(format!("Option value must be quoted: {value}")))?;
    Ok(inner.replace("\\\"", "\""))
}

/// One parsed `authorized_keys` entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorizedKey {
    /// Options preceding the key
    pub restrictions: SshRestrictions,
    /// The key itself; its comment carries the cluster identity
    pub key: PublicKey,
}

impl AuthorizedKey {
    /// Parse a single non-comment line
    pub fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let first = line.split_whitespace().next().unwrap_or_default();
        if is_key_type(first) {
            return Ok(Self {
                restrictions: SshRestrictions::default(),
                key: PublicKey::parse(line)?,
            });
        }

        // The options field runs up to the first unquoted whitespace.
        let mut fields = split_unquoted(line, char::is_whitespace)?.into_iter();
        let options = fields
            .next()
            .ok_or_else(|| ProxboxError::validation("Empty key line"))?;
        let rest = fields.collect::<Vec<_>>().join(" ");
        Ok(Self {
            restrictions: SshRestrictions::parse(&options)?,
            key: PublicKey::parse(&rest)?,
        })
    }

    /// Identity stored in the comment, if the comment is one
    pub fn identity(&self) -> Option<ClusterIdentity> {
        self.key
            .comment()
            .and_then(|c| ClusterIdentity::parse(c).ok())
    }
}

impl fmt::Display for AuthorizedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.restrictions.is_empty() {
            write!(f, "{}", self.key)
        } else {
            write!(f, "{} {}", self.restrictions, self.key)
        }
    }
}

/// A registered cluster: identity, key and restrictions
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    /// Identity of the cluster owning the key
    pub identity: ClusterIdentity,
    /// Registered key material
    pub public_key: PublicKey,
    /// Forwarding restrictions written with the key
    pub restrictions: SshRestrictions,
}

impl KeyEntry {
    /// Build the `authorized_keys` line for this entry
    pub fn to_authorized_key(&self) -> AuthorizedKey {
        AuthorizedKey {
            restrictions: self.restrictions.clone(),
            key: self.public_key.clone().with_comment(self.identity.as_str()),
        }
    }
}

impl TryFrom<AuthorizedKey> for KeyEntry {
    type Error = ProxboxError;

    fn try_from(line: AuthorizedKey) -> Result<Self> {
        let identity = line.identity().ok_or_else(|| {
            ProxboxError::validation("Key comment is not a cluster identity")
        })?;
        Ok(Self {
            identity,
            public_key: line.key,
            restrictions: line.restrictions,
        })
    }
}
