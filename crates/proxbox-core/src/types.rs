//! Core identifiers and lease records

use crate::errors::{ProxboxError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Longest identity accepted from callers
pub const MAX_IDENTITY_LEN: usize = 64;

/// Short, human-readable token naming a registered cluster
///
/// Identities only contain lowercase ASCII letters, digits and `-`, so they
/// are safe to embed in hostnames, rule names and SSH key comments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClusterIdentity(String);

impl ClusterIdentity {
    /// Parse and validate an identity supplied from outside the core
    pub fn parse(raw: &str) -> Result<Self> {
        if raw.is_empty() {
            return Err(ProxboxError::validation("Identity cannot be empty"));
        }
        if raw.len() > MAX_IDENTITY_LEN {
            return Err(ProxboxError::validation(format!(
                "Identity too long (max {MAX_IDENTITY_LEN} characters)"
            )));
        }
        if raw.starts_with('-') || raw.ends_with('-') {
            return Err(ProxboxError::validation(
                "Identity cannot start or end with '-'",
            ));
        }
        if !raw
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
        {
            return Err(ProxboxError::validation(format!(
                "Identity contains invalid characters: {raw}"
            )));
        }
        Ok(Self(raw.to_string()))
    }

    /// Borrow the identity as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClusterIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ClusterIdentity {
    type Err = ProxboxError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ClusterIdentity {
    type Error = ProxboxError;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<ClusterIdentity> for String {
    fn from(id: ClusterIdentity) -> Self {
        id.0
    }
}

impl AsRef<str> for ClusterIdentity {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Which half of a lease a port or routing rule belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortRole {
    /// First port of the pair
    Primary,
    /// Second port of the pair
    Secondary,
}

impl PortRole {
    /// Both roles in allocation order
    pub const ALL: [PortRole; 2] = [PortRole::Primary, PortRole::Secondary];

    /// Suffix used in rule names and hostnames
    pub fn as_str(self) -> &'static str {
        match self {
            PortRole::Primary => "primary",
            PortRole::Secondary => "secondary",
        }
    }
}

impl fmt::Display for PortRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pair of ports reserved for one identity's tunnel
///
/// This is also the JSON body returned by both registration and
/// authentication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortLease {
    /// Identity holding the lease
    pub identity: ClusterIdentity,
    /// First leased port
    pub primary_port: u16,
    /// Second leased port
    pub secondary_port: u16,
}

impl PortLease {
    /// Create a lease record
    pub fn new(identity: ClusterIdentity, primary_port: u16, secondary_port: u16) -> Self {
        Self {
            identity,
            primary_port,
            secondary_port,
        }
    }

    /// Port assigned to the given role
    pub fn port(&self, role: PortRole) -> u16 {
        match role {
            PortRole::Primary => self.primary_port,
            PortRole::Secondary => self.secondary_port,
        }
    }

    /// Both ports in role order
    pub fn ports(&self) -> [u16; 2] {
        [self.primary_port, self.secondary_port]
    }
}
