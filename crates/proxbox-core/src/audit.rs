//! Cross-file consistency report
//!
//! A registration whose rule write failed leaves a key entry with no
//! routing rules. The report finds those, and the reverse case of rules
//! whose key entry was removed by hand. Cleaning up is left to the operator.

use crate::errors::{ProxboxError, Result};
use crate::stores::Stores;
use crate::types::{ClusterIdentity, PortLease};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::warn;

/// Findings of one consistency check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    /// Registered identities with no complete rule pair
    pub orphaned_keys: Vec<ClusterIdentity>,
    /// Leases whose identity has no key entry
    pub orphaned_leases: Vec<PortLease>,
}

impl AuditReport {
    /// Whether both files agree
    pub fn is_consistent(&self) -> bool {
        self.orphaned_keys.is_empty() && self.orphaned_leases.is_empty()
    }

    /// Each finding as an error value, for logging or reporting
    pub fn inconsistencies(&self) -> Vec<ProxboxError> {
        let keys = self.orphaned_keys.iter().map(|identity| {
            ProxboxError::inconsistency(format!("Key entry {identity} has no routing rules"))
        });
        let leases = self.orphaned_leases.iter().map(|lease| {
            ProxboxError::inconsistency(format!(
                "Lease {} ({}, {}) has no key entry",
                lease.identity, lease.primary_port, lease.secondary_port
            ))
        });
        keys.chain(leases).collect()
    }
}

/// Compare the key registry with the rule table
pub async fn audit(stores: &Stores) -> Result<AuditReport> {
    let _guard = stores.read().await;

    let registered: BTreeSet<ClusterIdentity> = stores
        .keys()
        .list()
        .await?
        .into_iter()
        .map(|entry| entry.identity)
        .collect();
    let leases = stores.rules().load().await?.leases();
    let leased: BTreeSet<&ClusterIdentity> = leases.iter().map(|l| &l.identity).collect();

    let report = AuditReport {
        orphaned_keys: registered
            .iter()
            .filter(|id| !leased.contains(id))
            .cloned()
            .collect(),
        orphaned_leases: leases
            .iter()
            .filter(|l| !registered.contains(&l.identity))
            .cloned()
            .collect(),
    };

    for finding in report.inconsistencies() {
        warn!(error = %finding, "Storage inconsistency");
    }
    Ok(report)
}
