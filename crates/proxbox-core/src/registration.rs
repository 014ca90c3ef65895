//! Cluster registration
//!
//! A registration runs as a small state machine:
//!
//! ```text
//! Start -> KeyValidated -> IdentityAssigned -> PortsAllocated -> KeyPersisted -> RulesPersisted
//! ```
//!
//! Nothing is persisted until `PortsAllocated -> KeyPersisted`. The key entry
//! is always written before the rule table, so a failed rule write orphans a
//! key entry but never loses one. [`RegistrationService::fail`] is the only
//! place that decides what a failure at each stage means.

use crate::errors::{ProxboxError, Result};
use crate::identity::IdentityGenerator;
use crate::keys::{KeyEntry, PublicKey, SshRestrictions};
use crate::port_ledger::PortLedger;
use crate::rule_store::{RoutingConfig, RuleTable};
use crate::stores::Stores;
use crate::types::{ClusterIdentity, PortLease};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Where a registration is, or where it stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RegistrationStage {
    /// Key submitted, nothing checked
    Start,
    /// Key is not registered yet
    KeyValidated,
    /// A fresh identity was chosen
    IdentityAssigned,
    /// A port pair was chosen from the current table
    PortsAllocated,
    /// Key entry appended to the access-control file
    KeyPersisted,
    /// Rule table saved; registration complete
    RulesPersisted,
}

impl fmt::Display for RegistrationStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Start => "start",
            Self::KeyValidated => "key-validated",
            Self::IdentityAssigned => "identity-assigned",
            Self::PortsAllocated => "ports-allocated",
            Self::KeyPersisted => "key-persisted",
            Self::RulesPersisted => "rules-persisted",
        };
        f.write_str(name)
    }
}

/// In-flight registration data for each stage
#[derive(Debug, Clone)]
enum RegistrationState {
    Start {
        key: PublicKey,
    },
    KeyValidated {
        key: PublicKey,
    },
    IdentityAssigned {
        key: PublicKey,
        identity: ClusterIdentity,
    },
    PortsAllocated {
        key: PublicKey,
        lease: PortLease,
        table: RuleTable,
    },
    KeyPersisted {
        lease: PortLease,
        table: RuleTable,
    },
    RulesPersisted {
        lease: PortLease,
    },
}

impl RegistrationState {
    fn stage(&self) -> RegistrationStage {
        match self {
            Self::Start { .. } => RegistrationStage::Start,
            Self::KeyValidated { .. } => RegistrationStage::KeyValidated,
            Self::IdentityAssigned { .. } => RegistrationStage::IdentityAssigned,
            Self::PortsAllocated { .. } => RegistrationStage::PortsAllocated,
            Self::KeyPersisted { .. } => RegistrationStage::KeyPersisted,
            Self::RulesPersisted { .. } => RegistrationStage::RulesPersisted,
        }
    }
}

/// Registers new clusters: identity, port lease, key entry and rules
#[derive(Debug, Clone)]
pub struct RegistrationService {
    stores: Arc<Stores>,
    identities: IdentityGenerator,
    ledger: PortLedger,
    routing: RoutingConfig,
    permit_open_host: String,
}

impl RegistrationService {
    /// Create a registration service over shared stores
    pub fn new(
        stores: Arc<Stores>,
        identities: IdentityGenerator,
        ledger: PortLedger,
        routing: RoutingConfig,
        permit_open_host: impl Into<String>,
    ) -> Self {
        Self {
            stores,
            identities,
            ledger,
            routing,
            permit_open_host: permit_open_host.into(),
        }
    }

    /// Register `key` and return its new lease
    ///
    /// Fails with `Conflict` if the key material is already present.
    #[tracing::instrument(skip_all, fields(key_type = key.key_type()))]
    pub async fn register(&self, key: PublicKey) -> Result<PortLease> {
        let _guard = self.stores.write().await;

        let mut state = RegistrationState::Start { key };
        loop {
            let stage = state.stage();
            let next = match self.advance(state).await {
                Ok(next) => next,
                Err(err) => return Err(self.fail(stage, err)),
            };
            debug!(from = %stage, to = %next.stage(), "Registration advanced");

            match next {
                RegistrationState::RulesPersisted { lease } => {
                    info!(
                        identity = %lease.identity,
                        primary_port = lease.primary_port,
                        secondary_port = lease.secondary_port,
                        "Registered cluster"
                    );
                    return Ok(lease);
                }
                other => state = other,
            }
        }
    }

    async fn advance(&self, state: RegistrationState) -> Result<RegistrationState> {
        match state {
            RegistrationState::Start { key } => {
                if self.stores.keys().contains_key(&key).await? {
                    return Err(ProxboxError::conflict("Given pubkey is already registered"));
                }
                Ok(RegistrationState::KeyValidated { key })
            }

            RegistrationState::KeyValidated { key } => {
                let existing = self.stores.keys().identities().await?;
                let identity = self.identities.generate(&existing)?;
                Ok(RegistrationState::IdentityAssigned { key, identity })
            }

            RegistrationState::IdentityAssigned { key, identity } => {
                let table = self.stores.rules().load().await?;
                let (primary, secondary) = self.ledger.allocate_next(&table)?;
                Ok(RegistrationState::PortsAllocated {
                    key,
                    lease: PortLease::new(identity, primary, secondary),
                    table,
                })
            }

            RegistrationState::PortsAllocated { key, lease, table } => {
                let entry = KeyEntry {
                    restrictions: SshRestrictions::tunnel_only(
                        &lease.identity,
                        &self.permit_open_host,
                        lease.ports(),
                    ),
                    identity: lease.identity.clone(),
                    public_key: key,
                };
                self.stores.keys().append(&entry).await?;
                Ok(RegistrationState::KeyPersisted { lease, table })
            }

            RegistrationState::KeyPersisted { lease, table } => {
                let table = table.add_cluster(&self.routing, &lease);
                self.stores.rules().save(&table).await?;
                Ok(RegistrationState::RulesPersisted { lease })
            }

            RegistrationState::RulesPersisted { .. } => Err(ProxboxError::inconsistency(
                "Registration advanced past its terminal state",
            )),
        }
    }

    /// Decide what a failure while leaving `stage` means
    fn fail(&self, stage: RegistrationStage, err: ProxboxError) -> ProxboxError {
        match stage {
            RegistrationStage::Start if matches!(err, ProxboxError::Conflict { .. }) => {
                info!(error = %err, "Registration rejected");
            }
            RegistrationStage::Start
            | RegistrationStage::KeyValidated
            | RegistrationStage::IdentityAssigned
            | RegistrationStage::PortsAllocated => {
                warn!(%stage, error = %err, "Registration failed before anything was written");
            }
            RegistrationStage::KeyPersisted => {
                error!(
                    %stage,
                    error = %err,
                    "Registration failed after the key entry was written; entry is orphaned until reconciled"
                );
            }
            RegistrationStage::RulesPersisted => {
                error!(%stage, error = %err, "Registration failed in terminal state");
            }
        }
        err
    }
}
