//! Broker assembly
//!
//! [`Broker`] wires both services to one pair of backing files and one
//! shared lock. Build a single broker per process and share it between
//! request handlers.

use crate::api::{AuthenticateRequest, RegisterRequest};
use crate::audit::{self, AuditReport};
use crate::authentication::AuthenticationService;
use crate::config::ProxboxConfig;
use crate::crypto::KeyCrypto;
use crate::errors::{ProxboxError, Result};
use crate::identity::IdentityGenerator;
use crate::key_registry::KeyRegistry;
use crate::keys::PublicKey;
use crate::port_ledger::PortLedger;
use crate::registration::RegistrationService;
use crate::rule_store::RuleStore;
use crate::stores::Stores;
use crate::types::{ClusterIdentity, PortLease};
use std::sync::Arc;
use tracing::info;

/// Registration and authentication over one pair of backing files
#[derive(Debug, Clone)]
pub struct Broker {
    stores: Arc<Stores>,
    registration: RegistrationService,
    authentication: AuthenticationService,
}

impl Broker {
    /// Build a broker from validated configuration
    pub fn new(config: &ProxboxConfig, crypto: Arc<dyn KeyCrypto>) -> Result<Self> {
        config.validate()?;

        let stores = Arc::new(Stores::new(
            KeyRegistry::new(&config.authorized_keys_path),
            RuleStore::new(&config.rules_path),
        ));
        let registration = RegistrationService::new(
            stores.clone(),
            IdentityGenerator::new(config.identity_attempts),
            PortLedger::new(config.base_port),
            config.routing(),
            config.permit_open_host.clone(),
        );
        let authentication = AuthenticationService::new(stores.clone(), crypto);

        info!(
            keys = %config.authorized_keys_path.display(),
            rules = %config.rules_path.display(),
            base_port = config.base_port,
            "Broker ready"
        );
        Ok(Self {
            stores,
            registration,
            authentication,
        })
    }

    /// Shared stores, for inspection
    pub fn stores(&self) -> &Arc<Stores> {
        &self.stores
    }

    /// Register a public key
    pub async fn register(&self, key: PublicKey) -> Result<PortLease> {
        self.registration.register(key).await
    }

    /// Handle a `POST /cluster/` form
    pub async fn register_request(&self, request: &RegisterRequest) -> Result<PortLease> {
        self.register(request.public_key()?).await
    }

    /// Authenticate a cluster by its identity signature
    pub async fn authenticate(
        &self,
        identity: &ClusterIdentity,
        signature: &[u8],
    ) -> Result<PortLease> {
        self.authentication.authenticate(identity, signature).await
    }

    /// Authenticate a cluster named by untrusted text, e.g. a URL path
    ///
    /// Text that cannot be an identity was never registered, so it is
    /// `NotFound` like any other unknown identity.
    pub async fn authenticate_named(&self, identity: &str, signature: &[u8]) -> Result<PortLease> {
        let identity = ClusterIdentity::parse(identity)
            .map_err(|_| ProxboxError::not_found(format!("Cluster {identity} is not registered")))?;
        self.authenticate(&identity, signature).await
    }

    /// Handle a `POST /cluster/{identity}` form
    pub async fn authenticate_request(
        &self,
        identity: &str,
        request: &AuthenticateRequest,
    ) -> Result<PortLease> {
        self.authenticate_named(identity, request.signature()?).await
    }

    /// Every complete lease in the rule table
    pub async fn leases(&self) -> Result<Vec<PortLease>> {
        let _guard = self.stores.read().await;
        Ok(self.stores.rules().load().await?.leases())
    }

    /// Report key entries and leases that lack their counterpart
    pub async fn audit(&self) -> Result<AuditReport> {
        audit::audit(&self.stores).await
    }
}
