//! Stateless cluster authentication
//!
//! A cluster proves it owns its registered key by signing its own identity
//! string. Nothing is issued on success; every call verifies from scratch.

use crate::crypto::KeyCrypto;
use crate::errors::{ProxboxError, Result};
use crate::stores::Stores;
use crate::types::{ClusterIdentity, PortLease};
use std::sync::Arc;
use tracing::{info, warn};

/// Verifies identity signatures and releases lease port numbers
#[derive(Clone)]
pub struct AuthenticationService {
    stores: Arc<Stores>,
    crypto: Arc<dyn KeyCrypto>,
}

impl AuthenticationService {
    /// Create an authentication service over shared stores
    pub fn new(stores: Arc<Stores>, crypto: Arc<dyn KeyCrypto>) -> Self {
        Self { stores, crypto }
    }

    /// Return the lease of `identity` if `signature` signs that identity
    ///
    /// Unknown identities fail with `NotFound` before any signature check.
    #[tracing::instrument(skip(self, signature), fields(identity = %identity))]
    pub async fn authenticate(
        &self,
        identity: &ClusterIdentity,
        signature: &[u8],
    ) -> Result<PortLease> {
        let _guard = self.stores.read().await;

        let entry = self
            .stores
            .keys()
            .find(identity)
            .await?
            .ok_or_else(|| {
                ProxboxError::not_found(format!("Cluster {identity} is not registered"))
            })?;

        let recovered = self
            .crypto
            .verify_and_recover(&entry.public_key, signature)
            .await
            .map_err(|err| {
                warn!(error = %err, "Signature verification failed");
                err
            })?;

        if recovered != identity.as_str().as_bytes() {
            warn!("Signature recovered a different plaintext");
            return Err(ProxboxError::unauthorized(
                "Given signature does not match pubkey registered for this cluster",
            ));
        }

        let lease = self.stores.rules().load().await?.get_ports(identity)?;
        info!(
            primary_port = lease.primary_port,
            secondary_port = lease.secondary_port,
            "Authenticated cluster"
        );
        Ok(lease)
    }
}

impl std::fmt::Debug for AuthenticationService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthenticationService")
            .field("stores", &self.stores)
            .finish_non_exhaustive()
    }
}
