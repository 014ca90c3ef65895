//! Proxbox Core
//!
//! Self-registration broker for clusters that need a private SSH tunnel
//! through a shared gateway host.
//!
//! A cluster submits its public key and receives an identity plus two
//! leased ports. The broker records the key with forwarding restrictions in
//! the gateway's `authorized_keys` file and publishes one reverse-proxy rule
//! per port. Later the cluster signs its identity string to get its ports
//! back.
//!
//! The two files are the only state. Every operation re-reads them, and a
//! process-wide lock orders registrations against each other and against
//! readers.

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// HTTP request forms and validation
pub mod api;
/// Key/rule consistency report
pub mod audit;
/// Signature-based authentication
pub mod authentication;
/// Broker assembly
pub mod broker;
/// Configuration loading
pub mod config;
/// Signature verification capability
pub mod crypto;
/// Error taxonomy
pub mod errors;
/// Identity generation
pub mod identity;
/// `authorized_keys` backed key registry
pub mod key_registry;
/// Public keys and SSH restrictions
pub mod keys;
/// Port pair allocation
pub mod port_ledger;
/// Registration state machine
pub mod registration;
/// Reverse-proxy rule storage
pub mod rule_store;
/// Shared store access
pub mod stores;
/// Identities and leases
pub mod types;

// Re-export key types for convenience
pub use api::{AuthenticateRequest, RegisterRequest};
pub use audit::AuditReport;
pub use authentication::AuthenticationService;
pub use broker::Broker;
pub use config::ProxboxConfig;
pub use crypto::{KeyCrypto, OpensslKeyCrypto};
pub use errors::{ErrorBody, ProxboxError, Result};
pub use identity::IdentityGenerator;
pub use key_registry::KeyRegistry;
pub use keys::{AuthorizedKey, KeyEntry, PublicKey, SshRestrictions};
pub use port_ledger::PortLedger;
pub use registration::{RegistrationService, RegistrationStage};
pub use rule_store::{RoutingConfig, RuleStore, RuleTable};
pub use stores::Stores;
pub use types::{ClusterIdentity, PortLease, PortRole};
