//! Proxbox Testkit
//!
//! Shared fixtures for Proxbox tests:
//! - [`FakeKeyCrypto`]: deterministic stand-in for RSA sign/recover
//! - [`test_key`]: reproducible OpenSSH public keys
//! - [`TestBroker`]: a broker over files in a temp directory

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Fake signature scheme
pub mod crypto;
/// Temp-directory brokers
pub mod fixtures;
/// Key material
pub mod keys;

pub use crypto::{sign, FakeKeyCrypto};
pub use fixtures::TestBroker;
pub use keys::{test_key, test_key_text};
