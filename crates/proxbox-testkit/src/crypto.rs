//! A keyed, recoverable fake signature
//!
//! `sign(key, msg)` produces `tag || (msg XOR keystream(key))` where the tag
//! is `SHA-256(blob || msg)`. Recovering with the same key yields `msg`;
//! recovering with any other key fails the tag check, the way RSA recovery
//! fails padding checks under the wrong key.

use async_trait::async_trait;
use proxbox_core::{KeyCrypto, ProxboxError, PublicKey, Result};
use sha2::{Digest, Sha256};

const TAG_LEN: usize = 32;

fn keystream(key: &PublicKey, len: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(len);
    let mut counter: u64 = 0;
    while out.len() < len {
        let mut hasher = Sha256::new();
        hasher.update(key.blob());
        hasher.update(counter.to_be_bytes());
        out.extend_from_slice(&hasher.finalize());
        counter += 1;
    }
    out.truncate(len);
    out
}

fn tag(key: &PublicKey, message: &[u8]) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(key.blob());
    hasher.update(message);
    hasher.finalize().to_vec()
}

/// Sign `message` so that [`FakeKeyCrypto`] recovers it under `key`
pub fn sign(key: &PublicKey, message: &[u8]) -> Vec<u8> {
    let mut signature = tag(key, message);
    signature.extend(
        message
            .iter()
            .zip(keystream(key, message.len()))
            .map(|(m, k)| m ^ k),
    );
    signature
}

/// [`KeyCrypto`] over the fake scheme
#[derive(Debug, Clone, Copy, Default)]
pub struct FakeKeyCrypto;

#[async_trait]
impl KeyCrypto for FakeKeyCrypto {
    async fn verify_and_recover(&self, key: &PublicKey, signature: &[u8]) -> Result<Vec<u8>> {
        if signature.len() < TAG_LEN {
            return Err(ProxboxError::unauthorized("Signature too short"));
        }
        let (expected_tag, body) = signature.split_at(TAG_LEN);
        let message: Vec<u8> = body
            .iter()
            .zip(keystream(key, body.len()))
            .map(|(c, k)| c ^ k)
            .collect();
        if tag(key, &message) != expected_tag {
            return Err(ProxboxError::unauthorized(
                "Signature does not verify against the registered key",
            ));
        }
        Ok(message)
    }
}
