//! Reproducible OpenSSH public keys

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use proxbox_core::PublicKey;
use rand::{RngCore, SeedableRng};
use rand_chacha::ChaCha8Rng;

const KEY_TYPE: &str = "ssh-rsa";

/// `ssh-rsa` key text whose material is derived from `seed`
pub fn test_key_text(seed: u64) -> String {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let mut modulus = [0u8; 64];
    rng.fill_bytes(&mut modulus);

    let mut blob = Vec::new();
    for field in [KEY_TYPE.as_bytes(), &[0x01, 0x00, 0x01], &modulus] {
        blob.extend_from_slice(&(field.len() as u32).to_be_bytes());
        blob.extend_from_slice(field);
    }
    format!("{KEY_TYPE} {} cluster-{seed}@test", STANDARD.encode(blob))
}

/// Parsed key whose material is derived from `seed`
#[allow(clippy::expect_used)]
pub fn test_key(seed: u64) -> PublicKey {
    PublicKey::parse(&test_key_text(seed)).expect("generated key text is well formed")
}
