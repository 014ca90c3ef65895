//! Signature verification capability
//!
//! The core never parses RSA keys or checks signatures itself. It hands the
//! registered key and the submitted signature to a [`KeyCrypto`]
//! implementation and compares the recovered plaintext with the identity.

use crate::errors::{ProxboxError, Result};
use crate::keys::PublicKey;
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

/// Recovers the plaintext a signature was made over
#[async_trait]
pub trait KeyCrypto: Send + Sync {
    /// Verify `signature` against `key` and return the signed plaintext
    ///
    /// A signature that does not verify under `key` is `Unauthorized`.
    /// Failing to run the verification at all is `Crypto`.
    async fn verify_and_recover(&self, key: &PublicKey, signature: &[u8]) -> Result<Vec<u8>>;
}

/// [`KeyCrypto`] backed by the `ssh-keygen` and `openssl` command line tools
///
/// The SSH key is converted to PKCS8 with `ssh-keygen -e -m PKCS8`, then
/// `openssl rsautl -verify -pubin` recovers the plaintext from a raw RSA
/// signature, matching what clients produce with `openssl rsautl -sign`.
#[derive(Debug, Clone)]
pub struct OpensslKeyCrypto {
    ssh_keygen: String,
    openssl: String,
}

impl OpensslKeyCrypto {
    /// Use `ssh-keygen` and `openssl` from `PATH`
    pub fn new() -> Self {
        Self::with_programs("ssh-keygen", "openssl")
    }

    /// Use explicit program paths
    pub fn with_programs(ssh_keygen: impl Into<String>, openssl: impl Into<String>) -> Self {
        Self {
            ssh_keygen: ssh_keygen.into(),
            openssl: openssl.into(),
        }
    }

    /// Convert an OpenSSH public key file to PKCS8 PEM
    async fn to_pkcs8(&self, key_path: &Path) -> Result<Vec<u8>> {
        let output = Command::new(&self.ssh_keygen)
            .arg("-f")
            .arg(key_path)
            .args(["-e", "-m", "PKCS8"])
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProxboxError::crypto(format!("Failed to run {}: {e}", self.ssh_keygen)))?;

        if !output.status.success() {
            return Err(ProxboxError::crypto(format!(
                "Key conversion failed: {}",
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }
        Ok(output.stdout)
    }
}

impl Default for OpensslKeyCrypto {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyCrypto for OpensslKeyCrypto {
    async fn verify_and_recover(&self, key: &PublicKey, signature: &[u8]) -> Result<Vec<u8>> {
        let work_dir = tempfile::tempdir()
            .map_err(|e| ProxboxError::crypto(format!("Failed to create work directory: {e}")))?;
        let ssh_path = work_dir.path().join("key.pub");
        let pem_path = work_dir.path().join("key.pem");

        tokio::fs::write(&ssh_path, format!("{key}\n")).await?;
        let pem = self.to_pkcs8(&ssh_path).await?;
        tokio::fs::write(&pem_path, pem).await?;

        let mut child = Command::new(&self.openssl)
            .args(["rsautl", "-verify", "-pubin", "-inkey"])
            .arg(&pem_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ProxboxError::crypto(format!("Failed to run {}: {e}", self.openssl)))?;

        if let Some(mut stdin) = child.stdin.take() {
            // openssl may exit before reading a signature it cannot parse.
            if let Err(e) = stdin.write_all(signature).await {
                if e.kind() != std::io::ErrorKind::BrokenPipe {
                    return Err(ProxboxError::crypto(format!("Failed to pass signature: {e}")));
                }
            }
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| ProxboxError::crypto(format!("Verification did not finish: {e}")))?;

        if !output.status.success() {
            debug!(
                stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                "openssl rejected signature"
            );
            return Err(ProxboxError::unauthorized(
                "Signature does not verify against the registered key",
            ));
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    fn key() -> PublicKey {
        let mut blob = 7u32.to_be_bytes().to_vec();
        blob.extend_from_slice(b"ssh-rsa");
        blob.extend_from_slice(&[0, 0, 0, 1, 3]);
        PublicKey::parse(&format!("ssh-rsa {}", STANDARD.encode(blob))).unwrap()
    }

    #[tokio::test]
    async fn test_missing_program_is_crypto_error() {
        let crypto = OpensslKeyCrypto::with_programs(
            "/nonexistent/ssh-keygen-for-tests",
            "/nonexistent/openssl-for-tests",
        );
        let err = crypto.verify_and_recover(&key(), b"sig").await.unwrap_err();
        assert!(matches!(err, ProxboxError::Crypto { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_failed_conversion_is_crypto_error() {
        // `false` exits non-zero without output.
        let crypto = OpensslKeyCrypto::with_programs("false", "false");
        let err = crypto.verify_and_recover(&key(), b"sig").await.unwrap_err();
        assert!(matches!(err, ProxboxError::Crypto { .. }), "{err:?}");
    }

    #[tokio::test]
    async fn test_rejected_signature_is_unauthorized() {
        // `true` converts "successfully", `false` rejects every signature.
        let crypto = OpensslKeyCrypto::with_programs("true", "false");
        let err = crypto.verify_and_recover(&key(), b"sig").await.unwrap_err();
        assert!(matches!(err, ProxboxError::Unauthorized { .. }), "{err:?}");
    }
}
