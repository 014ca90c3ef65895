//! HTTP contract shapes
//!
//! The transport layer owns routing and status codes; these are the request
//! forms it decodes and the checks every handler needs before calling into
//! the core.
//!
//! - `POST /cluster/` with form field `pubkey` answers a [`PortLease`]
//! - `POST /cluster/{identity}` with form field `signature` answers a [`PortLease`]
//!
//! Errors answer [`crate::ErrorBody`] with [`crate::ProxboxError::status_code`].
//!
//! [`PortLease`]: crate::PortLease

use crate::errors::{ProxboxError, Result};
use crate::keys::PublicKey;
use serde::{Deserialize, Serialize};

/// Form body of `POST /cluster/`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Public key text, `<key-type> <base64> [comment]`
    pub pubkey: Option<String>,
}

impl RegisterRequest {
    /// The submitted key, parsed
    pub fn public_key(&self) -> Result<PublicKey> {
        match self.pubkey.as_deref().map(str::trim) {
            Some(text) if !text.is_empty() => PublicKey::parse(text),
            _ => Err(ProxboxError::validation("Missing pubkey parameter")),
        }
    }
}

/// Form body of `POST /cluster/{identity}`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    /// Signature over the identity string
    pub signature: Option<String>,
}

impl AuthenticateRequest {
    /// The submitted signature bytes
    pub fn signature(&self) -> Result<&[u8]> {
        match self.signature.as_deref() {
            Some(sig) if !sig.is_empty() => Ok(sig.as_bytes()),
            _ => Err(ProxboxError::validation("Missing signature parameter")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_pubkey_is_validation_error() {
        for req in [
            RegisterRequest::default(),
            RegisterRequest {
                pubkey: Some("  ".to_string()),
            },
        ] {
            let err = req.public_key().unwrap_err();
            assert_eq!(err.status_code(), 400);
        }
    }

    #[test]
    fn test_garbage_pubkey_is_validation_error() {
        let req = RegisterRequest {
            pubkey: Some("definitely not a key".to_string()),
        };
        assert_eq!(req.public_key().unwrap_err().status_code(), 400);
    }

    #[test]
    fn test_signature_required() {
        assert!(AuthenticateRequest::default().signature().is_err());
        let req = AuthenticateRequest {
            signature: Some("abc".to_string()),
        };
        assert_eq!(req.signature().unwrap(), b"abc");
    }
}
