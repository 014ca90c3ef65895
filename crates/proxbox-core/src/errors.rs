//! Unified error type for Proxbox core operations
//!
//! Every failure leaving the core is one of these tagged values. The
//! transport layer maps them to HTTP status codes with
//! [`ProxboxError::status_code`].

use serde::{Deserialize, Serialize};

/// Error type for all Proxbox operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProxboxError {
    /// Missing or malformed input
    #[error("Invalid input: {message}")]
    Validation {
        /// Error message describing the invalid input
        message: String,
    },

    /// The submitted key is already registered
    #[error("Conflict: {message}")]
    Conflict {
        /// Error message describing the conflict
        message: String,
    },

    /// Unknown identity or missing lease
    #[error("Not found: {message}")]
    NotFound {
        /// Error message describing what was not found
        message: String,
    },

    /// Signature did not recover the expected plaintext
    #[error("Unauthorized: {message}")]
    Unauthorized {
        /// Error message describing the verification failure
        message: String,
    },

    /// Identity generator hit its retry cap
    #[error("Identity namespace exhausted after {attempts} attempts")]
    ExhaustedNamespace {
        /// Number of candidates tried
        attempts: u32,
    },

    /// No port pair fits above the highest leased port
    #[error("Port space exhausted above port {highest}")]
    PortsExhausted {
        /// Highest port currently leased
        highest: u16,
    },

    /// Key registry and rule store disagree
    #[error("Storage inconsistency: {message}")]
    StorageInconsistency {
        /// Error message describing the inconsistency
        message: String,
    },

    /// Backing file could not be read or written
    #[error("Storage error: {message}")]
    Storage {
        /// Error message describing the storage failure
        message: String,
    },

    /// Key conversion or signature verification could not run
    #[error("Crypto error: {message}")]
    Crypto {
        /// Error message describing the cryptographic failure
        message: String,
    },

    /// Invalid configuration
    #[error("Configuration error: {message}")]
    Config {
        /// Error message describing the configuration problem
        message: String,
    },
}

impl ProxboxError {
    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Create a conflict error
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    /// Create an unauthorized error
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized {
            message: message.into(),
        }
    }

    /// Create a storage inconsistency error
    pub fn inconsistency(message: impl Into<String>) -> Self {
        Self::StorageInconsistency {
            message: message.into(),
        }
    }

    /// Create a storage error
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Create a crypto error
    pub fn crypto(message: impl Into<String>) -> Self {
        Self::Crypto {
            message: message.into(),
        }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// HTTP status code the transport layer should answer with
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Validation { .. } => 400,
            Self::Unauthorized { .. } => 401,
            Self::NotFound { .. } => 404,
            Self::Conflict { .. } => 409,
            Self::ExhaustedNamespace { .. }
            | Self::PortsExhausted { .. }
            | Self::StorageInconsistency { .. }
            | Self::Storage { .. }
            | Self::Crypto { .. }
            | Self::Config { .. } => 500,
        }
    }

    /// Whether the caller caused this error (4xx class)
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.status_code())
    }
}

/// Standard Result type for Proxbox operations
pub type Result<T> = std::result::Result<T, ProxboxError>;

/// JSON body returned alongside an error status code
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Human readable error description
    pub message: String,
}

impl From<&ProxboxError> for ErrorBody {
    fn from(err: &ProxboxError) -> Self {
        Self {
            message: err.to_string(),
        }
    }
}

impl From<std::io::Error> for ProxboxError {
    fn from(err: std::io::Error) -> Self {
        Self::storage(err.to_string())
    }
}

impl From<toml::de::Error> for ProxboxError {
    fn from(err: toml::de::Error) -> Self {
        Self::storage(format!("Failed to parse rule table: {err}"))
    }
}

impl From<toml::ser::Error> for ProxboxError {
    fn from(err: toml::ser::Error) -> Self {
        Self::storage(format!("Failed to serialize rule table: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(ProxboxError::validation("x").status_code(), 400);
        assert_eq!(ProxboxError::unauthorized("x").status_code(), 401);
        assert_eq!(ProxboxError::not_found("x").status_code(), 404);
        assert_eq!(ProxboxError::conflict("x").status_code(), 409);
        assert_eq!(
            ProxboxError::ExhaustedNamespace { attempts: 3 }.status_code(),
            500
        );
        assert!(ProxboxError::conflict("x").is_client_error());
        assert!(!ProxboxError::storage("x").is_client_error());
    }

    #[test]
    fn test_error_body() {
        let err = ProxboxError::conflict("Given pubkey is already registered");
        let body = ErrorBody::from(&err);
        assert_eq!(body.message, "Conflict: Given pubkey is already registered");
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"message":"Conflict: Given pubkey is already registered"}"#
        );
    }

    #[test]
    fn test_io_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = ProxboxError::from(io_err);
        assert!(matches!(err, ProxboxError::Storage { .. }));
    }
}
