//! Error types for key operations.

use thiserror::Error;

/// Errors that can occur during key generation and validation.
#[derive(Debug, Error)]
pub enum KeyError {
    /// The system CSPRNG failed to produce key material.
    #[error("key generation failed: {0}")]
    Generation(String),

    /// A private key was malformed (bad base64 or wrong length).
    #[error("invalid private key: {0}")]
    InvalidPrivateKey(String),

    /// A public key was malformed (bad base64 or wrong length).
    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),
}

/// Result type alias for key operations.
pub type Result<T> = std::result::Result<T, KeyError>;
