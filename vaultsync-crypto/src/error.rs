//! Error types for the encryption layer.

use thiserror::Error;

/// Result type for crypto operations.
pub type CryptoResult<T> = Result<T, CryptoError>;

/// Errors that can occur in cryptographic operations.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Key derivation failed.
    #[error("key derivation failed: {0}")]
    KeyDerivation(String),

    /// Encryption failed.
    #[error("encryption failed: {0}")]
    Encryption(String),

    /// Decryption failed: wrong passphrase or tampered payload.
    /// Deliberately distinct from any "not found" condition: callers
    /// react by prompting for the passphrase, not by skipping.
    #[error("decryption failed: {0}")]
    Decryption(String),

    /// Payload is structurally invalid (truncated, bad encoding).
    #[error("invalid payload: {0}")]
    InvalidPayload(String),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
