//! Error handling for the peerlink agent
//!
//! This module provides the error type shared by DID creation, resolution,
//! key storage and message packing.

use thiserror::Error;

/// Type alias for Results with peerlink agent errors
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for the peerlink agent
#[derive(Error, Debug)]
pub enum Error {
    /// The resolved DID document disagrees with the keys that were generated
    #[error("Peer DID construction error: {0}")]
    Construction(String),

    /// DID resolution errors
    #[error("DID resolution error: {0}")]
    DidResolution(String),

    /// Error related to invalid DID
    #[error("Invalid DID: {0}")]
    InvalidDID(String),

    /// Error for unsupported DID method
    #[error("Unsupported DID method: {0}")]
    UnsupportedDIDMethod(String),

    /// Invalid combination of sender, signer and recipient
    #[error("Invalid pack mode: {0}")]
    InvalidMode(String),

    /// Error related to cryptographic operations (decryption, verification)
    #[error("Cryptography error: {0}")]
    Cryptography(String),

    /// Key not found in the store or in a DID document
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// The packed message does not have a recognizable structure
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Error related to storage
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error when failed to acquire the key store read lock
    #[error("Failed to acquire key store read lock")]
    FailedToAcquireStoreReadLock,

    /// Error when failed to acquire the key store write lock
    #[error("Failed to acquire key store write lock")]
    FailedToAcquireStoreWriteLock,

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serde JSON error
    #[error("Serde JSON error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl Error {
    /// Returns true if the error reports a failed decryption or signature check
    pub fn is_crypto_failure(&self) -> bool {
        matches!(self, Error::Cryptography(_))
    }
}
