//! Agent key abstraction for the peerlink agent
//!
//! These traits separate what the envelope code needs from a key (sign,
//! verify, agree on a shared secret) from where the key material lives.
//! [`crate::local_agent_key`] implements them for keys held in the
//! in-memory store and for public keys taken from resolved DID documents.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;

use crate::did::KeyType;
use crate::error::{Error, Result};
use crate::message::{Jws, JwsProtected};

/// Core properties of a key held by the agent
pub trait AgentKey: Send + Sync + Debug {
    /// Returns the verification method identifier of this key
    fn key_id(&self) -> &str;

    /// Returns the DID the key belongs to
    fn did(&self) -> &str;

    /// Returns the key type
    fn key_type(&self) -> KeyType;

    /// Exports the public key material as a JWK
    fn public_key_jwk(&self) -> Value;
}

/// JWS algorithm identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JwsAlgorithm {
    /// Ed25519 signatures
    EdDSA,
}

impl JwsAlgorithm {
    /// Returns the algorithm identifier as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            JwsAlgorithm::EdDSA => "EdDSA",
        }
    }
}

/// JWE key management algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JweAlgorithm {
    /// Anonymous sender, ephemeral-static ECDH with AES-256 key wrap
    EcdhEsA256kw,
    /// Authenticated sender, one-pass unified model ECDH with AES-256 key wrap
    Ecdh1puA256kw,
}

impl JweAlgorithm {
    /// Returns the algorithm identifier as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            JweAlgorithm::EcdhEsA256kw => "ECDH-ES+A256KW",
            JweAlgorithm::Ecdh1puA256kw => "ECDH-1PU+A256KW",
        }
    }

    /// Parses an `alg` header value
    pub fn from_header(alg: &str) -> Option<Self> {
        match alg {
            "ECDH-ES+A256KW" => Some(JweAlgorithm::EcdhEsA256kw),
            "ECDH-1PU+A256KW" => Some(JweAlgorithm::Ecdh1puA256kw),
            _ => None,
        }
    }
}

/// JWE content encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JweEncryption {
    /// AES-GCM with a 256-bit key
    A256GCM,
}

impl JweEncryption {
    /// Returns the algorithm identifier as a string
    pub fn as_str(&self) -> &'static str {
        match self {
            JweEncryption::A256GCM => "A256GCM",
        }
    }
}

/// A key that can produce JWS signatures.
#[async_trait]
pub trait SigningKey: AgentKey {
    /// Signs the provided data
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;

    /// Returns the JWS algorithm for this key
    fn recommended_jws_alg(&self) -> JwsAlgorithm;

    /// Signs the payload and wraps it in a single-signature JWS
    async fn create_jws(&self, payload: &[u8]) -> Result<Jws>;
}

/// A public key that can check JWS signatures.
#[async_trait]
pub trait VerificationKey: Send + Sync + Debug {
    /// The key ID associated with this verification key
    fn key_id(&self) -> &str;

    /// Verifies a signature over the signing input
    async fn verify_signature(
        &self,
        signing_input: &[u8],
        signature: &[u8],
        protected_header: &JwsProtected,
    ) -> Result<bool>;

    /// Verifies the JWS signature made by this key and returns the payload
    async fn verify_jws(&self, jws: &Jws) -> Result<Vec<u8>>;
}

/// A private key that can take part in an X25519 key agreement.
#[async_trait]
pub trait KeyAgreementKey: AgentKey {
    /// Computes the shared secret with a peer's public key
    async fn diffie_hellman(&self, peer_public_key: &[u8; 32]) -> Result<[u8; 32]>;
}

/// Error type specific to agent key operations
#[derive(Debug, thiserror::Error)]
pub enum AgentKeyError {
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("Wrong key type for {kid}: expected {expected:?}, found {found:?}")]
    WrongKeyType {
        kid: String,
        expected: KeyType,
        found: KeyType,
    },

    #[error("Invalid format: {0}")]
    InvalidFormat(String),
}

impl From<AgentKeyError> for Error {
    fn from(err: AgentKeyError) -> Self {
        Error::Cryptography(err.to_string())
    }
}
