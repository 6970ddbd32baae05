//! peerlink agent
//!
//! This crate creates peer DIDs (`did:peer:0` and `did:peer:2`), resolves
//! them into DID documents, keeps their private keys in a key store, and
//! packs and unpacks encrypted, optionally signed, messages between them.

/// Agent implementation
pub mod agent;

/// Key abstractions
pub mod agent_key;

/// Peer DID creation
pub mod builder;

/// Agent configuration
pub mod config;

/// Cryptographic utilities
pub mod crypto;

/// DID utilities
pub mod did;

/// Error types
pub mod error;

/// Key storage
pub mod key_store;

/// Local and public key implementations
pub mod local_agent_key;

/// Message types
pub mod message;

/// Message packing and unpacking
pub mod message_packing;

/// The did:peer method
pub mod peer_did;

// Re-export key types for convenience
pub use agent::PeerAgent;
pub use builder::{PeerDIDBuilder, PeerDIDForm};
pub use config::AgentConfig;
pub use did::{
    DIDDoc, DIDMethodResolver, DIDResolver, KeyKind, KeyType, MultiResolver,
    VerificationMaterialFormat,
};
pub use error::{Error, Result};
pub use key_store::{GeneratedKey, KeyMaterialStore, KeyPairRecord};
pub use message::{Envelope, PlainMessage};
pub use message_packing::{
    EnvelopeComposer, PackOptions, PackResult, UnpackMetadata, UnpackResult,
};
pub use peer_did::{is_peer_did, resolve_peer_did, PeerResolver};

/// Version of the peerlink agent
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
