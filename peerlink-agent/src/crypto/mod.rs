//! Cryptographic building blocks of the envelope layer
//!
//! - Concat KDF over SHA-256 for ECDH-ES and ECDH-1PU
//! - AES-256 Key Wrap of content encryption keys
//! - JWE encryption and decryption for X25519 recipients

mod kdf;
mod key_wrap;

pub mod jwe;
