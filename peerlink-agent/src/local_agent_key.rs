//! Local agent key implementations
//!
//! [`LocalAgentKey`] wraps a [`KeyPairRecord`] from the key store and
//! provides signing or key agreement depending on its type.
//! [`PublicVerificationKey`] and [`PublicAgreementKey`] wrap public keys
//! taken from resolved DID documents.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signer, Verifier};
use serde_json::Value;

use crate::agent_key::{
    AgentKey, AgentKeyError, JwsAlgorithm, KeyAgreementKey, SigningKey, VerificationKey,
};
use crate::did::{split_did_url, KeyType, VerificationMethod};
use crate::error::{Error, Result};
use crate::key_store::KeyPairRecord;
use crate::message::{Jws, JwsHeader, JwsProtected, JwsSignature, DIDCOMM_SIGNED};

fn okp_jwk(key_type: KeyType, public_key: &[u8]) -> Value {
    serde_json::json!({
        "kty": "OKP",
        "crv": key_type.jwk_curve(),
        "x": URL_SAFE_NO_PAD.encode(public_key),
    })
}

fn expect_key_type(kid: &str, expected: KeyType, found: KeyType) -> Result<()> {
    if expected == found {
        Ok(())
    } else {
        Err(AgentKeyError::WrongKeyType {
            kid: kid.to_string(),
            expected,
            found,
        }
        .into())
    }
}

/// A key whose private material is held by the agent
#[derive(Debug, Clone)]
pub struct LocalAgentKey {
    did: String,
    record: KeyPairRecord,
}

impl LocalAgentKey {
    /// Wraps a stored key pair
    pub fn new(record: KeyPairRecord) -> Self {
        let did = split_did_url(record.id()).0.to_string();
        Self { did, record }
    }

    /// Wraps a stored Ed25519 key pair for signing
    pub fn signing(record: KeyPairRecord) -> Result<Self> {
        expect_key_type(record.id(), KeyType::Ed25519, record.key_type())?;
        Ok(Self::new(record))
    }

    /// Wraps a stored X25519 key pair for key agreement
    pub fn agreement(record: KeyPairRecord) -> Result<Self> {
        expect_key_type(record.id(), KeyType::X25519, record.key_type())?;
        Ok(Self::new(record))
    }

    /// The public half of this key
    pub fn public_agreement_key(&self) -> PublicAgreementKey {
        PublicAgreementKey {
            kid: self.record.id().to_string(),
            public_key: *self.record.public_key(),
        }
    }
}

impl AgentKey for LocalAgentKey {
    fn key_id(&self) -> &str {
        self.record.id()
    }

    fn did(&self) -> &str {
        &self.did
    }

    fn key_type(&self) -> KeyType {
        self.record.key_type()
    }

    fn public_key_jwk(&self) -> Value {
        okp_jwk(self.record.key_type(), self.record.public_key())
    }
}

#[async_trait]
impl SigningKey for LocalAgentKey {
    async fn sign(&self, data: &[u8]) -> Result<Vec<u8>> {
        expect_key_type(self.key_id(), KeyType::Ed25519, self.key_type())?;
        let signing_key = ed25519_dalek::SigningKey::from_bytes(self.record.private_key());
        Ok(signing_key.sign(data).to_bytes().to_vec())
    }

    fn recommended_jws_alg(&self) -> JwsAlgorithm {
        JwsAlgorithm::EdDSA
    }

    async fn create_jws(&self, payload: &[u8]) -> Result<Jws> {
        let protected = JwsProtected {
            typ: DIDCOMM_SIGNED.to_string(),
            alg: self.recommended_jws_alg().as_str().to_string(),
        };
        let protected_json = serde_json::to_string(&protected).map_err(|e| {
            Error::Serialization(format!("Failed to serialize protected header: {}", e))
        })?;

        let protected_b64 = URL_SAFE_NO_PAD.encode(protected_json);
        let payload_b64 = URL_SAFE_NO_PAD.encode(payload);

        let signing_input = format!("{}.{}", protected_b64, payload_b64);
        let signature = self.sign(signing_input.as_bytes()).await?;

        Ok(Jws {
            payload: payload_b64,
            signatures: vec![JwsSignature {
                protected: protected_b64,
                signature: URL_SAFE_NO_PAD.encode(signature),
                header: JwsHeader {
                    kid: self.key_id().to_string(),
                },
            }],
        })
    }
}

#[async_trait]
impl KeyAgreementKey for LocalAgentKey {
    async fn diffie_hellman(&self, peer_public_key: &[u8; 32]) -> Result<[u8; 32]> {
        expect_key_type(self.key_id(), KeyType::X25519, self.key_type())?;
        let secret = x25519_dalek::StaticSecret::from(*self.record.private_key());
        let shared = secret.diffie_hellman(&x25519_dalek::PublicKey::from(*peer_public_key));
        if !shared.was_contributory() {
            return Err(AgentKeyError::InvalidKey(
                "Key agreement produced a low order shared secret".to_string(),
            )
            .into());
        }
        Ok(shared.to_bytes())
    }
}

fn method_public_key(method: &VerificationMethod, expected: KeyType) -> Result<[u8; 32]> {
    let (key_type, bytes) = method.public_key()?;
    expect_key_type(&method.id, expected, key_type)?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        AgentKeyError::InvalidKey(format!(
            "Invalid public key length {} for {}",
            bytes.len(),
            method.id
        ))
        .into()
    })
}

/// An Ed25519 public key from a DID document's authentication section
#[derive(Debug, Clone)]
pub struct PublicVerificationKey {
    kid: String,
    verifying_key: ed25519_dalek::VerifyingKey,
}

impl PublicVerificationKey {
    /// Extracts the key from a verification method
    pub fn from_verification_method(method: &VerificationMethod) -> Result<Self> {
        let bytes = method_public_key(method, KeyType::Ed25519)?;
        let verifying_key = ed25519_dalek::VerifyingKey::from_bytes(&bytes).map_err(|e| {
            AgentKeyError::InvalidKey(format!("Invalid Ed25519 key {}: {}", method.id, e))
        })?;
        Ok(Self {
            kid: method.id.clone(),
            verifying_key,
        })
    }
}

#[async_trait]
impl VerificationKey for PublicVerificationKey {
    fn key_id(&self) -> &str {
        &self.kid
    }

    async fn verify_signature(
        &self,
        signing_input: &[u8],
        signature: &[u8],
        protected_header: &JwsProtected,
    ) -> Result<bool> {
        if protected_header.alg != JwsAlgorithm::EdDSA.as_str() {
            return Err(AgentKeyError::UnsupportedAlgorithm(protected_header.alg.clone()).into());
        }
        let signature: [u8; 64] = match signature.try_into() {
            Ok(signature) => signature,
            Err(_) => return Ok(false),
        };
        let signature = ed25519_dalek::Signature::from_bytes(&signature);
        Ok(self.verifying_key.verify(signing_input, &signature).is_ok())
    }

    async fn verify_jws(&self, jws: &Jws) -> Result<Vec<u8>> {
        let signature = jws
            .signatures
            .iter()
            .find(|s| s.header.kid == self.kid)
            .ok_or_else(|| {
                Error::Cryptography(format!("No signature found with kid: {}", self.kid))
            })?;

        let protected_bytes = URL_SAFE_NO_PAD.decode(&signature.protected).map_err(|e| {
            AgentKeyError::InvalidFormat(format!("Failed to decode protected header: {}", e))
        })?;
        let protected: JwsProtected = serde_json::from_slice(&protected_bytes).map_err(|e| {
            AgentKeyError::InvalidFormat(format!("Failed to parse protected header: {}", e))
        })?;
        let signature_bytes = URL_SAFE_NO_PAD.decode(&signature.signature).map_err(|e| {
            AgentKeyError::InvalidFormat(format!("Failed to decode signature: {}", e))
        })?;

        let signing_input = format!("{}.{}", signature.protected, jws.payload);
        if !self
            .verify_signature(signing_input.as_bytes(), &signature_bytes, &protected)
            .await?
        {
            return Err(Error::Cryptography(
                "Signature verification failed".to_string(),
            ));
        }

        URL_SAFE_NO_PAD
            .decode(&jws.payload)
            .map_err(|e| Error::Cryptography(format!("Failed to decode payload: {}", e)))
    }
}

/// An X25519 public key from a DID document's keyAgreement section
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicAgreementKey {
    kid: String,
    public_key: [u8; 32],
}

impl PublicAgreementKey {
    /// Extracts the key from a verification method
    pub fn from_verification_method(method: &VerificationMethod) -> Result<Self> {
        Ok(Self {
            kid: method.id.clone(),
            public_key: method_public_key(method, KeyType::X25519)?,
        })
    }

    /// The verification method identifier
    pub fn key_id(&self) -> &str {
        &self.kid
    }

    /// The raw public key
    pub fn public_key(&self) -> &[u8; 32] {
        &self.public_key
    }
}
