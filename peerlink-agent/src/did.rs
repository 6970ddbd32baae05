//! DID document model and resolution for the peerlink agent.
//!
//! This module defines the key types used by peer DIDs, the resolved DID
//! document shape, and a multi-resolver that dispatches to DID method
//! resolvers. The peer method itself lives in [`crate::peer_did`].

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt::Debug;
use std::str::FromStr;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};
use crate::peer_did::PeerResolver;

/// Multicodec prefix for Ed25519 public keys
pub const ED25519_MULTICODEC: [u8; 2] = [0xed, 0x01];
/// Multicodec prefix for X25519 public keys
pub const X25519_MULTICODEC: [u8; 2] = [0xec, 0x01];

/// Role a key plays in a DID document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum KeyKind {
    /// Listed under `authentication`, used to sign
    Signing,
    /// Listed under `keyAgreement`, used to derive encryption keys
    Agreement,
}

/// Supported key types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyType {
    /// Ed25519 signing key
    Ed25519,
    /// X25519 key agreement key
    X25519,
}

impl KeyType {
    /// The role this key type plays in a peer DID document
    pub fn kind(&self) -> KeyKind {
        match self {
            KeyType::Ed25519 => KeyKind::Signing,
            KeyType::X25519 => KeyKind::Agreement,
        }
    }

    /// The multicodec prefix placed before the raw key bytes
    pub fn multicodec_prefix(&self) -> [u8; 2] {
        match self {
            KeyType::Ed25519 => ED25519_MULTICODEC,
            KeyType::X25519 => X25519_MULTICODEC,
        }
    }

    /// Finds the key type for a multicodec-prefixed byte string
    pub fn from_multicodec(bytes: &[u8]) -> Option<Self> {
        match bytes.get(..2) {
            Some(prefix) if prefix == ED25519_MULTICODEC => Some(KeyType::Ed25519),
            Some(prefix) if prefix == X25519_MULTICODEC => Some(KeyType::X25519),
            _ => None,
        }
    }

    /// The JWK `crv` value
    pub fn jwk_curve(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "Ed25519",
            KeyType::X25519 => "X25519",
        }
    }

    /// Parses a JWK `crv` value
    pub fn from_jwk_curve(crv: &str) -> Option<Self> {
        match crv {
            "Ed25519" => Some(KeyType::Ed25519),
            "X25519" => Some(KeyType::X25519),
            _ => None,
        }
    }

    /// Verification method type used by the multibase document format
    pub fn multibase_method_type(&self) -> VerificationMethodType {
        match self {
            KeyType::Ed25519 => VerificationMethodType::Ed25519VerificationKey2020,
            KeyType::X25519 => VerificationMethodType::X25519KeyAgreementKey2020,
        }
    }
}

/// The encoding of public key material in a resolved DID document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VerificationMaterialFormat {
    /// `publicKeyJwk` entries of type `JsonWebKey2020`
    #[default]
    Jwk,
    /// `publicKeyMultibase` entries
    Multibase,
}

impl FromStr for VerificationMaterialFormat {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "jwk" => Ok(Self::Jwk),
            "multibase" => Ok(Self::Multibase),
            _ => Err(Error::Validation(format!(
                "Unknown DID document format: {}. Use 'jwk' or 'multibase'",
                s
            ))),
        }
    }
}

/// Verification method types emitted by the resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VerificationMethodType {
    JsonWebKey2020,
    Ed25519VerificationKey2020,
    X25519KeyAgreementKey2020,
}

/// Public key material of a verification method
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum VerificationMaterial {
    /// JSON Web Key
    JWK {
        #[serde(rename = "publicKeyJwk")]
        public_key_jwk: Value,
    },
    /// Multibase encoded multicodec key
    Multibase {
        #[serde(rename = "publicKeyMultibase")]
        public_key_multibase: String,
    },
}

/// A verification method embedded in a DID document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationMethod {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: VerificationMethodType,
    pub controller: String,
    #[serde(flatten)]
    pub verification_material: VerificationMaterial,
}

impl VerificationMethod {
    /// Decodes the raw public key bytes and their type
    pub fn public_key(&self) -> Result<(KeyType, Vec<u8>)> {
        match &self.verification_material {
            VerificationMaterial::JWK { public_key_jwk } => {
                let kty = public_key_jwk.get("kty").and_then(Value::as_str);
                let crv = public_key_jwk.get("crv").and_then(Value::as_str);
                let key_type = match (kty, crv.and_then(KeyType::from_jwk_curve)) {
                    (Some("OKP"), Some(key_type)) => key_type,
                    _ => {
                        return Err(Error::DidResolution(format!(
                            "Unsupported JWK in {}: kty={:?}, crv={:?}",
                            self.id, kty, crv
                        )))
                    }
                };
                let x = public_key_jwk
                    .get("x")
                    .and_then(Value::as_str)
                    .ok_or_else(|| {
                        Error::DidResolution(format!("Missing x coordinate in {}", self.id))
                    })?;
                let bytes = URL_SAFE_NO_PAD.decode(x).map_err(|e| {
                    Error::DidResolution(format!("Invalid x coordinate in {}: {}", self.id, e))
                })?;
                Ok((key_type, bytes))
            }
            VerificationMaterial::Multibase {
                public_key_multibase,
            } => {
                let (_, bytes) = multibase::decode(public_key_multibase).map_err(|e| {
                    Error::DidResolution(format!("Invalid multibase key in {}: {}", self.id, e))
                })?;
                let key_type = KeyType::from_multicodec(&bytes).ok_or_else(|| {
                    Error::DidResolution(format!("Unknown multicodec prefix in {}", self.id))
                })?;
                Ok((key_type, bytes[2..].to_vec()))
            }
        }
    }
}

/// The `DIDCommMessaging` service type tag
pub const DIDCOMM_MESSAGING: &str = "DIDCommMessaging";

/// A service entry of a resolved DID document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub id: String,
    #[serde(rename = "type")]
    pub type_: String,
    pub service_endpoint: String,
    #[serde(default)]
    pub accept: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_keys: Option<Vec<String>>,
}

/// A resolved DID document.
///
/// Verification methods are embedded in the relationship lists, in the
/// order the DID encodes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DIDDoc {
    pub id: String,
    #[serde(default)]
    pub authentication: Vec<VerificationMethod>,
    #[serde(default)]
    pub key_agreement: Vec<VerificationMethod>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub service: Vec<Service>,
}

impl DIDDoc {
    /// Authentication method identifiers in document order
    pub fn authentication_ids(&self) -> Vec<String> {
        self.authentication.iter().map(|m| m.id.clone()).collect()
    }

    /// Key agreement method identifiers in document order
    pub fn key_agreement_ids(&self) -> Vec<String> {
        self.key_agreement.iter().map(|m| m.id.clone()).collect()
    }

    /// Looks up an authentication method by identifier
    pub fn find_authentication(&self, kid: &str) -> Option<&VerificationMethod> {
        self.authentication.iter().find(|m| m.id == kid)
    }

    /// Looks up a key agreement method by identifier
    pub fn find_key_agreement(&self, kid: &str) -> Option<&VerificationMethod> {
        self.key_agreement.iter().find(|m| m.id == kid)
    }

    /// The first DIDComm messaging service, if any
    pub fn didcomm_service(&self) -> Option<&Service> {
        self.service.iter().find(|s| s.type_ == DIDCOMM_MESSAGING)
    }
}

/// Splits a DID URL into its DID and the full key identifier, if a fragment is present.
pub fn split_did_url(did_url: &str) -> (&str, Option<&str>) {
    match did_url.split_once('#') {
        Some((did, _)) => (did, Some(did_url)),
        None => (did_url, None),
    }
}

/// A trait for resolving DIDs to DID documents.
#[async_trait]
pub trait DIDResolver: Send + Sync + Debug {
    /// Resolve a DID to a DID document with the requested material format.
    async fn resolve(&self, did: &str, format: VerificationMaterialFormat) -> Result<DIDDoc>;
}

/// A resolver for a specific DID method.
#[async_trait]
pub trait DIDMethodResolver: Send + Sync + Debug {
    /// Returns the method name this resolver handles (e.g., "peer").
    fn method(&self) -> &str;

    /// Resolve a DID of this method to a DID document.
    async fn resolve_method(&self, did: &str, format: VerificationMaterialFormat)
        -> Result<DIDDoc>;
}

/// A multi-resolver that aggregates multiple DID method resolvers.
#[derive(Debug)]
pub struct MultiResolver {
    resolvers: RwLock<HashMap<String, Arc<dyn DIDMethodResolver>>>,
}

impl Default for MultiResolver {
    fn default() -> Self {
        let resolver = Self::new();
        resolver.add_resolver(Arc::new(PeerResolver));
        resolver
    }
}

impl MultiResolver {
    /// Creates a new empty multi-resolver.
    pub fn new() -> Self {
        Self {
            resolvers: RwLock::new(HashMap::new()),
        }
    }

    /// Adds a DID method resolver, replacing any resolver for the same method.
    pub fn add_resolver(&self, resolver: Arc<dyn DIDMethodResolver>) {
        if let Ok(mut resolvers) = self.resolvers.write() {
            resolvers.insert(resolver.method().to_string(), resolver);
        }
    }

    /// Checks if a DID method is supported.
    pub fn supports_method(&self, method: &str) -> bool {
        self.resolvers
            .read()
            .map(|resolvers| resolvers.contains_key(method))
            .unwrap_or(false)
    }
}

#[async_trait]
impl DIDResolver for MultiResolver {
    async fn resolve(&self, did: &str, format: VerificationMaterialFormat) -> Result<DIDDoc> {
        let mut parts = did.splitn(3, ':');
        let method = match (parts.next(), parts.next(), parts.next()) {
            (Some("did"), Some(method), Some(_)) => method,
            _ => return Err(Error::InvalidDID(did.to_string())),
        };

        let resolver = self
            .resolvers
            .read()
            .map_err(|_| Error::DidResolution("Resolver registry lock poisoned".to_string()))?
            .get(method)
            .cloned();

        match resolver {
            Some(resolver) => resolver.resolve_method(did, format).await,
            None => Err(Error::UnsupportedDIDMethod(method.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_did_url() {
        assert_eq!(split_did_url("did:peer:2.Ez6LS"), ("did:peer:2.Ez6LS", None));
        assert_eq!(
            split_did_url("did:peer:2.Ez6LS#6LS"),
            ("did:peer:2.Ez6LS", Some("did:peer:2.Ez6LS#6LS"))
        );
    }

    #[test]
    fn test_format_from_str() {
        assert_eq!(
            "JWK".parse::<VerificationMaterialFormat>().unwrap(),
            VerificationMaterialFormat::Jwk
        );
        assert_eq!(
            "multibase".parse::<VerificationMaterialFormat>().unwrap(),
            VerificationMaterialFormat::Multibase
        );
        assert!("base58".parse::<VerificationMaterialFormat>().is_err());
    }

    #[test]
    fn test_key_type_multicodec() {
        assert_eq!(
            KeyType::from_multicodec(&[0xed, 0x01, 0x00]),
            Some(KeyType::Ed25519)
        );
        assert_eq!(KeyType::from_multicodec(&[0xec, 0x01]), Some(KeyType::X25519));
        assert_eq!(KeyType::from_multicodec(&[0xe7, 0x01]), None);
        assert_eq!(KeyType::from_multicodec(&[0xed]), None);
    }

    #[tokio::test]
    async fn test_multi_resolver_rejects_unknown_method() {
        let resolver = MultiResolver::default();
        assert!(resolver.supports_method("peer"));

        let result = resolver
            .resolve("did:example:123", VerificationMaterialFormat::Jwk)
            .await;
        assert!(matches!(result, Err(Error::UnsupportedDIDMethod(m)) if m == "example"));

        let result = resolver
            .resolve("not-a-did", VerificationMaterialFormat::Jwk)
            .await;
        assert!(matches!(result, Err(Error::InvalidDID(_))));
    }
}
