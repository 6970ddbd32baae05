//! The `did:peer` method, numalgo 0 and numalgo 2.
//!
//! A peer DID is a pure function of its public keys and optional service,
//! so it can be resolved without any registry:
//!
//! - numalgo 0 (`did:peer:0z6Mk...`) encodes a single Ed25519 inception key.
//! - numalgo 2 (`did:peer:2.Ez6LS....Vz6Mk....S...`) encodes key agreement
//!   keys (`E`), authentication keys (`V`) and a service block (`S`).

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde_json::{Map, Value};
use tracing::debug;

use crate::did::{
    DIDDoc, DIDMethodResolver, KeyType, Service, VerificationMaterial,
    VerificationMaterialFormat, VerificationMethod, VerificationMethodType, DIDCOMM_MESSAGING,
};
use crate::error::{Error, Result};

/// Prefix shared by all peer DIDs
pub const PEER_DID_PREFIX: &str = "did:peer:";
/// Prefix of short form (numalgo 0) peer DIDs
pub const NUMALGO_0_PREFIX: &str = "did:peer:0";
/// Prefix of long form (numalgo 2) peer DIDs
pub const NUMALGO_2_PREFIX: &str = "did:peer:2";

/// The only accepted DIDComm profile
pub const DIDCOMM_V2_PROFILE: &str = "didcomm/v2";

const ED25519_KEY_LEN: usize = 32;

/// A public key in the multibase form used inside peer DIDs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodedKey {
    key_type: KeyType,
    value: String,
}

impl EncodedKey {
    /// Encodes raw public key bytes as base58btc multibase with a multicodec prefix
    pub fn from_public_key(key_type: KeyType, public_key: &[u8]) -> Self {
        let mut prefixed = key_type.multicodec_prefix().to_vec();
        prefixed.extend_from_slice(public_key);
        Self {
            key_type,
            value: multibase::encode(multibase::Base::Base58Btc, prefixed),
        }
    }

    /// Parses a multibase value, checking the multicodec prefix and key length
    pub fn parse(value: &str) -> Result<Self> {
        let (base, bytes) = multibase::decode(value)
            .map_err(|e| Error::InvalidDID(format!("Invalid multibase key '{}': {}", value, e)))?;
        if base != multibase::Base::Base58Btc {
            return Err(Error::InvalidDID(format!(
                "Peer DID keys must be base58btc encoded: {}",
                value
            )));
        }
        let key_type = KeyType::from_multicodec(&bytes).ok_or_else(|| {
            Error::InvalidDID(format!("Unsupported multicodec prefix in key '{}'", value))
        })?;
        if bytes.len() != 2 + ED25519_KEY_LEN {
            return Err(Error::InvalidDID(format!(
                "Invalid key length {} in '{}'",
                bytes.len() - 2,
                value
            )));
        }
        Ok(Self {
            key_type,
            value: value.to_string(),
        })
    }

    /// The key type
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The multibase string, including its `z` prefix
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// The raw public key bytes
    pub fn public_key_bytes(&self) -> Result<Vec<u8>> {
        let (_, bytes) = multibase::decode(&self.value)
            .map_err(|e| Error::InvalidDID(format!("Invalid multibase key: {}", e)))?;
        Ok(bytes[2..].to_vec())
    }

    /// The fragment used for this key's verification method id
    fn fragment(&self) -> &str {
        &self.value[1..]
    }

    fn to_verification_method(
        &self,
        did: &str,
        format: VerificationMaterialFormat,
    ) -> Result<VerificationMethod> {
        let (type_, verification_material) = match format {
            VerificationMaterialFormat::Jwk => (
                VerificationMethodType::JsonWebKey2020,
                VerificationMaterial::JWK {
                    public_key_jwk: serde_json::json!({
                        "kty": "OKP",
                        "crv": self.key_type.jwk_curve(),
                        "x": URL_SAFE_NO_PAD.encode(self.public_key_bytes()?),
                    }),
                },
            ),
            VerificationMaterialFormat::Multibase => (
                self.key_type.multibase_method_type(),
                VerificationMaterial::Multibase {
                    public_key_multibase: self.value.clone(),
                },
            ),
        };

        Ok(VerificationMethod {
            id: format!("{}#{}", did, self.fragment()),
            type_,
            controller: did.to_string(),
            verification_material,
        })
    }
}

/// A DIDComm messaging service to embed in a numalgo 2 peer DID
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceDescriptor {
    /// Endpoint URI
    pub service_endpoint: String,
    /// Routing keys, omitted from the DID when empty
    pub routing_keys: Vec<String>,
}

impl ServiceDescriptor {
    /// Creates a service descriptor for the given endpoint
    pub fn new(service_endpoint: impl Into<String>) -> Self {
        Self {
            service_endpoint: service_endpoint.into(),
            routing_keys: Vec::new(),
        }
    }

    /// Sets the routing keys
    pub fn with_routing_keys(mut self, routing_keys: Vec<String>) -> Self {
        self.routing_keys = routing_keys;
        self
    }

    /// The service as a JSON object with full field names
    pub fn to_json(&self) -> Value {
        let mut service = serde_json::json!({
            "type": DIDCOMM_MESSAGING,
            "serviceEndpoint": self.service_endpoint,
            "accept": [DIDCOMM_V2_PROFILE],
        });
        if !self.routing_keys.is_empty() {
            service["routingKeys"] = serde_json::json!(self.routing_keys);
        }
        service
    }

    /// The `.S` element body: base64url of the abbreviated service JSON
    fn encode(&self) -> Result<String> {
        let abbreviated = abbreviate(&self.to_json());
        let json = serde_json::to_string(&abbreviated)?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }
}

const SERVICE_ABBREVIATIONS: [(&str, &str); 4] = [
    ("type", "t"),
    ("serviceEndpoint", "s"),
    ("routingKeys", "r"),
    ("accept", "a"),
];

fn abbreviate(service: &Value) -> Value {
    let mut out = Map::new();
    if let Some(obj) = service.as_object() {
        for (key, value) in obj {
            let short = SERVICE_ABBREVIATIONS
                .iter()
                .find(|(long, _)| long == key)
                .map(|(_, short)| short.to_string())
                .unwrap_or_else(|| key.clone());
            let value = match value.as_str() {
                Some(DIDCOMM_MESSAGING) if short == "t" => Value::String("dm".to_string()),
                _ => value.clone(),
            };
            out.insert(short, value);
        }
    }
    Value::Object(out)
}

fn expand(service: &Value) -> Value {
    let mut out = Map::new();
    if let Some(obj) = service.as_object() {
        for (key, value) in obj {
            let long = SERVICE_ABBREVIATIONS
                .iter()
                .find(|(_, short)| short == key)
                .map(|(long, _)| long.to_string())
                .unwrap_or_else(|| key.clone());
            let value = match value.as_str() {
                Some("dm") if long == "type" => Value::String(DIDCOMM_MESSAGING.to_string()),
                _ => value.clone(),
            };
            out.insert(long, value);
        }
    }
    Value::Object(out)
}

/// Creates a short form peer DID from a single Ed25519 inception key.
pub fn create_peer_did_numalgo_0(inception_key: &EncodedKey) -> Result<String> {
    if inception_key.key_type() != KeyType::Ed25519 {
        return Err(Error::Validation(
            "numalgo 0 requires an Ed25519 inception key".to_string(),
        ));
    }
    Ok(format!("{}{}", NUMALGO_0_PREFIX, inception_key.as_str()))
}

/// Creates a long form peer DID from key agreement keys, signing keys and an optional service.
pub fn create_peer_did_numalgo_2(
    encryption_keys: &[EncodedKey],
    signing_keys: &[EncodedKey],
    service: Option<&ServiceDescriptor>,
) -> Result<String> {
    let mut did = String::from(NUMALGO_2_PREFIX);

    for key in encryption_keys {
        if key.key_type() != KeyType::X25519 {
            return Err(Error::Validation(format!(
                "Encryption key {} is not an X25519 key",
                key.as_str()
            )));
        }
        did.push_str(".E");
        did.push_str(key.as_str());
    }

    for key in signing_keys {
        if key.key_type() != KeyType::Ed25519 {
            return Err(Error::Validation(format!(
                "Signing key {} is not an Ed25519 key",
                key.as_str()
            )));
        }
        did.push_str(".V");
        did.push_str(key.as_str());
    }

    if let Some(service) = service {
        did.push_str(".S");
        did.push_str(&service.encode()?);
    }

    Ok(did)
}

/// Resolves a peer DID into a DID document.
pub fn resolve_peer_did(did: &str, format: VerificationMaterialFormat) -> Result<DIDDoc> {
    if let Some(key) = did.strip_prefix(NUMALGO_0_PREFIX) {
        let key = EncodedKey::parse(key)?;
        if key.key_type() != KeyType::Ed25519 {
            return Err(Error::InvalidDID(format!(
                "numalgo 0 peer DID must use an Ed25519 key: {}",
                did
            )));
        }
        return Ok(DIDDoc {
            id: did.to_string(),
            authentication: vec![key.to_verification_method(did, format)?],
            key_agreement: Vec::new(),
            service: Vec::new(),
        });
    }

    if let Some(elements) = did.strip_prefix(NUMALGO_2_PREFIX) {
        return resolve_numalgo_2(did, elements, format);
    }

    if did.starts_with(PEER_DID_PREFIX) {
        Err(Error::DidResolution(format!(
            "Unsupported peer DID numalgo: {}",
            did
        )))
    } else {
        Err(Error::InvalidDID(format!("Not a peer DID: {}", did)))
    }
}

fn resolve_numalgo_2(
    did: &str,
    elements: &str,
    format: VerificationMaterialFormat,
) -> Result<DIDDoc> {
    let mut doc = DIDDoc {
        id: did.to_string(),
        authentication: Vec::new(),
        key_agreement: Vec::new(),
        service: Vec::new(),
    };

    if elements.is_empty() {
        return Ok(doc);
    }

    let elements = elements
        .strip_prefix('.')
        .ok_or_else(|| Error::InvalidDID(format!("Malformed numalgo 2 peer DID: {}", did)))?;

    for element in elements.split('.') {
        let mut chars = element.chars();
        let purpose = chars
            .next()
            .ok_or_else(|| Error::InvalidDID(format!("Empty element in peer DID: {}", did)))?;
        let value = chars.as_str();

        match purpose {
            'E' => {
                let key = EncodedKey::parse(value)?;
                if key.key_type() != KeyType::X25519 {
                    return Err(Error::InvalidDID(format!(
                        "Key agreement element must hold an X25519 key: {}",
                        value
                    )));
                }
                doc.key_agreement.push(key.to_verification_method(did, format)?);
            }
            'V' => {
                let key = EncodedKey::parse(value)?;
                if key.key_type() != KeyType::Ed25519 {
                    return Err(Error::InvalidDID(format!(
                        "Authentication element must hold an Ed25519 key: {}",
                        value
                    )));
                }
                doc.authentication.push(key.to_verification_method(did, format)?);
            }
            'S' => {
                let services = decode_service(did, value, doc.service.len())?;
                doc.service.extend(services);
            }
            other => {
                return Err(Error::InvalidDID(format!(
                    "Unsupported peer DID purpose code '{}' in {}",
                    other, did
                )))
            }
        }
    }

    debug!(
        did = did,
        authentication = doc.authentication.len(),
        key_agreement = doc.key_agreement.len(),
        services = doc.service.len(),
        "Resolved numalgo 2 peer DID"
    );

    Ok(doc)
}

fn decode_service(did: &str, encoded: &str, first_index: usize) -> Result<Vec<Service>> {
    let bytes = URL_SAFE_NO_PAD
        .decode(encoded.trim_end_matches('='))
        .map_err(|e| Error::InvalidDID(format!("Invalid service encoding in {}: {}", did, e)))?;
    let value: Value = serde_json::from_slice(&bytes)
        .map_err(|e| Error::InvalidDID(format!("Invalid service JSON in {}: {}", did, e)))?;

    let entries = match value {
        Value::Array(entries) => entries,
        entry @ Value::Object(_) => vec![entry],
        _ => {
            return Err(Error::InvalidDID(format!(
                "Service block must be an object or array: {}",
                did
            )))
        }
    };

    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| {
            let mut expanded = expand(entry);
            let type_ = expanded
                .get("type")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            expanded["id"] = Value::String(format!("{}#{}-{}", did, type_, first_index + i));
            serde_json::from_value::<Service>(expanded)
                .map_err(|e| Error::InvalidDID(format!("Invalid service in {}: {}", did, e)))
        })
        .collect()
}

/// Returns true if the string is a resolvable peer DID
pub fn is_peer_did(did: &str) -> bool {
    resolve_peer_did(did, VerificationMaterialFormat::Multibase).is_ok()
}

/// A resolver for the did:peer method.
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerResolver;

#[async_trait]
impl DIDMethodResolver for PeerResolver {
    fn method(&self) -> &str {
        "peer"
    }

    async fn resolve_method(
        &self,
        did: &str,
        format: VerificationMaterialFormat,
    ) -> Result<DIDDoc> {
        resolve_peer_did(did, format)
    }
}
