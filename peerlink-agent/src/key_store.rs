//! Key material storage for the peerlink agent
//!
//! Generated key pairs live in a [`KeyMaterialStore`], keyed by the
//! verification method identifier they were assigned when their peer DID
//! was resolved. The store can be persisted as a JSON object mapping each
//! identifier to its private key in JWK form, by default at
//! `~/.peerlink/secrets.json`.
//!
//! Key pairs follow a two-step lifecycle: a [`GeneratedKey`] has no
//! identifier yet, and only becomes a [`KeyPairRecord`] once
//! [`GeneratedKey::assign_identifier`] is called. Only records can be stored.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use dirs::home_dir;
use rand::rngs::OsRng;
use serde::de::{self, MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::debug;

use crate::did::{KeyKind, KeyType};
use crate::error::{Error, Result};
use crate::peer_did::EncodedKey;

/// Default directory for peerlink configuration and keys
pub const DEFAULT_PEERLINK_DIR: &str = ".peerlink";
/// Default filename for the secrets file
pub const DEFAULT_KEYS_FILE: &str = "secrets.json";

const KEY_LEN: usize = 32;

/// A freshly generated key pair that has not been bound to a DID yet
#[derive(Clone)]
pub struct GeneratedKey {
    key_type: KeyType,
    public_key: [u8; KEY_LEN],
    private_key: [u8; KEY_LEN],
}

impl std::fmt::Debug for GeneratedKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedKey")
            .field("key_type", &self.key_type)
            .field("public_key", &URL_SAFE_NO_PAD.encode(self.public_key))
            .finish_non_exhaustive()
    }
}

impl GeneratedKey {
    /// Generates a new random key pair of the given type
    pub fn generate(key_type: KeyType) -> Self {
        match key_type {
            KeyType::Ed25519 => {
                let signing_key = ed25519_dalek::SigningKey::generate(&mut OsRng);
                Self {
                    key_type,
                    public_key: signing_key.verifying_key().to_bytes(),
                    private_key: signing_key.to_bytes(),
                }
            }
            KeyType::X25519 => {
                let secret = x25519_dalek::StaticSecret::random_from_rng(OsRng);
                let public = x25519_dalek::PublicKey::from(&secret);
                Self {
                    key_type,
                    public_key: public.to_bytes(),
                    private_key: secret.to_bytes(),
                }
            }
        }
    }

    /// The key type
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// The raw public key
    pub fn public_key(&self) -> &[u8] {
        &self.public_key
    }

    /// The public key in multibase form, ready to embed in a peer DID
    pub fn encoded_public_key(&self) -> EncodedKey {
        EncodedKey::from_public_key(self.key_type, &self.public_key)
    }

    /// Binds the key pair to a verification method identifier
    pub fn assign_identifier(self, id: impl Into<String>) -> KeyPairRecord {
        KeyPairRecord {
            id: id.into(),
            key_type: self.key_type,
            public_key: self.public_key,
            private_key: self.private_key,
        }
    }
}

/// A key pair bound to the identifier of the verification method it backs
#[derive(Clone, PartialEq, Eq)]
pub struct KeyPairRecord {
    id: String,
    key_type: KeyType,
    public_key: [u8; KEY_LEN],
    private_key: [u8; KEY_LEN],
}

impl std::fmt::Debug for KeyPairRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPairRecord")
            .field("id", &self.id)
            .field("key_type", &self.key_type)
            .finish_non_exhaustive()
    }
}

impl KeyPairRecord {
    /// The verification method identifier, `<did>#<fragment>`
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The key type
    pub fn key_type(&self) -> KeyType {
        self.key_type
    }

    /// Whether this is a signing or agreement key
    pub fn kind(&self) -> KeyKind {
        self.key_type.kind()
    }

    /// The raw public key
    pub fn public_key(&self) -> &[u8; KEY_LEN] {
        &self.public_key
    }

    /// The raw private key (Ed25519 seed or X25519 scalar)
    pub fn private_key(&self) -> &[u8; KEY_LEN] {
        &self.private_key
    }

    /// Converts the record to its persisted form
    pub fn to_stored_key(&self) -> StoredKey {
        StoredKey {
            kid: self.id.clone(),
            kind: self.kind(),
            kty: "OKP".to_string(),
            crv: self.key_type.jwk_curve().to_string(),
            x: URL_SAFE_NO_PAD.encode(self.public_key),
            d: URL_SAFE_NO_PAD.encode(self.private_key),
        }
    }

    /// Builds a record from its persisted form, checking the public key matches
    pub fn from_stored_key(jwk: &StoredKey) -> Result<Self> {
        if jwk.kty != "OKP" {
            return Err(Error::Storage(format!(
                "Unsupported key type '{}' for {}",
                jwk.kty, jwk.kid
            )));
        }
        let key_type = KeyType::from_jwk_curve(&jwk.crv).ok_or_else(|| {
            Error::Storage(format!("Unsupported curve '{}' for {}", jwk.crv, jwk.kid))
        })?;
        if key_type.kind() != jwk.kind {
            return Err(Error::Storage(format!(
                "Key kind {:?} does not match curve {} for {}",
                jwk.kind, jwk.crv, jwk.kid
            )));
        }
        let public_key = decode_key_bytes(&jwk.kid, "x", &jwk.x)?;
        let private_key = decode_key_bytes(&jwk.kid, "d", &jwk.d)?;

        let derived = match key_type {
            KeyType::Ed25519 => ed25519_dalek::SigningKey::from_bytes(&private_key)
                .verifying_key()
                .to_bytes(),
            KeyType::X25519 => {
                x25519_dalek::PublicKey::from(&x25519_dalek::StaticSecret::from(private_key))
                    .to_bytes()
            }
        };
        if derived != public_key {
            return Err(Error::Storage(format!(
                "Public key does not match private key for {}",
                jwk.kid
            )));
        }

        Ok(Self {
            id: jwk.kid.clone(),
            key_type,
            public_key,
            private_key,
        })
    }
}

fn decode_key_bytes(kid: &str, field: &str, value: &str) -> Result<[u8; KEY_LEN]> {
    let bytes = URL_SAFE_NO_PAD
        .decode(value)
        .map_err(|e| Error::Storage(format!("Invalid '{}' for {}: {}", field, kid, e)))?;
    bytes.try_into().map_err(|bytes: Vec<u8>| {
        Error::Storage(format!(
            "Invalid '{}' length {} for {}",
            field,
            bytes.len(),
            kid
        ))
    })
}

/// A private key as written to the secrets file: an OKP JWK plus its role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredKey {
    pub kid: String,
    pub kind: KeyKind,
    pub kty: String,
    pub crv: String,
    pub x: String,
    pub d: String,
}

/// The secrets file: stored keys keyed by identifier, in insertion order
struct SecretsFile(Vec<StoredKey>);

impl Serialize for SecretsFile {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for key in &self.0 {
            map.serialize_entry(&key.kid, key)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for SecretsFile {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct SecretsVisitor;

        impl<'de> Visitor<'de> for SecretsVisitor {
            type Value = SecretsFile;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a map from key identifier to stored key")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<SecretsFile, A::Error> {
                let mut keys = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((kid, key)) = access.next_entry::<String, StoredKey>()? {
                    if key.kid != kid {
                        return Err(de::Error::custom(format!(
                            "entry '{}' holds key '{}'",
                            kid, key.kid
                        )));
                    }
                    keys.push(key);
                }
                Ok(SecretsFile(keys))
            }
        }

        deserializer.deserialize_map(SecretsVisitor)
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    order: Vec<String>,
    records: HashMap<String, KeyPairRecord>,
}

impl StoreInner {
    fn put(&mut self, record: KeyPairRecord) {
        if !self.records.contains_key(record.id()) {
            self.order.push(record.id().to_string());
        }
        self.records.insert(record.id().to_string(), record);
    }
}

/// Thread-safe mapping from key identifier to key pair record.
///
/// Identifiers are listed in insertion order. Inserting an existing
/// identifier replaces the record and keeps its position.
#[derive(Debug, Default)]
pub struct KeyMaterialStore {
    inner: RwLock<StoreInner>,
}

impl KeyMaterialStore {
    /// Creates an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a single record
    pub fn insert(&self, record: KeyPairRecord) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::FailedToAcquireStoreWriteLock)?;
        debug!(kid = record.id(), "Storing key pair");
        inner.put(record);
        Ok(())
    }

    /// Inserts all records at once, so readers see either none or all of them
    pub fn insert_all(&self, records: Vec<KeyPairRecord>) -> Result<()> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| Error::FailedToAcquireStoreWriteLock)?;
        for record in records {
            debug!(kid = record.id(), "Storing key pair");
            inner.put(record);
        }
        Ok(())
    }

    /// Looks up a record by identifier
    pub fn lookup(&self, kid: &str) -> Result<Option<KeyPairRecord>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
        Ok(inner.records.get(kid).cloned())
    }

    /// Returns true if the store holds the given identifier
    pub fn contains(&self, kid: &str) -> Result<bool> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
        Ok(inner.records.contains_key(kid))
    }

    /// All identifiers in insertion order
    pub fn list_identifiers(&self) -> Result<Vec<String>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
        Ok(inner.order.clone())
    }

    /// The subset of `kids` held by the store, in the order given
    pub fn find_identifiers(&self, kids: &[String]) -> Result<Vec<String>> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
        Ok(kids
            .iter()
            .filter(|kid| inner.records.contains_key(kid.as_str()))
            .cloned()
            .collect())
    }

    /// Number of stored records
    pub fn len(&self) -> Result<usize> {
        let inner = self
            .inner
            .read()
            .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
        Ok(inner.order.len())
    }

    /// Returns true if the store holds no records
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Default path of the secrets file
    pub fn default_key_path() -> Option<PathBuf> {
        home_dir().map(|home| home.join(DEFAULT_PEERLINK_DIR).join(DEFAULT_KEYS_FILE))
    }

    /// Loads a store from a secrets file. A missing file yields an empty store.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let store = Self::new();
        if !path.exists() {
            debug!(path = %path.display(), "No secrets file, starting with an empty key store");
            return Ok(store);
        }

        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Storage(format!("Failed to read secrets file: {}", e)))?;
        let SecretsFile(keys) = serde_json::from_str(&contents)
            .map_err(|e| Error::Storage(format!("Failed to parse secrets file: {}", e)))?;

        let records = keys
            .iter()
            .map(KeyPairRecord::from_stored_key)
            .collect::<Result<Vec<_>>>()?;
        store.insert_all(records)?;

        debug!(path = %path.display(), keys = keys.len(), "Loaded key store");
        Ok(store)
    }

    /// Writes the store to a secrets file, creating parent directories
    pub fn save_to_path(&self, path: &Path) -> Result<()> {
        let keys = {
            let inner = self
                .inner
                .read()
                .map_err(|_| Error::FailedToAcquireStoreReadLock)?;
            inner
                .order
                .iter()
                .filter_map(|kid| inner.records.get(kid))
                .map(KeyPairRecord::to_stored_key)
                .collect::<Vec<_>>()
        };

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    Error::Storage(format!("Failed to create key storage directory: {}", e))
                })?;
            }
        }

        let count = keys.len();
        let contents = serde_json::to_string_pretty(&SecretsFile(keys))
            .map_err(|e| Error::Storage(format!("Failed to serialize key store: {}", e)))?;
        fs::write(path, contents)
            .map_err(|e| Error::Storage(format!("Failed to write secrets file: {}", e)))?;

        debug!(path = %path.display(), keys = count, "Saved key store");
        Ok(())
    }
}
