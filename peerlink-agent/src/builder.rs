//! Peer DID creation
//!
//! [`PeerDIDBuilder`] generates key pairs, derives a peer DID from their
//! public halves, resolves the DID to learn the verification method ids,
//! and only then stores the private keys under those ids.

use std::sync::Arc;
use tracing::{debug, info};

use crate::did::{DIDResolver, KeyType, VerificationMaterialFormat};
use crate::error::{Error, Result};
use crate::key_store::{GeneratedKey, KeyMaterialStore};
use crate::peer_did::{
    create_peer_did_numalgo_0, create_peer_did_numalgo_2, EncodedKey, ServiceDescriptor,
};

/// Which peer DID construction a request maps to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerDIDForm {
    /// numalgo 0, a single signing key
    Short,
    /// numalgo 2, any number of keys and an optional service
    Long,
}

impl PeerDIDForm {
    /// Short form exactly when there is one signing key and nothing else
    pub fn select(signing_keys: usize, agreement_keys: usize, has_service: bool) -> Self {
        if signing_keys == 1 && agreement_keys == 0 && !has_service {
            PeerDIDForm::Short
        } else {
            PeerDIDForm::Long
        }
    }
}

/// Creates peer DIDs and stores their private keys
#[derive(Debug, Clone)]
pub struct PeerDIDBuilder {
    resolver: Arc<dyn DIDResolver>,
    store: Arc<KeyMaterialStore>,
}

impl PeerDIDBuilder {
    /// Creates a builder over the given resolver and key store
    pub fn new(resolver: Arc<dyn DIDResolver>, store: Arc<KeyMaterialStore>) -> Self {
        Self { resolver, store }
    }

    /// Creates a peer DID with fresh keys.
    ///
    /// A service is embedded only for a non-empty `service_endpoint`, and
    /// routing keys only when there are some. The store is untouched unless
    /// every generated key was matched to a verification method.
    pub async fn build(
        &self,
        signing_keys: usize,
        agreement_keys: usize,
        service_endpoint: Option<&str>,
        routing_keys: &[String],
    ) -> Result<String> {
        let signing: Vec<GeneratedKey> = (0..signing_keys)
            .map(|_| GeneratedKey::generate(KeyType::Ed25519))
            .collect();
        let agreement: Vec<GeneratedKey> = (0..agreement_keys)
            .map(|_| GeneratedKey::generate(KeyType::X25519))
            .collect();

        let service = service_endpoint
            .filter(|endpoint| !endpoint.is_empty())
            .map(|endpoint| {
                ServiceDescriptor::new(endpoint).with_routing_keys(routing_keys.to_vec())
            });

        let form = PeerDIDForm::select(signing.len(), agreement.len(), service.is_some());
        debug!(
            signing_keys,
            agreement_keys,
            service = service.is_some(),
            form = ?form,
            "Selected peer DID construction"
        );

        let did = match form {
            PeerDIDForm::Short => {
                let key = signing.first().ok_or_else(|| {
                    Error::Construction("Short form requires a signing key".to_string())
                })?;
                create_peer_did_numalgo_0(&key.encoded_public_key())?
            }
            PeerDIDForm::Long => {
                let encryption: Vec<EncodedKey> =
                    agreement.iter().map(GeneratedKey::encoded_public_key).collect();
                let signing: Vec<EncodedKey> =
                    signing.iter().map(GeneratedKey::encoded_public_key).collect();
                create_peer_did_numalgo_2(&encryption, &signing, service.as_ref())?
            }
        };

        let doc = self
            .resolver
            .resolve(&did, VerificationMaterialFormat::Jwk)
            .await?;

        if doc.authentication.len() != signing.len() {
            return Err(Error::Construction(format!(
                "{} has {} authentication methods for {} signing keys",
                did,
                doc.authentication.len(),
                signing.len()
            )));
        }
        if doc.key_agreement.len() != agreement.len() {
            return Err(Error::Construction(format!(
                "{} has {} key agreement methods for {} agreement keys",
                did,
                doc.key_agreement.len(),
                agreement.len()
            )));
        }

        let records: Vec<_> = signing
            .into_iter()
            .zip(doc.authentication_ids())
            .chain(agreement.into_iter().zip(doc.key_agreement_ids()))
            .map(|(key, id)| key.assign_identifier(id))
            .collect();
        debug!(did = %did, keys = records.len(), "Assigned key identifiers");

        self.store.insert_all(records)?;
        info!(did = %did, "Created peer DID");
        Ok(did)
    }
}
