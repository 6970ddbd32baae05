//! The peerlink agent
//!
//! [`PeerAgent`] ties a key store, a resolver, the DID builder and the
//! envelope composer together, and persists the store when configured
//! with a secrets file.

use std::sync::Arc;
use tracing::debug;

use crate::builder::PeerDIDBuilder;
use crate::config::AgentConfig;
use crate::did::{DIDDoc, DIDResolver, MultiResolver, VerificationMaterialFormat};
use crate::error::Result;
use crate::key_store::KeyMaterialStore;
use crate::message_packing::{EnvelopeComposer, PackOptions, PackResult, UnpackResult};

/// An agent owning peer DID keys
#[derive(Debug, Clone)]
pub struct PeerAgent {
    config: AgentConfig,
    resolver: Arc<dyn DIDResolver>,
    store: Arc<KeyMaterialStore>,
    builder: PeerDIDBuilder,
    composer: EnvelopeComposer,
}

impl PeerAgent {
    /// Creates an agent with the default peer resolver, loading the
    /// secrets file if the configuration names one
    pub fn new(config: AgentConfig) -> Result<Self> {
        let store = match &config.keys_path {
            Some(path) => KeyMaterialStore::load_from_path(path)?,
            None => KeyMaterialStore::new(),
        };
        Ok(Self::with_parts(
            config,
            Arc::new(MultiResolver::default()),
            Arc::new(store),
        ))
    }

    /// Creates an agent from explicit parts
    pub fn with_parts(
        config: AgentConfig,
        resolver: Arc<dyn DIDResolver>,
        store: Arc<KeyMaterialStore>,
    ) -> Self {
        Self {
            builder: PeerDIDBuilder::new(resolver.clone(), store.clone()),
            composer: EnvelopeComposer::new(resolver.clone(), store.clone()),
            config,
            resolver,
            store,
        }
    }

    /// The agent configuration
    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// The key store
    pub fn store(&self) -> &Arc<KeyMaterialStore> {
        &self.store
    }

    /// Creates a peer DID and stores its keys
    pub async fn create_peer_did(
        &self,
        signing_keys: usize,
        agreement_keys: usize,
        service_endpoint: Option<&str>,
        routing_keys: &[String],
    ) -> Result<String> {
        self.builder
            .build(signing_keys, agreement_keys, service_endpoint, routing_keys)
            .await
    }

    /// Resolves a DID in the requested format
    pub async fn resolve(&self, did: &str, format: VerificationMaterialFormat) -> Result<DIDDoc> {
        self.resolver.resolve(did, format).await
    }

    /// Resolves a DID in the configured resolution format
    pub async fn resolve_document(&self, did: &str) -> Result<DIDDoc> {
        self.resolve(did, self.config.resolution_format).await
    }

    /// Packs a text message using the configured sender protection policy
    pub async fn pack_text(
        &self,
        text: &str,
        to: &str,
        from: Option<&str>,
        sign_from: Option<&str>,
    ) -> Result<PackResult> {
        let options = PackOptions::new().with_protect_sender_id(self.config.protect_sender_id);
        self.pack_text_with(text, to, from, sign_from, options).await
    }

    /// Packs a text message with explicit options
    pub async fn pack_text_with(
        &self,
        text: &str,
        to: &str,
        from: Option<&str>,
        sign_from: Option<&str>,
        options: PackOptions,
    ) -> Result<PackResult> {
        self.composer
            .pack_text(text, to, from, sign_from, options)
            .await
    }

    /// Unpacks a message
    pub async fn unpack(&self, packed: &str) -> Result<UnpackResult> {
        self.composer.unpack(packed).await
    }

    /// Writes the key store to the configured secrets file, if any
    pub fn save(&self) -> Result<()> {
        match &self.config.keys_path {
            Some(path) => self.store.save_to_path(path),
            None => {
                debug!("No secrets file configured, keeping keys in memory");
                Ok(())
            }
        }
    }
}
