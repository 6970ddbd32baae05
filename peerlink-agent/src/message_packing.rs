//! Message packing and unpacking
//!
//! [`EnvelopeComposer`] chooses the protection applied to an outgoing
//! message from the identities the caller supplies:
//!
//! | `from` | `sign_from` | result                                   |
//! |--------|-------------|------------------------------------------|
//! | no     | no          | anoncrypt                                |
//! | yes    | no          | authcrypt, optionally wrapped in anoncrypt |
//! | yes    | yes         | signed, then authcrypt (and anoncrypt)   |
//! | no     | yes         | rejected with [`Error::InvalidMode`]     |
//!
//! Unpacking peels the layers outside-in and reports what it found in
//! [`UnpackMetadata`]. Forward wrapping for mediators is never applied.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::agent_key::{AgentKey, JweAlgorithm, KeyAgreementKey, SigningKey, VerificationKey};
use crate::crypto::jwe;
use crate::did::{split_did_url, DIDDoc, DIDResolver, VerificationMaterialFormat};
use crate::error::{Error, Result};
use crate::key_store::KeyMaterialStore;
use crate::local_agent_key::{LocalAgentKey, PublicAgreementKey, PublicVerificationKey};
use crate::message::{Envelope, Jwe, Jws, PlainMessage};

/// Error type specific to message packing and unpacking
#[derive(Debug, thiserror::Error)]
pub enum MessageError {
    #[error("sign_from requires a sender (from) identity")]
    SignerWithoutSender,

    #[error("Signer {signer} must be the sender {sender}")]
    SignerNotSender { signer: String, sender: String },

    #[error("No key agreement key of {0} is held locally")]
    NoLocalSenderKey(String),

    #[error("No authentication key of {0} is held locally")]
    NoLocalSigningKey(String),

    #[error("No key agreement key found for recipient {0}")]
    NoRecipientKey(String),

    #[error("Message is addressed to none of the locally held keys")]
    NoLocalRecipientKey,

    #[error("{inner} layer cannot appear inside a {outer} layer")]
    LayerOrder { inner: Layer, outer: Layer },

    #[error("Message sender {claimed:?} does not match the {layer} key {kid}")]
    SenderMismatch {
        claimed: Option<String>,
        layer: Layer,
        kid: String,
    },

    #[error("Message is not addressed to {0}")]
    RecipientMismatch(String),
}

impl From<MessageError> for Error {
    fn from(err: MessageError) -> Self {
        match err {
            MessageError::SignerWithoutSender
            | MessageError::SignerNotSender { .. }
            | MessageError::NoLocalSenderKey(_)
            | MessageError::NoLocalSigningKey(_) => Error::InvalidMode(err.to_string()),
            MessageError::NoRecipientKey(_) | MessageError::NoLocalRecipientKey => {
                Error::KeyNotFound(err.to_string())
            }
            MessageError::LayerOrder { .. } => Error::InvalidEnvelope(err.to_string()),
            MessageError::SenderMismatch { .. } => Error::Cryptography(err.to_string()),
            MessageError::RecipientMismatch(_) => Error::Validation(err.to_string()),
        }
    }
}

/// Envelope layers, ordered from outermost to innermost
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Layer {
    Anoncrypt,
    Authcrypt,
    Signed,
    Plaintext,
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Layer::Anoncrypt => "anoncrypt",
            Layer::Authcrypt => "authcrypt",
            Layer::Signed => "signed",
            Layer::Plaintext => "plaintext",
        };
        f.write_str(name)
    }
}

/// Options for packing a message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PackOptions {
    /// Wrap authcrypted messages in anoncrypt so the sender key id is hidden
    pub protect_sender_id: bool,
}

impl PackOptions {
    /// Create new default packing options
    pub fn new() -> Self {
        Self::default()
    }

    /// Set whether the sender identity is protected
    pub fn with_protect_sender_id(mut self, protect: bool) -> Self {
        self.protect_sender_id = protect;
        self
    }
}

/// A packed message with the keys that were used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackResult {
    pub packed_msg: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_kid: Option<String>,
    pub to_kids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_from_kid: Option<String>,
}

/// Security properties established while unpacking
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnpackMetadata {
    pub authenticated: bool,
    pub encrypted: bool,
    pub anonymous_sender: bool,
    pub non_repudiation: bool,
}

/// An unpacked message and what was learned about it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpackResult {
    pub message: PlainMessage,
    pub metadata: UnpackMetadata,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_kid: Option<String>,
    pub to_kids: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recipient_kid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sign_from_kid: Option<String>,
}

impl UnpackResult {
    /// The text body of the message
    pub fn text(&self) -> Option<&str> {
        self.message.text_body()
    }

    /// The sender DID, only when the sender was authenticated
    pub fn sender_did(&self) -> Option<&str> {
        if self.metadata.authenticated {
            self.message.from.as_deref()
        } else {
            None
        }
    }

    /// The DID whose key decrypted the message, or the first addressee
    pub fn recipient_did(&self) -> Option<&str> {
        match &self.recipient_kid {
            Some(kid) => Some(split_did_url(kid).0),
            None => self.message.to.first().map(String::as_str),
        }
    }
}

/// Packs and unpacks messages using a resolver and the local key store
#[derive(Debug, Clone)]
pub struct EnvelopeComposer {
    resolver: Arc<dyn DIDResolver>,
    store: Arc<KeyMaterialStore>,
}

impl EnvelopeComposer {
    /// Creates a composer over the given resolver and key store
    pub fn new(resolver: Arc<dyn DIDResolver>, store: Arc<KeyMaterialStore>) -> Self {
        Self { resolver, store }
    }

    async fn resolve(&self, did: &str) -> Result<DIDDoc> {
        self.resolver
            .resolve(did, VerificationMaterialFormat::Jwk)
            .await
    }

    /// Picks the designated kid, or else the first candidate held in the store
    fn local_key_id(
        &self,
        candidates: Vec<String>,
        designated: Option<&str>,
    ) -> Result<Option<String>> {
        let candidates = match designated {
            Some(kid) => candidates.into_iter().filter(|c| c == kid).collect(),
            None => candidates,
        };
        Ok(self.store.find_identifiers(&candidates)?.into_iter().next())
    }

    async fn recipient_key(&self, to: &str) -> Result<PublicAgreementKey> {
        let (did, kid) = split_did_url(to);
        let doc = self.resolve(did).await?;
        let method = match kid {
            Some(kid) => doc.find_key_agreement(kid),
            None => doc.key_agreement.first(),
        };
        let method = method.ok_or_else(|| MessageError::NoRecipientKey(to.to_string()))?;
        PublicAgreementKey::from_verification_method(method)
    }

    async fn sender_key(&self, from: &str) -> Result<LocalAgentKey> {
        let (did, kid) = split_did_url(from);
        let doc = self.resolve(did).await?;
        let kid = self
            .local_key_id(doc.key_agreement_ids(), kid)?
            .ok_or_else(|| MessageError::NoLocalSenderKey(from.to_string()))?;
        let record = self
            .store
            .lookup(&kid)?
            .ok_or_else(|| MessageError::NoLocalSenderKey(from.to_string()))?;
        LocalAgentKey::agreement(record)
    }

    async fn signing_key(&self, sign_from: &str) -> Result<LocalAgentKey> {
        let (did, kid) = split_did_url(sign_from);
        let doc = self.resolve(did).await?;
        let kid = self
            .local_key_id(doc.authentication_ids(), kid)?
            .ok_or_else(|| MessageError::NoLocalSigningKey(sign_from.to_string()))?;
        let record = self
            .store
            .lookup(&kid)?
            .ok_or_else(|| MessageError::NoLocalSigningKey(sign_from.to_string()))?;
        LocalAgentKey::signing(record)
    }

    /// Packs a text message addressed to `to`.
    ///
    /// `to`, `from` and `sign_from` are DIDs, or DID URLs naming a specific key.
    pub async fn pack_text(
        &self,
        text: &str,
        to: &str,
        from: Option<&str>,
        sign_from: Option<&str>,
        options: PackOptions,
    ) -> Result<PackResult> {
        let message = PlainMessage::text(
            text,
            from.map(|from| split_did_url(from).0),
            split_did_url(to).0,
        );
        self.pack(&message, to, from, sign_from, options).await
    }

    /// Packs a plaintext message.
    ///
    /// All keys are selected before any cryptographic work, so an invalid
    /// combination of identities fails without side effects.
    pub async fn pack(
        &self,
        message: &PlainMessage,
        to: &str,
        from: Option<&str>,
        sign_from: Option<&str>,
        options: PackOptions,
    ) -> Result<PackResult> {
        if let Some(signer) = sign_from {
            let sender = from.ok_or(MessageError::SignerWithoutSender)?;
            if split_did_url(signer).0 != split_did_url(sender).0 {
                return Err(MessageError::SignerNotSender {
                    signer: signer.to_string(),
                    sender: sender.to_string(),
                }
                .into());
            }
        }
        if let Some(sender) = from {
            let sender_did = split_did_url(sender).0;
            if message.from.as_deref() != Some(sender_did) {
                return Err(Error::Validation(format!(
                    "Message from {:?} does not match sender {}",
                    message.from, sender_did
                )));
            }
        }

        let recipient = self.recipient_key(to).await?;
        let sender = match from {
            Some(from) => Some(self.sender_key(from).await?),
            None => None,
        };
        let signer = match sign_from {
            Some(sign_from) => Some(self.signing_key(sign_from).await?),
            None => None,
        };

        debug!(
            to = recipient.key_id(),
            from = sender.as_ref().map(|k| k.key_id()),
            sign_from = signer.as_ref().map(|k| k.key_id()),
            protect_sender_id = options.protect_sender_id,
            "Selected keys for packing"
        );

        let mut payload = serde_json::to_vec(message)?;

        if let Some(signer) = &signer {
            let jws = signer.create_jws(&payload).await?;
            payload = serde_json::to_vec(&jws)?;
        }

        let recipients = [recipient];
        let packed = match &sender {
            Some(sender) => {
                let sender_key = sender as &dyn KeyAgreementKey;
                let authcrypt = jwe::encrypt(&payload, &recipients, Some(sender_key)).await?;
                if options.protect_sender_id {
                    let inner = serde_json::to_vec(&authcrypt)?;
                    jwe::encrypt(&inner, &recipients, None).await?
                } else {
                    authcrypt
                }
            }
            None => jwe::encrypt(&payload, &recipients, None).await?,
        };

        let [recipient] = recipients;
        let result = PackResult {
            packed_msg: serde_json::to_string(&packed)?,
            from_kid: sender.map(|k| k.key_id().to_string()),
            to_kids: vec![recipient.key_id().to_string()],
            sign_from_kid: signer.map(|k| k.key_id().to_string()),
        };

        info!(
            message_id = %message.id,
            authcrypt = result.from_kid.is_some(),
            signed = result.sign_from_kid.is_some(),
            "Packed message"
        );
        Ok(result)
    }

    /// Decrypts with the first locally held recipient key that succeeds
    async fn decrypt_layer(
        &self,
        jwe: &Jwe,
        sender: Option<&PublicAgreementKey>,
    ) -> Result<(String, Vec<u8>)> {
        let protected = jwe::decode_protected(jwe)?;
        let kids: Vec<String> = jwe.recipients.iter().map(|r| r.header.kid.clone()).collect();
        let held = self.store.find_identifiers(&kids)?;
        if held.is_empty() {
            return Err(MessageError::NoLocalRecipientKey.into());
        }

        let mut last_error = None;
        for kid in held {
            let Some(record) = self.store.lookup(&kid)? else {
                continue;
            };
            let key = LocalAgentKey::agreement(record)?;
            match jwe::decrypt(jwe, &protected, &key, sender).await {
                Ok(plaintext) => return Ok((kid, plaintext)),
                Err(e) => {
                    debug!(kid = %kid, error = %e, "Recipient key failed to decrypt");
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| MessageError::NoLocalRecipientKey.into()))
    }

    async fn authcrypt_sender(&self, jwe: &Jwe) -> Result<(String, PublicAgreementKey)> {
        let protected = jwe::decode_protected(jwe)?;
        let skid = protected.skid.ok_or_else(|| {
            Error::InvalidEnvelope("Authcrypt message without skid".to_string())
        })?;
        let doc = self.resolve(split_did_url(&skid).0).await?;
        let method = doc.find_key_agreement(&skid).ok_or_else(|| {
            Error::KeyNotFound(format!("Sender key {} is not in its DID document", skid))
        })?;
        let key = PublicAgreementKey::from_verification_method(method)?;
        Ok((skid, key))
    }

    async fn verify_signature(&self, jws: &Jws) -> Result<(String, Vec<u8>)> {
        let kid = jws
            .signatures
            .first()
            .map(|s| s.header.kid.clone())
            .ok_or_else(|| Error::InvalidEnvelope("JWS without signatures".to_string()))?;
        let doc = self.resolve(split_did_url(&kid).0).await?;
        let method = doc.find_authentication(&kid).ok_or_else(|| {
            Error::KeyNotFound(format!("Signing key {} is not in its DID document", kid))
        })?;
        let key = PublicVerificationKey::from_verification_method(method)?;
        let payload = key.verify_jws(jws).await?;
        Ok((kid, payload))
    }

    /// Unpacks a message, verifying every layer it carries
    pub async fn unpack(&self, packed: &str) -> Result<UnpackResult> {
        let mut metadata = UnpackMetadata::default();
        let mut from_kid = None;
        let mut sign_from_kid = None;
        let mut recipient_kid = None;
        let mut to_kids = Vec::new();
        let mut outer: Option<Layer> = None;

        let mut envelope = Envelope::parse(packed)?;
        let message = loop {
            let layer = match &envelope {
                Envelope::Encrypted(jwe) => {
                    let protected = jwe::decode_protected(jwe)?;
                    match JweAlgorithm::from_header(&protected.alg) {
                        Some(JweAlgorithm::Ecdh1puA256kw) => Layer::Authcrypt,
                        _ => Layer::Anoncrypt,
                    }
                }
                Envelope::Signed(_) => Layer::Signed,
                Envelope::Plain(_) => Layer::Plaintext,
            };
            if let Some(outer) = outer {
                if layer <= outer {
                    return Err(MessageError::LayerOrder {
                        inner: layer,
                        outer,
                    }
                    .into());
                }
            }
            outer = Some(layer);
            debug!(layer = %layer, "Unpacking layer");

            let payload = match envelope {
                Envelope::Plain(message) => break message,
                Envelope::Encrypted(jwe) => {
                    let sender = if layer == Layer::Authcrypt {
                        let (skid, key) = self.authcrypt_sender(&jwe).await?;
                        from_kid = Some(skid);
                        Some(key)
                    } else {
                        None
                    };
                    let (kid, plaintext) = self.decrypt_layer(&jwe, sender.as_ref()).await?;
                    metadata.encrypted = true;
                    if layer == Layer::Authcrypt {
                        metadata.authenticated = true;
                    } else {
                        metadata.anonymous_sender = true;
                    }
                    to_kids = jwe.recipients.iter().map(|r| r.header.kid.clone()).collect();
                    recipient_kid = Some(kid);
                    plaintext
                }
                Envelope::Signed(jws) => {
                    let (kid, payload) = self.verify_signature(&jws).await?;
                    metadata.authenticated = true;
                    metadata.non_repudiation = true;
                    sign_from_kid = Some(kid);
                    payload
                }
            };

            let value: serde_json::Value = serde_json::from_slice(&payload).map_err(|e| {
                Error::InvalidEnvelope(format!("Decrypted payload is not JSON: {}", e))
            })?;
            envelope = Envelope::from_value(value)?;
        };

        for (layer, kid) in [
            (Layer::Authcrypt, &from_kid),
            (Layer::Signed, &sign_from_kid),
        ] {
            if let Some(kid) = kid {
                if message.from.as_deref() != Some(split_did_url(kid).0) {
                    return Err(MessageError::SenderMismatch {
                        claimed: message.from.clone(),
                        layer,
                        kid: kid.clone(),
                    }
                    .into());
                }
            }
        }
        if let Some(kid) = &recipient_kid {
            let did = split_did_url(kid).0;
            if !message.to.iter().any(|to| to == did) {
                return Err(MessageError::RecipientMismatch(did.to_string()).into());
            }
        }

        info!(
            message_id = %message.id,
            encrypted = metadata.encrypted,
            authenticated = metadata.authenticated,
            anonymous_sender = metadata.anonymous_sender,
            non_repudiation = metadata.non_repudiation,
            "Unpacked message"
        );

        Ok(UnpackResult {
            message,
            metadata,
            from_kid,
            to_kids,
            recipient_kid,
            sign_from_kid,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::did::MultiResolver;
    use assert_matches::assert_matches;

    #[test]
    fn test_layer_order() {
        assert!(Layer::Anoncrypt < Layer::Authcrypt);
        assert!(Layer::Authcrypt < Layer::Signed);
        assert!(Layer::Signed < Layer::Plaintext);
    }

    #[test]
    fn test_default_options_do_not_protect_sender() {
        assert!(!PackOptions::default().protect_sender_id);
        assert!(PackOptions::new().with_protect_sender_id(true).protect_sender_id);
    }

    #[tokio::test]
    async fn test_sign_without_sender_is_invalid_mode() {
        let composer = EnvelopeComposer::new(
            Arc::new(MultiResolver::default()),
            Arc::new(KeyMaterialStore::new()),
        );
        let result = composer
            .pack_text(
                "hi",
                "did:peer:2",
                None,
                Some("did:peer:0z6MkqRYqQiSgvZQdnBytw86Qbs2ZWUkGv22od935YF4s8M7V"),
                PackOptions::default(),
            )
            .await;
        assert_matches!(result, Err(Error::InvalidMode(_)));
    }

    #[tokio::test]
    async fn test_plaintext_unpacks_without_flags() {
        let composer = EnvelopeComposer::new(
            Arc::new(MultiResolver::default()),
            Arc::new(KeyMaterialStore::new()),
        );
        let message = PlainMessage::text("hi", None, "did:peer:2");
        let result = composer
            .unpack(&serde_json::to_string(&message).unwrap())
            .await
            .unwrap();
        assert_eq!(result.metadata, UnpackMetadata::default());
        assert_eq!(result.text(), Some("hi"));
        assert_eq!(result.sender_did(), None);
        assert_eq!(result.recipient_did(), Some("did:peer:2"));
    }
}
