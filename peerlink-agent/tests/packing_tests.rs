// Tests for packing and unpacking between peer DIDs
//
// These tests verify:
// - The metadata reported for each mode
// - That invalid sender/signer combinations fail before encryption
// - That tampering and missing keys surface as distinct errors
// - That forged senders, misaddressed messages and misordered layers are rejected

use assert_matches::assert_matches;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use std::sync::Arc;

use peerlink_agent::agent_key::{KeyAgreementKey, SigningKey};
use peerlink_agent::crypto::jwe;
use peerlink_agent::local_agent_key::{LocalAgentKey, PublicAgreementKey};
use peerlink_agent::message::{Envelope, Jwe, JweProtected};
use peerlink_agent::{
    resolve_peer_did, EnvelopeComposer, Error, KeyMaterialStore, MultiResolver, PackOptions,
    PeerDIDBuilder, PlainMessage,
};

struct Party {
    did: String,
    store: Arc<KeyMaterialStore>,
    composer: EnvelopeComposer,
}

impl Party {
    /// The party's first key agreement key, with its private half
    fn agreement_key(&self) -> LocalAgentKey {
        let doc = resolve_peer_did(&self.did, Default::default()).unwrap();
        let record = self.store.lookup(&doc.key_agreement[0].id).unwrap().unwrap();
        LocalAgentKey::agreement(record).unwrap()
    }

    /// The party's first authentication key, with its private half
    fn signing_key(&self) -> LocalAgentKey {
        let doc = resolve_peer_did(&self.did, Default::default()).unwrap();
        let record = self.store.lookup(&doc.authentication[0].id).unwrap().unwrap();
        LocalAgentKey::signing(record).unwrap()
    }

    /// The party's first key agreement key as a recipient sees it
    fn public_agreement_key(&self) -> PublicAgreementKey {
        let doc = resolve_peer_did(&self.did, Default::default()).unwrap();
        PublicAgreementKey::from_verification_method(&doc.key_agreement[0]).unwrap()
    }
}

/// Creates a party with its own key store, holding one DID
async fn party(signing: usize, agreement: usize) -> Party {
    let resolver = Arc::new(MultiResolver::default());
    let store = Arc::new(KeyMaterialStore::new());
    let did = PeerDIDBuilder::new(resolver.clone(), store.clone())
        .build(signing, agreement, Some("https://my-endpoint"), &[])
        .await
        .unwrap();
    Party {
        did,
        composer: EnvelopeComposer::new(resolver, store.clone()),
        store,
    }
}

fn outer_protected(packed: &str) -> JweProtected {
    let jwe: Jwe = serde_json::from_str(packed).unwrap();
    let bytes = URL_SAFE_NO_PAD.decode(&jwe.protected).unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn test_anoncrypt_round_trip() {
    let bob = party(1, 1).await;

    let packed = bob
        .composer
        .pack_text("hello bob", &bob.did, None, None, PackOptions::default())
        .await
        .unwrap();
    assert_eq!(packed.from_kid, None);
    assert_eq!(outer_protected(&packed.packed_msg).alg, "ECDH-ES+A256KW");

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert_eq!(unpacked.text(), Some("hello bob"));
    assert!(unpacked.metadata.encrypted);
    assert!(unpacked.metadata.anonymous_sender);
    assert!(!unpacked.metadata.authenticated);
    assert!(!unpacked.metadata.non_repudiation);
    assert_eq!(unpacked.sender_did(), None);
    assert_eq!(unpacked.recipient_did(), Some(bob.did.as_str()));
}

#[tokio::test]
async fn test_authcrypt_round_trip() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text("hi", &bob.did, Some(&alice.did), None, PackOptions::default())
        .await
        .unwrap();
    let protected = outer_protected(&packed.packed_msg);
    assert_eq!(protected.alg, "ECDH-1PU+A256KW");
    assert_eq!(protected.skid, packed.from_kid);

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert!(unpacked.metadata.encrypted);
    assert!(unpacked.metadata.authenticated);
    assert!(!unpacked.metadata.anonymous_sender);
    assert!(!unpacked.metadata.non_repudiation);
    assert_eq!(unpacked.sender_did(), Some(alice.did.as_str()));
    assert_eq!(unpacked.from_kid, packed.from_kid);
}

#[tokio::test]
async fn test_protect_sender_id_hides_skid() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text(
            "hi",
            &bob.did,
            Some(&alice.did),
            None,
            PackOptions::new().with_protect_sender_id(true),
        )
        .await
        .unwrap();
    let protected = outer_protected(&packed.packed_msg);
    assert_eq!(protected.alg, "ECDH-ES+A256KW");
    assert_eq!(protected.skid, None);
    assert!(!packed.packed_msg.contains(&alice.did));

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert!(unpacked.metadata.authenticated);
    assert!(unpacked.metadata.anonymous_sender);
    assert_eq!(unpacked.sender_did(), Some(alice.did.as_str()));
}

#[tokio::test]
async fn test_signed_authcrypt_with_default_options() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text(
            "signed hello",
            &bob.did,
            Some(&alice.did),
            Some(&alice.did),
            PackOptions::default(),
        )
        .await
        .unwrap();
    assert!(packed.sign_from_kid.is_some());

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert_eq!(unpacked.text(), Some("signed hello"));
    assert!(unpacked.metadata.authenticated);
    assert!(unpacked.metadata.non_repudiation);
    assert!(!unpacked.metadata.anonymous_sender);
    assert_eq!(unpacked.sender_did(), Some(alice.did.as_str()));
    assert_eq!(unpacked.recipient_did(), Some(bob.did.as_str()));
    assert_eq!(unpacked.sign_from_kid, packed.sign_from_kid);
}

#[tokio::test]
async fn test_signer_without_sender_is_rejected() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let result = alice
        .composer
        .pack_text("hi", &bob.did, None, Some(&alice.did), PackOptions::default())
        .await;
    assert_matches!(result, Err(Error::InvalidMode(_)));
}

#[tokio::test]
async fn test_sender_keys_must_be_held_locally() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    // Bob's composer does not hold Alice's keys
    let result = bob
        .composer
        .pack_text("hi", &bob.did, Some(&alice.did), None, PackOptions::default())
        .await;
    assert_matches!(result, Err(Error::InvalidMode(_)));

    // A short form DID has no key agreement key to send from
    let signer_only = party(1, 0).await;
    let result = signer_only
        .composer
        .pack_text(
            "hi",
            &bob.did,
            Some(&signer_only.did),
            None,
            PackOptions::default(),
        )
        .await;
    assert_matches!(result, Err(Error::InvalidMode(_)));
}

#[tokio::test]
async fn test_recipient_without_agreement_key() {
    let alice = party(1, 1).await;
    let signer_only = party(1, 0).await;

    let result = alice
        .composer
        .pack_text("hi", &signer_only.did, None, None, PackOptions::default())
        .await;
    assert_matches!(result, Err(Error::KeyNotFound(_)));
}

#[tokio::test]
async fn test_designated_recipient_key() {
    let alice = party(1, 1).await;
    let bob = party(1, 2).await;

    let doc = peerlink_agent::resolve_peer_did(&bob.did, Default::default()).unwrap();
    let second = doc.key_agreement[1].id.clone();

    let packed = alice
        .composer
        .pack_text("hi", &second, Some(&alice.did), None, PackOptions::default())
        .await
        .unwrap();
    assert_eq!(packed.to_kids, vec![second.clone()]);

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert_eq!(unpacked.recipient_kid, Some(second));
}

#[tokio::test]
async fn test_tampered_ciphertext_is_a_crypto_failure() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text("hi", &bob.did, Some(&alice.did), None, PackOptions::default())
        .await
        .unwrap();
    let mut jwe: Jwe = serde_json::from_str(&packed.packed_msg).unwrap();
    let mut ciphertext = URL_SAFE_NO_PAD.decode(&jwe.ciphertext).unwrap();
    ciphertext[0] ^= 0x01;
    jwe.ciphertext = URL_SAFE_NO_PAD.encode(ciphertext);

    let result = bob
        .composer
        .unpack(&serde_json::to_string(&jwe).unwrap())
        .await;
    assert_matches!(result, Err(ref e) if e.is_crypto_failure());
}

#[tokio::test]
async fn test_unpack_without_recipient_key() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;
    let eve = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text("hi", &bob.did, Some(&alice.did), None, PackOptions::default())
        .await
        .unwrap();

    let result = eve.composer.unpack(&packed.packed_msg).await;
    assert_matches!(result, Err(Error::KeyNotFound(_)));
}

#[tokio::test]
async fn test_malformed_envelope() {
    let bob = party(1, 1).await;
    assert_matches!(
        bob.composer.unpack("{\"foo\":1}").await,
        Err(Error::InvalidEnvelope(_))
    );
    assert_matches!(
        Envelope::parse("definitely not json"),
        Err(Error::InvalidEnvelope(_))
    );
}

#[tokio::test]
async fn test_signed_authcrypt_inside_anoncrypt() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let packed = alice
        .composer
        .pack_text(
            "all layers",
            &bob.did,
            Some(&alice.did),
            Some(&alice.did),
            PackOptions::new().with_protect_sender_id(true),
        )
        .await
        .unwrap();
    let protected = outer_protected(&packed.packed_msg);
    assert_eq!(protected.alg, "ECDH-ES+A256KW");
    assert_eq!(protected.skid, None);

    let unpacked = bob.composer.unpack(&packed.packed_msg).await.unwrap();
    assert_eq!(unpacked.text(), Some("all layers"));
    assert!(unpacked.metadata.encrypted);
    assert!(unpacked.metadata.authenticated);
    assert!(unpacked.metadata.anonymous_sender);
    assert!(unpacked.metadata.non_repudiation);
    assert_eq!(unpacked.from_kid, packed.from_kid);
    assert_eq!(unpacked.sign_from_kid, packed.sign_from_kid);
    assert_eq!(unpacked.sender_did(), Some(alice.did.as_str()));
}

#[tokio::test]
async fn test_authcrypt_sender_must_match_from() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;
    let eve = party(1, 1).await;

    // Eve claims to be Alice but encrypts with her own key
    let message = PlainMessage::text("pay eve", Some(alice.did.as_str()), &bob.did);
    let payload = serde_json::to_vec(&message).unwrap();
    let eve_key = eve.agreement_key();
    let forged = jwe::encrypt(
        &payload,
        &[bob.public_agreement_key()],
        Some(&eve_key as &dyn KeyAgreementKey),
    )
    .await
    .unwrap();

    let result = bob
        .composer
        .unpack(&serde_json::to_string(&forged).unwrap())
        .await;
    assert_matches!(result, Err(Error::Cryptography(_)));
}

#[tokio::test]
async fn test_signer_must_match_from() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;
    let eve = party(1, 1).await;

    // Eve signs a message claiming Alice as its sender
    let message = PlainMessage::text("pay eve", Some(alice.did.as_str()), &bob.did);
    let jws = eve
        .signing_key()
        .create_jws(&serde_json::to_vec(&message).unwrap())
        .await
        .unwrap();
    let forged = jwe::encrypt(
        &serde_json::to_vec(&jws).unwrap(),
        &[bob.public_agreement_key()],
        None,
    )
    .await
    .unwrap();

    let result = bob
        .composer
        .unpack(&serde_json::to_string(&forged).unwrap())
        .await;
    assert_matches!(result, Err(Error::Cryptography(_)));
}

#[tokio::test]
async fn test_recipient_must_be_addressed() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;
    let carol = party(1, 1).await;

    // Addressed to Carol but encrypted for Bob
    let message = PlainMessage::text("for carol", Some(alice.did.as_str()), &carol.did);
    let packed = alice
        .composer
        .pack(&message, &bob.did, Some(&alice.did), None, PackOptions::default())
        .await
        .unwrap();

    let result = bob.composer.unpack(&packed.packed_msg).await;
    assert_matches!(result, Err(Error::Validation(_)));
}

#[tokio::test]
async fn test_anoncrypt_inside_authcrypt_is_rejected() {
    let alice = party(1, 1).await;
    let bob = party(1, 1).await;

    let message = PlainMessage::text("hi", Some(alice.did.as_str()), &bob.did);
    let recipients = [bob.public_agreement_key()];
    let inner = jwe::encrypt(&serde_json::to_vec(&message).unwrap(), &recipients, None)
        .await
        .unwrap();
    let alice_key = alice.agreement_key();
    let outer = jwe::encrypt(
        &serde_json::to_vec(&inner).unwrap(),
        &recipients,
        Some(&alice_key as &dyn KeyAgreementKey),
    )
    .await
    .unwrap();

    let result = bob
        .composer
        .unpack(&serde_json::to_string(&outer).unwrap())
        .await;
    assert_matches!(result, Err(Error::InvalidEnvelope(_)));
}
