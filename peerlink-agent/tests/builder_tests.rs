// Tests for peer DID creation
//
// These tests cover:
// - Choosing between the short and long form
// - Storing one key per verification method under the method id
// - Service blocks with and without routing keys

use std::sync::Arc;

use peerlink_agent::did::{DIDResolver, MultiResolver, VerificationMaterialFormat};
use peerlink_agent::{is_peer_did, KeyKind, KeyMaterialStore, PeerDIDBuilder};

fn builder() -> (PeerDIDBuilder, Arc<MultiResolver>, Arc<KeyMaterialStore>) {
    let resolver = Arc::new(MultiResolver::default());
    let store = Arc::new(KeyMaterialStore::new());
    (
        PeerDIDBuilder::new(resolver.clone(), store.clone()),
        resolver,
        store,
    )
}

#[tokio::test]
async fn test_algorithm_selection() {
    let (builder, _, _) = builder();

    let cases: [(usize, usize, Option<&str>, &str); 6] = [
        (1, 0, None, "did:peer:0"),
        (1, 0, Some("https://my-endpoint"), "did:peer:2"),
        (1, 1, None, "did:peer:2"),
        (2, 0, None, "did:peer:2"),
        (0, 1, None, "did:peer:2"),
        (0, 0, Some("https://my-endpoint"), "did:peer:2"),
    ];

    for (signing, agreement, endpoint, prefix) in cases {
        let did = builder.build(signing, agreement, endpoint, &[]).await.unwrap();
        assert!(
            did.starts_with(prefix),
            "{} signing, {} agreement, endpoint {:?} gave {}",
            signing,
            agreement,
            endpoint,
            did
        );
        assert!(is_peer_did(&did));
    }
}

#[tokio::test]
async fn test_identifiers_match_resolved_document() {
    let (builder, resolver, store) = builder();

    let did = builder.build(2, 3, None, &[]).await.unwrap();
    let ids = store.list_identifiers().unwrap();
    assert_eq!(ids.len(), 5);
    assert!(ids.iter().all(|id| id.starts_with(&format!("{}#", did))));

    let doc = resolver
        .resolve(&did, VerificationMaterialFormat::Jwk)
        .await
        .unwrap();
    assert_eq!(doc.authentication.len(), 2);
    assert_eq!(doc.key_agreement.len(), 3);

    for method in &doc.authentication {
        let record = store.lookup(&method.id).unwrap().unwrap();
        assert_eq!(record.kind(), KeyKind::Signing);
        assert_eq!(record.public_key().to_vec(), method.public_key().unwrap().1);
    }
    for method in &doc.key_agreement {
        let record = store.lookup(&method.id).unwrap().unwrap();
        assert_eq!(record.kind(), KeyKind::Agreement);
        assert_eq!(record.public_key().to_vec(), method.public_key().unwrap().1);
    }
}

#[tokio::test]
async fn test_short_form_document() {
    let (builder, resolver, store) = builder();

    let did = builder.build(1, 0, None, &[]).await.unwrap();
    let doc = resolver
        .resolve(&did, VerificationMaterialFormat::Multibase)
        .await
        .unwrap();
    assert_eq!(doc.id, did);
    assert_eq!(doc.authentication.len(), 1);
    assert!(doc.key_agreement.is_empty());
    assert!(doc.service.is_empty());
    assert_eq!(store.list_identifiers().unwrap(), doc.authentication_ids());
}

#[tokio::test]
async fn test_no_keys_gives_bare_long_form() {
    let (builder, resolver, store) = builder();

    let did = builder.build(0, 0, None, &[]).await.unwrap();
    assert_eq!(did, "did:peer:2");
    assert!(store.is_empty().unwrap());

    let doc = resolver
        .resolve(&did, VerificationMaterialFormat::Jwk)
        .await
        .unwrap();
    assert!(doc.authentication.is_empty());
    assert!(doc.key_agreement.is_empty());
}

#[tokio::test]
async fn test_service_without_routing_keys() {
    let (builder, resolver, _) = builder();

    let did = builder
        .build(1, 1, Some("https://my-endpoint"), &[])
        .await
        .unwrap();
    let doc = resolver
        .resolve(&did, VerificationMaterialFormat::Jwk)
        .await
        .unwrap();

    assert_eq!(doc.service.len(), 1);
    let service = &doc.service[0];
    assert_eq!(service.service_endpoint, "https://my-endpoint");
    assert_eq!(service.accept, vec!["didcomm/v2".to_string()]);
    assert_eq!(service.routing_keys, None);

    let json = serde_json::to_value(&doc).unwrap();
    assert!(json["service"][0].get("routingKeys").is_none());
}

#[tokio::test]
async fn test_service_with_routing_keys() {
    let (builder, resolver, _) = builder();
    let routing_keys = vec!["key1".to_string(), "key2".to_string()];

    let did = builder
        .build(1, 1, Some("https://my-endpoint"), &routing_keys)
        .await
        .unwrap();
    let doc = resolver
        .resolve(&did, VerificationMaterialFormat::Jwk)
        .await
        .unwrap();

    let service = doc.didcomm_service().unwrap();
    assert_eq!(service.routing_keys, Some(routing_keys));
}

#[tokio::test]
async fn test_each_call_generates_fresh_keys() {
    let (builder, _, store) = builder();

    let a = builder.build(1, 1, None, &[]).await.unwrap();
    let b = builder.build(1, 1, None, &[]).await.unwrap();
    assert_ne!(a, b);
    assert_eq!(store.len().unwrap(), 4);
}
