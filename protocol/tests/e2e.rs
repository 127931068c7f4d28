//! End-to-end integration tests for the Moniker protocol.
//!
//! These tests wire real bootstrap nodes together over a shared in-memory
//! substrate and drive them only through the public API: identities are
//! generated, records are mined and signed, submitted, gossiped, resolved
//! through the fallback chain and restored from disk.
//!
//! Names are at least seven characters so the fixed-cost proofs stay cheap;
//! V2 records are mined against a tiny memory-hard schedule that every
//! verifier in these tests shares.

use std::sync::Arc;
use std::time::Duration;

use moniker_protocol::config::unix_millis;
use moniker_protocol::identity::keyfile::{export_identity, import_identity};
use moniker_protocol::identity::{generate_keypair, Identity, KeyKind};
use moniker_protocol::network::{
    BootstrapClient, BootstrapConfig, BootstrapNode, LocalBootstrapClient, ResolutionSource,
    Resolver, ResolverConfig, SubmitRequest, Substrate, UpsertOutcome,
};
use moniker_protocol::pow::{
    DifficultyParams, FixedCostPow, MemoryHardPow, MemoryHardSchedule, SearchControl,
};
use moniker_protocol::record::{NameRecord, RecordBuilder};
use moniker_protocol::storage::IndexDb;
use moniker_protocol::verify::RecordVerifier;
use moniker_protocol::ErrorClass;

// ---------------------------------------------------------------------------
// Test Helpers
// ---------------------------------------------------------------------------

fn tiny_schedule() -> MemoryHardSchedule {
    MemoryHardSchedule::uniform(DifficultyParams::MemoryHard {
        leading_zero_bits: 2,
        memory_kib: 64,
        iterations: 1,
    })
}

fn verifier() -> RecordVerifier {
    RecordVerifier::new(tiny_schedule())
}

fn mine(identity: &Identity, builder: RecordBuilder) -> NameRecord {
    match identity {
        Identity::Legacy(_) => builder.build(identity, &FixedCostPow, &SearchControl::default()),
        Identity::Hybrid(_) => builder.build(
            identity,
            &MemoryHardPow::new(tiny_schedule()),
            &SearchControl::default(),
        ),
    }
    .expect("mining a test record")
}

fn record(kind: KeyKind, name: &str) -> (Identity, NameRecord) {
    let identity = generate_keypair(kind, None).expect("keygen");
    let record = mine(&identity, RecordBuilder::new(name, format!("bafy-{name}")));
    (identity, record)
}

fn node(id: &str, substrate: &Substrate, db: Option<IndexDb>) -> Arc<BootstrapNode> {
    Arc::new(BootstrapNode::new(
        BootstrapConfig {
            node_id: id.to_string(),
            ..BootstrapConfig::default()
        },
        verifier(),
        substrate.clone(),
        db,
    ))
}

/// Poll `check` until it holds or five seconds pass.
async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

// ---------------------------------------------------------------------------
// Propagation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn submission_gossips_to_every_node() {
    let substrate = Substrate::in_memory();
    let a = node("node-a", &substrate, None);
    let b = node("node-b", &substrate, None);
    let c = node("node-c", &substrate, None);
    for n in [&a, &b, &c] {
        n.start().await.unwrap();
    }

    let (_, legacy) = record(KeyKind::Legacy, "gossip-legacy");
    let (_, quantum) = record(KeyKind::Hybrid, "gossip-quantum");
    a.submit(SubmitRequest::new(&legacy), Some(1)).await.unwrap();
    a.submit(SubmitRequest::new(&quantum), Some(2)).await.unwrap();

    assert!(eventually(|| b.index().len() == 2 && c.index().len() == 2).await);
    assert_eq!(c.lookup("gossip-quantum").unwrap().record(), &quantum);

    for n in [&a, &b, &c] {
        n.shutdown().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn chained_update_propagates() {
    let substrate = Substrate::in_memory();
    let a = node("node-a", &substrate, None);
    let b = node("node-b", &substrate, None);
    a.start().await.unwrap();
    b.start().await.unwrap();

    let (identity, first) = record(KeyKind::Hybrid, "update-chain");
    a.submit(SubmitRequest::new(&first), None).await.unwrap();
    assert!(eventually(|| b.lookup("update-chain").is_some()).await);

    let second = mine(
        &identity,
        RecordBuilder::new("update-chain", "bafy-second")
            .update_of(&first)
            .unwrap(),
    );
    a.submit(SubmitRequest::new(&second), None).await.unwrap();
    assert!(eventually(|| b
        .lookup("update-chain")
        .map(|r| r.revision() == 1)
        .unwrap_or(false))
    .await);

    a.shutdown().await;
    b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Resolution
// ---------------------------------------------------------------------------

#[tokio::test]
async fn client_resolves_through_bootstrap_then_cache() {
    let network = Substrate::in_memory();
    let node = node("node-a", &network, None);
    let (_, rec) = record(KeyKind::Legacy, "fallback-name");
    node.submit(SubmitRequest::new(&rec), None).await.unwrap();

    // The client has its own, empty substrate: only the peer knows the name.
    let own = Substrate::in_memory();
    let resolver = Resolver::new(
        ResolverConfig::default(),
        Arc::new(verifier()),
        own.content,
        own.dht,
        own.pubsub,
    );
    resolver.add_peer(Arc::new(LocalBootstrapClient::new(Arc::clone(&node))));

    let first = resolver.resolve("fallback-name").await.unwrap();
    assert_eq!(first.source, ResolutionSource::Bootstrap);
    assert_eq!(first.record.record(), &rec);

    let second = resolver.resolve("FALLBACK-NAME").await.unwrap();
    assert_eq!(second.source, ResolutionSource::Cache);
}

#[tokio::test]
async fn client_resolves_from_shared_dht() {
    let network = Substrate::in_memory();
    let node = node("node-a", &network, None);
    let (_, rec) = record(KeyKind::Hybrid, "dht-shared");
    node.submit(SubmitRequest::new(&rec), None).await.unwrap();

    let resolver = Resolver::new(
        ResolverConfig::default(),
        Arc::new(verifier()),
        network.content.clone(),
        network.dht.clone(),
        network.pubsub.clone(),
    );
    let resolution = resolver.resolve("dht-shared").await.unwrap();
    assert_eq!(resolution.source, ResolutionSource::Dht);
    assert!(resolution.record.is_quantum());
}

#[tokio::test]
async fn register_pushes_to_every_peer() {
    let network = Substrate::in_memory();
    let a = node("node-a", &network, None);
    let b = node("node-b", &network, None);

    let resolver = Resolver::new(
        ResolverConfig::default(),
        Arc::new(verifier()),
        network.content.clone(),
        network.dht.clone(),
        network.pubsub.clone(),
    );
    resolver.add_peer(Arc::new(LocalBootstrapClient::new(Arc::clone(&a))));
    resolver.add_peer(Arc::new(LocalBootstrapClient::new(Arc::clone(&b))));

    let (_, rec) = record(KeyKind::Legacy, "pushed-name");
    let receipt = resolver.register(rec.clone()).await.unwrap();
    assert_eq!(receipt.peers_accepted, 2);
    assert_eq!(receipt.peers_failed, 0);
    assert!(a.lookup("pushed-name").is_some());
    assert!(b.lookup("pushed-name").is_some());

    // A second owner cannot take the name on either node.
    let (_, rival) = record(KeyKind::Legacy, "pushed-name");
    let response = LocalBootstrapClient::new(Arc::clone(&a))
        .submit(&SubmitRequest::new(&rival))
        .await
        .unwrap();
    assert!(!response.accepted);
    assert_eq!(response.class, Some(ErrorClass::NameTaken));
}

// ---------------------------------------------------------------------------
// Nonces
// ---------------------------------------------------------------------------

#[tokio::test]
async fn nonce_flow_over_the_client_trait() {
    let network = Substrate::in_memory();
    let node = Arc::new(BootstrapNode::new(
        BootstrapConfig {
            require_nonce: true,
            ..BootstrapConfig::default()
        },
        verifier(),
        network,
        None,
    ));
    let client = LocalBootstrapClient::new(Arc::clone(&node));
    let (identity, rec) = record(KeyKind::Legacy, "nonce-flow");
    let owner = identity.classical();

    let issued = client.request_nonce(&owner.public_key()).await.unwrap();
    assert!(issued.expires_at > unix_millis());

    let request = SubmitRequest::new(&rec)
        .with_nonce(&rec, owner, issued.nonce)
        .unwrap();
    assert!(client.submit(&request).await.unwrap().accepted);

    let replay = client.submit(&request).await.unwrap();
    assert!(!replay.accepted);
    assert_eq!(replay.class, Some(ErrorClass::ReplayDetected));
    assert_eq!(node.stats().replay_attempts, 1);
}

// ---------------------------------------------------------------------------
// Persistence and start-up
// ---------------------------------------------------------------------------

#[tokio::test]
async fn restart_restores_from_disk_and_peers() {
    let dir = tempfile::tempdir().unwrap();
    let network = Substrate::in_memory();

    let (_, stored) = record(KeyKind::Legacy, "stored-name");
    {
        let db = IndexDb::open(dir.path()).unwrap();
        let first = node("node-a", &network, Some(db));
        first.submit(SubmitRequest::new(&stored), None).await.unwrap();
        first.shutdown().await;
    }

    // A peer learned another name while we were down.
    let peer = node("node-b", &network, None);
    let (_, missed) = record(KeyKind::Hybrid, "missed-name");
    peer.submit(SubmitRequest::new(&missed), None).await.unwrap();

    let restarted = node("node-a", &network, Some(IndexDb::open(dir.path()).unwrap()));
    restarted
        .resolver()
        .add_peer(Arc::new(LocalBootstrapClient::new(Arc::clone(&peer))));
    let report = restarted.sync_on_startup().await.unwrap();

    assert_eq!(report.restored, 1);
    assert_eq!(report.pulled, 1);
    assert_eq!(report.rejected, 0);
    assert!(restarted.lookup("stored-name").is_some());
    assert!(restarted.lookup("missed-name").is_some());
}

#[tokio::test]
async fn key_file_identity_registers() {
    let identity = generate_keypair(KeyKind::Hybrid, None).unwrap();
    let sealed = export_identity(&identity, Some("correct horse")).unwrap();
    let restored = import_identity(&sealed, Some("correct horse")).unwrap();
    assert!(import_identity(&sealed, Some("wrong")).is_err());

    let rec = mine(&restored, RecordBuilder::new("keyfile-name", "bafy-keyfile"));
    assert_eq!(rec.did(), &identity.did());

    let node = node("node-a", &Substrate::in_memory(), None);
    let outcome = node.submit(SubmitRequest::new(&rec), Some(2)).await.unwrap();
    assert_eq!(outcome.index, UpsertOutcome::Inserted);
}
