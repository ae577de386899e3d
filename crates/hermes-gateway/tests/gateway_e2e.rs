//! End-to-end gateway and graph-copy tests over in-memory collaborators.

use std::sync::Arc;

use parking_lot::Mutex;

use hermes_core::fixtures::{observation, patient, MemoryHandler, MemoryStore};
use hermes_core::{
    CacheClient, CallContext, HandlerDescriptor, HandlerRegistry, HermesError, InMemoryCache,
    LinkKind, QueryFilter, Resource, ResourceReference,
};
use hermes_dispatch::{Dispatcher, ProtocolService};
use hermes_gateway::fixtures::MemoryPeer;
use hermes_gateway::{CopyStage, ProgressListener, UpstreamGateway};

struct Harness {
    gateway: UpstreamGateway,
    peer: Arc<MemoryPeer>,
    cache: Arc<InMemoryCache>,
    store: Arc<MemoryStore>,
    patients: Arc<MemoryHandler>,
}

#[derive(Default)]
struct RecordingProgress {
    stages: Mutex<Vec<CopyStage>>,
}

impl ProgressListener for RecordingProgress {
    fn on_progress(&self, stage: CopyStage, _detail: &str) {
        self.stages.lock().push(stage);
    }
}

fn harness(auto_forward: bool) -> (Harness, Arc<RecordingProgress>) {
    let patients = Arc::new(
        MemoryHandler::new("Patient")
            .with_descriptor(HandlerDescriptor::new("Patient").as_subject()),
    );
    let encounters = Arc::new(MemoryHandler::new("Encounter"));
    let persons = Arc::new(MemoryHandler::new("Person"));
    let registry = Arc::new(
        HandlerRegistry::builder()
            .register(patients.clone())
            .register(encounters)
            .register(persons)
            .build(),
    );

    let cache = Arc::new(InMemoryCache::new());
    let dispatcher = Arc::new(
        Dispatcher::builder(registry.clone())
            .cache(cache.clone())
            .build(),
    );

    let peer = Arc::new(MemoryPeer::new());
    let store = Arc::new(MemoryStore::new());
    let progress = Arc::new(RecordingProgress::default());

    let gateway = UpstreamGateway::builder(
        dispatcher,
        peer.clone(),
        cache.clone(),
        store.clone(),
        registry,
    )
    .auto_forward(auto_forward)
    .copy_page_size(2)
    .progress(progress.clone())
    .build();

    (
        Harness {
            gateway,
            peer,
            cache,
            store,
            patients,
        },
        progress,
    )
}

fn ctx() -> CallContext {
    CallContext::new()
}

#[tokio::test]
async fn test_explicit_false_suppresses_auto_forward() {
    let (h, _) = harness(true);
    h.patients.seed(patient("p-1"));
    h.peer.seed(patient("p-1"));

    let response = h
        .gateway
        .read(&ctx().with_forward(false), "Patient", "p-1", None)
        .await
        .unwrap();
    assert!(!response.resource().unwrap().upstream_only);
    assert!(h.peer.fetch_log().is_empty(), "peer must not be contacted");
}

#[tokio::test]
async fn test_explicit_true_forces_forwarding() {
    let (h, _) = harness(false);
    h.peer.seed(patient("p-1"));

    let response = h
        .gateway
        .read(&ctx().with_forward(true), "Patient", "p-1", None)
        .await
        .unwrap();
    assert_eq!(response.resource().unwrap().id, "p-1");
    assert_eq!(h.peer.fetch_count("Patient", "p-1"), 1);
}

#[tokio::test]
async fn test_forward_header_flag_applies() {
    let (h, _) = harness(false);
    h.peer.seed(patient("p-1"));

    h.gateway
        .read(&ctx().with_forward_header(true), "Patient", "p-1", None)
        .await
        .unwrap();
    assert_eq!(h.peer.fetch_count("Patient", "p-1"), 1);
}

#[tokio::test]
async fn test_auto_forwarded_search_marks_upstream_only() {
    let (h, _) = harness(true);
    h.peer.seed(patient("p-1"));
    h.peer.seed(patient("p-2"));
    // p-1 exists locally, p-2 does not.
    h.store.seed(patient("p-1"));

    let response = h
        .gateway
        .search(&ctx(), "Patient", QueryFilter::new())
        .await
        .unwrap();
    let envelope = response.envelope().unwrap();
    assert_eq!(envelope.len(), 2);

    let p1 = envelope.items.iter().find(|r| r.id == "p-1").unwrap();
    let p2 = envelope.items.iter().find(|r| r.id == "p-2").unwrap();
    assert!(!p1.upstream_only);
    assert!(p2.upstream_only);
}

#[tokio::test]
async fn test_forwarded_read_caches_and_revalidates() {
    let (h, _) = harness(true);
    h.peer.seed(patient("p-1"));
    // The object is also stored locally so a revalidated repeat read can be
    // served without the peer.
    h.patients.seed(patient("p-1"));
    h.store.seed(patient("p-1"));

    let first = h.gateway.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    assert_eq!(first.version_id(), Some("1"));
    assert_eq!(h.peer.fetch_count("Patient", "p-1"), 1);
    assert_eq!(h.cache.get("p-1").unwrap().version_id.as_deref(), Some("1"));

    // Repeat read within the revalidation window stays local: no fetch and
    // no probe, so it succeeds even with the peer gone.
    h.peer.set_online(false);
    let second = h.gateway.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    assert_eq!(second.version_id(), Some("1"));
    assert_eq!(h.peer.fetch_count("Patient", "p-1"), 1);
}

#[tokio::test]
async fn test_elevated_read_skips_cache() {
    let (h, _) = harness(true);
    h.peer.seed(patient("p-1"));

    h.gateway
        .read(&ctx().with_elevated(), "Patient", "p-1", None)
        .await
        .unwrap();
    assert!(h.cache.get("p-1").is_none());
}

#[tokio::test]
async fn test_peer_loss_degrades_to_local_copy() {
    let (h, _) = harness(true);
    h.patients.seed(patient("p-1"));
    h.store.seed(patient("p-1"));
    // Prime the cache so the gateway knows the object.
    h.cache.put(hermes_core::CachedResourceState::new("p-1", "Patient").with_version("1"));

    // Peer is online but does not have the object.
    let response = h.gateway.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    assert_eq!(response.resource().unwrap().id, "p-1");
}

#[tokio::test]
async fn test_unreachable_peer_fails_fast() {
    let (h, _) = harness(true);
    h.peer.set_online(false);

    let err = h
        .gateway
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::GatewayUnavailable { .. }));
    assert!(h.peer.fetch_log().is_empty());
}

#[tokio::test]
async fn test_forwarded_update_invalidates_cache() {
    let (h, _) = harness(true);
    h.peer.seed(patient("p-1"));
    h.cache.put(hermes_core::CachedResourceState::new("p-1", "Patient").with_version("1"));

    let response = h
        .gateway
        .update(&ctx(), "Patient", "p-1", patient("p-1"))
        .await
        .unwrap();
    assert_eq!(response.version_id(), Some("2"));
    // Invalidate, never merge remote state into the cache.
    assert!(h.cache.get("p-1").is_none());
}

#[tokio::test]
async fn test_forwarded_delete_invalidates_cache() {
    let (h, _) = harness(true);
    h.peer.seed(patient("p-1"));
    h.cache.put(hermes_core::CachedResourceState::new("p-1", "Patient").with_version("1"));

    h.gateway
        .delete(&ctx(), "Patient", "p-1", false)
        .await
        .unwrap();
    assert!(h.cache.get("p-1").is_none());
}

#[tokio::test]
async fn test_copy_fetches_only_missing_references() {
    let (h, progress) = harness(false);

    // Root X references A (already local) and B (remote only), plus a
    // duplicate-of link that must be ignored.
    let root = patient("x")
        .with_link(LinkKind::Relationship, ResourceReference::to("Person", "a"))
        .with_link(LinkKind::Relationship, ResourceReference::to("Person", "b"))
        .with_link(LinkKind::DuplicateOf, ResourceReference::to("Patient", "d"));
    h.peer.seed(root);
    h.peer.seed(Resource::new("Person", "a"));
    h.peer.seed(Resource::new("Person", "b"));
    h.store.seed(Resource::new("Person", "a"));
    h.cache.put(hermes_core::CachedResourceState::new("x", "Patient").with_version("1"));

    let root = h.gateway.copy("Patient", "x").await.unwrap();
    assert_eq!(root.id, "x");

    // Exactly one fetch for the root and one for B; none for A or D.
    assert_eq!(h.peer.fetch_count("Patient", "x"), 1);
    assert_eq!(h.peer.fetch_count("Person", "b"), 1);
    assert_eq!(h.peer.fetch_count("Person", "a"), 0);
    assert_eq!(h.peer.fetch_count("Patient", "d"), 0);

    // The committed bundle is {X, B} with the root id as correlation key.
    assert_eq!(h.store.imports(), vec![(Some("x".to_string()), 2)]);
    assert!(h.store.get("Patient", "x").is_some());
    assert!(h.store.get("Person", "b").is_some());

    // The whole cache is cleared after commit.
    assert!(h.cache.is_empty());

    let stages = progress.stages.lock().clone();
    assert_eq!(
        stages,
        vec![
            CopyStage::Started,
            CopyStage::RootFetched,
            CopyStage::ReferencesFetched,
            CopyStage::RecordsFetched,
            CopyStage::Committed,
        ]
    );
}

#[tokio::test]
async fn test_copy_pages_subject_records_until_empty_page() {
    let (h, _) = harness(false);

    h.peer.seed(patient("x"));
    // Five transactional records, page size 2: three pages then exhaustion.
    for i in 0..5 {
        h.peer.seed_related("x", observation(&format!("o-{i}"), "x"));
    }
    // One record already stored locally must not be imported again.
    h.store.seed(observation("o-3", "x"));

    h.gateway.copy("Patient", "x").await.unwrap();

    let imports = h.store.imports();
    assert_eq!(imports.len(), 1);
    let (key, count) = &imports[0];
    assert_eq!(key.as_deref(), Some("x"));
    // Root + four records (o-3 was already local).
    assert_eq!(*count, 5);
    for i in [0usize, 1, 2, 4] {
        assert!(h.store.get("Observation", &format!("o-{i}")).is_some());
    }
}

#[tokio::test]
async fn test_copy_requires_reachable_peer() {
    let (h, _) = harness(false);
    h.peer.set_online(false);

    let err = h.gateway.copy("Patient", "x").await.unwrap_err();
    assert!(matches!(err, HermesError::GatewayUnavailable { .. }));
    assert!(h.store.imports().is_empty());
}

#[tokio::test]
async fn test_local_requests_untouched_without_signals() {
    let (h, _) = harness(false);
    h.patients.seed(patient("p-1"));

    let response = h.gateway.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    assert_eq!(response.resource().unwrap().id, "p-1");
    assert!(h.peer.fetch_log().is_empty());
}

#[tokio::test]
async fn test_forwarded_create_marks_upstream_only() {
    let (h, _) = harness(true);

    let response = h
        .gateway
        .create(&ctx(), "Patient", patient("p-9"), false)
        .await
        .unwrap();
    let created = response.resource().unwrap();
    assert_eq!(created.id, "p-9");
    // Created on the peer, not persisted locally.
    assert!(created.upstream_only);
}
