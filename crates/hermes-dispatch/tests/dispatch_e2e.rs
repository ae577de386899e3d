//! End-to-end dispatch tests over in-memory collaborators.

use std::sync::Arc;

use hermes_core::fixtures::{
    observation, patient, MemoryAssociations, MemoryHandler, MemoryOperations, StaticPolicyGuard,
};
use hermes_core::{
    AssociationDescriptor, AuditOutcome, CacheClient, CallContext, ConditionalContext,
    HandlerDescriptor, HandlerRegistry, HermesError, InMemoryCache, LinkKind, ObjectLifecycle,
    PatchDocument, PolicyTable, QueryFilter, RecordingAuditSink, Resource, ResourceHandler,
    ResourceReference, RunState, RunStateHandle, Verb,
};
use hermes_dispatch::{ChildOperation, Dispatcher, ProtocolService};

struct Harness {
    dispatcher: Dispatcher,
    audit: Arc<RecordingAuditSink>,
    cache: Arc<InMemoryCache>,
    patients: Arc<MemoryHandler>,
}

fn harness() -> Harness {
    harness_with(|h| h)
}

fn harness_with(configure: impl FnOnce(MemoryHandler) -> MemoryHandler) -> Harness {
    let patients = Arc::new(configure(MemoryHandler::new("Patient")));
    let vocabulary = Arc::new(
        MemoryHandler::new("ValueSet")
            .with_descriptor(HandlerDescriptor::new("ValueSet").without_disclosure_audit()),
    );
    let persons = Arc::new(MemoryHandler::new("Person"));

    let registry = Arc::new(
        HandlerRegistry::builder()
            .register(patients.clone())
            .register(vocabulary)
            .register(persons)
            .build(),
    );

    let audit = Arc::new(RecordingAuditSink::new());
    let cache = Arc::new(InMemoryCache::new());
    let dispatcher = Dispatcher::builder(registry)
        .cache(cache.clone())
        .audit(audit.clone())
        .build();

    Harness {
        dispatcher,
        audit,
        cache,
        patients,
    }
}

fn ctx() -> CallContext {
    CallContext::new()
}

fn conditional(cond: ConditionalContext) -> CallContext {
    CallContext::new().with_conditional(cond)
}

#[tokio::test]
async fn test_unconditional_read_returns_tag_and_audits() {
    let h = harness();
    h.patients.seed(patient("p-1"));

    let response = h
        .dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .expect("read should succeed");

    assert_eq!(response.version_id(), Some("1"));
    assert!(response.last_modified().is_some());
    let resource = response.resource().expect("single resource");
    assert_eq!(resource.id, "p-1");

    // Cache was refreshed and exactly one successful audit was sent.
    assert_eq!(h.cache.get("p-1").unwrap().version_id.as_deref(), Some("1"));
    let records = h.audit.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].outcome, AuditOutcome::Success);
    assert_eq!(records[0].action, Verb::Read);
    assert_eq!(records[0].objects[0].lifecycle, ObjectLifecycle::Disclosure);
}

#[tokio::test]
async fn test_conditional_read_never_returns_body_for_current_tag() {
    let h = harness();
    h.patients.seed(patient("p-1"));

    let first = h
        .dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap();
    let tag = first.version_id().unwrap().to_string();

    let cond = conditional(ConditionalContext::new().with_if_none_match(&tag));
    let second = h
        .dispatcher
        .read(&cond, "Patient", "p-1", None)
        .await
        .unwrap();
    assert!(second.is_not_modified());
    assert!(second.resource().is_none());
    assert_eq!(second.version_id(), Some(tag.as_str()));

    // Unconditional read still observes the same tag while unchanged.
    let third = h
        .dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap();
    assert_eq!(third.version_id(), Some(tag.as_str()));
}

#[tokio::test]
async fn test_stale_if_match_rejects_update() {
    let h = harness();
    h.patients.seed(patient("p-1"));
    // Prime the cache with the current tag.
    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();

    let cond = conditional(ConditionalContext::new().with_if_match("v0"));
    let err = h
        .dispatcher
        .update(&cond, "Patient", "p-1", patient("p-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::PreconditionFailed { .. }));

    // The handler was never invoked: still at version 1.
    let current = h.patients.get("p-1", None).await.unwrap();
    assert_eq!(current.version_id.as_deref(), Some("1"));

    // Audit outcome is a minor failure.
    let last = h.audit.records().pop().unwrap();
    assert_eq!(last.outcome, AuditOutcome::MinorFail);
    assert_eq!(last.action, Verb::Update);
}

#[tokio::test]
async fn test_match_failure_precedence_on_writes() {
    let h = harness();
    h.patients.seed(patient("p-1"));
    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();

    // If-Match does not contain the current tag AND If-None-Match does:
    // the mutating request fails preconditions, it is never "not modified".
    let cond = conditional(
        ConditionalContext::new()
            .with_if_match("v0")
            .with_if_none_match("1"),
    );
    let err = h
        .dispatcher
        .update(&cond, "Patient", "p-1", patient("p-1"))
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::PreconditionFailed { .. }));
}

#[tokio::test]
async fn test_cache_invalidated_by_write() {
    let h = harness();
    h.patients.seed(patient("p-1"));
    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    assert_eq!(h.cache.get("p-1").unwrap().version_id.as_deref(), Some("1"));

    let updated = h
        .dispatcher
        .update(&ctx(), "Patient", "p-1", patient("p-1"))
        .await
        .unwrap();
    assert_eq!(updated.version_id(), Some("2"));

    // The pre-write tag is gone from the cache before the response returns;
    // a conditional read against the old tag must see the full body.
    assert_eq!(h.cache.get("p-1").unwrap().version_id.as_deref(), Some("2"));
    let cond = conditional(ConditionalContext::new().with_if_none_match("1"));
    let read = h
        .dispatcher
        .read(&cond, "Patient", "p-1", None)
        .await
        .unwrap();
    assert!(!read.is_not_modified());
    assert_eq!(read.version_id(), Some("2"));
}

#[tokio::test]
async fn test_delete_invalidates_cache_and_audits_lifecycle() {
    let h = harness();
    h.patients.seed(patient("p-1"));
    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();

    let response = h
        .dispatcher
        .delete(&ctx(), "Patient", "p-1", true)
        .await
        .unwrap();
    assert_eq!(response.resource().unwrap().id, "p-1");
    assert!(h.cache.get("p-1").is_none());

    let last = h.audit.records().pop().unwrap();
    assert_eq!(
        last.objects[0].lifecycle,
        ObjectLifecycle::PermanentErasure
    );

    let soft = harness();
    soft.patients.seed(patient("p-2"));
    soft.dispatcher
        .delete(&ctx(), "Patient", "p-2", false)
        .await
        .unwrap();
    let last = soft.audit.records().pop().unwrap();
    assert_eq!(last.objects[0].lifecycle, ObjectLifecycle::LogicalDeletion);
}

#[tokio::test]
async fn test_audit_suppressed_for_non_disclosure_reads() {
    let h = harness();
    // Seed through the handler registry path so versions exist.
    h.dispatcher
        .create(&ctx(), "ValueSet", Resource::new("ValueSet", "vs-1"), false)
        .await
        .unwrap();
    let after_create = h.audit.len();
    assert_eq!(after_create, 1, "create is still audited");

    h.dispatcher
        .read(&ctx(), "ValueSet", "vs-1", None)
        .await
        .unwrap();
    h.dispatcher
        .search(&ctx(), "ValueSet", QueryFilter::new())
        .await
        .unwrap();
    h.dispatcher
        .history(&ctx(), "ValueSet", "vs-1", None)
        .await
        .unwrap();
    assert_eq!(h.audit.len(), after_create, "read paths emit no audit");

    // Mutations of the same type are audited.
    h.dispatcher
        .update(&ctx(), "ValueSet", "vs-1", Resource::new("ValueSet", "vs-1"))
        .await
        .unwrap();
    assert_eq!(h.audit.len(), after_create + 1);
}

#[tokio::test]
async fn test_exactly_one_audit_per_operation() {
    let h = harness();
    h.patients.seed(patient("p-1"));

    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();
    h.dispatcher
        .update(&ctx(), "Patient", "p-1", patient("p-1"))
        .await
        .unwrap();
    h.dispatcher
        .read(&ctx(), "Patient", "ghost", None)
        .await
        .unwrap_err();
    h.dispatcher
        .search(&ctx(), "Patient", QueryFilter::new())
        .await
        .unwrap();

    assert_eq!(h.audit.len(), 4);
}

#[tokio::test]
async fn test_not_ready_rejects_without_audit() {
    let state = RunStateHandle::new();
    state.set(RunState::Draining);

    let patients = Arc::new(MemoryHandler::new("Patient"));
    let registry = Arc::new(HandlerRegistry::builder().register(patients).build());
    let audit = Arc::new(RecordingAuditSink::new());
    let dispatcher = Dispatcher::builder(registry)
        .audit(audit.clone())
        .state(state)
        .build();

    let err = dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::NotReady));
    assert!(audit.is_empty());
}

#[tokio::test]
async fn test_unknown_resource_type() {
    let h = harness();
    let err = h
        .dispatcher
        .read(&ctx(), "Imaginary", "x", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::ResourceTypeNotFound { .. }));
}

#[tokio::test]
async fn test_history_walks_chain_newest_first() {
    let h = harness();
    h.dispatcher
        .create(&ctx(), "Patient", patient("p-1"), false)
        .await
        .unwrap();
    h.dispatcher
        .update(&ctx(), "Patient", "p-1", patient("p-1"))
        .await
        .unwrap();
    h.dispatcher
        .update(&ctx(), "Patient", "p-1", patient("p-1"))
        .await
        .unwrap();

    let response = h
        .dispatcher
        .history(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap();
    let envelope = response.envelope().unwrap();
    let versions: Vec<_> = envelope
        .items
        .iter()
        .map(|r| r.version_id.as_deref().unwrap())
        .collect();
    assert_eq!(versions, vec!["3", "2", "1"]);

    // A `since` marker stops the walk before the marked version.
    let response = h
        .dispatcher
        .history(&ctx(), "Patient", "p-1", Some("1"))
        .await
        .unwrap();
    let versions: Vec<_> = response
        .envelope()
        .unwrap()
        .items
        .iter()
        .map(|r| r.version_id.as_deref().unwrap())
        .collect();
    assert_eq!(versions, vec!["3", "2"]);
}

#[tokio::test]
async fn test_patch_applies_through_update() {
    let h = harness();
    h.patients.seed(patient("p-1"));

    let patch = PatchDocument::new(serde_json::json!({"name": "Grace Hopper"}))
        .with_assert_version("1");
    let response = h
        .dispatcher
        .patch(&ctx(), "Patient", "p-1", patch, false)
        .await
        .unwrap();
    let resource = response.resource().unwrap();
    assert_eq!(resource.body["name"], "Grace Hopper");
    assert_eq!(resource.version_id.as_deref(), Some("2"));

    // Stale assertion is a recoverable, caller-correctable failure.
    let stale = PatchDocument::new(serde_json::json!({"name": "x"})).with_assert_version("1");
    let err = h
        .dispatcher
        .patch(&ctx(), "Patient", "p-1", stale.clone(), false)
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::PatchAssertionFailed { .. }));

    // Force bypasses the version assertion.
    h.dispatcher
        .patch(&ctx(), "Patient", "p-1", stale, true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_patch_batch_returns_one_envelope() {
    let h = harness();
    h.patients.seed(patient("p-1"));
    h.patients.seed(patient("p-2"));

    let patches = vec![
        (
            "p-1".to_string(),
            PatchDocument::new(serde_json::json!({"active": false})),
        ),
        (
            "p-2".to_string(),
            PatchDocument::new(serde_json::json!({"active": false})),
        ),
    ];
    let response = h
        .dispatcher
        .patch_batch(&ctx(), "Patient", patches, false)
        .await
        .unwrap();
    let envelope = response.envelope().unwrap();
    assert_eq!(envelope.len(), 2);
    assert!(envelope
        .items
        .iter()
        .all(|r| r.body["active"] == serde_json::json!(false)));
}

#[tokio::test]
async fn test_child_association_roundtrip() {
    let h = harness_with(|handler| {
        handler.with_associations(MemoryAssociations::new(vec![
            AssociationDescriptor::instance("identifiers"),
        ]))
    });
    h.patients.seed(patient("p-1"));
    h.dispatcher.read(&ctx(), "Patient", "p-1", None).await.unwrap();

    let added = h
        .dispatcher
        .child(
            &ctx(),
            "Patient",
            Some("p-1"),
            "identifiers",
            ChildOperation::Add {
                payload: Resource::new("Identifier", "mrn-1"),
            },
        )
        .await
        .unwrap();
    assert_eq!(added.resource().unwrap().id, "mrn-1");
    // Association mutation invalidates the parent's cache entry.
    assert!(h.cache.get("p-1").is_none());

    let fetched = h
        .dispatcher
        .child(
            &ctx(),
            "Patient",
            Some("p-1"),
            "identifiers",
            ChildOperation::Get {
                child_id: "mrn-1".to_string(),
            },
        )
        .await
        .unwrap();
    assert_eq!(fetched.resource().unwrap().id, "mrn-1");

    let listed = h
        .dispatcher
        .child(
            &ctx(),
            "Patient",
            Some("p-1"),
            "identifiers",
            ChildOperation::Query {
                filter: QueryFilter::new(),
            },
        )
        .await
        .unwrap();
    assert_eq!(listed.envelope().unwrap().len(), 1);

    h.dispatcher
        .child(
            &ctx(),
            "Patient",
            Some("p-1"),
            "identifiers",
            ChildOperation::Remove {
                child_id: "mrn-1".to_string(),
            },
        )
        .await
        .unwrap();

    let listed = h
        .dispatcher
        .child(
            &ctx(),
            "Patient",
            Some("p-1"),
            "identifiers",
            ChildOperation::Query {
                filter: QueryFilter::new(),
            },
        )
        .await
        .unwrap();
    assert!(listed.envelope().unwrap().is_empty());
}

#[tokio::test]
async fn test_child_scope_mismatch_is_not_found() {
    let h = harness_with(|handler| {
        handler.with_associations(MemoryAssociations::new(vec![
            AssociationDescriptor::instance("identifiers"),
        ]))
    });

    let err = h
        .dispatcher
        .child(
            &ctx(),
            "Patient",
            None,
            "identifiers",
            ChildOperation::Query {
                filter: QueryFilter::new(),
            },
        )
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::NotFound { .. }));
}

#[tokio::test]
async fn test_invoke_custom_operation() {
    let h = harness_with(|handler| {
        handler.with_operations(MemoryOperations::new(
            vec!["everything".to_string()],
            |id, _name, _params| {
                Ok(Resource::new("Bundle", format!("everything-{}", id.unwrap_or("all"))))
            },
        ))
    });

    let response = h
        .dispatcher
        .invoke(
            &ctx(),
            "Patient",
            Some("p-1"),
            "everything",
            serde_json::json!({}),
        )
        .await
        .unwrap();
    assert_eq!(response.resource().unwrap().id, "everything-p-1");

    let err = h
        .dispatcher
        .invoke(&ctx(), "Patient", None, "unknown", serde_json::json!({}))
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::NotFound { .. }));
}

#[tokio::test]
async fn test_policy_demand_denied_propagates() {
    let patients = Arc::new(MemoryHandler::new("Patient").with_descriptor(
        HandlerDescriptor::new("Patient")
            .with_policies(PolicyTable::new().declare(Verb::Read, "read-phi")),
    ));
    patients.seed(patient("p-1"));

    let registry = Arc::new(HandlerRegistry::builder().register(patients).build());
    let audit = Arc::new(RecordingAuditSink::new());
    let guard = Arc::new(StaticPolicyGuard::granting(Vec::<String>::new()));
    let dispatcher = Dispatcher::builder(registry)
        .audit(audit.clone())
        .policy(guard.clone())
        .build();

    let err = dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .unwrap_err();
    assert!(matches!(err, HermesError::AccessDenied { .. }));
    assert_eq!(guard.demanded(), vec!["read-phi"]);

    let last = audit.records().pop().unwrap();
    assert_eq!(last.outcome, AuditOutcome::MinorFail);
}

#[tokio::test]
async fn test_override_policy_narrows_demands() {
    let table = PolicyTable::new()
        .declare(Verb::Read, "read-any")
        .declare_override(Verb::Read, "break-glass");
    let patients = Arc::new(
        MemoryHandler::new("Patient")
            .with_descriptor(HandlerDescriptor::new("Patient").with_policies(table)),
    );
    patients.seed(patient("p-1"));

    let registry = Arc::new(HandlerRegistry::builder().register(patients).build());
    let guard = Arc::new(StaticPolicyGuard::granting(["break-glass"]));
    let dispatcher = Dispatcher::builder(registry).policy(guard.clone()).build();

    dispatcher
        .read(&ctx(), "Patient", "p-1", None)
        .await
        .expect("override demand granted");
    // Only the override-marked demand was enforced.
    assert_eq!(guard.demanded(), vec!["break-glass"]);
}

#[tokio::test]
async fn test_read_with_related_expands_references() {
    let h = harness();
    let linked = patient("p-1").with_link(
        LinkKind::Relationship,
        ResourceReference::to("Person", "person-1"),
    );
    h.patients.seed(linked);

    let persons = h.dispatcher.registry();
    let person_handler = persons.resolve("Person").unwrap();
    person_handler
        .create(Resource::new("Person", "person-1"), false)
        .await
        .unwrap();

    let response = h
        .dispatcher
        .read(&ctx().with_related(), "Patient", "p-1", None)
        .await
        .unwrap();
    let envelope = response.envelope().unwrap();
    assert_eq!(envelope.len(), 2);
    assert_eq!(envelope.items[0].id, "p-1");
    assert_eq!(envelope.items[1].id, "person-1");
}

#[tokio::test]
async fn test_search_pages_and_projects() {
    let h = harness();
    for i in 0..5 {
        h.patients.seed(patient(&format!("p-{i}")));
    }

    let mut filter = QueryFilter::new().with_offset(1).with_count(2);
    filter.include_paths = vec!["name".to_string()];
    let response = h.dispatcher.search(&ctx(), "Patient", filter).await.unwrap();
    let envelope = response.envelope().unwrap();
    assert_eq!(envelope.len(), 2);
    assert_eq!(envelope.offset, 1);
    assert_eq!(envelope.total, 5);
    assert!(envelope.items[0].body.get("birth_date").is_none());
}
