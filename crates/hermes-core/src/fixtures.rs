//! Test fixtures for Hermes development and testing.
//!
//! This module provides in-memory implementations of the engine's
//! collaborator contracts so dispatch and gateway behavior can be exercised
//! without real storage, policy or audit infrastructure.
//!
//! # Example
//!
//! ```
//! use hermes_core::fixtures::{patient, MemoryHandler};
//! use hermes_core::ResourceHandler;
//!
//! let handler = MemoryHandler::new("Patient");
//! handler.seed(patient("p-1"));
//! assert_eq!(handler.descriptor().type_name, "Patient");
//! ```

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cache::CachedResourceState;
use crate::envelope::Envelope;
use crate::error::{HermesError, HermesResult};
use crate::handler::{
    AssociationCapability, AssociationDescriptor, BoxFuture, DeleteOutcome, HandlerDescriptor,
    OperationCapability, ResourceHandler,
};
use crate::policy::PolicyGuard;
use crate::store::LocalStore;
use crate::types::{LinkKind, QueryFilter, QueryResult, Resource, ResourceReference};

/// Builds a sample patient object.
#[must_use]
pub fn patient(id: &str) -> Resource {
    Resource::new("Patient", id).with_body(serde_json::json!({
        "name": "Ada Lovelace",
        "birth_date": "1815-12-10",
        "active": true,
    }))
}

/// Builds a sample observation participating in a patient's record.
#[must_use]
pub fn observation(id: &str, patient_id: &str) -> Resource {
    Resource::new("Observation", id)
        .with_body(serde_json::json!({
            "code": "heart-rate",
            "value": 72,
        }))
        .with_link(
            LinkKind::Participation,
            ResourceReference::to("Patient", patient_id),
        )
}

/// In-memory [`ResourceHandler`] storing full version chains per object.
///
/// Version ids are small integers starting at `"1"`; each update appends a
/// new version carrying a `previous_version_id` pointer, so history
/// traversal can be exercised end to end.
pub struct MemoryHandler {
    descriptor: HandlerDescriptor,
    chains: DashMap<String, Vec<Resource>>,
    associations: Option<MemoryAssociations>,
    operations: Option<MemoryOperations>,
}

impl MemoryHandler {
    /// Creates a handler for a resource type with default descriptor.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            descriptor: HandlerDescriptor::new(resource_type),
            chains: DashMap::new(),
            associations: None,
            operations: None,
        }
    }

    /// Replaces the descriptor.
    #[must_use]
    pub fn with_descriptor(mut self, descriptor: HandlerDescriptor) -> Self {
        self.descriptor = descriptor;
        self
    }

    /// Attaches child associations.
    #[must_use]
    pub fn with_associations(mut self, associations: MemoryAssociations) -> Self {
        self.associations = Some(associations);
        self
    }

    /// Attaches custom operations.
    #[must_use]
    pub fn with_operations(mut self, operations: MemoryOperations) -> Self {
        self.operations = Some(operations);
        self
    }

    /// Inserts an object directly, stamping version `"1"` when untagged.
    pub fn seed(&self, mut resource: Resource) {
        if resource.version_id.is_none() {
            resource.version_id = Some("1".to_string());
        }
        if resource.last_modified.is_none() {
            resource.last_modified = Some(Utc::now());
        }
        self.chains.insert(resource.id.clone(), vec![resource]);
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    fn store_new_version(&self, mut payload: Resource) -> Resource {
        let mut entry = self.chains.entry(payload.id.clone()).or_default();
        let previous = entry.last().and_then(|r| r.version_id.clone());
        let next = entry.len() + 1;
        payload.version_id = Some(next.to_string());
        payload.previous_version_id = previous;
        payload.last_modified = Some(Utc::now());
        entry.push(payload.clone());
        payload
    }

    fn matches(filter: &QueryFilter, resource: &Resource) -> bool {
        filter.params.iter().all(|(name, value)| {
            resource
                .body
                .get(name)
                .map(|v| match v {
                    Value::String(s) => s == value,
                    other => other.to_string() == *value,
                })
                .unwrap_or(false)
        })
    }
}

impl ResourceHandler for MemoryHandler {
    fn descriptor(&self) -> &HandlerDescriptor {
        &self.descriptor
    }

    fn create<'a>(
        &'a self,
        payload: Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            if self.chains.contains_key(&payload.id) && !update_if_exists {
                return Err(HermesError::validation(format!(
                    "{} '{}' already exists",
                    self.descriptor.type_name, payload.id
                )));
            }
            Ok(self.store_new_version(payload))
        })
    }

    fn get<'a>(
        &'a self,
        id: &'a str,
        version_id: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let chain = self
                .chains
                .get(id)
                .ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))?;
            let found = match version_id {
                None => chain.last().cloned(),
                Some(v) => chain
                    .iter()
                    .find(|r| r.version_id.as_deref() == Some(v))
                    .cloned(),
            };
            found.ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))
        })
    }

    fn get_state<'a>(&'a self, id: &'a str) -> BoxFuture<'a, HermesResult<CachedResourceState>> {
        Box::pin(async move {
            let chain = self
                .chains
                .get(id)
                .ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))?;
            let current = chain
                .last()
                .ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))?;
            Ok(CachedResourceState::from_resource(current))
        })
    }

    fn update<'a>(&'a self, payload: Resource) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            if !self.chains.contains_key(&payload.id) {
                return Err(HermesError::not_found(
                    &self.descriptor.type_name,
                    &payload.id,
                ));
            }
            Ok(self.store_new_version(payload))
        })
    }

    fn delete<'a>(
        &'a self,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<DeleteOutcome>> {
        Box::pin(async move {
            let (_, chain) = self
                .chains
                .remove(id)
                .ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))?;
            let resource = chain
                .last()
                .cloned()
                .ok_or_else(|| HermesError::not_found(&self.descriptor.type_name, id))?;
            Ok(DeleteOutcome {
                resource,
                permanent,
            })
        })
    }

    fn query<'a>(&'a self, filter: &'a QueryFilter) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            let mut items: Vec<Resource> = self
                .chains
                .iter()
                .filter_map(|entry| entry.value().last().cloned())
                .filter(|r| Self::matches(filter, r))
                .collect();
            items.sort_by(|a, b| a.id.cmp(&b.id));
            let total = items.len();
            Ok(QueryResult::new(items).with_total(total))
        })
    }

    fn associations(&self) -> Option<&dyn AssociationCapability> {
        self.associations
            .as_ref()
            .map(|a| a as &dyn AssociationCapability)
    }

    fn operations(&self) -> Option<&dyn OperationCapability> {
        self.operations
            .as_ref()
            .map(|o| o as &dyn OperationCapability)
    }
}

/// In-memory child collections keyed by parent binding and child name.
#[derive(Default)]
pub struct MemoryAssociations {
    descriptors: Vec<AssociationDescriptor>,
    entries: DashMap<String, Vec<Resource>>,
}

impl MemoryAssociations {
    /// Creates an empty association set.
    #[must_use]
    pub fn new(descriptors: Vec<AssociationDescriptor>) -> Self {
        Self {
            descriptors,
            entries: DashMap::new(),
        }
    }

    fn key(parent_id: Option<&str>, name: &str) -> String {
        format!("{}::{name}", parent_id.unwrap_or("_class"))
    }

    /// Seeds a child object.
    pub fn seed(&self, parent_id: Option<&str>, name: &str, resource: Resource) {
        self.entries
            .entry(Self::key(parent_id, name))
            .or_default()
            .push(resource);
    }
}

impl AssociationCapability for MemoryAssociations {
    fn children(&self) -> &[AssociationDescriptor] {
        &self.descriptors
    }

    fn get_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        child_id: &'a str,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.entries
                .get(&Self::key(parent_id, name))
                .and_then(|children| children.iter().find(|c| c.id == child_id).cloned())
                .ok_or_else(|| HermesError::not_found(name, child_id))
        })
    }

    fn add_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        mut payload: Resource,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            if payload.version_id.is_none() {
                payload.version_id = Some("1".to_string());
            }
            payload.last_modified = Some(Utc::now());
            self.entries
                .entry(Self::key(parent_id, name))
                .or_default()
                .push(payload.clone());
            Ok(payload)
        })
    }

    fn remove_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        child_id: &'a str,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            let mut children = self
                .entries
                .get_mut(&Self::key(parent_id, name))
                .ok_or_else(|| HermesError::not_found(name, child_id))?;
            let position = children
                .iter()
                .position(|c| c.id == child_id)
                .ok_or_else(|| HermesError::not_found(name, child_id))?;
            Ok(children.remove(position))
        })
    }

    fn query_children<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        _filter: &'a QueryFilter,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            let items = self
                .entries
                .get(&Self::key(parent_id, name))
                .map(|children| children.clone())
                .unwrap_or_default();
            let total = items.len();
            Ok(QueryResult::new(items).with_total(total))
        })
    }
}

/// Closure-backed [`OperationCapability`].
pub struct MemoryOperations {
    names: Vec<String>,
    #[allow(clippy::type_complexity)]
    func: Box<dyn Fn(Option<&str>, &str, Value) -> HermesResult<Resource> + Send + Sync>,
}

impl MemoryOperations {
    /// Creates an operation set backed by one closure.
    pub fn new<F>(names: Vec<String>, func: F) -> Self
    where
        F: Fn(Option<&str>, &str, Value) -> HermesResult<Resource> + Send + Sync + 'static,
    {
        Self {
            names,
            func: Box::new(func),
        }
    }
}

impl OperationCapability for MemoryOperations {
    fn operation_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn invoke<'a>(
        &'a self,
        id: Option<&'a str>,
        name: &'a str,
        params: Value,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move { (self.func)(id, name, params) })
    }
}

/// In-memory [`LocalStore`] recording every bundle import.
#[derive(Default)]
pub struct MemoryStore {
    objects: DashMap<(String, String), Resource>,
    imports: Mutex<Vec<(Option<String>, usize)>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts an object directly.
    pub fn seed(&self, resource: Resource) {
        self.objects.insert(
            (resource.resource_type.clone(), resource.id.clone()),
            resource,
        );
    }

    /// Fetches a stored object.
    #[must_use]
    pub fn get(&self, resource_type: &str, id: &str) -> Option<Resource> {
        self.objects
            .get(&(resource_type.to_string(), id.to_string()))
            .map(|r| r.clone())
    }

    /// Number of stored objects.
    #[must_use]
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    /// Returns `true` when nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Returns the `(correlation_key, object_count)` of every import.
    #[must_use]
    pub fn imports(&self) -> Vec<(Option<String>, usize)> {
        self.imports.lock().clone()
    }
}

impl LocalStore for MemoryStore {
    fn contains<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, HermesResult<bool>> {
        Box::pin(async move {
            Ok(self
                .objects
                .contains_key(&(resource_type.to_string(), id.to_string())))
        })
    }

    fn insert_bundle<'a>(&'a self, bundle: Envelope) -> BoxFuture<'a, HermesResult<usize>> {
        Box::pin(async move {
            let count = bundle.items.len();
            for resource in bundle.items {
                self.seed(resource);
            }
            self.imports.lock().push((bundle.correlation_key, count));
            Ok(count)
        })
    }
}

/// Policy guard granting a fixed set of policies and recording demands.
#[derive(Default)]
pub struct StaticPolicyGuard {
    granted: HashSet<String>,
    demanded: Mutex<Vec<String>>,
}

impl StaticPolicyGuard {
    /// Creates a guard granting the given policy ids. `"*"` grants all.
    #[must_use]
    pub fn granting<I, S>(policies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: policies.into_iter().map(Into::into).collect(),
            demanded: Mutex::new(Vec::new()),
        }
    }

    /// Returns every policy id demanded so far.
    #[must_use]
    pub fn demanded(&self) -> Vec<String> {
        self.demanded.lock().clone()
    }
}

impl PolicyGuard for StaticPolicyGuard {
    fn demand(&self, policy_id: &str) -> HermesResult<()> {
        self.demanded.lock().push(policy_id.to_string());
        if self.granted.contains("*") || self.granted.contains(policy_id) {
            Ok(())
        } else {
            Err(HermesError::access_denied(policy_id))
        }
    }
}

/// Convenience: wraps a handler in an `Arc<dyn ResourceHandler>`.
#[must_use]
pub fn arc_handler(handler: MemoryHandler) -> Arc<dyn ResourceHandler> {
    Arc::new(handler)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_handler_versions() {
        let handler = MemoryHandler::new("Patient");
        let created = handler.create(patient("p-1"), false).await.unwrap();
        assert_eq!(created.version_id.as_deref(), Some("1"));

        let updated = handler
            .update(created.clone().with_body(serde_json::json!({"name": "Grace"})))
            .await
            .unwrap();
        assert_eq!(updated.version_id.as_deref(), Some("2"));
        assert_eq!(updated.previous_version_id.as_deref(), Some("1"));

        let old = handler.get("p-1", Some("1")).await.unwrap();
        assert_eq!(old.version_id.as_deref(), Some("1"));
    }

    #[tokio::test]
    async fn test_memory_handler_create_conflict() {
        let handler = MemoryHandler::new("Patient");
        handler.seed(patient("p-1"));
        assert!(handler.create(patient("p-1"), false).await.is_err());
        assert!(handler.create(patient("p-1"), true).await.is_ok());
    }

    #[tokio::test]
    async fn test_memory_handler_query_matches_body_fields() {
        let handler = MemoryHandler::new("Patient");
        handler.seed(patient("p-1"));
        handler.seed(
            Resource::new("Patient", "p-2").with_body(serde_json::json!({"name": "Grace Hopper"})),
        );

        let filter = QueryFilter::new().with_param("name", "Ada Lovelace");
        let result = handler.query(&filter).await.unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].id, "p-1");
    }

    #[tokio::test]
    async fn test_memory_store_records_imports() {
        let store = MemoryStore::new();
        let bundle = Envelope::new(vec![patient("p-1"), observation("o-1", "p-1")])
            .with_correlation_key("p-1");
        let written = store.insert_bundle(bundle).await.unwrap();
        assert_eq!(written, 2);
        assert!(store.contains("Patient", "p-1").await.unwrap());
        assert_eq!(store.imports(), vec![(Some("p-1".to_string()), 2)]);
    }

    #[test]
    fn test_static_policy_guard_records_demands() {
        let guard = StaticPolicyGuard::granting(["read-any"]);
        assert!(guard.demand("read-any").is_ok());
        assert!(guard.demand("write-any").is_err());
        assert_eq!(guard.demanded(), vec!["read-any", "write-any"]);
    }
}
