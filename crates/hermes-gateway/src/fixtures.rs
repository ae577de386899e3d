//! Test fixtures for the gateway.
//!
//! [`MemoryPeer`] is an in-process [`UpstreamTransport`] with a togglable
//! online state and a per-object fetch log, so forwarding, graceful
//! degradation and graph-copy dedup can be asserted without a network.

use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;

use hermes_core::{
    BoxFuture, HermesError, HermesResult, JsonMergePatchService, PatchDocument, PatchService,
    QueryFilter, QueryResult, Resource,
};
use hermes_dispatch::ChildOperation;

use crate::transport::{ChildOutcome, Representation, UpstreamTransport};

/// In-memory peer server for tests.
#[derive(Default)]
pub struct MemoryPeer {
    objects: DashMap<(String, String), Resource>,
    related: DashMap<String, Vec<Resource>>,
    children: DashMap<String, Vec<Resource>>,
    online: AtomicBool,
    fetches: Mutex<Vec<String>>,
}

impl MemoryPeer {
    /// Creates an online peer with no objects.
    #[must_use]
    pub fn new() -> Self {
        let peer = Self::default();
        peer.online.store(true, Ordering::Release);
        peer
    }

    /// Inserts an object, stamping version `"1"` when untagged.
    pub fn seed(&self, mut resource: Resource) {
        if resource.version_id.is_none() {
            resource.version_id = Some("1".to_string());
        }
        if resource.last_modified.is_none() {
            resource.last_modified = Some(Utc::now());
        }
        self.objects.insert(
            (resource.resource_type.clone(), resource.id.clone()),
            resource,
        );
    }

    /// Registers a transactional record for a subject id.
    pub fn seed_related(&self, subject_id: &str, record: Resource) {
        self.related
            .entry(subject_id.to_string())
            .or_default()
            .push(record);
    }

    /// Toggles reachability.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::Release);
    }

    /// Returns every individual object fetch as `Type/id`.
    #[must_use]
    pub fn fetch_log(&self) -> Vec<String> {
        self.fetches.lock().clone()
    }

    /// Number of fetches issued for one object.
    #[must_use]
    pub fn fetch_count(&self, resource_type: &str, id: &str) -> usize {
        let key = format!("{resource_type}/{id}");
        self.fetches.lock().iter().filter(|f| **f == key).count()
    }

    fn log_fetch(&self, resource_type: &str, id: &str) {
        self.fetches.lock().push(format!("{resource_type}/{id}"));
    }

    fn require_online(&self) -> HermesResult<()> {
        if self.online.load(Ordering::Acquire) {
            Ok(())
        } else {
            Err(HermesError::gateway_unavailable("peer offline"))
        }
    }

    fn bump_version(resource: &mut Resource) {
        let next = resource
            .version_id
            .as_deref()
            .and_then(|v| v.parse::<u64>().ok())
            .map(|v| v + 1)
            .unwrap_or(1);
        resource.previous_version_id = resource.version_id.take();
        resource.version_id = Some(next.to_string());
        resource.last_modified = Some(Utc::now());
    }
}

impl UpstreamTransport for MemoryPeer {
    fn probe<'a>(&'a self) -> BoxFuture<'a, bool> {
        Box::pin(async move { self.online.load(Ordering::Acquire) })
    }

    fn fetch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        _version_id: Option<&'a str>,
        _representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            self.log_fetch(resource_type, id);
            self.objects
                .get(&(resource_type.to_string(), id.to_string()))
                .map(|r| r.clone())
                .ok_or_else(|| HermesError::not_found(resource_type, id))
        })
    }

    fn fetch_many<'a>(
        &'a self,
        resource_type: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>> {
        Box::pin(async move {
            self.require_online()?;
            let mut found = Vec::new();
            for id in ids {
                self.log_fetch(resource_type, id);
                if let Some(resource) = self
                    .objects
                    .get(&(resource_type.to_string(), id.clone()))
                {
                    found.push(resource.clone());
                }
            }
            Ok(found)
        })
    }

    fn create<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            let key = (resource_type.to_string(), payload.id.clone());
            if self.objects.contains_key(&key) && !update_if_exists {
                return Err(HermesError::validation(format!(
                    "{resource_type} '{}' already exists",
                    payload.id
                )));
            }
            let mut stored = payload.clone();
            Self::bump_version(&mut stored);
            self.objects.insert(key, stored.clone());
            Ok(stored)
        })
    }

    fn update<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            let key = (resource_type.to_string(), payload.id.clone());
            let current = self
                .objects
                .get(&key)
                .map(|r| r.clone())
                .ok_or_else(|| HermesError::not_found(resource_type, &payload.id))?;
            let mut stored = payload.clone();
            stored.version_id = current.version_id;
            Self::bump_version(&mut stored);
            self.objects.insert(key, stored.clone());
            Ok(stored)
        })
    }

    fn delete<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        _permanent: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            self.objects
                .remove(&(resource_type.to_string(), id.to_string()))
                .map(|(_, r)| r)
                .ok_or_else(|| HermesError::not_found(resource_type, id))
        })
    }

    fn search<'a>(
        &'a self,
        resource_type: &'a str,
        filter: &'a QueryFilter,
        _representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            self.require_online()?;
            let mut items: Vec<Resource> = self
                .objects
                .iter()
                .filter(|entry| entry.key().0 == resource_type)
                .map(|entry| entry.value().clone())
                .filter(|r| {
                    filter.params.iter().all(|(name, value)| {
                        r.body
                            .get(name)
                            .map(|v| match v {
                                serde_json::Value::String(s) => s == value,
                                other => other.to_string() == *value,
                            })
                            .unwrap_or(false)
                    })
                })
                .collect();
            items.sort_by(|a, b| a.id.cmp(&b.id));
            let total = items.len();
            Ok(QueryResult::new(items).with_total(total))
        })
    }

    fn history<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        _since: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            self.require_online()?;
            let current = self
                .objects
                .get(&(resource_type.to_string(), id.to_string()))
                .map(|r| r.clone())
                .ok_or_else(|| HermesError::not_found(resource_type, id))?;
            Ok(QueryResult::new(vec![current]).with_total(1))
        })
    }

    fn search_related<'a>(
        &'a self,
        _resource_type: &'a str,
        id: &'a str,
        page_size: usize,
        continuation: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>> {
        Box::pin(async move {
            self.require_online()?;
            let records = self
                .related
                .get(id)
                .map(|r| r.clone())
                .unwrap_or_default();
            let start: usize = continuation
                .and_then(|t| t.parse().ok())
                .unwrap_or(0);
            let page: Vec<Resource> = records
                .iter()
                .skip(start)
                .take(page_size)
                .cloned()
                .collect();
            let next = start + page.len();
            let mut result = QueryResult::new(page).with_total(records.len());
            if next < records.len() {
                result = result.with_continuation(next.to_string());
            }
            Ok(result)
        })
    }

    fn patch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        patch: &'a PatchDocument,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            let key = (resource_type.to_string(), id.to_string());
            let current = self
                .objects
                .get(&key)
                .map(|r| r.clone())
                .ok_or_else(|| HermesError::not_found(resource_type, id))?;
            let mut patched = JsonMergePatchService.apply(patch, &current, force)?;
            Self::bump_version(&mut patched);
            self.objects.insert(key, patched.clone());
            Ok(patched)
        })
    }

    fn patch_batch<'a>(
        &'a self,
        resource_type: &'a str,
        patches: &'a [(String, PatchDocument)],
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>> {
        Box::pin(async move {
            let mut updated = Vec::with_capacity(patches.len());
            for (id, patch) in patches {
                updated.push(self.patch(resource_type, id, patch, force).await?);
            }
            Ok(updated)
        })
    }

    fn child<'a>(
        &'a self,
        resource_type: &'a str,
        parent_id: Option<&'a str>,
        child_name: &'a str,
        operation: &'a ChildOperation,
    ) -> BoxFuture<'a, HermesResult<ChildOutcome>> {
        Box::pin(async move {
            self.require_online()?;
            let key = format!(
                "{resource_type}/{}/{child_name}",
                parent_id.unwrap_or("-")
            );
            match operation {
                ChildOperation::Get { child_id } => self
                    .children
                    .get(&key)
                    .and_then(|c| c.iter().find(|r| r.id == *child_id).cloned())
                    .map(ChildOutcome::Resource)
                    .ok_or_else(|| HermesError::not_found(child_name, child_id)),
                ChildOperation::Add { payload } => {
                    self.children
                        .entry(key)
                        .or_default()
                        .push(payload.clone());
                    Ok(ChildOutcome::Resource(payload.clone()))
                }
                ChildOperation::Remove { child_id } => {
                    let mut children = self
                        .children
                        .get_mut(&key)
                        .ok_or_else(|| HermesError::not_found(child_name, child_id))?;
                    let position = children
                        .iter()
                        .position(|r| r.id == *child_id)
                        .ok_or_else(|| HermesError::not_found(child_name, child_id))?;
                    Ok(ChildOutcome::Resource(children.remove(position)))
                }
                ChildOperation::Query { .. } => {
                    let items = self
                        .children
                        .get(&key)
                        .map(|c| c.clone())
                        .unwrap_or_default();
                    let total = items.len();
                    Ok(ChildOutcome::Page(QueryResult::new(items).with_total(total)))
                }
            }
        })
    }

    fn invoke<'a>(
        &'a self,
        _resource_type: &'a str,
        id: Option<&'a str>,
        operation: &'a str,
        params: &'a serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<Resource>> {
        Box::pin(async move {
            self.require_online()?;
            Ok(
                Resource::new("OperationResult", format!("{operation}-{}", id.unwrap_or("all")))
                    .with_body(params.clone()),
            )
        })
    }
}
