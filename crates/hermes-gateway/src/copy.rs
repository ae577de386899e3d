//! Graph copy engine.
//!
//! Pulls one remote object plus the closure of its directly referenced
//! graph into local storage as a single transactional bundle keyed by the
//! root id. No id is fetched twice within one copy, duplicate-of links are
//! skipped, and subject-like roots additionally page through their
//! remotely-known transactional records until an empty page.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use hermes_core::{
    CacheClient, Envelope, HandlerRegistry, HermesError, HermesResult, LocalStore, Resource,
};

use crate::transport::{Representation, UpstreamTransport};

/// Coarse milestones reported while a copy runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyStage {
    /// The copy was accepted.
    Started,
    /// The root object was fetched from the peer.
    RootFetched,
    /// The root's referenced objects were fetched.
    ReferencesFetched,
    /// The subject's transactional records were fetched.
    RecordsFetched,
    /// The bundle was committed to local storage.
    Committed,
}

/// Receives copy progress milestones.
pub trait ProgressListener: Send + Sync {
    /// Reports one milestone.
    fn on_progress(&self, stage: CopyStage, detail: &str);
}

/// A listener that ignores progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressListener for NoopProgress {
    fn on_progress(&self, _stage: CopyStage, _detail: &str) {}
}

/// Copies a remote object graph into local storage.
pub struct GraphCopyEngine {
    transport: Arc<dyn UpstreamTransport>,
    store: Arc<dyn LocalStore>,
    cache: Arc<dyn CacheClient>,
    registry: Arc<HandlerRegistry>,
    page_size: usize,
    progress: Arc<dyn ProgressListener>,
}

impl GraphCopyEngine {
    /// Creates an engine over the given collaborators.
    #[must_use]
    pub fn new(
        transport: Arc<dyn UpstreamTransport>,
        store: Arc<dyn LocalStore>,
        cache: Arc<dyn CacheClient>,
        registry: Arc<HandlerRegistry>,
    ) -> Self {
        Self {
            transport,
            store,
            cache,
            registry,
            page_size: 100,
            progress: Arc::new(NoopProgress),
        }
    }

    /// Sets the transactional-record page size.
    #[must_use]
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Sets the progress listener.
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = progress;
        self
    }

    /// Copies one remote object and its referenced graph.
    ///
    /// Returns the root object. The accumulated bundle commits as one
    /// transaction with `correlation_key` equal to the root id, and the
    /// whole cache is cleared afterwards since an unknown number of cached
    /// aggregates may reference the imported graph.
    pub async fn copy(&self, resource_type: &str, id: &str) -> HermesResult<Resource> {
        if !self.transport.probe().await {
            return Err(HermesError::gateway_unavailable(
                "graph copy requires a reachable peer",
            ));
        }
        self.progress
            .on_progress(CopyStage::Started, &format!("{resource_type}/{id}"));

        let root = self
            .transport
            .fetch(resource_type, id, None, &Representation::Canonical)
            .await?;
        self.cache.invalidate(id);
        self.progress
            .on_progress(CopyStage::RootFetched, &root.id.clone());

        let mut fetched: HashSet<String> = HashSet::new();
        fetched.insert(root.id.clone());

        // One level of outgoing references, grouped by target type, minus
        // duplicate-of links and anything already stored locally.
        let mut pending: HashMap<String, Vec<String>> = HashMap::new();
        for link in root.substantive_links() {
            let Some(target_id) = link.target.id() else {
                continue;
            };
            if !fetched.insert(target_id.to_string()) {
                continue;
            }
            if self
                .store
                .contains(link.target.resource_type(), target_id)
                .await?
            {
                continue;
            }
            pending
                .entry(link.target.resource_type().to_string())
                .or_default()
                .push(target_id.to_string());
        }

        let mut items = vec![root.clone()];
        for (target_type, ids) in &pending {
            let batch = self.transport.fetch_many(target_type, ids).await?;
            items.extend(batch);
        }
        self.progress.on_progress(
            CopyStage::ReferencesFetched,
            &format!("{} referenced objects", items.len() - 1),
        );

        let is_subject = self
            .registry
            .resolve(resource_type)
            .map(|h| h.descriptor().subject)
            .unwrap_or(false);
        if is_subject {
            let fetched_records = self.copy_related_records(resource_type, id, &mut fetched, &mut items).await?;
            self.progress.on_progress(
                CopyStage::RecordsFetched,
                &format!("{fetched_records} transactional records"),
            );
        }

        let bundle_size = items.len();
        let bundle = Envelope::new(items).with_correlation_key(root.id.clone());
        let written = self.store.insert_bundle(bundle).await?;
        tracing::info!(
            resource_type,
            id,
            bundle_size,
            written,
            "graph copy committed"
        );

        // Coarse invalidation: indirectly affected aggregates are unknown.
        self.cache.clear();
        self.progress
            .on_progress(CopyStage::Committed, &format!("{written} objects"));

        Ok(root)
    }

    /// Pages through the subject's transactional records until an empty
    /// page; terminates when the continuation token repeats.
    async fn copy_related_records(
        &self,
        resource_type: &str,
        id: &str,
        fetched: &mut HashSet<String>,
        items: &mut Vec<Resource>,
    ) -> HermesResult<usize> {
        let mut count = 0usize;
        let mut token: Option<String> = None;
        loop {
            let page = self
                .transport
                .search_related(resource_type, id, self.page_size, token.as_deref())
                .await?;
            if page.items.is_empty() {
                break;
            }
            for record in page.items {
                if !fetched.insert(record.id.clone()) {
                    continue;
                }
                if self
                    .store
                    .contains(&record.resource_type, &record.id)
                    .await?
                {
                    continue;
                }
                count += 1;
                items.push(record);
            }
            match page.continuation {
                None => break,
                Some(next) if token.as_deref() == Some(next.as_str()) => {
                    tracing::warn!(resource_type, id, token = %next, "repeated continuation token, stopping record walk");
                    break;
                }
                Some(next) => token = Some(next),
            }
        }
        Ok(count)
    }
}
