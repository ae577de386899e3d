//! The upstream forwarding decorator.
//!
//! [`UpstreamGateway`] wraps a local [`ProtocolService`]. Per request it
//! computes a [`ForwardingDecision`]; local requests delegate unchanged,
//! forwarded requests go to the peer transport and reconcile the shared
//! cache: invalidate on mutation, tag-and-cache on read. Reads of objects
//! the peer no longer has degrade gracefully to the locally stored copy.

use std::sync::Arc;

use hermes_core::{
    BoxFuture, CacheClient, CachedResourceState, CallContext, Envelope, HandlerRegistry,
    HermesError, HermesResult, LocalStore, PatchDocument, QueryFilter, Resource,
};
use hermes_dispatch::{ChildOperation, DispatchResponse, ProtocolService};

use crate::copy::{GraphCopyEngine, ProgressListener};
use crate::forwarding::ForwardingDecision;
use crate::revalidation::{RecentValidationCache, RevalidationConfig};
use crate::transport::{ChildOutcome, Representation, UpstreamTransport};

/// Decorator that transparently forwards operations to a peer server.
pub struct UpstreamGateway {
    inner: Arc<dyn ProtocolService>,
    transport: Arc<dyn UpstreamTransport>,
    cache: Arc<dyn CacheClient>,
    store: Arc<dyn LocalStore>,
    revalidation: RecentValidationCache,
    copy_engine: GraphCopyEngine,
    auto_forward: bool,
}

impl UpstreamGateway {
    /// Creates a gateway builder.
    #[must_use]
    pub fn builder(
        inner: Arc<dyn ProtocolService>,
        transport: Arc<dyn UpstreamTransport>,
        cache: Arc<dyn CacheClient>,
        store: Arc<dyn LocalStore>,
        registry: Arc<HandlerRegistry>,
    ) -> UpstreamGatewayBuilder {
        UpstreamGatewayBuilder {
            inner,
            transport,
            cache,
            store,
            registry,
            auto_forward: false,
            revalidation: RevalidationConfig::default(),
            copy_page_size: 100,
            progress: None,
        }
    }

    fn decision(&self, ctx: &CallContext) -> ForwardingDecision {
        let decision =
            ForwardingDecision::decide(ctx.forward(), ctx.forward_header(), self.auto_forward);
        tracing::debug!(?decision, request_id = %ctx.request_id(), "forwarding decision");
        decision
    }

    async fn ensure_reachable(&self) -> HermesResult<()> {
        if self.transport.probe().await {
            Ok(())
        } else {
            Err(HermesError::gateway_unavailable(
                "peer did not answer the status probe",
            ))
        }
    }

    /// Marks objects that are not persisted locally as upstream-only.
    async fn annotate(&self, mut resource: Resource) -> HermesResult<Resource> {
        if !self
            .store
            .contains(&resource.resource_type, &resource.id)
            .await?
        {
            resource.upstream_only = true;
        }
        Ok(resource)
    }

    async fn annotate_all(&self, items: Vec<Resource>) -> HermesResult<Vec<Resource>> {
        let mut annotated = Vec::with_capacity(items.len());
        for item in items {
            annotated.push(self.annotate(item).await?);
        }
        Ok(annotated)
    }

    /// Copies a remote object graph into local storage.
    pub async fn copy(&self, resource_type: &str, id: &str) -> HermesResult<Resource> {
        self.copy_engine.copy(resource_type, id).await
    }

    async fn forward_read(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
        version_id: Option<&str>,
    ) -> HermesResult<DispatchResponse> {
        // A read validated moments ago is served locally, before any
        // network traffic, the probe included.
        if version_id.is_none() {
            if let Some(tag) = self.cache.get(id).and_then(|s| s.version_id) {
                if self.revalidation.is_fresh(&tag, ctx.view()) {
                    match self.inner.read(ctx, resource_type, id, None).await {
                        Ok(response) => return Ok(response),
                        Err(HermesError::NotFound { .. }) => {}
                        Err(other) => return Err(other),
                    }
                }
            }
        }

        self.ensure_reachable().await?;

        let representation = Representation::for_read(ctx.view());
        match self
            .transport
            .fetch(resource_type, id, version_id, &representation)
            .await
        {
            Ok(resource) => {
                let resource = self.annotate(resource).await?;
                if version_id.is_none() && !ctx.elevated() {
                    self.cache
                        .put(CachedResourceState::from_resource(&resource));
                    if let Some(tag) = &resource.version_id {
                        self.revalidation.mark(tag, ctx.view());
                    }
                }
                Ok(DispatchResponse::from_resource(resource))
            }
            // Absent remotely but known locally: serve the local copy.
            Err(HermesError::NotFound { .. }) if self.cache.get(id).is_some() => {
                tracing::warn!(resource_type, id, "peer lost object, serving local copy");
                self.inner.read(ctx, resource_type, id, version_id).await
            }
            Err(other) => Err(other),
        }
    }

    async fn forward_create(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        payload: Resource,
        update_if_exists: bool,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let created = self
            .transport
            .create(resource_type, &payload, update_if_exists)
            .await?;
        self.cache.invalidate(&created.id);
        Ok(DispatchResponse::from_resource(self.annotate(created).await?))
    }

    async fn forward_update(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
        mut payload: Resource,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        payload.id = id.to_string();
        let updated = self.transport.update(resource_type, &payload).await?;
        self.cache.invalidate(id);
        Ok(DispatchResponse::from_resource(self.annotate(updated).await?))
    }

    async fn forward_delete(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
        permanent: bool,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let deleted = self.transport.delete(resource_type, id, permanent).await?;
        self.cache.invalidate(id);
        Ok(DispatchResponse::from_resource(deleted))
    }

    async fn forward_search(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        filter: QueryFilter,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let representation = Representation::for_read(ctx.view());
        let result = self
            .transport
            .search(resource_type, &filter, &representation)
            .await?;
        let total = result.total.unwrap_or(result.items.len());
        let items = self.annotate_all(result.items).await?;
        Ok(DispatchResponse::Envelope(
            Envelope::new(items).with_paging(filter.offset, total),
        ))
    }

    async fn forward_history(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
        since: Option<&str>,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let result = self.transport.history(resource_type, id, since).await?;
        let total = result.total.unwrap_or(result.items.len());
        let items = self.annotate_all(result.items).await?;
        Ok(DispatchResponse::Envelope(
            Envelope::new(items).with_paging(0, total),
        ))
    }

    async fn forward_patch(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
        patch: PatchDocument,
        force: bool,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let patched = self
            .transport
            .patch(resource_type, id, &patch, force)
            .await?;
        self.cache.invalidate(id);
        Ok(DispatchResponse::from_resource(self.annotate(patched).await?))
    }

    async fn forward_patch_batch(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        patches: Vec<(String, PatchDocument)>,
        force: bool,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let updated = self
            .transport
            .patch_batch(resource_type, &patches, force)
            .await?;
        for (id, _) in &patches {
            self.cache.invalidate(id);
        }
        let items = self.annotate_all(updated).await?;
        Ok(DispatchResponse::Envelope(Envelope::new(items)))
    }

    async fn forward_child(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        parent_id: Option<&str>,
        child_name: &str,
        operation: ChildOperation,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let mutating = !operation.is_read_only();
        let outcome = self
            .transport
            .child(resource_type, parent_id, child_name, &operation)
            .await?;
        if mutating {
            if let Some(parent) = parent_id {
                self.cache.invalidate(parent);
            }
        }
        match outcome {
            ChildOutcome::Resource(resource) => Ok(DispatchResponse::from_resource(
                self.annotate(resource).await?,
            )),
            ChildOutcome::Page(result) => {
                let total = result.total.unwrap_or(result.items.len());
                let items = self.annotate_all(result.items).await?;
                Ok(DispatchResponse::Envelope(
                    Envelope::new(items).with_paging(0, total),
                ))
            }
        }
    }

    async fn forward_invoke(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: Option<&str>,
        operation: &str,
        params: serde_json::Value,
    ) -> HermesResult<DispatchResponse> {
        self.ensure_reachable().await?;
        let result = self
            .transport
            .invoke(resource_type, id, operation, &params)
            .await?;
        Ok(DispatchResponse::from_resource(self.annotate(result).await?))
    }
}

impl ProtocolService for UpstreamGateway {
    fn create<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        payload: Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_create(ctx, resource_type, payload, update_if_exists)
                    .await
            } else {
                self.inner
                    .create(ctx, resource_type, payload, update_if_exists)
                    .await
            }
        })
    }

    fn read<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        version_id: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_read(ctx, resource_type, id, version_id).await
            } else {
                self.inner.read(ctx, resource_type, id, version_id).await
            }
        })
    }

    fn update<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        payload: Resource,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_update(ctx, resource_type, id, payload).await
            } else {
                self.inner.update(ctx, resource_type, id, payload).await
            }
        })
    }

    fn delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_delete(ctx, resource_type, id, permanent).await
            } else {
                self.inner.delete(ctx, resource_type, id, permanent).await
            }
        })
    }

    fn search<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        filter: QueryFilter,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_search(ctx, resource_type, filter).await
            } else {
                self.inner.search(ctx, resource_type, filter).await
            }
        })
    }

    fn history<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_history(ctx, resource_type, id, since).await
            } else {
                self.inner.history(ctx, resource_type, id, since).await
            }
        })
    }

    fn patch<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        patch: PatchDocument,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_patch(ctx, resource_type, id, patch, force).await
            } else {
                self.inner.patch(ctx, resource_type, id, patch, force).await
            }
        })
    }

    fn patch_batch<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        patches: Vec<(String, PatchDocument)>,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_patch_batch(ctx, resource_type, patches, force)
                    .await
            } else {
                self.inner
                    .patch_batch(ctx, resource_type, patches, force)
                    .await
            }
        })
    }

    fn child<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        parent_id: Option<&'a str>,
        child_name: &'a str,
        operation: ChildOperation,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_child(ctx, resource_type, parent_id, child_name, operation)
                    .await
            } else {
                self.inner
                    .child(ctx, resource_type, parent_id, child_name, operation)
                    .await
            }
        })
    }

    fn invoke<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: Option<&'a str>,
        operation: &'a str,
        params: serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            if self.decision(ctx).is_forwarded() {
                self.forward_invoke(ctx, resource_type, id, operation, params)
                    .await
            } else {
                self.inner
                    .invoke(ctx, resource_type, id, operation, params)
                    .await
            }
        })
    }
}

/// Builder for [`UpstreamGateway`].
pub struct UpstreamGatewayBuilder {
    inner: Arc<dyn ProtocolService>,
    transport: Arc<dyn UpstreamTransport>,
    cache: Arc<dyn CacheClient>,
    store: Arc<dyn LocalStore>,
    registry: Arc<HandlerRegistry>,
    auto_forward: bool,
    revalidation: RevalidationConfig,
    copy_page_size: usize,
    progress: Option<Arc<dyn ProgressListener>>,
}

impl UpstreamGatewayBuilder {
    /// Enables auto-forwarding for requests without an explicit flag.
    #[must_use]
    pub fn auto_forward(mut self, enabled: bool) -> Self {
        self.auto_forward = enabled;
        self
    }

    /// Sets the revalidation window configuration.
    #[must_use]
    pub fn revalidation(mut self, config: RevalidationConfig) -> Self {
        self.revalidation = config;
        self
    }

    /// Sets the transactional-record page size used by graph copies.
    #[must_use]
    pub fn copy_page_size(mut self, page_size: usize) -> Self {
        self.copy_page_size = page_size;
        self
    }

    /// Sets the copy progress listener.
    #[must_use]
    pub fn progress(mut self, progress: Arc<dyn ProgressListener>) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Builds the gateway.
    #[must_use]
    pub fn build(self) -> UpstreamGateway {
        let mut copy_engine = GraphCopyEngine::new(
            self.transport.clone(),
            self.store.clone(),
            self.cache.clone(),
            self.registry,
        )
        .with_page_size(self.copy_page_size);
        if let Some(progress) = self.progress {
            copy_engine = copy_engine.with_progress(progress);
        }
        UpstreamGateway {
            inner: self.inner,
            transport: self.transport,
            cache: self.cache,
            store: self.store,
            revalidation: RecentValidationCache::new(self.revalidation),
            copy_engine,
            auto_forward: self.auto_forward,
        }
    }
}
