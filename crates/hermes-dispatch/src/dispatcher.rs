//! Verb orchestration.
//!
//! Every verb follows the same template: run-state check, audit record
//! scoped to the verb, handler resolution, policy demand, precondition
//! evaluation for identified operations, handler invocation, envelope
//! construction, cache side effects, and audit emission on every exit
//! path. Mutating verbs invalidate the cache entry for the affected id
//! strictly before their response is returned.

use std::sync::Arc;

use hermes_core::{
    AllowAllGuard, AuditOutcome, AuditRecordBuilder, AuditSink, BoxFuture, CacheClient,
    CachedResourceState, CallContext, Envelope, HandlerDescriptor, HandlerRegistry, HermesError,
    HermesResult, InMemoryCache, JsonMergePatchService, ObjectLifecycle, PatchDocument,
    PatchService, PolicyGuard, QueryFilter, RequestId, Resource, ResourceHandler, RunStateHandle,
    TracingAuditSink, Verb,
};

use crate::associations::AssociationTraverser;
use crate::bundle::BundleBuilder;
use crate::precondition::{PreconditionEvaluator, PreconditionVerdict};
use crate::service::{ChildOperation, DispatchResponse, ProtocolService};

/// Audit state accumulated while a verb executes.
struct AuditScope {
    builder: AuditRecordBuilder,
    /// Set for read-only verbs on types with disclosure auditing off.
    suppress: bool,
}

impl AuditScope {
    fn new(verb: Verb, request_id: RequestId) -> Self {
        Self {
            builder: AuditRecordBuilder::new(verb).with_request_id(request_id),
            suppress: false,
        }
    }
}

/// The local protocol dispatcher.
///
/// Shared across concurrent requests; all collaborators are injected and
/// the only mutable state is the shared cache.
pub struct Dispatcher {
    registry: Arc<HandlerRegistry>,
    cache: Arc<dyn CacheClient>,
    policy: Arc<dyn PolicyGuard>,
    audit: Arc<dyn AuditSink>,
    patch_service: Arc<dyn PatchService>,
    state: RunStateHandle,
    evaluator: PreconditionEvaluator,
}

impl Dispatcher {
    /// Creates a dispatcher builder over a handler registry.
    #[must_use]
    pub fn builder(registry: Arc<HandlerRegistry>) -> DispatcherBuilder {
        DispatcherBuilder::new(registry)
    }

    /// Returns the shared cache.
    #[must_use]
    pub fn cache(&self) -> Arc<dyn CacheClient> {
        self.cache.clone()
    }

    /// Returns the handler registry.
    #[must_use]
    pub fn registry(&self) -> Arc<HandlerRegistry> {
        self.registry.clone()
    }

    fn demand_policies(&self, descriptor: &HandlerDescriptor, verb: Verb) -> HermesResult<()> {
        for binding in descriptor.policies.effective(verb) {
            self.policy.demand(&binding.policy_id)?;
        }
        Ok(())
    }

    /// Maps an evaluator verdict on a mutating verb to an error.
    fn require_preconditions_hold(verdict: PreconditionVerdict) -> HermesResult<()> {
        match verdict {
            PreconditionVerdict::Proceed => Ok(()),
            PreconditionVerdict::NotModified => Err(HermesError::precondition_failed(
                "the supplied tag matches the current version",
            )),
            PreconditionVerdict::PreconditionFailed => Err(HermesError::precondition_failed(
                "object state does not match the supplied conditions",
            )),
        }
    }

    fn finish(
        &self,
        mut scope: AuditScope,
        verb: Verb,
        target: &str,
        result: HermesResult<DispatchResponse>,
    ) -> HermesResult<DispatchResponse> {
        let result = result.map_err(|e| e.with_operation_context(verb.name(), target));
        match &result {
            Ok(_) => scope.builder.set_outcome(AuditOutcome::Success),
            Err(error) => {
                if error.is_business() {
                    scope.builder.set_outcome(AuditOutcome::MinorFail);
                    tracing::debug!(target, verb = %verb, %error, "operation rejected");
                } else {
                    scope.builder.set_outcome(AuditOutcome::SeriousFail);
                    tracing::error!(target, verb = %verb, %error, "operation faulted");
                }
            }
        }
        if !scope.suppress {
            scope.builder.send(self.audit.as_ref());
        }
        result
    }

    async fn create_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        payload: Resource,
        update_if_exists: bool,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Create)?;

        let created = handler.create(payload, update_if_exists).await?;
        self.cache.put(CachedResourceState::from_resource(&created));
        scope
            .builder
            .add_object(ObjectLifecycle::Creation, created.reference());
        Ok(DispatchResponse::from_resource(created))
    }

    async fn read_inner(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
        version_id: Option<&str>,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        scope.suppress = !handler.descriptor().disclosure_audited;
        self.demand_policies(handler.descriptor(), Verb::Read)?;

        // Preconditions gate current-version reads only; version reads are
        // immutable and bypass the cache entirely.
        if version_id.is_none() {
            match self
                .evaluator
                .evaluate(handler.as_ref(), id, ctx.conditional())
                .await?
            {
                PreconditionVerdict::Proceed => {}
                PreconditionVerdict::NotModified => {
                    let version_id = self.cache.get(id).and_then(|s| s.version_id);
                    return Ok(DispatchResponse::NotModified { version_id });
                }
                PreconditionVerdict::PreconditionFailed => {
                    return Err(HermesError::precondition_failed(
                        "object state does not match the supplied conditions",
                    ));
                }
            }
        }

        let resource = handler.get(id, version_id).await?;
        if version_id.is_none() {
            self.cache
                .put(CachedResourceState::from_resource(&resource));
        }
        scope
            .builder
            .add_object(ObjectLifecycle::Disclosure, resource.reference());

        if ctx.include_related() {
            let envelope = self.expand_related(resource, scope).await?;
            return Ok(DispatchResponse::Envelope(envelope));
        }
        Ok(DispatchResponse::from_resource(resource))
    }

    /// Eagerly expands an object's substantive references into an envelope.
    async fn expand_related(
        &self,
        resource: Resource,
        scope: &mut AuditScope,
    ) -> HermesResult<Envelope> {
        let targets: Vec<_> = resource
            .substantive_links()
            .map(|l| l.target.clone())
            .collect();
        let mut items = vec![resource];
        for target in targets {
            let Some(target_id) = target.id() else {
                continue;
            };
            let Ok(handler) = self.registry.resolve(target.resource_type()) else {
                continue;
            };
            match handler.get(target_id, None).await {
                Ok(related) => {
                    scope
                        .builder
                        .add_object(ObjectLifecycle::Disclosure, related.reference());
                    items.push(related);
                }
                // Dangling references are skipped, not fatal.
                Err(HermesError::NotFound { .. }) => {}
                Err(other) => return Err(other),
            }
        }
        Ok(Envelope::new(items))
    }

    async fn update_inner(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
        mut payload: Resource,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Update)?;

        let verdict = self
            .evaluator
            .evaluate(handler.as_ref(), id, ctx.conditional())
            .await?;
        Self::require_preconditions_hold(verdict)?;

        payload.id = id.to_string();
        let updated = handler.update(payload).await?;

        // Invalidate before the response is visible to the caller, then
        // refresh with the post-write state.
        self.cache.invalidate(id);
        self.cache.put(CachedResourceState::from_resource(&updated));

        scope
            .builder
            .add_object(ObjectLifecycle::Amendment, updated.reference());
        Ok(DispatchResponse::from_resource(updated))
    }

    async fn delete_inner(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
        permanent: bool,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Delete)?;

        let verdict = self
            .evaluator
            .evaluate(handler.as_ref(), id, ctx.conditional())
            .await?;
        Self::require_preconditions_hold(verdict)?;

        let outcome = handler.delete(id, permanent).await?;
        self.cache.invalidate(id);

        let lifecycle = if outcome.permanent {
            ObjectLifecycle::PermanentErasure
        } else {
            ObjectLifecycle::LogicalDeletion
        };
        scope
            .builder
            .add_object(lifecycle, outcome.resource.reference());
        Ok(DispatchResponse::from_resource(outcome.resource))
    }

    async fn search_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        filter: QueryFilter,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        scope.suppress = !handler.descriptor().disclosure_audited;
        self.demand_policies(handler.descriptor(), Verb::Search)?;

        let result = handler.query(&filter).await?;
        let envelope = BundleBuilder::build(
            result,
            filter.offset,
            filter.count,
            &filter.include_paths,
            &filter.exclude_paths,
        )?;
        scope.builder.add_objects(
            ObjectLifecycle::Disclosure,
            envelope.items.iter().map(Resource::reference),
        );
        Ok(DispatchResponse::Envelope(envelope))
    }

    async fn history_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: &str,
        since: Option<&str>,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        scope.suppress = !handler.descriptor().disclosure_audited;
        self.demand_policies(handler.descriptor(), Verb::History)?;

        let current = handler.get(id, None).await?;
        let mut previous = current.previous_version_id.clone();
        let mut items = vec![current];
        let mut seen = std::collections::HashSet::new();

        // Walk the version chain backward until it ends, the caller's
        // `since` marker is reached, or a pointer repeats.
        while let Some(version) = previous {
            if since == Some(version.as_str()) || !seen.insert(version.clone()) {
                break;
            }
            let older = handler.get(id, Some(&version)).await?;
            previous = older.previous_version_id.clone();
            items.push(older);
        }

        scope.builder.add_objects(
            ObjectLifecycle::Disclosure,
            items.iter().map(Resource::reference),
        );
        Ok(DispatchResponse::Envelope(Envelope::new(items)))
    }

    async fn patch_inner(
        &self,
        ctx: &CallContext,
        resource_type: &str,
        id: &str,
        patch: PatchDocument,
        force: bool,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Patch)?;

        let verdict = self
            .evaluator
            .evaluate(handler.as_ref(), id, ctx.conditional())
            .await?;
        Self::require_preconditions_hold(verdict)?;

        let current = handler.get(id, None).await?;
        let patched = self.patch_service.apply(&patch, &current, force)?;
        let updated = handler.update(patched).await?;

        self.cache.invalidate(id);
        self.cache.put(CachedResourceState::from_resource(&updated));

        scope
            .builder
            .add_object(ObjectLifecycle::Amendment, updated.reference());
        Ok(DispatchResponse::from_resource(updated))
    }

    async fn patch_batch_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        patches: Vec<(String, PatchDocument)>,
        force: bool,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Patch)?;

        let mut batch = Vec::with_capacity(patches.len());
        for (id, patch) in &patches {
            let current = handler.get(id, None).await?;
            batch.push(self.patch_service.apply(patch, &current, force)?);
        }

        // One handler call so partial failure is all-or-nothing at the
        // handler's discretion.
        let updated = handler.update_batch(batch).await?;
        for (id, _) in &patches {
            self.cache.invalidate(id);
        }
        for resource in &updated {
            self.cache
                .put(CachedResourceState::from_resource(resource));
        }

        scope.builder.add_objects(
            ObjectLifecycle::Amendment,
            updated.iter().map(Resource::reference),
        );
        Ok(DispatchResponse::Envelope(Envelope::new(updated)))
    }

    async fn child_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        parent_id: Option<&str>,
        child_name: &str,
        operation: ChildOperation,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        scope.suppress = !handler.descriptor().disclosure_audited && operation.is_read_only();
        self.demand_policies(handler.descriptor(), Verb::Child)?;

        let capability = AssociationTraverser::resolve(handler.as_ref(), parent_id, child_name)?;

        match operation {
            ChildOperation::Get { child_id } => {
                let child = capability.get_child(parent_id, child_name, &child_id).await?;
                scope
                    .builder
                    .add_object(ObjectLifecycle::Disclosure, child.reference());
                Ok(DispatchResponse::from_resource(child))
            }
            ChildOperation::Add { payload } => {
                let child = capability.add_child(parent_id, child_name, payload).await?;
                if let Some(parent) = parent_id {
                    self.cache.invalidate(parent);
                    scope.builder.add_object(
                        ObjectLifecycle::Amendment,
                        hermes_core::ResourceReference::to(resource_type, parent),
                    );
                }
                scope
                    .builder
                    .add_object(ObjectLifecycle::Creation, child.reference());
                Ok(DispatchResponse::from_resource(child))
            }
            ChildOperation::Remove { child_id } => {
                let child = capability
                    .remove_child(parent_id, child_name, &child_id)
                    .await?;
                if let Some(parent) = parent_id {
                    self.cache.invalidate(parent);
                    scope.builder.add_object(
                        ObjectLifecycle::Amendment,
                        hermes_core::ResourceReference::to(resource_type, parent),
                    );
                }
                scope
                    .builder
                    .add_object(ObjectLifecycle::LogicalDeletion, child.reference());
                Ok(DispatchResponse::from_resource(child))
            }
            ChildOperation::Query { filter } => {
                let result = capability
                    .query_children(parent_id, child_name, &filter)
                    .await?;
                let envelope = BundleBuilder::build(
                    result,
                    filter.offset,
                    filter.count,
                    &filter.include_paths,
                    &filter.exclude_paths,
                )?;
                scope.builder.add_objects(
                    ObjectLifecycle::Disclosure,
                    envelope.items.iter().map(Resource::reference),
                );
                Ok(DispatchResponse::Envelope(envelope))
            }
        }
    }

    async fn invoke_inner(
        &self,
        _ctx: &CallContext,
        resource_type: &str,
        id: Option<&str>,
        operation: &str,
        params: serde_json::Value,
        scope: &mut AuditScope,
    ) -> HermesResult<DispatchResponse> {
        let handler = self.registry.resolve(resource_type)?;
        self.demand_policies(handler.descriptor(), Verb::Invoke)?;

        let capability = handler.operations().ok_or_else(|| {
            HermesError::not_found(resource_type, format!("operation '{operation}'"))
        })?;
        if !capability.operation_names().iter().any(|n| n == operation) {
            return Err(HermesError::not_found(
                resource_type,
                format!("operation '{operation}'"),
            ));
        }

        let result = capability.invoke(id, operation, params).await?;
        scope
            .builder
            .add_object(ObjectLifecycle::Disclosure, result.reference());
        Ok(DispatchResponse::from_resource(result))
    }
}

fn target_label(resource_type: &str, id: Option<&str>) -> String {
    match id {
        Some(id) => format!("{resource_type}/{id}"),
        None => resource_type.to_string(),
    }
}

impl ProtocolService for Dispatcher {
    fn create<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        payload: Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Create, ctx.request_id());
            let result = self
                .create_inner(ctx, resource_type, payload, update_if_exists, &mut scope)
                .await;
            self.finish(scope, Verb::Create, &target_label(resource_type, None), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Read, ctx.request_id());
            let result = self
                .read_inner(ctx, resource_type, id, version_id, &mut scope)
                .await;
            self.finish(scope, Verb::Read, &target_label(resource_type, Some(id)), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Update, ctx.request_id());
            let result = self
                .update_inner(ctx, resource_type, id, payload, &mut scope)
                .await;
            self.finish(scope, Verb::Update, &target_label(resource_type, Some(id)), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Delete, ctx.request_id());
            let result = self
                .delete_inner(ctx, resource_type, id, permanent, &mut scope)
                .await;
            self.finish(scope, Verb::Delete, &target_label(resource_type, Some(id)), result)
        })
    }

    fn search<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        filter: QueryFilter,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>> {
        Box::pin(async move {
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Search, ctx.request_id());
            let result = self
                .search_inner(ctx, resource_type, filter, &mut scope)
                .await;
            self.finish(scope, Verb::Search, &target_label(resource_type, None), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::History, ctx.request_id());
            let result = self
                .history_inner(ctx, resource_type, id, since, &mut scope)
                .await;
            self.finish(scope, Verb::History, &target_label(resource_type, Some(id)), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Patch, ctx.request_id());
            let result = self
                .patch_inner(ctx, resource_type, id, patch, force, &mut scope)
                .await;
            self.finish(scope, Verb::Patch, &target_label(resource_type, Some(id)), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Patch, ctx.request_id());
            let result = self
                .patch_batch_inner(ctx, resource_type, patches, force, &mut scope)
                .await;
            self.finish(scope, Verb::Patch, &target_label(resource_type, None), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Child, ctx.request_id());
            let result = self
                .child_inner(ctx, resource_type, parent_id, child_name, operation, &mut scope)
                .await;
            self.finish(scope, Verb::Child, &target_label(resource_type, parent_id), result)
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
            self.state.ensure_running()?;
            let mut scope = AuditScope::new(Verb::Invoke, ctx.request_id());
            let result = self
                .invoke_inner(ctx, resource_type, id, operation, params, &mut scope)
                .await;
            self.finish(scope, Verb::Invoke, &target_label(resource_type, id), result)
        })
    }
}

/// Builder for [`Dispatcher`].
///
/// Collaborators default to in-process implementations: an
/// [`InMemoryCache`], an allow-all policy guard, a tracing audit sink, a
/// JSON merge-patch service, and a running state handle.
pub struct DispatcherBuilder {
    registry: Arc<HandlerRegistry>,
    cache: Arc<dyn CacheClient>,
    policy: Arc<dyn PolicyGuard>,
    audit: Arc<dyn AuditSink>,
    patch_service: Arc<dyn PatchService>,
    state: RunStateHandle,
}

impl DispatcherBuilder {
    /// Creates a builder with default collaborators.
    #[must_use]
    pub fn new(registry: Arc<HandlerRegistry>) -> Self {
        Self {
            registry,
            cache: Arc::new(InMemoryCache::new()),
            policy: Arc::new(AllowAllGuard),
            audit: Arc::new(TracingAuditSink),
            patch_service: Arc::new(JsonMergePatchService),
            state: RunStateHandle::running(),
        }
    }

    /// Sets the shared object cache.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn CacheClient>) -> Self {
        self.cache = cache;
        self
    }

    /// Sets the policy guard.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn PolicyGuard>) -> Self {
        self.policy = policy;
        self
    }

    /// Sets the audit sink.
    #[must_use]
    pub fn audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    /// Sets the patch service.
    #[must_use]
    pub fn patch_service(mut self, patch_service: Arc<dyn PatchService>) -> Self {
        self.patch_service = patch_service;
        self
    }

    /// Sets the run-state handle.
    #[must_use]
    pub fn state(mut self, state: RunStateHandle) -> Self {
        self.state = state;
        self
    }

    /// Builds the dispatcher.
    #[must_use]
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            evaluator: PreconditionEvaluator::new(self.cache.clone()),
            registry: self.registry,
            cache: self.cache,
            policy: self.policy,
            audit: self.audit,
            patch_service: self.patch_service,
            state: self.state,
        }
    }
}
