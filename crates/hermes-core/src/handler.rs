//! The resource handler capability set.
//!
//! A [`ResourceHandler`] is the typed repository facade the dispatcher calls
//! for one resource type. Optional capabilities (child associations, custom
//! operations) are exposed as accessor methods returning trait objects, so
//! dispatch is a map lookup plus a capability check rather than runtime type
//! inspection.

use std::future::Future;
use std::pin::Pin;

use crate::cache::CachedResourceState;
use crate::error::HermesResult;
use crate::policy::PolicyTable;
use crate::types::{QueryFilter, QueryResult, Resource};

/// A boxed future, the dyn-compatible async idiom used at every seam.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Static facts the dispatcher needs about a handler.
#[derive(Debug, Clone)]
pub struct HandlerDescriptor {
    /// The resource type name this handler serves.
    pub type_name: String,
    /// When `false`, read-only verbs emit no audit record at all (pure
    /// vocabulary/code lookups).
    pub disclosure_audited: bool,
    /// Subject-like entities additionally pull their transactional records
    /// during a graph copy.
    pub subject: bool,
    /// Declared policy demands per verb.
    pub policies: PolicyTable,
}

impl HandlerDescriptor {
    /// Creates a descriptor with disclosure auditing on and no policies.
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            disclosure_audited: true,
            subject: false,
            policies: PolicyTable::new(),
        }
    }

    /// Suppresses read-path audit records for this type.
    #[must_use]
    pub fn without_disclosure_audit(mut self) -> Self {
        self.disclosure_audited = false;
        self
    }

    /// Marks this type as a subject-like entity.
    #[must_use]
    pub fn as_subject(mut self) -> Self {
        self.subject = true;
        self
    }

    /// Sets the policy table.
    #[must_use]
    pub fn with_policies(mut self, policies: PolicyTable) -> Self {
        self.policies = policies;
        self
    }
}

/// The outcome of a delete, reporting whether the removal was permanent.
#[derive(Debug, Clone)]
pub struct DeleteOutcome {
    /// The object as it stood when deleted.
    pub resource: Resource,
    /// `true` for permanent erasure, `false` for a logical delete.
    pub permanent: bool,
}

/// The repository facade for one resource type.
///
/// All methods return [`BoxFuture`] so handlers can be stored as trait
/// objects in the registry. Handlers own their storage semantics; the
/// dispatcher owns preconditions, policies, auditing and caching.
pub trait ResourceHandler: Send + Sync + 'static {
    /// Returns the handler's static description.
    fn descriptor(&self) -> &HandlerDescriptor;

    /// Creates an object; with `update_if_exists`, an existing id is
    /// updated instead of rejected.
    fn create<'a>(
        &'a self,
        payload: Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Fetches one object, optionally a specific version.
    fn get<'a>(
        &'a self,
        id: &'a str,
        version_id: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Metadata-only quick fetch for precondition evaluation.
    ///
    /// The default routes through [`ResourceHandler::get`]; handlers backed
    /// by a lower-level repository should override this to avoid paying for
    /// full object materialization.
    fn get_state<'a>(&'a self, id: &'a str) -> BoxFuture<'a, HermesResult<CachedResourceState>> {
        Box::pin(async move {
            let resource = self.get(id, None).await?;
            Ok(CachedResourceState::from_resource(&resource))
        })
    }

    /// Replaces an object, returning the stored result with its new tag.
    fn update<'a>(&'a self, payload: Resource) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Applies a batch of updates as one handler call.
    ///
    /// Partial failure is all-or-nothing at the handler's discretion; the
    /// default applies sequentially and stops at the first error.
    fn update_batch<'a>(
        &'a self,
        batch: Vec<Resource>,
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>> {
        Box::pin(async move {
            let mut updated = Vec::with_capacity(batch.len());
            for payload in batch {
                updated.push(self.update(payload).await?);
            }
            Ok(updated)
        })
    }

    /// Deletes an object.
    fn delete<'a>(
        &'a self,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<DeleteOutcome>>;

    /// Queries the resource type.
    fn query<'a>(&'a self, filter: &'a QueryFilter) -> BoxFuture<'a, HermesResult<QueryResult>>;

    /// Child-association capability, when this type declares children.
    fn associations(&self) -> Option<&dyn AssociationCapability> {
        None
    }

    /// Custom-operation capability, when this type declares operations.
    fn operations(&self) -> Option<&dyn OperationCapability> {
        None
    }
}

/// How a child resource binds to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssociationScope {
    /// The child collection is reachable without a parent instance.
    Class,
    /// The child collection requires a concrete parent id.
    Instance,
}

/// One declared child resource.
#[derive(Debug, Clone)]
pub struct AssociationDescriptor {
    /// The child resource name, as addressed by callers.
    pub name: String,
    /// The binding the child accepts.
    pub scope: AssociationScope,
}

impl AssociationDescriptor {
    /// Declares an instance-scoped child.
    #[must_use]
    pub fn instance(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: AssociationScope::Instance,
        }
    }

    /// Declares a class-scoped child.
    #[must_use]
    pub fn class(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            scope: AssociationScope::Class,
        }
    }
}

/// Child-association traversal for one parent type.
///
/// `parent_id` is `None` for class-scoped bindings. Scope checking happens
/// in the association traverser, not here.
pub trait AssociationCapability: Send + Sync {
    /// The declared child resources.
    fn children(&self) -> &[AssociationDescriptor];

    /// Looks up a declared child by name.
    fn find_child(&self, name: &str) -> Option<&AssociationDescriptor> {
        self.children().iter().find(|c| c.name == name)
    }

    /// Fetches one child object.
    fn get_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        child_id: &'a str,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Adds a child object to the collection.
    fn add_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        payload: Resource,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Removes a child object from the collection.
    fn remove_child<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        child_id: &'a str,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Queries the child collection.
    fn query_children<'a>(
        &'a self,
        parent_id: Option<&'a str>,
        name: &'a str,
        filter: &'a QueryFilter,
    ) -> BoxFuture<'a, HermesResult<QueryResult>>;
}

/// Custom-operation invocation for one resource type.
pub trait OperationCapability: Send + Sync {
    /// The declared operation names.
    fn operation_names(&self) -> Vec<String>;

    /// Invokes an operation, class-scoped when `id` is `None`.
    fn invoke<'a>(
        &'a self,
        id: Option<&'a str>,
        name: &'a str,
        params: serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<Resource>>;
}
