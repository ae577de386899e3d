//! The protocol service seam.
//!
//! [`ProtocolService`] has one operation per verb. The local
//! [`crate::Dispatcher`] implements it directly; the upstream gateway in
//! `hermes-gateway` implements it as a decorator that proxies to a peer
//! server when forwarding applies.

use chrono::{DateTime, Utc};
use hermes_core::{
    BoxFuture, CallContext, Envelope, HermesResult, PatchDocument, QueryFilter, Resource,
    ResourceReference,
};

/// A sub-resource operation dispatched through [`ProtocolService::child`].
#[derive(Debug, Clone)]
pub enum ChildOperation {
    /// Fetch one child object.
    Get {
        /// The child identifier.
        child_id: String,
    },
    /// Add a child object to the collection.
    Add {
        /// The child payload.
        payload: Resource,
    },
    /// Remove a child object from the collection.
    Remove {
        /// The child identifier.
        child_id: String,
    },
    /// Query the child collection.
    Query {
        /// The child filter.
        filter: QueryFilter,
    },
}

impl ChildOperation {
    /// Returns `true` for operations that disclose without mutating.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Get { .. } | Self::Query { .. })
    }
}

/// A single object plus the location surfaced to callers.
#[derive(Debug, Clone)]
pub struct ResourceResponse {
    /// The object.
    pub resource: Resource,
    /// Location of the object (its version location when versioned).
    pub location: Option<ResourceReference>,
}

/// The outcome of one dispatched operation.
#[derive(Debug, Clone)]
pub enum DispatchResponse {
    /// A single object.
    Resource(ResourceResponse),
    /// A collection envelope.
    Envelope(Envelope),
    /// A conditional read short-circuited; nothing changed.
    NotModified {
        /// The tag the caller already holds.
        version_id: Option<String>,
    },
}

impl DispatchResponse {
    /// Wraps a single object, deriving its location.
    #[must_use]
    pub fn from_resource(resource: Resource) -> Self {
        let location = resource
            .version_location()
            .or_else(|| Some(resource.reference()));
        Self::Resource(ResourceResponse { resource, location })
    }

    /// Returns the single object, when present.
    #[must_use]
    pub fn resource(&self) -> Option<&Resource> {
        match self {
            Self::Resource(r) => Some(&r.resource),
            _ => None,
        }
    }

    /// Returns the envelope, when present.
    #[must_use]
    pub fn envelope(&self) -> Option<&Envelope> {
        match self {
            Self::Envelope(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the object tag surfaced to the caller.
    #[must_use]
    pub fn version_id(&self) -> Option<&str> {
        match self {
            Self::Resource(r) => r.resource.version_id.as_deref(),
            Self::NotModified { version_id } => version_id.as_deref(),
            Self::Envelope(_) => None,
        }
    }

    /// Returns the last-modified timestamp surfaced to the caller.
    #[must_use]
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Resource(r) => r.resource.last_modified,
            _ => None,
        }
    }

    /// Returns `true` for the not-modified short-circuit.
    #[must_use]
    pub fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified { .. })
    }

    /// Unwraps the single object, when present.
    #[must_use]
    pub fn into_resource(self) -> Option<Resource> {
        match self {
            Self::Resource(r) => Some(r.resource),
            _ => None,
        }
    }
}

/// One operation per protocol verb.
///
/// Implementations must be safe to share across concurrent requests; all
/// per-call state travels in the [`CallContext`] and arguments.
pub trait ProtocolService: Send + Sync {
    /// Creates an object.
    fn create<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        payload: Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Reads one object, optionally a specific version.
    fn read<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        version_id: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Replaces one object.
    fn update<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        payload: Resource,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Deletes one object.
    fn delete<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Queries a resource type.
    fn search<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        filter: QueryFilter,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Retrieves an object's version history, newest first, stopping at the
    /// optional `since` version (exclusive).
    fn history<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Applies a patch document to one object.
    fn patch<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: &'a str,
        patch: PatchDocument,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Applies a batch of patches as one handler call.
    fn patch_batch<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        patches: Vec<(String, PatchDocument)>,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Traverses a child association; `parent_id` is `None` for
    /// class-scoped bindings.
    fn child<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        parent_id: Option<&'a str>,
        child_name: &'a str,
        operation: ChildOperation,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;

    /// Invokes a custom operation, class-scoped when `id` is `None`.
    fn invoke<'a>(
        &'a self,
        ctx: &'a CallContext,
        resource_type: &'a str,
        id: Option<&'a str>,
        operation: &'a str,
        params: serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<DispatchResponse>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_resource_prefers_version_location() {
        let response = DispatchResponse::from_resource(
            Resource::new("Patient", "p-1").with_version("3"),
        );
        match &response {
            DispatchResponse::Resource(r) => {
                assert_eq!(r.location.as_ref().unwrap().version_id(), Some("3"));
            }
            _ => panic!("expected resource response"),
        }
        assert_eq!(response.version_id(), Some("3"));
    }

    #[test]
    fn test_from_resource_falls_back_to_reference() {
        let response = DispatchResponse::from_resource(Resource::new("Patient", "p-1"));
        match &response {
            DispatchResponse::Resource(r) => {
                let location = r.location.as_ref().unwrap();
                assert_eq!(location.id(), Some("p-1"));
                assert!(location.version_id().is_none());
            }
            _ => panic!("expected resource response"),
        }
    }

    #[test]
    fn test_child_operation_read_only() {
        assert!(ChildOperation::Get {
            child_id: "c".into()
        }
        .is_read_only());
        assert!(!ChildOperation::Remove {
            child_id: "c".into()
        }
        .is_read_only());
    }
}
