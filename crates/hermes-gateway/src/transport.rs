//! The upstream peer transport contract.
//!
//! A peer server mirrors this same resource-oriented protocol. The
//! transport owns timeouts and cancellation at the wire boundary and
//! implements no retries; a failed call surfaces as a gateway-unavailable
//! or taxonomy error to the caller, who decides whether to retry.

use hermes_core::{BoxFuture, HermesResult, PatchDocument, QueryFilter, QueryResult, Resource};
use hermes_dispatch::ChildOperation;

/// The representation requested from the peer.
///
/// Read requests prefer the caller's requested view; write requests prefer
/// the canonical, non-view representation so the peer does not resolve
/// display-oriented expansions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Representation {
    /// The canonical representation.
    Canonical,
    /// A caller-requested view.
    Requested(String),
}

impl Representation {
    /// Picks the representation for a read.
    #[must_use]
    pub fn for_read(view: Option<&str>) -> Self {
        match view {
            Some(view) => Self::Requested(view.to_string()),
            None => Self::Canonical,
        }
    }

    /// Returns the `Accept` header value for this representation.
    #[must_use]
    pub fn accept_value(&self) -> String {
        match self {
            Self::Canonical => "application/json; profile=canonical".to_string(),
            Self::Requested(view) => format!("application/json; view={view}"),
        }
    }
}

/// The outcome of a forwarded child operation.
#[derive(Debug, Clone)]
pub enum ChildOutcome {
    /// A single child object.
    Resource(Resource),
    /// A page of the child collection.
    Page(QueryResult),
}

/// Remote calls mirroring the protocol, one per verb.
pub trait UpstreamTransport: Send + Sync {
    /// Returns `true` when the peer is reachable.
    fn probe<'a>(&'a self) -> BoxFuture<'a, bool>;

    /// Fetches one object, optionally a specific version.
    fn fetch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        version_id: Option<&'a str>,
        representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Fetches a batch of objects of one type by id.
    fn fetch_many<'a>(
        &'a self,
        resource_type: &'a str,
        ids: &'a [String],
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>>;

    /// Creates an object on the peer.
    fn create<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
        update_if_exists: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Replaces an object on the peer.
    fn update<'a>(
        &'a self,
        resource_type: &'a str,
        payload: &'a Resource,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Deletes an object on the peer.
    fn delete<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        permanent: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Queries the peer.
    fn search<'a>(
        &'a self,
        resource_type: &'a str,
        filter: &'a QueryFilter,
        representation: &'a Representation,
    ) -> BoxFuture<'a, HermesResult<QueryResult>>;

    /// Retrieves version history from the peer, newest first.
    fn history<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        since: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>>;

    /// Pages through transactional records referencing a subject.
    ///
    /// Paging follows a stable continuation token; an empty page ends the
    /// sequence.
    fn search_related<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        page_size: usize,
        continuation: Option<&'a str>,
    ) -> BoxFuture<'a, HermesResult<QueryResult>>;

    /// Applies a patch on the peer.
    fn patch<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
        patch: &'a PatchDocument,
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Resource>>;

    /// Applies a patch batch on the peer as one call.
    fn patch_batch<'a>(
        &'a self,
        resource_type: &'a str,
        patches: &'a [(String, PatchDocument)],
        force: bool,
    ) -> BoxFuture<'a, HermesResult<Vec<Resource>>>;

    /// Performs a child-association operation on the peer.
    fn child<'a>(
        &'a self,
        resource_type: &'a str,
        parent_id: Option<&'a str>,
        child_name: &'a str,
        operation: &'a ChildOperation,
    ) -> BoxFuture<'a, HermesResult<ChildOutcome>>;

    /// Invokes a custom operation on the peer.
    fn invoke<'a>(
        &'a self,
        resource_type: &'a str,
        id: Option<&'a str>,
        operation: &'a str,
        params: &'a serde_json::Value,
    ) -> BoxFuture<'a, HermesResult<Resource>>;
}
