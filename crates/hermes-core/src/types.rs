//! Resource and reference types.
//!
//! A [`Resource`] is the unit every protocol verb operates on: an opaque JSON
//! body plus the addressing and versioning metadata the dispatch layer needs.
//! A [`ResourceReference`] identifies any addressable object and is immutable
//! once constructed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifies any addressable object: a resource type, optionally narrowed
/// to a single object and a single version of that object.
///
/// # Example
///
/// ```
/// use hermes_core::ResourceReference;
///
/// let all_patients = ResourceReference::new("Patient");
/// let one = ResourceReference::to("Patient", "p-1");
/// assert_eq!(one.to_string(), "Patient/p-1");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceReference {
    resource_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version_id: Option<String>,
}

impl ResourceReference {
    /// Creates a reference to a resource type as a whole.
    #[must_use]
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: None,
            version_id: None,
        }
    }

    /// Creates a reference to a single object.
    #[must_use]
    pub fn to(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            version_id: None,
        }
    }

    /// Creates a reference to a specific version of an object.
    #[must_use]
    pub fn to_version(
        resource_type: impl Into<String>,
        id: impl Into<String>,
        version_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: Some(id.into()),
            version_id: Some(version_id.into()),
        }
    }

    /// Returns the resource type name.
    #[must_use]
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the object identifier, if any.
    #[must_use]
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Returns the version identifier, if any.
    #[must_use]
    pub fn version_id(&self) -> Option<&str> {
        self.version_id.as_deref()
    }
}

impl std::fmt::Display for ResourceReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.resource_type)?;
        if let Some(id) = &self.id {
            write!(f, "/{id}")?;
        }
        if let Some(version) = &self.version_id {
            write!(f, "/_history/{version}")?;
        }
        Ok(())
    }
}

/// Classification of an outgoing reference from one resource to another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkKind {
    /// A substantive relationship to another object.
    Relationship,
    /// Participation in an activity or event record.
    Participation,
    /// A non-substantive duplicate marker; excluded from graph copies.
    DuplicateOf,
}

/// An outgoing reference carried by a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLink {
    /// Classification of the link.
    pub kind: LinkKind,
    /// The referenced object.
    pub target: ResourceReference,
}

impl ResourceLink {
    /// Creates a new link.
    #[must_use]
    pub fn new(kind: LinkKind, target: ResourceReference) -> Self {
        Self { kind, target }
    }
}

/// A protocol object: an opaque body plus addressing, versioning and
/// reference metadata.
///
/// The `version_id` doubles as the object's opportunistic-concurrency tag;
/// `previous_version_id` chains versions backward for history retrieval.
/// `upstream_only` marks objects returned from a peer server that have not
/// been persisted locally.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    /// The resource type name.
    pub resource_type: String,
    /// The object identifier.
    pub id: String,
    /// Version identifier; the concurrency tag surfaced to callers.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_id: Option<String>,
    /// When this version was written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
    /// The version preceding this one, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_version_id: Option<String>,
    /// Outgoing references to other objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub links: Vec<ResourceLink>,
    /// The object body.
    #[serde(default)]
    pub body: serde_json::Value,
    /// Set when the object came from a peer server and is not stored locally.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub upstream_only: bool,
}

impl Resource {
    /// Creates a resource with an empty body.
    #[must_use]
    pub fn new(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            id: id.into(),
            version_id: None,
            last_modified: None,
            previous_version_id: None,
            links: Vec::new(),
            body: serde_json::Value::Null,
            upstream_only: false,
        }
    }

    /// Sets the version identifier.
    #[must_use]
    pub fn with_version(mut self, version_id: impl Into<String>) -> Self {
        self.version_id = Some(version_id.into());
        self
    }

    /// Sets the last-modified timestamp.
    #[must_use]
    pub fn with_last_modified(mut self, at: DateTime<Utc>) -> Self {
        self.last_modified = Some(at);
        self
    }

    /// Sets the previous-version pointer.
    #[must_use]
    pub fn with_previous_version(mut self, version_id: impl Into<String>) -> Self {
        self.previous_version_id = Some(version_id.into());
        self
    }

    /// Sets the body.
    #[must_use]
    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = body;
        self
    }

    /// Adds an outgoing link.
    #[must_use]
    pub fn with_link(mut self, kind: LinkKind, target: ResourceReference) -> Self {
        self.links.push(ResourceLink::new(kind, target));
        self
    }

    /// Returns a reference to this object.
    #[must_use]
    pub fn reference(&self) -> ResourceReference {
        ResourceReference::to(self.resource_type.clone(), self.id.clone())
    }

    /// Returns a reference to this specific version, when versioned.
    #[must_use]
    pub fn version_location(&self) -> Option<ResourceReference> {
        self.version_id.as_ref().map(|v| {
            ResourceReference::to_version(self.resource_type.clone(), self.id.clone(), v.clone())
        })
    }

    /// Returns the substantive outgoing links (everything but duplicates).
    pub fn substantive_links(&self) -> impl Iterator<Item = &ResourceLink> {
        self.links
            .iter()
            .filter(|l| l.kind != LinkKind::DuplicateOf)
    }
}

/// Filter and paging parameters for a query operation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryFilter {
    /// Name/value filter parameters, interpreted by the handler.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub params: Vec<(String, String)>,
    /// Number of matching objects to skip.
    #[serde(default)]
    pub offset: usize,
    /// Maximum number of objects to return; `None` means no page limit.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    /// Continuation token from a previous page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
    /// Property paths to retain in returned objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub include_paths: Vec<String>,
    /// Property paths to drop from returned objects.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub exclude_paths: Vec<String>,
}

impl QueryFilter {
    /// Creates an empty filter.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a filter parameter.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.push((name.into(), value.into()));
        self
    }

    /// Sets the paging offset.
    #[must_use]
    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Sets the page size.
    #[must_use]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_continuation(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }
}

/// The outcome of a handler query.
///
/// `total` is populated only when the source can report its full match count
/// without a second enumeration; the bundle builder falls back to the item
/// count otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueryResult {
    /// The matching objects.
    pub items: Vec<Resource>,
    /// Full match count, when cheaply known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total: Option<usize>,
    /// Continuation token for the next page, when the source pages.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

impl QueryResult {
    /// Creates a result from a set of items.
    #[must_use]
    pub fn new(items: Vec<Resource>) -> Self {
        Self {
            items,
            total: None,
            continuation: None,
        }
    }

    /// Sets the full match count.
    #[must_use]
    pub fn with_total(mut self, total: usize) -> Self {
        self.total = Some(total);
        self
    }

    /// Sets the continuation token.
    #[must_use]
    pub fn with_continuation(mut self, token: impl Into<String>) -> Self {
        self.continuation = Some(token.into());
        self
    }

    /// Returns `true` when the result holds no items.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_display() {
        assert_eq!(ResourceReference::new("Patient").to_string(), "Patient");
        assert_eq!(
            ResourceReference::to("Patient", "p-1").to_string(),
            "Patient/p-1"
        );
        assert_eq!(
            ResourceReference::to_version("Patient", "p-1", "3").to_string(),
            "Patient/p-1/_history/3"
        );
    }

    #[test]
    fn test_version_location() {
        let r = Resource::new("Patient", "p-1");
        assert!(r.version_location().is_none());

        let r = r.with_version("2");
        let loc = r.version_location().unwrap();
        assert_eq!(loc.version_id(), Some("2"));
        assert_eq!(loc.id(), Some("p-1"));
    }

    #[test]
    fn test_substantive_links_skip_duplicates() {
        let r = Resource::new("Patient", "p-1")
            .with_link(LinkKind::Relationship, ResourceReference::to("Person", "x"))
            .with_link(LinkKind::DuplicateOf, ResourceReference::to("Patient", "y"))
            .with_link(
                LinkKind::Participation,
                ResourceReference::to("Encounter", "e"),
            );

        let kinds: Vec<_> = r.substantive_links().map(|l| l.kind).collect();
        assert_eq!(kinds, vec![LinkKind::Relationship, LinkKind::Participation]);
    }

    #[test]
    fn test_resource_serialization_skips_defaults() {
        let r = Resource::new("Patient", "p-1");
        let json = serde_json::to_string(&r).expect("serialization should work");
        assert!(!json.contains("upstream_only"));
        assert!(!json.contains("links"));
        assert!(!json.contains("version_id"));
    }

    #[test]
    fn test_resource_roundtrip() {
        let r = Resource::new("Patient", "p-1")
            .with_version("1")
            .with_body(serde_json::json!({"name": "Ada"}))
            .with_link(LinkKind::Relationship, ResourceReference::to("Person", "x"));

        let json = serde_json::to_string(&r).expect("serialization should work");
        let back: Resource = serde_json::from_str(&json).expect("deserialization should work");
        assert_eq!(back, r);
    }
}
