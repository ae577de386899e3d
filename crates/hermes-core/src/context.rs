//! Per-call context.
//!
//! The [`CallContext`] carries the caller-scoped facts every verb needs:
//! correlation id, conditional predicates, forwarding preferences, and the
//! requested representation.

use http::header::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::conditional::ConditionalContext;

/// Header carrying the caller's explicit forwarding preference.
pub static FORWARD_HEADER: HeaderName = HeaderName::from_static("x-hermes-forward");

/// A unique identifier for each call, using UUID v7.
///
/// UUID v7 is time-ordered, which makes it ideal for request tracking and
/// log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(Uuid);

impl RequestId {
    /// Creates a new unique request ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Creates a `RequestId` from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Per-call state flowing through the dispatcher and gateway.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    request_id: RequestId,
    conditional: ConditionalContext,
    forward: Option<bool>,
    forward_header: Option<bool>,
    elevated: bool,
    view: Option<String>,
    include_related: bool,
}

impl CallContext {
    /// Creates a context with a fresh request id and no predicates.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a context from HTTP headers: conditional predicates plus the
    /// explicit forwarding header.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        let forward_header = headers
            .get(&FORWARD_HEADER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| match v.trim() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            });
        Self {
            conditional: ConditionalContext::from_headers(headers),
            forward_header,
            ..Self::default()
        }
    }

    /// Sets the conditional context.
    #[must_use]
    pub fn with_conditional(mut self, conditional: ConditionalContext) -> Self {
        self.conditional = conditional;
        self
    }

    /// Sets the explicit per-request forwarding flag.
    #[must_use]
    pub fn with_forward(mut self, forward: bool) -> Self {
        self.forward = Some(forward);
        self
    }

    /// Sets the forwarding preference parsed from a header.
    #[must_use]
    pub fn with_forward_header(mut self, forward: bool) -> Self {
        self.forward_header = Some(forward);
        self
    }

    /// Marks the caller as running under an elevated context.
    ///
    /// Reads by elevated callers are not recorded in the shared cache.
    #[must_use]
    pub fn with_elevated(mut self) -> Self {
        self.elevated = true;
        self
    }

    /// Sets the requested representation/view.
    #[must_use]
    pub fn with_view(mut self, view: impl Into<String>) -> Self {
        self.view = Some(view.into());
        self
    }

    /// Requests eager expansion of the object's references.
    #[must_use]
    pub fn with_related(mut self) -> Self {
        self.include_related = true;
        self
    }

    /// Returns the request id.
    #[must_use]
    pub fn request_id(&self) -> RequestId {
        self.request_id
    }

    /// Returns the conditional predicates.
    #[must_use]
    pub fn conditional(&self) -> &ConditionalContext {
        &self.conditional
    }

    /// Returns the explicit request-level forwarding flag.
    #[must_use]
    pub fn forward(&self) -> Option<bool> {
        self.forward
    }

    /// Returns the header-level forwarding flag.
    #[must_use]
    pub fn forward_header(&self) -> Option<bool> {
        self.forward_header
    }

    /// Returns `true` for elevated callers.
    #[must_use]
    pub fn elevated(&self) -> bool {
        self.elevated
    }

    /// Returns the requested representation, if any.
    #[must_use]
    pub fn view(&self) -> Option<&str> {
        self.view.as_deref()
    }

    /// Returns `true` when related objects should be expanded.
    #[must_use]
    pub fn include_related(&self) -> bool {
        self.include_related
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_request_ids_are_unique() {
        assert_ne!(RequestId::new(), RequestId::new());
    }

    #[test]
    fn test_from_headers_parses_forward_flag() {
        let mut headers = HeaderMap::new();
        headers.insert(&FORWARD_HEADER, HeaderValue::from_static("true"));
        assert_eq!(CallContext::from_headers(&headers).forward_header(), Some(true));

        headers.insert(&FORWARD_HEADER, HeaderValue::from_static("0"));
        assert_eq!(CallContext::from_headers(&headers).forward_header(), Some(false));

        headers.insert(&FORWARD_HEADER, HeaderValue::from_static("maybe"));
        assert_eq!(CallContext::from_headers(&headers).forward_header(), None);
    }

    #[test]
    fn test_from_headers_picks_up_conditionals() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("\"v1\""));
        let ctx = CallContext::from_headers(&headers);
        assert!(ctx.conditional().none_match_matches(Some("v1")));
    }
}
