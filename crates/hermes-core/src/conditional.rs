//! Conditional-request context.
//!
//! Callers gate operations with HTTP-style conditional predicates over an
//! object's tag or modification time. The context is built once per request
//! and read-only afterward; an absent header means the predicate is not
//! applicable, never that it failed.

use chrono::{DateTime, Utc};
use http::header::{HeaderMap, IF_MATCH, IF_MODIFIED_SINCE, IF_NONE_MATCH, IF_UNMODIFIED_SINCE};

/// The caller-supplied conditional predicates for one request.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConditionalContext {
    if_match: Vec<String>,
    if_none_match: Vec<String>,
    if_modified_since: Option<DateTime<Utc>>,
    if_unmodified_since: Option<DateTime<Utc>>,
}

impl ConditionalContext {
    /// Creates an empty context (no predicates).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses the conditional headers from an HTTP header map.
    ///
    /// Tags are normalized: weak markers and surrounding quotes are stripped.
    /// Unparseable date values are ignored rather than rejected.
    #[must_use]
    pub fn from_headers(headers: &HeaderMap) -> Self {
        Self {
            if_match: tag_list(headers, IF_MATCH.as_str()),
            if_none_match: tag_list(headers, IF_NONE_MATCH.as_str()),
            if_modified_since: http_date(headers, IF_MODIFIED_SINCE.as_str()),
            if_unmodified_since: http_date(headers, IF_UNMODIFIED_SINCE.as_str()),
        }
    }

    /// Adds a tag to the `If-Match` set.
    #[must_use]
    pub fn with_if_match(mut self, tag: impl AsRef<str>) -> Self {
        self.if_match.push(normalize_tag(tag.as_ref()));
        self
    }

    /// Adds a tag to the `If-None-Match` set.
    #[must_use]
    pub fn with_if_none_match(mut self, tag: impl AsRef<str>) -> Self {
        self.if_none_match.push(normalize_tag(tag.as_ref()));
        self
    }

    /// Sets the `If-Modified-Since` timestamp.
    #[must_use]
    pub fn with_if_modified_since(mut self, at: DateTime<Utc>) -> Self {
        self.if_modified_since = Some(at);
        self
    }

    /// Sets the `If-Unmodified-Since` timestamp.
    #[must_use]
    pub fn with_if_unmodified_since(mut self, at: DateTime<Utc>) -> Self {
        self.if_unmodified_since = Some(at);
        self
    }

    /// Returns `true` when no predicate is present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.if_match.is_empty()
            && self.if_none_match.is_empty()
            && self.if_modified_since.is_none()
            && self.if_unmodified_since.is_none()
    }

    /// Returns `true` when the `If-None-Match` set matches the given tag.
    ///
    /// `*` matches any existing object. An empty set never matches.
    #[must_use]
    pub fn none_match_matches(&self, tag: Option<&str>) -> bool {
        if self.if_none_match.is_empty() {
            return false;
        }
        self.if_none_match.iter().any(|t| t == "*")
            || tag.is_some_and(|tag| self.if_none_match.iter().any(|t| t == tag))
    }

    /// Returns `true` when an `If-Match` predicate is present and does NOT
    /// match the given tag.
    ///
    /// An absent `If-Match` header never fails the predicate.
    #[must_use]
    pub fn match_fails(&self, tag: Option<&str>) -> bool {
        if self.if_match.is_empty() {
            return false;
        }
        let matched = self.if_match.iter().any(|t| t == "*")
            || tag.is_some_and(|tag| self.if_match.iter().any(|t| t == tag));
        !matched
    }

    /// Returns the `If-Modified-Since` timestamp, if present.
    #[must_use]
    pub fn if_modified_since(&self) -> Option<DateTime<Utc>> {
        self.if_modified_since
    }

    /// Returns the `If-Unmodified-Since` timestamp, if present.
    #[must_use]
    pub fn if_unmodified_since(&self) -> Option<DateTime<Utc>> {
        self.if_unmodified_since
    }

    /// Returns the normalized `If-Match` tags.
    #[must_use]
    pub fn if_match(&self) -> &[String] {
        &self.if_match
    }

    /// Returns the normalized `If-None-Match` tags.
    #[must_use]
    pub fn if_none_match(&self) -> &[String] {
        &self.if_none_match
    }
}

/// Strips weak markers and surrounding quotes from an entity tag.
fn normalize_tag(raw: &str) -> String {
    let t = raw.trim();
    let t = t.strip_prefix("W/").unwrap_or(t);
    t.trim_matches('"').to_string()
}

fn tag_list(headers: &HeaderMap, name: &str) -> Vec<String> {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .map(normalize_tag)
        .filter(|t| !t.is_empty())
        .collect()
}

fn http_date(headers: &HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    let raw = headers.get(name)?.to_str().ok()?;
    DateTime::parse_from_rfc2822(raw)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    #[test]
    fn test_empty_context() {
        let cond = ConditionalContext::new();
        assert!(cond.is_empty());
        assert!(!cond.none_match_matches(Some("v1")));
        assert!(!cond.match_fails(Some("v1")));
    }

    #[test]
    fn test_from_headers_normalizes_tags() {
        let mut headers = HeaderMap::new();
        headers.insert("if-none-match", HeaderValue::from_static("W/\"v1\", \"v2\""));
        headers.insert("if-match", HeaderValue::from_static("\"v3\""));

        let cond = ConditionalContext::from_headers(&headers);
        assert_eq!(cond.if_none_match(), &["v1".to_string(), "v2".to_string()]);
        assert_eq!(cond.if_match(), &["v3".to_string()]);
    }

    #[test]
    fn test_from_headers_parses_dates() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "if-modified-since",
            HeaderValue::from_static("Wed, 21 Oct 2015 07:28:00 GMT"),
        );
        let cond = ConditionalContext::from_headers(&headers);
        assert!(cond.if_modified_since().is_some());
        assert!(!cond.is_empty());
    }

    #[test]
    fn test_none_match_star_matches_anything() {
        let cond = ConditionalContext::new().with_if_none_match("*");
        assert!(cond.none_match_matches(Some("whatever")));
        // `*` means "the object exists"; an untagged object still exists.
        assert!(cond.none_match_matches(None));
    }

    #[test]
    fn test_match_fails_only_when_present_and_unmatched() {
        let cond = ConditionalContext::new().with_if_match("v1");
        assert!(!cond.match_fails(Some("v1")));
        assert!(cond.match_fails(Some("v2")));
        assert!(cond.match_fails(None));

        // Absent If-Match never fails.
        let empty = ConditionalContext::new();
        assert!(!empty.match_fails(Some("anything")));
        assert!(!empty.match_fails(None));
    }

    #[test]
    fn test_match_star() {
        let cond = ConditionalContext::new().with_if_match("*");
        assert!(!cond.match_fails(Some("v9")));
    }
}
