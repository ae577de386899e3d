//! The patch-service collaborator contract.

use serde::{Deserialize, Serialize};

use crate::error::HermesResult;
use crate::types::Resource;

/// A patch document: optional state assertions plus a merge payload.
///
/// `assert_version` pins the version the patch was authored against; the
/// service rejects application against any other version unless forced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatchDocument {
    /// The version the patch expects to find, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assert_version: Option<String>,
    /// The patch payload, interpreted by the patch service.
    pub merge: serde_json::Value,
}

impl PatchDocument {
    /// Creates a patch with no assertions.
    #[must_use]
    pub fn new(merge: serde_json::Value) -> Self {
        Self {
            assert_version: None,
            merge,
        }
    }

    /// Pins the expected target version.
    #[must_use]
    pub fn with_assert_version(mut self, version_id: impl Into<String>) -> Self {
        self.assert_version = Some(version_id.into());
        self
    }
}

/// Produces post-patch objects and patch documents.
///
/// `apply` fails with [`crate::HermesError::PatchAssertionFailed`] when the
/// document's assertions about the target's state do not hold and `force`
/// is `false`.
pub trait PatchService: Send + Sync {
    /// Applies a patch to the current object, returning the patched object.
    fn apply(
        &self,
        patch: &PatchDocument,
        current: &Resource,
        force: bool,
    ) -> HermesResult<Resource>;

    /// Computes the patch that transforms `a` into `b`.
    fn diff(&self, a: &Resource, b: &Resource) -> PatchDocument;
}

/// JSON merge-patch [`PatchService`] with version assertions.
///
/// `merge` payloads follow RFC 7386 semantics: objects merge recursively,
/// `null` removes a key, everything else replaces.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonMergePatchService;

impl JsonMergePatchService {
    fn merge(target: &mut serde_json::Value, patch: &serde_json::Value) {
        use serde_json::Value;
        match (target, patch) {
            (Value::Object(target_map), Value::Object(patch_map)) => {
                for (key, value) in patch_map {
                    if value.is_null() {
                        target_map.remove(key);
                    } else {
                        Self::merge(target_map.entry(key.clone()).or_insert(Value::Null), value);
                    }
                }
            }
            (target, patch) => *target = patch.clone(),
        }
    }
}

impl PatchService for JsonMergePatchService {
    fn apply(
        &self,
        patch: &PatchDocument,
        current: &Resource,
        force: bool,
    ) -> HermesResult<Resource> {
        if !force {
            if let Some(expected) = &patch.assert_version {
                if current.version_id.as_ref() != Some(expected) {
                    return Err(crate::HermesError::patch_assertion(format!(
                        "expected version '{expected}', object is at version '{}'",
                        current.version_id.as_deref().unwrap_or("<none>")
                    )));
                }
            }
        }
        let mut patched = current.clone();
        Self::merge(&mut patched.body, &patch.merge);
        Ok(patched)
    }

    fn diff(&self, a: &Resource, b: &Resource) -> PatchDocument {
        use serde_json::Value;
        let mut merge = serde_json::Map::new();
        if let (Value::Object(from), Value::Object(to)) = (&a.body, &b.body) {
            for (key, value) in to {
                if from.get(key) != Some(value) {
                    merge.insert(key.clone(), value.clone());
                }
            }
            for key in from.keys() {
                if !to.contains_key(key) {
                    merge.insert(key.clone(), Value::Null);
                }
            }
        }
        let mut doc = PatchDocument::new(Value::Object(merge));
        if let Some(version) = &a.version_id {
            doc = doc.with_assert_version(version.clone());
        }
        doc
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HermesError;

    #[test]
    fn test_patch_document_roundtrip() {
        let patch = PatchDocument::new(serde_json::json!({"name": "Ada"}))
            .with_assert_version("3");
        let json = serde_json::to_string(&patch).expect("serialization should work");
        let back: PatchDocument = serde_json::from_str(&json).expect("deserialization");
        assert_eq!(back, patch);
    }

    #[test]
    fn test_merge_patch_applies_and_asserts() {
        let service = JsonMergePatchService;
        let current = Resource::new("Patient", "p-1")
            .with_version("2")
            .with_body(serde_json::json!({"name": "Ada", "active": true}));

        let patch = PatchDocument::new(serde_json::json!({"name": "Grace", "active": null}))
            .with_assert_version("2");
        let patched = service.apply(&patch, &current, false).unwrap();
        assert_eq!(patched.body["name"], "Grace");
        assert!(patched.body.get("active").is_none());

        let stale = patch.clone().with_assert_version("1");
        assert!(matches!(
            service.apply(&stale, &current, false),
            Err(HermesError::PatchAssertionFailed { .. })
        ));
        assert!(service.apply(&stale, &current, true).is_ok());
    }

    #[test]
    fn test_merge_patch_diff() {
        let service = JsonMergePatchService;
        let a = Resource::new("Patient", "p-1")
            .with_version("1")
            .with_body(serde_json::json!({"name": "Ada", "birth_date": "1815-12-10"}));
        let b = Resource::new("Patient", "p-1")
            .with_body(serde_json::json!({"name": "Grace", "birth_date": "1815-12-10"}));

        let doc = service.diff(&a, &b);
        assert_eq!(doc.assert_version.as_deref(), Some("1"));
        assert_eq!(doc.merge["name"], "Grace");
        assert!(doc.merge.get("birth_date").is_none());
    }
}
