//! Declarative policy demands.
//!
//! Handlers declare the policies each verb requires in a [`PolicyTable`]
//! consulted directly by the dispatcher (no reflection). A binding marked
//! `override_others` narrows the effective set for that verb to only the
//! override-marked bindings.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::{HermesError, HermesResult};

/// Every operation the protocol dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verb {
    /// Create a new object.
    Create,
    /// Read one object (optionally a specific version).
    Read,
    /// Replace one object.
    Update,
    /// Delete one object.
    Delete,
    /// Query a resource type.
    Search,
    /// Retrieve an object's version history.
    History,
    /// Apply a patch document.
    Patch,
    /// Traverse a child association.
    Child,
    /// Invoke a custom operation.
    Invoke,
    /// Pull a remote object graph into local storage.
    Copy,
}

impl Verb {
    /// Returns the verb name used in audit records and logs.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Read => "read",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Search => "search",
            Self::History => "history",
            Self::Patch => "patch",
            Self::Child => "child",
            Self::Invoke => "invoke",
            Self::Copy => "copy",
        }
    }

    /// Returns `true` for verbs that disclose without mutating.
    #[must_use]
    pub const fn is_read_only(self) -> bool {
        matches!(self, Self::Read | Self::Search | Self::History)
    }
}

impl std::fmt::Display for Verb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// One declared policy demand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyBinding {
    /// The policy identifier handed to the guard.
    pub policy_id: String,
    /// When set, narrows the verb's effective demands to override-marked
    /// bindings only.
    pub override_others: bool,
}

impl PolicyBinding {
    /// Creates a plain binding.
    #[must_use]
    pub fn new(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            override_others: false,
        }
    }

    /// Creates an override binding.
    #[must_use]
    pub fn overriding(policy_id: impl Into<String>) -> Self {
        Self {
            policy_id: policy_id.into(),
            override_others: true,
        }
    }
}

/// The policies a handler declares per verb.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicyTable {
    entries: HashMap<Verb, Vec<PolicyBinding>>,
}

impl PolicyTable {
    /// Creates an empty table (no demands).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a policy demand for a verb.
    #[must_use]
    pub fn declare(mut self, verb: Verb, policy_id: impl Into<String>) -> Self {
        self.entries
            .entry(verb)
            .or_default()
            .push(PolicyBinding::new(policy_id));
        self
    }

    /// Declares an override demand for a verb.
    #[must_use]
    pub fn declare_override(mut self, verb: Verb, policy_id: impl Into<String>) -> Self {
        self.entries
            .entry(verb)
            .or_default()
            .push(PolicyBinding::overriding(policy_id));
        self
    }

    /// Returns the demands actually enforced for a verb.
    ///
    /// If any declared binding is marked override, only override-marked
    /// bindings are returned; the rest are ignored for that call.
    #[must_use]
    pub fn effective(&self, verb: Verb) -> Vec<&PolicyBinding> {
        let Some(declared) = self.entries.get(&verb) else {
            return Vec::new();
        };
        if declared.iter().any(|b| b.override_others) {
            declared.iter().filter(|b| b.override_others).collect()
        } else {
            declared.iter().collect()
        }
    }

    /// Returns `true` when no verb declares any demand.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// The policy enforcement collaborator.
///
/// `demand` fails with [`HermesError::AccessDenied`] when the caller lacks
/// the named grant; the dispatcher never catches or retries the denial.
pub trait PolicyGuard: Send + Sync {
    /// Demands a single policy grant.
    fn demand(&self, policy_id: &str) -> HermesResult<()>;
}

/// A guard that grants everything. Useful for development and tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllGuard;

impl PolicyGuard for AllowAllGuard {
    fn demand(&self, _policy_id: &str) -> HermesResult<()> {
        Ok(())
    }
}

/// Convenience guard denying everything; the error names the policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllGuard;

impl PolicyGuard for DenyAllGuard {
    fn demand(&self, policy_id: &str) -> HermesResult<()> {
        Err(HermesError::access_denied(policy_id))
    }
}
