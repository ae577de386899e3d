//! Conditional-request evaluation.
//!
//! The evaluator decides whether an identified operation proceeds,
//! short-circuits as not-modified, or is rejected for stale conditions. It
//! consults the shared object cache first and falls back to a metadata-only
//! quick fetch through the handler on a miss. The verdict is a tri-state
//! value, never an exception: the dispatcher owns the mapping to outcomes.

use std::sync::Arc;

use hermes_core::{CacheClient, ConditionalContext, HermesResult, ResourceHandler};

/// The evaluator's verdict for one identified operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreconditionVerdict {
    /// No predicate blocks the operation.
    Proceed,
    /// The caller's representation is current (reads short-circuit; writes
    /// are rejected as stale).
    NotModified,
    /// The caller's conditions no longer hold.
    PreconditionFailed,
}

/// Evaluates conditional predicates against the object cache.
pub struct PreconditionEvaluator {
    cache: Arc<dyn CacheClient>,
}

impl PreconditionEvaluator {
    /// Creates an evaluator over the shared cache.
    #[must_use]
    pub fn new(cache: Arc<dyn CacheClient>) -> Self {
        Self { cache }
    }

    /// Evaluates the caller's predicates for one object.
    ///
    /// Fast path: an empty context proceeds without touching the cache.
    /// A cache entry carrying the one-shot revalidation marker forces a
    /// single `Proceed` so exactly one real fetch refreshes the state.
    /// On a cache miss the handler's metadata fetch populates the cache;
    /// a missing object surfaces as a not-found error.
    pub async fn evaluate(
        &self,
        handler: &dyn ResourceHandler,
        id: &str,
        conditional: &ConditionalContext,
    ) -> HermesResult<PreconditionVerdict> {
        if conditional.is_empty() {
            return Ok(PreconditionVerdict::Proceed);
        }

        let state = match self.cache.get(id) {
            Some(state) => {
                if state.revalidate && self.cache.take_revalidation(id) {
                    tracing::debug!(id, "stale cache marker consumed, forcing re-fetch");
                    return Ok(PreconditionVerdict::Proceed);
                }
                state
            }
            None => {
                let state = handler.get_state(id).await?;
                self.cache.put(state.clone());
                state
            }
        };

        let tag = state.version_id.as_deref();

        // Tag predicates take priority over timestamp predicates, and a
        // none-match hit outranks a match failure.
        if conditional.none_match_matches(tag) {
            return Ok(PreconditionVerdict::NotModified);
        }
        if conditional.match_fails(tag) {
            return Ok(PreconditionVerdict::PreconditionFailed);
        }

        if let (Some(modified), Some(since)) = (state.last_modified, conditional.if_modified_since())
        {
            if modified <= since {
                return Ok(PreconditionVerdict::NotModified);
            }
        }
        if let (Some(modified), Some(until)) =
            (state.last_modified, conditional.if_unmodified_since())
        {
            if modified > until {
                return Ok(PreconditionVerdict::PreconditionFailed);
            }
        }

        Ok(PreconditionVerdict::Proceed)
    }
}
