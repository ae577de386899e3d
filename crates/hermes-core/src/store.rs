//! The local object store collaborator contract.
//!
//! The gateway and graph copy engine only need two facts from local
//! storage: whether an object is already present, and the ability to commit
//! a bundle of objects as one transaction.

use crate::envelope::Envelope;
use crate::error::HermesResult;
use crate::handler::BoxFuture;

/// Presence checks and transactional bundle inserts over local storage.
pub trait LocalStore: Send + Sync {
    /// Returns `true` when the object exists locally.
    fn contains<'a>(
        &'a self,
        resource_type: &'a str,
        id: &'a str,
    ) -> BoxFuture<'a, HermesResult<bool>>;

    /// Commits every object in the envelope as a single transaction,
    /// attributed to the envelope's correlation key. Returns the number of
    /// objects written. All-or-nothing: a failure writes nothing.
    fn insert_bundle<'a>(&'a self, bundle: Envelope) -> BoxFuture<'a, HermesResult<usize>>;
}
