//! Protocol dispatcher for the Hermes resource protocol engine.
//!
//! This crate orchestrates every protocol verb over the handler registry:
//! run-state check, policy demand, precondition evaluation against the
//! shared object cache, handler invocation, response envelope construction,
//! cache side effects and audit emission, in that order. The audit record
//! is finalized on every exit path.
//!
//! The [`ProtocolService`] trait is the seam decorated by
//! `hermes-gateway` for upstream forwarding.

pub mod associations;
pub mod bundle;
pub mod dispatcher;
pub mod precondition;
pub mod service;

pub use associations::AssociationTraverser;
pub use bundle::BundleBuilder;
pub use dispatcher::{Dispatcher, DispatcherBuilder};
pub use precondition::{PreconditionEvaluator, PreconditionVerdict};
pub use service::{ChildOperation, DispatchResponse, ProtocolService, ResourceResponse};
