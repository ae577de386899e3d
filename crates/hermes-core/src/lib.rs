//! Core types and traits for the Hermes resource protocol engine.
//!
//! Hermes exposes a resource-oriented data-access protocol over a typed
//! repository layer. This crate defines the vocabulary shared by the
//! dispatcher and the upstream gateway:
//!
//! - [`Resource`], [`ResourceReference`] and [`Envelope`] - the objects the
//!   protocol moves around
//! - [`ConditionalContext`] - caller-supplied conditional-request predicates
//! - [`HermesError`] - the error taxonomy every component speaks
//! - [`ResourceHandler`] and friends - the capability set a resource type
//!   exposes to the dispatcher
//! - [`HandlerRegistry`] - name-to-handler resolution built once at startup
//! - [`CacheClient`] - the shared object cache contract
//! - [`PolicyTable`] / [`PolicyGuard`] - declarative policy demands
//! - [`AuditRecordBuilder`] / [`AuditSink`] - audit record emission
//! - [`PatchService`] and [`LocalStore`] - external collaborator contracts
//!
//! Higher layers live in `hermes-dispatch` (verb orchestration) and
//! `hermes-gateway` (upstream forwarding and graph copy).

pub mod audit;
pub mod cache;
pub mod conditional;
pub mod context;
pub mod envelope;
pub mod error;
pub mod fixtures;
pub mod handler;
pub mod patch;
pub mod policy;
pub mod registry;
pub mod state;
pub mod store;
pub mod types;

pub use audit::{
    AuditOutcome, AuditRecord, AuditRecordBuilder, AuditSink, AuditedObject, ObjectLifecycle,
    RecordingAuditSink, Sensitivity, TracingAuditSink,
};
pub use cache::{CacheClient, CachedResourceState, InMemoryCache};
pub use conditional::ConditionalContext;
pub use context::{CallContext, RequestId, FORWARD_HEADER};
pub use envelope::Envelope;
pub use error::{HermesError, HermesResult};
pub use handler::{
    AssociationCapability, AssociationDescriptor, AssociationScope, BoxFuture, DeleteOutcome,
    HandlerDescriptor, OperationCapability, ResourceHandler,
};
pub use patch::{JsonMergePatchService, PatchDocument, PatchService};
pub use policy::{AllowAllGuard, DenyAllGuard, PolicyBinding, PolicyGuard, PolicyTable, Verb};
pub use registry::{HandlerRegistry, HandlerRegistryBuilder};
pub use state::{RunState, RunStateHandle};
pub use store::LocalStore;
pub use types::{LinkKind, QueryFilter, QueryResult, Resource, ResourceLink, ResourceReference};
