//! # Hermes
//!
//! **Resource protocol dispatch engine for the Themis Platform**
//!
//! Hermes exposes a generic, resource-oriented data-access protocol over a
//! typed repository layer:
//!
//! - **Verb dispatch** – create/read/update/delete/search/history/patch,
//!   child associations and custom operations, routed by resource type name
//! - **Conditional requests** – ETag and timestamp preconditions evaluated
//!   against a shared object cache before a handler is touched
//! - **Audit emission** – exactly one audit record per operation, on every
//!   exit path
//! - **Upstream forwarding** – a decorator that transparently proxies
//!   operations to a peer server and keeps the local cache consistent
//! - **Graph copy** – pull a remote object plus its referenced graph into
//!   local storage as one transactional bundle
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use hermes::prelude::*;
//! use std::sync::Arc;
//!
//! let registry = Arc::new(
//!     HandlerRegistry::builder()
//!         .register(Arc::new(my_patient_handler))
//!         .build(),
//! );
//! let dispatcher = Dispatcher::builder(registry).build();
//!
//! let response = dispatcher
//!     .read(&CallContext::new(), "Patient", "p-1", None)
//!     .await?;
//! ```

#![doc(html_root_url = "https://docs.rs/hermes/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use hermes_core as core;

// Re-export the dispatcher
pub use hermes_dispatch as dispatch;

// Re-export the upstream gateway
pub use hermes_gateway as gateway;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use hermes::prelude::*;
/// ```
pub mod prelude {
    pub use hermes_core::{
        AuditOutcome, AuditRecordBuilder, AuditSink, CacheClient, CachedResourceState,
        CallContext, ConditionalContext, Envelope, HandlerDescriptor, HandlerRegistry,
        HermesError, HermesResult, InMemoryCache, LocalStore, PatchDocument, PatchService,
        PolicyGuard, PolicyTable, QueryFilter, QueryResult, RequestId, Resource,
        ResourceHandler, ResourceReference, RunState, RunStateHandle, Verb,
    };

    pub use hermes_dispatch::{
        BundleBuilder, ChildOperation, DispatchResponse, Dispatcher, PreconditionEvaluator,
        PreconditionVerdict, ProtocolService,
    };

    pub use hermes_gateway::{
        ForwardingDecision, GatewayConfig, GraphCopyEngine, PeerClient, ProgressListener,
        UpstreamGateway, UpstreamTransport,
    };
}
