//! Upstream forwarding gateway and graph copy engine for Hermes.
//!
//! [`UpstreamGateway`] decorates a local [`hermes_dispatch::ProtocolService`]:
//! per request it decides local-vs-remote execution, proxies forwarded calls
//! to a peer server speaking the same protocol, and reconciles the shared
//! object cache (invalidate on mutation, tag-and-cache on read).
//! [`GraphCopyEngine`] pulls a remote object plus its directly referenced
//! graph into local storage as one transactional bundle.

pub mod client;
pub mod config;
pub mod copy;
pub mod fixtures;
pub mod forwarding;
pub mod gateway;
pub mod revalidation;
pub mod transport;

pub use client::PeerClient;
pub use config::GatewayConfig;
pub use copy::{CopyStage, GraphCopyEngine, NoopProgress, ProgressListener};
pub use fixtures::MemoryPeer;
pub use forwarding::ForwardingDecision;
pub use gateway::{UpstreamGateway, UpstreamGatewayBuilder};
pub use revalidation::{RecentValidationCache, RevalidationConfig};
pub use transport::{ChildOutcome, Representation, UpstreamTransport};
