//! Error types for Hermes.
//!
//! [`HermesError`] is the standard error type used throughout the engine.
//! Business-identifiable failures (`PreconditionFailed`, `AccessDenied`,
//! upstream protocol errors) travel unchanged so the transport layer can map
//! them to precise status codes; anything unexpected is wrapped with
//! operation context before re-throwing. "Not modified" is an outcome, not
//! an error, and deliberately has no variant here.

use http::StatusCode;
use thiserror::Error;

/// Result type alias using [`HermesError`].
pub type HermesResult<T> = Result<T, HermesError>;

/// Standard error type for Hermes.
#[derive(Error, Debug)]
pub enum HermesError {
    /// The process is not in a running state; fatal to the request.
    #[error("Service is not ready to accept requests")]
    NotReady,

    /// No handler is registered for the given resource type name.
    #[error("No handler registered for resource type '{resource_type}'")]
    ResourceTypeNotFound {
        /// The unresolved resource type name.
        resource_type: String,
    },

    /// The addressed object does not exist.
    #[error("{resource_type} with ID '{id}' not found")]
    NotFound {
        /// The resource type.
        resource_type: String,
        /// The missing identifier.
        id: String,
    },

    /// A conditional mutation was rejected; callers may retry with
    /// refreshed conditions.
    #[error("Precondition failed: {message}")]
    PreconditionFailed {
        /// Which predicate failed.
        message: String,
    },

    /// A policy demand failed.
    #[error("Access denied by policy '{policy_id}'")]
    AccessDenied {
        /// The policy that denied the caller.
        policy_id: String,
    },

    /// Upstream forwarding is required but the network or peer is
    /// unreachable.
    #[error("Upstream gateway unavailable: {message}")]
    GatewayUnavailable {
        /// What was unreachable.
        message: String,
    },

    /// A patch's assertions about the target object's state did not hold.
    #[error("Patch assertion failed: {message}")]
    PatchAssertionFailed {
        /// Which assertion failed.
        message: String,
    },

    /// Request input was invalid (unknown projection path, bad payload).
    #[error("Validation error: {message}")]
    Validation {
        /// Human-readable error message.
        message: String,
    },

    /// A protocol error reported by the peer server, re-raised unchanged.
    #[error("Upstream error ({status}): {message}")]
    Upstream {
        /// HTTP status the peer returned.
        status: u16,
        /// The peer's error message.
        message: String,
    },

    /// Anything unexpected, wrapped with operation context.
    #[error("Internal error: {message}")]
    Internal {
        /// Human-readable error message naming the failed operation.
        message: String,
        /// The underlying error (not exposed to clients).
        #[source]
        source: Option<anyhow::Error>,
    },
}

impl HermesError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(resource_type: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource_type: resource_type.into(),
            id: id.into(),
        }
    }

    /// Creates a resource-type-not-found error.
    #[must_use]
    pub fn resource_type_not_found(resource_type: impl Into<String>) -> Self {
        Self::ResourceTypeNotFound {
            resource_type: resource_type.into(),
        }
    }

    /// Creates a precondition-failed error.
    #[must_use]
    pub fn precondition_failed(message: impl Into<String>) -> Self {
        Self::PreconditionFailed {
            message: message.into(),
        }
    }

    /// Creates an access-denied error.
    #[must_use]
    pub fn access_denied(policy_id: impl Into<String>) -> Self {
        Self::AccessDenied {
            policy_id: policy_id.into(),
        }
    }

    /// Creates a gateway-unavailable error.
    #[must_use]
    pub fn gateway_unavailable(message: impl Into<String>) -> Self {
        Self::GatewayUnavailable {
            message: message.into(),
        }
    }

    /// Creates a patch-assertion error.
    #[must_use]
    pub fn patch_assertion(message: impl Into<String>) -> Self {
        Self::PatchAssertionFailed {
            message: message.into(),
        }
    }

    /// Creates a validation error.
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Creates an upstream protocol error.
    #[must_use]
    pub fn upstream(status: u16, message: impl Into<String>) -> Self {
        Self::Upstream {
            status,
            message: message.into(),
        }
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an internal error with a source error.
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        Self::Internal {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Returns `true` for business-identifiable failures that must be
    /// re-raised unchanged rather than wrapped.
    #[must_use]
    pub fn is_business(&self) -> bool {
        !matches!(self, Self::Internal { .. })
    }

    /// Wraps an unexpected error with the operation and resource that
    /// failed; business-identifiable errors pass through unchanged.
    #[must_use]
    pub fn with_operation_context(self, operation: &str, target: &str) -> Self {
        if self.is_business() {
            return self;
        }
        let message = format!("{operation} failed for {target}: {self}");
        Self::Internal {
            message,
            source: Some(self.into()),
        }
    }

    /// Returns the HTTP status code for this error.
    #[must_use]
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotReady => StatusCode::SERVICE_UNAVAILABLE,
            Self::ResourceTypeNotFound { .. } | Self::NotFound { .. } => StatusCode::NOT_FOUND,
            Self::PreconditionFailed { .. } => StatusCode::PRECONDITION_FAILED,
            Self::AccessDenied { .. } => StatusCode::FORBIDDEN,
            Self::GatewayUnavailable { .. } => StatusCode::BAD_GATEWAY,
            Self::PatchAssertionFailed { .. } => StatusCode::CONFLICT,
            Self::Validation { .. } => StatusCode::BAD_REQUEST,
            Self::Upstream { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            Self::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
