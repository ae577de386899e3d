//! Handler registry.
//!
//! Maps resource type names to handler capability sets. The registry is
//! built once at startup and read-only afterward; dispatch is a map lookup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{HermesError, HermesResult};
use crate::handler::ResourceHandler;

/// Name-to-handler resolution for the dispatcher.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistry {
    /// Creates a registry builder.
    #[must_use]
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Resolves the handler for a resource type name.
    pub fn resolve(&self, resource_type: &str) -> HermesResult<Arc<dyn ResourceHandler>> {
        self.handlers
            .get(resource_type)
            .cloned()
            .ok_or_else(|| HermesError::resource_type_not_found(resource_type))
    }

    /// Returns `true` when a handler is registered for the name.
    #[must_use]
    pub fn contains(&self, resource_type: &str) -> bool {
        self.handlers.contains_key(resource_type)
    }

    /// Returns the registered type names.
    #[must_use]
    pub fn type_names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Returns `true` when no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.type_names())
            .finish()
    }
}

/// Builder for [`HandlerRegistry`].
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn ResourceHandler>>,
}

impl HandlerRegistryBuilder {
    /// Registers a handler under its descriptor's type name.
    ///
    /// A later registration for the same name replaces the earlier one.
    #[must_use]
    pub fn register(mut self, handler: Arc<dyn ResourceHandler>) -> Self {
        let name = handler.descriptor().type_name.clone();
        self.handlers.insert(name, handler);
        self
    }

    /// Builds the registry.
    #[must_use]
    pub fn build(self) -> HandlerRegistry {
        HandlerRegistry {
            handlers: self.handlers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::MemoryHandler;

    #[test]
    fn test_resolve_registered_handler() {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(MemoryHandler::new("Patient")))
            .build();

        assert!(registry.contains("Patient"));
        let handler = registry.resolve("Patient").expect("handler registered");
        assert_eq!(handler.descriptor().type_name, "Patient");
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = HandlerRegistry::builder().build();
        let err = match registry.resolve("Unknown") {
            Err(e) => e,
            Ok(_) => panic!("expected resolve to fail for unregistered type"),
        };
        assert!(matches!(
            err,
            HermesError::ResourceTypeNotFound { resource_type } if resource_type == "Unknown"
        ));
    }

    #[test]
    fn test_later_registration_wins() {
        let registry = HandlerRegistry::builder()
            .register(Arc::new(MemoryHandler::new("Patient")))
            .register(Arc::new(MemoryHandler::new("Patient")))
            .build();
        assert_eq!(registry.len(), 1);
    }
}
