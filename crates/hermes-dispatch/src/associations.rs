//! Child-association resolution.
//!
//! Resolves a child resource name against the parent handler's declared set
//! and checks that the requested binding (class vs instance) matches the
//! child's declared scope. A mismatch is a not-found-class error, never
//! silently ignored.

use hermes_core::{
    AssociationCapability, AssociationDescriptor, AssociationScope, HermesError, HermesResult,
    ResourceHandler,
};

/// Resolves child-resource bindings for the dispatcher.
pub struct AssociationTraverser;

impl AssociationTraverser {
    /// Resolves the association capability and descriptor for a child name.
    ///
    /// `parent_id` of `None` requests a class-scoped binding; `Some`
    /// requests an instance-scoped binding.
    pub fn resolve<'h>(
        handler: &'h dyn ResourceHandler,
        parent_id: Option<&str>,
        child_name: &str,
    ) -> HermesResult<&'h dyn AssociationCapability> {
        let parent_type = &handler.descriptor().type_name;
        let capability = handler.associations().ok_or_else(|| {
            HermesError::not_found(parent_type.clone(), format!("child resource '{child_name}'"))
        })?;

        let descriptor = capability.find_child(child_name).ok_or_else(|| {
            HermesError::not_found(parent_type.clone(), format!("child resource '{child_name}'"))
        })?;

        Self::check_scope(parent_type, descriptor, parent_id)?;
        Ok(capability)
    }

    fn check_scope(
        parent_type: &str,
        descriptor: &AssociationDescriptor,
        parent_id: Option<&str>,
    ) -> HermesResult<()> {
        match (descriptor.scope, parent_id) {
            (AssociationScope::Instance, None) => Err(HermesError::not_found(
                parent_type,
                format!(
                    "child resource '{}' requires a parent instance",
                    descriptor.name
                ),
            )),
            (AssociationScope::Class, Some(_)) => Err(HermesError::not_found(
                parent_type,
                format!(
                    "child resource '{}' is class-scoped and takes no parent instance",
                    descriptor.name
                ),
            )),
            _ => Ok(()),
        }
    }
}
