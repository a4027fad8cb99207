//! Error types for the descriptor model
//!
//! Four failure families surface to callers:
//! - Identity collisions between resolved ids
//! - References to templates, property sets, replica groups or variables that do not exist
//! - Validation failures on required fields and template shapes
//! - Registry operations that reported failure

use crate::editable::EntityKind;
use crate::live::{RegistryFailure, RegistryVerb};
use icegrid_resolver::ResolveError;

/// Main model error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// Two entities resolved to the same id
    #[error("identity collision: {0}")]
    IdentityCollision(#[from] IdentityCollision),

    /// Reference to something that does not exist
    #[error("unresolved reference: {0}")]
    UnresolvedReference(#[from] UnresolvedReference),

    /// Descriptor failed validation
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    /// Registry rejected a save
    #[error("registry sync failed: {0}")]
    SyncConflict(#[from] SyncConflict),
}

impl ModelError {
    /// Map a resolver failure, recording what was being resolved
    pub(crate) fn resolve(err: ResolveError, context: impl Into<String>) -> Self {
        let context = context.into();
        match err {
            ResolveError::Undefined { name } => {
                UnresolvedReference::Variable { name, context }.into()
            }
            ResolveError::Malformed { input } => ValidationError::Malformed { context, input }.into(),
            ResolveError::Reserved { name } => ValidationError::ReservedName { name, context }.into(),
        }
    }

    /// Check if this is an identity collision
    #[inline]
    #[must_use]
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::IdentityCollision(_))
    }
}

/// Result alias for model operations
pub type ModelResult<T> = Result<T, ModelError>;

/// Two entities claim the same resolved id
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind} '{id}' is claimed by {existing} and {conflicting}")]
pub struct IdentityCollision {
    /// Id namespace
    pub kind: EntityKind,
    /// Colliding id
    pub id: String,
    /// Entity that already held the id
    pub existing: String,
    /// Entity whose rebuild produced the duplicate
    pub conflicting: String,
}

/// Reference that does not resolve
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UnresolvedReference {
    /// Server instance names a missing server template
    #[error("server template '{id}' not found")]
    ServerTemplate {
        /// Template id
        id: String,
    },

    /// Service instance names a missing service template
    #[error("service template '{id}' not found")]
    ServiceTemplate {
        /// Template id
        id: String,
    },

    /// Property set reference names a missing set
    #[error("property set '{id}' referenced by {from} not found")]
    PropertySet {
        /// Missing set id
        id: String,
        /// Referencing set or communicator
        from: String,
    },

    /// Adapter names a missing replica group
    #[error("replica group '{id}' referenced by adapter '{adapter}' not found")]
    ReplicaGroup {
        /// Missing replica group id
        id: String,
        /// Referencing adapter id
        adapter: String,
    },

    /// `${name}` resolves to nothing
    #[error("undefined variable '{name}' in {context}")]
    Variable {
        /// Undefined name
        name: String,
        /// What was being resolved
        context: String,
    },

    /// Template parameter has neither a value nor a default
    #[error("parameter '{parameter}' of template '{template}' has no value")]
    Parameter {
        /// Template id
        template: String,
        /// Parameter name
        parameter: String,
    },
}

/// Descriptor validation failure
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Required field is empty
    #[error("{entity}: {field} must not be empty")]
    EmptyField {
        /// Entity description
        entity: String,
        /// Field name
        field: &'static str,
    },

    /// Reserved pseudo-variable used as a user name
    #[error("'{name}' is reserved ({context})")]
    ReservedName {
        /// Reserved name
        name: String,
        /// Where it was used
        context: String,
    },

    /// Template declares a parameter twice
    #[error("template '{template}' declares parameter '{parameter}' more than once")]
    DuplicateParameter {
        /// Template id
        template: String,
        /// Parameter name
        parameter: String,
    },

    /// Template has a default for an undeclared parameter
    #[error("template '{template}' has a default for unknown parameter '{parameter}'")]
    UnknownParameterDefault {
        /// Template id
        template: String,
        /// Parameter name
        parameter: String,
    },

    /// Template still has instances
    #[error("template '{id}' is used by {instances} instance(s)")]
    TemplateInUse {
        /// Template id
        id: String,
        /// Number of live instances
        instances: usize,
    },

    /// Property set references form a cycle
    #[error("property set '{id}' references itself")]
    CyclicPropertySet {
        /// Set where the cycle was detected
        id: String,
    },

    /// Entity cannot be edited this way
    #[error("{entity} is read-only: {reason}")]
    ReadOnly {
        /// Entity description
        entity: String,
        /// Why the edit is refused
        reason: &'static str,
    },

    /// Entity does not exist
    #[error("{kind} '{id}' does not exist")]
    UnknownEntity {
        /// Entity kind
        kind: EntityKind,
        /// Id or name
        id: String,
    },

    /// Malformed `${...}` token
    #[error("malformed substitution in {context}: '{input}'")]
    Malformed {
        /// What was being resolved
        context: String,
        /// Offending text
        input: String,
    },

    /// A save is waiting for the registry
    #[error("a registry save is already in progress")]
    SaveInProgress,
}

/// Registry operation failed; the local model is unchanged
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{verb} of application '{application}' failed: {failure}")]
pub struct SyncConflict {
    /// Operation that failed
    pub verb: RegistryVerb,
    /// Application name
    pub application: String,
    /// Failure reported by the registry
    pub failure: RegistryFailure,
}
