//! Resolver error types

/// Errors raised while building a scope or substituting text
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    /// `${name}` names nothing in the scope chain
    #[error("undefined variable or parameter: {name}")]
    Undefined {
        /// Name that failed to resolve
        name: String,
    },

    /// Unterminated or empty `${...}` token
    #[error("malformed substitution in '{input}'")]
    Malformed {
        /// Offending input text
        input: String,
    },

    /// Attempt to define a reserved pseudo-variable
    #[error("'{name}' is reserved and cannot be defined")]
    Reserved {
        /// Reserved name
        name: String,
    },
}

impl ResolveError {
    /// Name involved in the failure, when there is one
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Undefined { name } | Self::Reserved { name } => Some(name),
            Self::Malformed { .. } => None,
        }
    }
}
