//! Model configuration

use icegrid_resolver::UnresolvedPolicy;
use serde::{Deserialize, Serialize};

/// Behaviour switches for an [`Application`](crate::Application)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Handling of `${name}` tokens that resolve to nothing
    pub unresolved: UnresolvedPolicy,
    /// Restart servers when the registry applies a save
    pub restart_on_save: bool,
    /// Send incremental updates to live applications when possible
    pub prefer_incremental_updates: bool,
}

impl ModelConfig {
    /// Create default configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse from a TOML fragment; missing keys take their defaults
    ///
    /// # Errors
    /// Returns error if the text is not valid TOML for this structure
    pub fn from_toml(text: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(text)
    }

    /// With unresolved-token policy
    #[inline]
    #[must_use]
    pub fn with_unresolved(mut self, policy: UnresolvedPolicy) -> Self {
        self.unresolved = policy;
        self
    }

    /// With restart-on-save
    #[inline]
    #[must_use]
    pub fn with_restart_on_save(mut self, restart: bool) -> Self {
        self.restart_on_save = restart;
        self
    }

    /// With incremental updates preferred or disabled
    #[inline]
    #[must_use]
    pub fn with_incremental_updates(mut self, prefer: bool) -> Self {
        self.prefer_incremental_updates = prefer;
        self
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            unresolved: UnresolvedPolicy::Reject,
            restart_on_save: true,
            prefer_incremental_updates: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = ModelConfig::new();
        assert_eq!(config.unresolved, UnresolvedPolicy::Reject);
        assert!(config.restart_on_save);
        assert!(config.prefer_incremental_updates);
    }

    #[test]
    fn from_toml_partial() {
        let config = ModelConfig::from_toml("unresolved = \"literal\"\nrestart_on_save = false\n").unwrap();
        assert_eq!(config.unresolved, UnresolvedPolicy::Literal);
        assert!(!config.restart_on_save);
        assert!(config.prefer_incremental_updates);
    }

    #[test]
    fn from_toml_rejects_unknown_policy() {
        assert!(ModelConfig::from_toml("unresolved = \"guess\"").is_err());
    }

    #[test]
    fn builder_methods() {
        let config = ModelConfig::new()
            .with_unresolved(UnresolvedPolicy::Literal)
            .with_restart_on_save(false)
            .with_incremental_updates(false);
        assert_eq!(config.unresolved, UnresolvedPolicy::Literal);
        assert!(!config.restart_on_save);
        assert!(!config.prefer_incremental_updates);
    }
}
