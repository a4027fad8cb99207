//! Chained substitution scopes
//!
//! A [`Resolver`] is immutable once built. Rebuilding a subtree builds new
//! scopes; entities resolved earlier keep the scope they were built with.

use crate::error::ResolveError;
use crate::substitute::expand;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Pseudo-variables injected by the model at each level
pub const RESERVED_NAMES: [&str; 4] = ["application", "node", "server", "service"];

/// Whether `name` is a reserved pseudo-variable
#[inline]
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    RESERVED_NAMES.contains(&name)
}

/// Handling of `${name}` tokens that resolve to nothing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum UnresolvedPolicy {
    /// Undefined names and malformed tokens are errors
    #[default]
    Reject,
    /// Undefined names and malformed tokens are kept as written
    Literal,
}

/// Immutable lookup scope
///
/// Lookup order is the local mapping, then each parent in the order given.
#[derive(Debug, Clone, Default)]
pub struct Resolver {
    local: BTreeMap<String, String>,
    parents: Vec<Arc<Resolver>>,
    policy: UnresolvedPolicy,
}

impl Resolver {
    /// Empty root scope
    #[inline]
    #[must_use]
    pub fn root(policy: UnresolvedPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    /// Start building a scope
    #[inline]
    #[must_use]
    pub fn builder() -> ResolverBuilder {
        ResolverBuilder::default()
    }

    /// Start building a child scope of `parent`, inheriting its policy
    #[must_use]
    pub fn child(parent: &Arc<Self>) -> ResolverBuilder {
        ResolverBuilder::default()
            .policy(parent.policy)
            .parent(Arc::clone(parent))
    }

    /// Unresolved-token policy of this scope
    #[inline]
    #[must_use]
    pub fn policy(&self) -> UnresolvedPolicy {
        self.policy
    }

    /// Names defined directly in this scope
    #[inline]
    #[must_use]
    pub fn local(&self) -> &BTreeMap<String, String> {
        &self.local
    }

    /// Look up `name` in this scope, then in the parents
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&str> {
        if let Some(value) = self.local.get(name) {
            return Some(value.as_str());
        }
        self.parents.iter().find_map(|parent| parent.find(name))
    }

    /// Whether `name` resolves anywhere in the chain
    #[inline]
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.find(name).is_some()
    }

    /// Replace every `${name}` token in `text`
    ///
    /// # Errors
    /// Under [`UnresolvedPolicy::Reject`], returns `Undefined` for unknown names
    /// and `Malformed` for unterminated or empty tokens
    pub fn substitute(&self, text: &str) -> Result<String, ResolveError> {
        expand(text, self.policy, |name| self.find(name).map(str::to_string))
    }

    /// Substitute every element of `texts`
    ///
    /// # Errors
    /// Returns the first substitution error
    pub fn substitute_all(&self, texts: &[String]) -> Result<Vec<String>, ResolveError> {
        texts.iter().map(|t| self.substitute(t)).collect()
    }

    /// Names referenced by `text` that resolve to nothing
    #[must_use]
    pub fn missing(&self, text: &str) -> Vec<String> {
        let mut missing = Vec::new();
        // Literal policy never fails
        let _ = expand(text, UnresolvedPolicy::Literal, |name| {
            let found = self.find(name).map(str::to_string);
            if found.is_none() && !missing.iter().any(|m| m == name) {
                missing.push(name.to_string());
            }
            found
        });
        missing
    }
}

#[derive(Debug, Clone)]
enum Definition {
    Value(String, String),
    Literal(String, String),
    Variable(String, String),
    Default(String, String),
}

/// Builder for [`Resolver`]
///
/// Definitions are applied in call order when [`ResolverBuilder::build`] runs.
/// Each value is substituted once against the parent scopes.
#[derive(Debug, Clone, Default)]
pub struct ResolverBuilder {
    parents: Vec<Arc<Resolver>>,
    definitions: Vec<Definition>,
    policy: UnresolvedPolicy,
}

impl ResolverBuilder {
    /// Add a parent scope; earlier parents are consulted first
    #[must_use]
    pub fn parent(mut self, parent: Arc<Resolver>) -> Self {
        self.parents.push(parent);
        self
    }

    /// Set the unresolved-token policy
    #[inline]
    #[must_use]
    pub fn policy(mut self, policy: UnresolvedPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Define `name`, substituting `value` against the parents
    #[must_use]
    pub fn put(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.definitions.push(Definition::Value(name.into(), value.into()));
        self
    }

    /// Define `name` with `value` taken verbatim
    #[must_use]
    pub fn put_literal(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.definitions
            .push(Definition::Literal(name.into(), value.into()));
        self
    }

    /// Define user variables; reserved names are rejected at build time
    #[must_use]
    pub fn variables(mut self, variables: &BTreeMap<String, String>) -> Self {
        self.definitions.extend(
            variables
                .iter()
                .map(|(k, v)| Definition::Variable(k.clone(), v.clone())),
        );
        self
    }

    /// Bind template parameters: explicit values first, defaults fill the rest
    #[must_use]
    pub fn parameters(
        mut self,
        values: &BTreeMap<String, String>,
        defaults: &BTreeMap<String, String>,
    ) -> Self {
        self.definitions.extend(
            values
                .iter()
                .map(|(k, v)| Definition::Variable(k.clone(), v.clone())),
        );
        self.definitions.extend(
            defaults
                .iter()
                .map(|(k, v)| Definition::Default(k.clone(), v.clone())),
        );
        self
    }

    /// Build the scope
    ///
    /// # Errors
    /// Returns `Reserved` when a user variable or parameter uses a reserved
    /// name, or any substitution error raised by a value
    pub fn build(self) -> Result<Resolver, ResolveError> {
        let outer = Resolver {
            local: BTreeMap::new(),
            parents: self.parents,
            policy: self.policy,
        };

        let mut local = BTreeMap::new();
        for definition in self.definitions {
            match definition {
                Definition::Value(name, raw) => {
                    let value = outer.substitute(&raw)?;
                    local.insert(name, value);
                }
                Definition::Literal(name, value) => {
                    local.insert(name, value);
                }
                Definition::Variable(name, raw) => {
                    if is_reserved(&name) {
                        return Err(ResolveError::Reserved { name });
                    }
                    let value = outer.substitute(&raw)?;
                    local.insert(name, value);
                }
                Definition::Default(name, raw) => {
                    if is_reserved(&name) {
                        return Err(ResolveError::Reserved { name });
                    }
                    if !local.contains_key(&name) {
                        let value = outer.substitute(&raw)?;
                        local.insert(name, value);
                    }
                }
            }
        }

        Ok(Resolver {
            local,
            parents: outer.parents,
            policy: outer.policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn map(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    fn app_scope() -> Arc<Resolver> {
        Arc::new(
            Resolver::builder()
                .put_literal("application", "Demo")
                .variables(&map(&[("name", "outer"), ("port", "10000")]))
                .build()
                .unwrap(),
        )
    }

    #[test]
    fn lookup_walks_parents() {
        let app = app_scope();
        let node = Resolver::child(&app)
            .put_literal("node", "n1")
            .build()
            .unwrap();

        assert_eq!(node.find("node"), Some("n1"));
        assert_eq!(node.find("application"), Some("Demo"));
        assert_eq!(node.find("unknown"), None);
        assert!(node.contains("port"));
    }

    #[test]
    fn parents_consulted_in_order() {
        let first = Arc::new(Resolver::builder().put("v", "first").build().unwrap());
        let second = Arc::new(Resolver::builder().put("v", "second").build().unwrap());
        let scope = Resolver::builder()
            .parent(first)
            .parent(second)
            .build()
            .unwrap();
        assert_eq!(scope.find("v"), Some("first"));
    }

    #[test]
    fn values_substituted_against_parents() {
        let app = app_scope();
        let node = Resolver::child(&app)
            .variables(&map(&[("endpoint", "tcp -p ${port}")]))
            .build()
            .unwrap();
        assert_eq!(node.find("endpoint"), Some("tcp -p 10000"));
    }

    #[test]
    fn parameter_shadows_default_shadows_outer() {
        let app = app_scope();
        let defaults = map(&[("name", "default")]);

        let with_value = Resolver::child(&app)
            .parameters(&map(&[("name", "param")]), &defaults)
            .build()
            .unwrap();
        assert_eq!(with_value.find("name"), Some("param"));

        let with_default = Resolver::child(&app)
            .parameters(&BTreeMap::new(), &defaults)
            .build()
            .unwrap();
        assert_eq!(with_default.find("name"), Some("default"));

        let outer_only = Resolver::child(&app).build().unwrap();
        assert_eq!(outer_only.find("name"), Some("outer"));
    }

    #[test]
    fn reserved_variable_rejected() {
        let result = Resolver::builder()
            .variables(&map(&[("server", "x")]))
            .build();
        assert_eq!(
            result.unwrap_err(),
            ResolveError::Reserved {
                name: "server".to_string()
            }
        );
    }

    #[test]
    fn undefined_in_value_fails_build() {
        let result = Resolver::builder().put("a", "${nope}").build();
        assert!(matches!(result, Err(ResolveError::Undefined { .. })));
    }

    #[test]
    fn literal_policy_inherited_by_child() {
        let root = Arc::new(Resolver::root(UnresolvedPolicy::Literal));
        let child = Resolver::child(&root).build().unwrap();
        assert_eq!(child.policy(), UnresolvedPolicy::Literal);
        assert_eq!(child.substitute("${nope}").unwrap(), "${nope}");
    }

    #[test]
    fn missing_lists_unique_names() {
        let app = app_scope();
        let missing = app.missing("${a}-${port}-${b}-${a}");
        assert_eq!(missing, vec!["a".to_string(), "b".to_string()]);
        assert!(app.missing("${port}").is_empty());
    }

    #[test]
    fn substitute_all_stops_at_first_error() {
        let app = app_scope();
        let ok = app
            .substitute_all(&["${name}".to_string(), "x".to_string()])
            .unwrap();
        assert_eq!(ok, vec!["outer".to_string(), "x".to_string()]);
        assert!(app.substitute_all(&["${zz}".to_string()]).is_err());
    }

    proptest! {
        #[test]
        fn resolved_text_is_fixpoint(text in "[a-z. -]{0,8}(\\$\\{(name|port)\\}[a-z. -]{0,8}){0,4}") {
            let app = app_scope();
            let once = app.substitute(&text).unwrap();
            prop_assert_eq!(app.substitute(&once).unwrap(), once);
        }

        #[test]
        fn text_without_tokens_unchanged(text in "[a-zA-Z0-9 .$}]{0,32}") {
            let app = app_scope();
            prop_assert_eq!(app.substitute(&text).unwrap(), text);
        }

        #[test]
        fn parameter_always_wins(value in "[a-z]{1,8}", default in "[a-z]{1,8}") {
            let app = app_scope();
            let scope = Resolver::child(&app)
                .parameters(&map(&[("name", value.as_str())]), &map(&[("name", default.as_str())]))
                .build()
                .unwrap();
            prop_assert_eq!(scope.substitute("${name}").unwrap(), value);
        }
    }
}
