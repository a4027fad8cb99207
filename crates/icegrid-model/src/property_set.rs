//! Property sets and property composition
//!
//! Sets compose by id reference. References are looked up at use time, so
//! removing a referenced set leaves a dangling id that is only reported when
//! the referencing set is validated or flattened.
//!
//! Flattening order: a set's own properties, then each reference depth-first
//! in `references` order. The effective list keeps the first occurrence of
//! each property name.

use crate::editable::{Editable, EntityKind};
use crate::error::{ModelError, ModelResult, UnresolvedReference, ValidationError};
use icegrid_descriptor::{PropertyDescriptor, PropertySetDescriptor};
use std::collections::{BTreeMap, BTreeSet};

/// Suffixes of adapter properties the model derives from adapter descriptors
pub const ADAPTER_PROPERTY_SUFFIXES: [&str; 3] = ["Endpoints", "PublishedEndpoints", "ProxyOptions"];

/// Named property set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertySet {
    pub(crate) descriptor: PropertySetDescriptor,
    pub(crate) editable: Editable,
}

impl PropertySet {
    /// Set created in this session
    #[must_use]
    pub fn new(descriptor: PropertySetDescriptor) -> Self {
        Self {
            descriptor,
            editable: Editable::new_entity(),
        }
    }

    /// Set loaded in committed state
    #[must_use]
    pub fn committed(descriptor: PropertySetDescriptor) -> Self {
        Self {
            descriptor,
            editable: Editable::committed(),
        }
    }

    /// Underlying descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &PropertySetDescriptor {
        &self.descriptor
    }

    /// Change tracking
    #[inline]
    #[must_use]
    pub fn editable(&self) -> &Editable {
        &self.editable
    }
}

/// Where property set ids are looked up
///
/// Application-level sets see only application sets; node-level sets see
/// their node's sets first, then the application's.
#[derive(Debug, Clone, Copy)]
pub struct PropertySetLookup<'a> {
    pub(crate) application: &'a BTreeMap<String, PropertySet>,
    pub(crate) node: Option<&'a BTreeMap<String, PropertySet>>,
}

impl<'a> PropertySetLookup<'a> {
    /// Lookup over application sets only
    #[must_use]
    pub fn application(sets: &'a BTreeMap<String, PropertySet>) -> Self {
        Self {
            application: sets,
            node: None,
        }
    }

    /// Lookup over a node's sets, falling back to the application's
    #[must_use]
    pub fn node(
        application: &'a BTreeMap<String, PropertySet>,
        node: &'a BTreeMap<String, PropertySet>,
    ) -> Self {
        Self {
            application,
            node: Some(node),
        }
    }

    /// Find `id`, returning the set and the lookup its own references use
    fn find(&self, id: &str) -> Option<(&'a PropertySetDescriptor, Self)> {
        if let Some(set) = self.node.and_then(|sets| sets.get(id)) {
            return Some((&set.descriptor, *self));
        }
        self.application
            .get(id)
            .map(|set| (&set.descriptor, Self::application(self.application)))
    }

    /// Properties of `set` followed by its references, depth-first
    ///
    /// # Errors
    /// Returns `UnresolvedReference::PropertySet` for a dangling reference and
    /// `ValidationError::CyclicPropertySet` when references loop
    pub fn flatten(
        &self,
        set: &PropertySetDescriptor,
        origin: &str,
    ) -> ModelResult<Vec<PropertyDescriptor>> {
        let mut out = Vec::new();
        let mut stack = Vec::new();
        self.flatten_into(set, origin, &mut stack, &mut out)?;
        Ok(out)
    }

    fn flatten_into(
        &self,
        set: &PropertySetDescriptor,
        origin: &str,
        stack: &mut Vec<String>,
        out: &mut Vec<PropertyDescriptor>,
    ) -> ModelResult<()> {
        out.extend(set.properties.iter().cloned());
        for reference in &set.references {
            if stack.iter().any(|id| id == reference) {
                return Err(ValidationError::CyclicPropertySet {
                    id: reference.clone(),
                }
                .into());
            }
            let from = stack.last().map_or(origin, String::as_str).to_string();
            let (referenced, lookup) = self.find(reference).ok_or_else(|| {
                ModelError::from(UnresolvedReference::PropertySet {
                    id: reference.clone(),
                    from,
                })
            })?;
            stack.push(reference.clone());
            lookup.flatten_into(referenced, origin, stack, out)?;
            stack.pop();
        }
        Ok(())
    }

    /// Check that the named set `id` has no dangling or cyclic references
    ///
    /// # Errors
    /// Same as [`PropertySetLookup::flatten`]
    pub fn validate(&self, id: &str, set: &PropertySetDescriptor) -> ModelResult<()> {
        let mut stack = vec![id.to_string()];
        let mut sink = Vec::new();
        self.flatten_into(set, id, &mut stack, &mut sink)
    }
}

/// Keep the first occurrence of each property name
#[must_use]
pub fn effective(properties: &[PropertyDescriptor]) -> Vec<PropertyDescriptor> {
    let mut seen = BTreeSet::new();
    properties
        .iter()
        .filter(|p| seen.insert(p.name.as_str()))
        .cloned()
        .collect()
}

/// First value for `name` in `properties`
#[must_use]
pub fn lookup<'p>(properties: &'p [PropertyDescriptor], name: &str) -> Option<&'p str> {
    properties
        .iter()
        .find(|p| p.name == name)
        .map(|p| p.value.as_str())
}

/// Split adapter-derived properties out of a communicator's property list
///
/// Returns `(hidden, visible)`. Only the first occurrence of each derived
/// name is hidden; later duplicates stay visible in their original order.
#[must_use]
pub fn hidden_properties(
    properties: &[PropertyDescriptor],
    adapter_names: &[String],
) -> (Vec<PropertyDescriptor>, Vec<PropertyDescriptor>) {
    let mut derived: BTreeSet<String> = adapter_names
        .iter()
        .flat_map(|adapter| {
            ADAPTER_PROPERTY_SUFFIXES
                .iter()
                .map(move |suffix| format!("{adapter}.{suffix}"))
        })
        .collect();

    let mut hidden = Vec::new();
    let mut visible = Vec::new();
    for property in properties {
        if derived.remove(&property.name) {
            hidden.push(property.clone());
        } else {
            visible.push(property.clone());
        }
    }
    (hidden, visible)
}

/// Inverse of [`hidden_properties`]: hidden properties first, then visible
#[must_use]
pub fn merge_hidden(
    hidden: &[PropertyDescriptor],
    visible: &[PropertyDescriptor],
) -> Vec<PropertyDescriptor> {
    hidden.iter().chain(visible).cloned().collect()
}

/// Reconcile a replacement map of sets against the current one
///
/// Unchanged sets keep their tracking, changed sets are marked modified,
/// sets absent from `current` are new. Committed sets missing from
/// `replacement` are recorded as removed on `owner`.
pub(crate) fn reconcile_sets(
    current: &BTreeMap<String, PropertySet>,
    replacement: &BTreeMap<String, PropertySetDescriptor>,
    owner: &mut Editable,
) -> BTreeMap<String, PropertySet> {
    for (id, set) in current {
        if !replacement.contains_key(id) && !set.editable.is_new() {
            owner.remove_element(EntityKind::PropertySet, id.clone());
        }
    }
    replacement
        .iter()
        .map(|(id, descriptor)| {
            let set = match current.get(id) {
                Some(existing) if existing.descriptor == *descriptor => existing.clone(),
                Some(existing) => {
                    let mut editable = existing.editable.clone();
                    editable.mark_modified();
                    PropertySet {
                        descriptor: descriptor.clone(),
                        editable,
                    }
                }
                None => PropertySet::new(descriptor.clone()),
            };
            (id.clone(), set)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sets(entries: &[(&str, PropertySetDescriptor)]) -> BTreeMap<String, PropertySet> {
        entries
            .iter()
            .map(|(id, d)| ((*id).to_string(), PropertySet::committed(d.clone())))
            .collect()
    }

    fn names(props: &[PropertyDescriptor]) -> Vec<(&str, &str)> {
        props
            .iter()
            .map(|p| (p.name.as_str(), p.value.as_str()))
            .collect()
    }

    #[test]
    fn flatten_depth_first() {
        let app = sets(&[
            ("base", PropertySetDescriptor::new().with_property("A", "base")),
            (
                "mid",
                PropertySetDescriptor::new()
                    .with_property("B", "mid")
                    .with_reference("base"),
            ),
        ]);
        let own = PropertySetDescriptor::new()
            .with_reference("mid")
            .with_property("A", "own");

        let flat = PropertySetLookup::application(&app)
            .flatten(&own, "server s1")
            .unwrap();
        assert_eq!(names(&flat), vec![("A", "own"), ("B", "mid"), ("A", "base")]);
        assert_eq!(names(&effective(&flat)), vec![("A", "own"), ("B", "mid")]);
    }

    #[test]
    fn node_sets_shadow_application_sets() {
        let app = sets(&[
            ("shared", PropertySetDescriptor::new().with_property("X", "app")),
            ("only-app", PropertySetDescriptor::new().with_property("Y", "app")),
        ]);
        let node = sets(&[(
            "shared",
            PropertySetDescriptor::new()
                .with_property("X", "node")
                .with_reference("only-app"),
        )]);
        let own = PropertySetDescriptor::new().with_reference("shared");

        let flat = PropertySetLookup::node(&app, &node)
            .flatten(&own, "server s1")
            .unwrap();
        assert_eq!(names(&flat), vec![("X", "node"), ("Y", "app")]);
    }

    #[test]
    fn application_sets_do_not_see_node_sets() {
        let app = sets(&[(
            "app-set",
            PropertySetDescriptor::new().with_reference("node-only"),
        )]);
        let node = sets(&[("node-only", PropertySetDescriptor::new().with_property("Z", "1"))]);
        let own = PropertySetDescriptor::new().with_reference("app-set");

        let err = PropertySetLookup::node(&app, &node)
            .flatten(&own, "server s1")
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::UnresolvedReference(UnresolvedReference::PropertySet {
                id: "node-only".to_string(),
                from: "app-set".to_string(),
            })
        );
    }

    #[test]
    fn cycle_detected() {
        let app = sets(&[
            ("a", PropertySetDescriptor::new().with_reference("b")),
            ("b", PropertySetDescriptor::new().with_reference("a")),
        ]);
        let lookup = PropertySetLookup::application(&app);
        let err = lookup
            .validate("a", &app["a"].descriptor)
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Validation(ValidationError::CyclicPropertySet { .. })
        ));
    }

    #[test]
    fn hidden_properties_first_occurrence_only() {
        let props = vec![
            PropertyDescriptor::new("Hello.Endpoints", "tcp -p 1"),
            PropertyDescriptor::new("Ice.Trace", "1"),
            PropertyDescriptor::new("Hello.Endpoints", "tcp -p 2"),
            PropertyDescriptor::new("Hello.ProxyOptions", "-t"),
        ];
        let (hidden, visible) = hidden_properties(&props, &["Hello".to_string()]);
        assert_eq!(
            names(&hidden),
            vec![("Hello.Endpoints", "tcp -p 1"), ("Hello.ProxyOptions", "-t")]
        );
        assert_eq!(
            names(&visible),
            vec![("Ice.Trace", "1"), ("Hello.Endpoints", "tcp -p 2")]
        );

        let merged = merge_hidden(&hidden, &visible);
        let as_map = |list: &[PropertyDescriptor]| -> BTreeMap<String, String> {
            effective(list)
                .into_iter()
                .map(|p| (p.name, p.value))
                .collect()
        };
        assert_eq!(as_map(&merged), as_map(&props));
        assert_eq!(lookup(&merged, "Hello.Endpoints"), Some("tcp -p 1"));
    }

    #[test]
    fn reconcile_tracks_changes() {
        let current = sets(&[
            ("keep", PropertySetDescriptor::new().with_property("A", "1")),
            ("edit", PropertySetDescriptor::new().with_property("B", "1")),
            ("drop", PropertySetDescriptor::new()),
        ]);
        let mut replacement: BTreeMap<String, PropertySetDescriptor> = current
            .iter()
            .map(|(id, s)| (id.clone(), s.descriptor.clone()))
            .collect();
        replacement.remove("drop");
        replacement.insert("edit".to_string(), PropertySetDescriptor::new().with_property("B", "2"));
        replacement.insert("add".to_string(), PropertySetDescriptor::new());

        let mut owner = Editable::committed();
        let merged = reconcile_sets(&current, &replacement, &mut owner);

        assert!(!merged["keep"].editable.is_dirty());
        assert!(merged["edit"].editable.is_modified());
        assert!(merged["add"].editable.is_new());
        assert_eq!(owner.removed(EntityKind::PropertySet), vec!["drop"]);
    }
}
