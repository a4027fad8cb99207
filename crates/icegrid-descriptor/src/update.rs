//! Incremental update descriptors
//!
//! Deltas against a registry's copy of an application: removed ids plus
//! full descriptors for every new or changed child. An empty delta is never
//! sent; producers return "no changes" instead.

use crate::descriptor::{
    PropertySetDescriptor, ReplicaGroupDescriptor, ServerDescriptor, ServerInstanceDescriptor,
    ServerTemplateDescriptor, ServiceTemplateDescriptor, StringMap,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Application delta
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationUpdateDescriptor {
    /// Application name
    pub name: String,
    /// New description, if changed
    pub description: Option<String>,
    /// Added or changed variables
    pub variables: StringMap,
    /// Removed variable names
    pub remove_variables: Vec<String>,
    /// Added or changed property sets
    pub property_sets: BTreeMap<String, PropertySetDescriptor>,
    /// Removed property set ids
    pub remove_property_sets: Vec<String>,
    /// Added or changed replica groups
    pub replica_groups: Vec<ReplicaGroupDescriptor>,
    /// Removed replica group ids
    pub remove_replica_groups: Vec<String>,
    /// Added or changed server templates
    pub server_templates: BTreeMap<String, ServerTemplateDescriptor>,
    /// Removed server template ids
    pub remove_server_templates: Vec<String>,
    /// Added or changed service templates
    pub service_templates: BTreeMap<String, ServiceTemplateDescriptor>,
    /// Removed service template ids
    pub remove_service_templates: Vec<String>,
    /// Node deltas (new nodes carry their full content)
    pub nodes: Vec<NodeUpdateDescriptor>,
    /// Removed node names
    pub remove_nodes: Vec<String>,
}

impl ApplicationUpdateDescriptor {
    /// Create empty delta for application `name`
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when the delta changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.variables.is_empty()
            && self.remove_variables.is_empty()
            && self.property_sets.is_empty()
            && self.remove_property_sets.is_empty()
            && self.replica_groups.is_empty()
            && self.remove_replica_groups.is_empty()
            && self.server_templates.is_empty()
            && self.remove_server_templates.is_empty()
            && self.service_templates.is_empty()
            && self.remove_service_templates.is_empty()
            && self.nodes.is_empty()
            && self.remove_nodes.is_empty()
    }

    /// Delta for node `name`, if present
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&NodeUpdateDescriptor> {
        self.nodes.iter().find(|n| n.name == name)
    }
}

/// Node delta
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeUpdateDescriptor {
    /// Node name
    pub name: String,
    /// New description, if changed
    pub description: Option<String>,
    /// Added or changed variables
    pub variables: StringMap,
    /// Removed variable names
    pub remove_variables: Vec<String>,
    /// Added or changed property sets
    pub property_sets: BTreeMap<String, PropertySetDescriptor>,
    /// Removed property set ids
    pub remove_property_sets: Vec<String>,
    /// New or changed template-bound servers
    pub server_instances: Vec<ServerInstanceDescriptor>,
    /// New or changed plain servers
    pub servers: Vec<ServerDescriptor>,
    /// Resolved ids of removed servers
    pub remove_servers: Vec<String>,
    /// New load factor, if changed
    pub load_factor: Option<String>,
}

impl NodeUpdateDescriptor {
    /// Create empty delta for node `name`
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// True when the delta changes nothing
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.description.is_none()
            && self.variables.is_empty()
            && self.remove_variables.is_empty()
            && self.property_sets.is_empty()
            && self.remove_property_sets.is_empty()
            && self.server_instances.is_empty()
            && self.servers.is_empty()
            && self.remove_servers.is_empty()
            && self.load_factor.is_none()
    }
}

/// Difference between two string maps
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MapDelta {
    /// Entries added or whose value changed
    pub changed: StringMap,
    /// Keys no longer present
    pub removed: Vec<String>,
}

impl MapDelta {
    /// Compute the delta turning `old` into `new`
    #[must_use]
    pub fn between(old: &StringMap, new: &StringMap) -> Self {
        let changed = new
            .iter()
            .filter(|(k, v)| old.get(*k) != Some(*v))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let removed = old
            .keys()
            .filter(|k| !new.contains_key(*k))
            .cloned()
            .collect();
        Self { changed, removed }
    }

    /// Apply a delta to `map`
    pub fn apply(map: &mut StringMap, changed: &StringMap, removed: &[String]) {
        for key in removed {
            map.remove(key);
        }
        for (k, v) in changed {
            map.insert(k.clone(), v.clone());
        }
    }

    /// True when nothing changed
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changed.is_empty() && self.removed.is_empty()
    }
}
