//! Application root
//!
//! # Core Concepts
//!
//! An [`Application`] is the live descriptor tree: catalog entries
//! (templates, property sets, replica groups), nodes and their servers, the
//! scope chain, change tracking, and the descriptor captured at the last
//! commit. The tree is rebuilt from descriptors rather than patched; every
//! mutating operation is all-or-nothing.

use crate::catalog::Catalog;
use crate::config::ModelConfig;
use crate::editable::{Editable, EntityKind};
use crate::error::{IdentityCollision, ModelError, ModelResult, ValidationError};
use crate::identity;
use crate::live::LiveState;
use crate::node::Node;
use crate::property_set::{PropertySet, PropertySetLookup};
use crate::replica_group::ReplicaGroup;
use icegrid_descriptor::{
    ApplicationDescriptor, DescriptorDigest, DigestError, PropertySetDescriptor, StringMap,
};
use icegrid_resolver::{Resolver, UnresolvedPolicy};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the application scope
pub(crate) fn application_resolver(
    name: &str,
    variables: &StringMap,
    policy: UnresolvedPolicy,
) -> ModelResult<Arc<Resolver>> {
    Resolver::builder()
        .policy(policy)
        .put_literal("application", name)
        .variables(variables)
        .build()
        .map(Arc::new)
        .map_err(|e| ModelError::resolve(e, format!("variables of application {name}")))
}

/// Where a property set lives
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PropertySetScope {
    /// Application-level set
    Application,
    /// Set owned by the named node
    Node(String),
}

/// Editable IceGrid application
#[derive(Debug, Clone)]
pub struct Application {
    pub(crate) config: ModelConfig,
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) variables: StringMap,
    pub(crate) resolver: Arc<Resolver>,
    pub(crate) catalog: Catalog,
    pub(crate) nodes: BTreeMap<String, Node>,
    pub(crate) editable: Editable,
    pub(crate) baseline: ApplicationDescriptor,
    pub(crate) live: LiveState,
}

impl Application {
    /// Build the tree for `descriptor` in committed state
    pub(crate) fn build(descriptor: &ApplicationDescriptor, config: ModelConfig) -> ModelResult<Self> {
        if descriptor.name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "application".to_string(),
                field: "name",
            }
            .into());
        }
        let resolver =
            application_resolver(&descriptor.name, &descriptor.variables, config.unresolved)?;

        let mut catalog = Catalog::committed(descriptor);
        catalog.replica_groups = descriptor
            .replica_groups
            .iter()
            .map(|rg| ReplicaGroup::build(rg.clone(), &resolver))
            .collect::<ModelResult<Vec<_>>>()?;

        let nodes = descriptor
            .nodes
            .iter()
            .map(|(name, node)| Ok((name.clone(), Node::build(name, node, &catalog, &resolver)?)))
            .collect::<ModelResult<BTreeMap<_, _>>>()?;

        let application = Self {
            config,
            name: descriptor.name.clone(),
            description: descriptor.description.clone(),
            variables: descriptor.variables.clone(),
            resolver,
            catalog,
            nodes,
            editable: Editable::committed(),
            baseline: descriptor.clone(),
            live: LiveState::default(),
        };
        identity::check(&application, &[])?;
        Ok(application)
    }

    /// Load a descriptor that the registry does not know yet
    ///
    /// # Errors
    /// Returns the first resolution, validation or identity failure
    pub fn load(descriptor: &ApplicationDescriptor, config: ModelConfig) -> ModelResult<Self> {
        let mut application = Self::build(descriptor, config)?;
        application.editable.mark_new();
        tracing::info!(
            application = %application.name,
            nodes = application.nodes.len(),
            "application loaded"
        );
        Ok(application)
    }

    /// Create an empty application
    ///
    /// # Errors
    /// Returns a validation error for an empty name
    pub fn create(name: &str, config: ModelConfig) -> ModelResult<Self> {
        Self::load(&ApplicationDescriptor::new(name), config)
    }

    /// Open an application deployed in the registry, tracking its updates
    ///
    /// # Errors
    /// Same as [`Application::load`]
    pub fn from_registry(descriptor: &ApplicationDescriptor, config: ModelConfig) -> ModelResult<Self> {
        let mut application = Self::build(descriptor, config)?;
        application.live.live = true;
        tracing::info!(
            application = %application.name,
            nodes = application.nodes.len(),
            "application opened from registry"
        );
        Ok(application)
    }

    /// Application name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Description
    #[inline]
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Application variables as written
    #[inline]
    #[must_use]
    pub fn variables(&self) -> &StringMap {
        &self.variables
    }

    /// Behaviour switches
    #[inline]
    #[must_use]
    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Application scope
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Change tracking of the root
    #[inline]
    #[must_use]
    pub fn editable(&self) -> &Editable {
        &self.editable
    }

    /// Descriptor captured at the last commit
    #[inline]
    #[must_use]
    pub fn committed_descriptor(&self) -> &ApplicationDescriptor {
        &self.baseline
    }

    /// Descriptor of the current tree, with slots as written
    #[must_use]
    pub fn descriptor(&self) -> ApplicationDescriptor {
        ApplicationDescriptor {
            name: self.name.clone(),
            variables: self.variables.clone(),
            replica_groups: self
                .catalog
                .replica_groups
                .iter()
                .map(|rg| rg.descriptor.clone())
                .collect(),
            server_templates: self
                .catalog
                .server_templates
                .iter()
                .map(|(id, t)| (id.clone(), t.descriptor.clone()))
                .collect(),
            service_templates: self
                .catalog
                .service_templates
                .iter()
                .map(|(id, t)| (id.clone(), t.descriptor.clone()))
                .collect(),
            nodes: self
                .nodes
                .iter()
                .map(|(name, node)| (name.clone(), node.descriptor()))
                .collect(),
            description: self.description.clone(),
            property_sets: self
                .catalog
                .property_sets
                .iter()
                .map(|(id, s)| (id.clone(), s.descriptor.clone()))
                .collect(),
        }
    }

    /// Content digest of the normalized current descriptor
    ///
    /// # Errors
    /// Returns error if the descriptor cannot be serialized
    pub fn digest(&self) -> Result<DescriptorDigest, DigestError> {
        DescriptorDigest::of(&self.descriptor().normalized())
    }

    /// Whether anything differs from the last commit
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.editable.is_new()
            || !self.live.can_use_update_descriptor
            || self.create_update_descriptor().is_some()
    }

    /// Change the description
    pub fn set_description(&mut self, description: impl Into<String>) {
        let description = description.into();
        if description != self.description {
            self.description = description;
            self.editable.mark_modified();
        }
    }

    /// Replace application variables, rebuilding every node
    ///
    /// # Errors
    /// Returns the first node or identity failure; nothing changes
    pub fn set_variables(&mut self, variables: StringMap) -> ModelResult<()> {
        if variables == self.variables {
            return Ok(());
        }
        let resolver = application_resolver(&self.name, &variables, self.config.unresolved)?;
        let description = self.description.clone();

        // Replica group ids resolve under the application scope
        let mut renamed = Vec::new();
        let groups = self
            .catalog
            .replica_groups
            .iter()
            .map(|current| {
                let mut group = ReplicaGroup::build(current.descriptor.clone(), &resolver)?;
                group.editable = current.editable.clone();
                if group.id != current.id {
                    group.editable.mark_modified();
                    if !current.editable.is_new() {
                        renamed.push(current.id.clone());
                    }
                }
                Ok(group)
            })
            .collect::<ModelResult<Vec<_>>>()?;

        self.transact("set application variables", |tx| {
            tx.set_settings(description, variables, resolver);
            tx.set_replica_groups(groups);
            tx.rebuild_all_nodes()
        })?;
        for id in &renamed {
            self.editable.remove_element(EntityKind::ReplicaGroup, id);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, "application variables updated");
        Ok(())
    }

    /// Replace the whole tree with `descriptor`
    ///
    /// The next save sends the full descriptor.
    ///
    /// # Errors
    /// Returns `ReadOnly` when the name differs, or any build failure
    pub fn replace_descriptor(&mut self, descriptor: &ApplicationDescriptor) -> ModelResult<()> {
        if descriptor.name != self.name {
            return Err(ValidationError::ReadOnly {
                entity: format!("application {}", self.name),
                reason: "the application name cannot change",
            }
            .into());
        }
        let mut fresh = Self::build(descriptor, self.config.clone())?;
        fresh.editable = self.editable.clone();
        fresh.editable.mark_modified();
        fresh.baseline = std::mem::take(&mut self.baseline);
        fresh.live = std::mem::take(&mut self.live);
        fresh.live.can_use_update_descriptor = false;
        *self = fresh;
        tracing::info!(application = %self.name, "application descriptor replaced");
        Ok(())
    }

    /// Clear every change flag and capture the current descriptor
    pub fn commit(&mut self) {
        self.editable.commit();
        for template in self.catalog.server_templates.values_mut() {
            template.editable.commit();
        }
        for template in self.catalog.service_templates.values_mut() {
            template.editable.commit();
        }
        for set in self.catalog.property_sets.values_mut() {
            set.editable.commit();
        }
        for group in &mut self.catalog.replica_groups {
            group.editable.commit();
        }
        for node in self.nodes.values_mut() {
            node.editable.commit();
            for set in node.property_sets.values_mut() {
                set.editable.commit();
            }
            for server in &mut node.servers {
                server.editable.commit();
                server.committed_id = Some(server.id.clone());
            }
        }
        self.baseline = self.descriptor();
        self.live.can_use_update_descriptor = true;
        match DescriptorDigest::of(&self.baseline.normalized()) {
            Ok(digest) => {
                tracing::debug!(application = %self.name, digest = %digest.short(), "changes committed");
            }
            Err(err) => {
                tracing::debug!(application = %self.name, error = %err, "changes committed");
            }
        }
    }

    /// Drop local changes and return to the last committed descriptor
    ///
    /// Registry updates queued while changes were pending are applied
    /// afterwards, in arrival order. When one fails, it and every update
    /// queued after it stay queued.
    ///
    /// # Errors
    /// Returns `SaveInProgress` while a save awaits its outcome, or the
    /// failure applying a queued update
    pub fn discard_changes(&mut self) -> ModelResult<()> {
        if self.live.save_in_flight() {
            return Err(ValidationError::SaveInProgress.into());
        }
        let mut fresh = Self::build(&self.baseline, self.config.clone())?;
        if self.editable.is_new() {
            fresh.editable.mark_new();
        }
        fresh.live = std::mem::take(&mut self.live);
        fresh.live.can_use_update_descriptor = true;
        *self = fresh;
        tracing::info!(
            application = %self.name,
            queued = self.live.concurrent_updates.len(),
            "changes discarded"
        );

        while let Some(update) = self.live.concurrent_updates.pop_front() {
            if let Err(err) = self.apply_update(&update) {
                self.live.concurrent_updates.push_front(update);
                tracing::warn!(
                    application = %self.name,
                    remaining = self.live.concurrent_updates.len(),
                    error = %err,
                    "queued registry update failed"
                );
                return Err(err);
            }
        }
        Ok(())
    }

    /// Property set `id` in `scope`
    #[must_use]
    pub fn property_set(&self, scope: &PropertySetScope, id: &str) -> Option<&PropertySet> {
        match scope {
            PropertySetScope::Application => self.catalog.property_sets.get(id),
            PropertySetScope::Node(node) => self.nodes.get(node)?.property_sets.get(id),
        }
    }

    /// Application-level property sets
    #[inline]
    #[must_use]
    pub fn property_sets(&self) -> &BTreeMap<String, PropertySet> {
        &self.catalog.property_sets
    }

    /// Lookup used by servers on `node`, or by application-level sets
    #[must_use]
    pub fn property_set_lookup(&self, node: Option<&str>) -> PropertySetLookup<'_> {
        match node.and_then(|name| self.nodes.get(name)) {
            Some(node) => PropertySetLookup::node(&self.catalog.property_sets, &node.property_sets),
            None => PropertySetLookup::application(&self.catalog.property_sets),
        }
    }

    fn validate_property_set(
        &self,
        scope: &PropertySetScope,
        id: &str,
        descriptor: &PropertySetDescriptor,
    ) -> ModelResult<()> {
        if id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "property set".to_string(),
                field: "id",
            }
            .into());
        }
        let candidate = PropertySet::new(descriptor.clone());
        match scope {
            PropertySetScope::Application => {
                let mut sets = self.catalog.property_sets.clone();
                sets.insert(id.to_string(), candidate);
                PropertySetLookup::application(&sets).validate(id, descriptor)
            }
            PropertySetScope::Node(node) => {
                let mut sets = self.node_ref(node)?.property_sets.clone();
                sets.insert(id.to_string(), candidate);
                PropertySetLookup::node(&self.catalog.property_sets, &sets).validate(id, descriptor)
            }
        }
    }

    /// Add property set `id` to `scope`
    ///
    /// # Errors
    /// Returns an identity collision if the id is taken in that scope, or a
    /// dangling or cyclic reference error
    pub fn insert_property_set(
        &mut self,
        scope: &PropertySetScope,
        id: &str,
        descriptor: PropertySetDescriptor,
    ) -> ModelResult<()> {
        if self.property_set(scope, id).is_some() {
            return Err(IdentityCollision {
                kind: EntityKind::PropertySet,
                id: id.to_string(),
                existing: scope_owner(scope),
                conflicting: "new property set".to_string(),
            }
            .into());
        }
        self.validate_property_set(scope, id, &descriptor)?;
        self.put_property_set(scope, id, PropertySet::new(descriptor))?;
        tracing::info!(application = %self.name, scope = %scope_owner(scope), set = id, "property set added");
        Ok(())
    }

    /// Replace property set `id` in `scope`
    ///
    /// Servers are not rebuilt; properties are resolved when read.
    ///
    /// # Errors
    /// Returns `UnknownEntity`, or a dangling or cyclic reference error
    pub fn update_property_set(
        &mut self,
        scope: &PropertySetScope,
        id: &str,
        descriptor: PropertySetDescriptor,
    ) -> ModelResult<()> {
        let current = self
            .property_set(scope, id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::PropertySet,
                id: id.to_string(),
            })?;
        if current.descriptor == descriptor {
            return Ok(());
        }
        let mut editable = current.editable.clone();
        editable.mark_modified();
        self.validate_property_set(scope, id, &descriptor)?;
        self.put_property_set(scope, id, PropertySet { descriptor, editable })?;
        tracing::info!(application = %self.name, scope = %scope_owner(scope), set = id, "property set updated");
        Ok(())
    }

    /// Remove property set `id` from `scope`
    ///
    /// References to it are left in place and reported when properties are
    /// next resolved.
    ///
    /// # Errors
    /// Returns `UnknownEntity` if there is no such set
    pub fn remove_property_set(&mut self, scope: &PropertySetScope, id: &str) -> ModelResult<()> {
        let was_new = self
            .property_set(scope, id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::PropertySet,
                id: id.to_string(),
            })?
            .editable
            .is_new();

        match scope {
            PropertySetScope::Application => {
                self.transact("remove property set", |tx| {
                    tx.remove_property_set(id);
                    Ok(())
                })?;
                if !was_new {
                    self.editable.remove_element(EntityKind::PropertySet, id);
                }
            }
            PropertySetScope::Node(name) => {
                let mut node = self.node_ref(name)?.clone();
                node.property_sets.remove(id);
                if !was_new {
                    node.editable.remove_element(EntityKind::PropertySet, id);
                }
                node.editable.mark_modified();
                self.transact("remove property set", |tx| {
                    tx.put_node(node, std::iter::empty());
                    Ok(())
                })?;
            }
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, scope = %scope_owner(scope), set = id, "property set removed");
        Ok(())
    }

    fn put_property_set(
        &mut self,
        scope: &PropertySetScope,
        id: &str,
        set: PropertySet,
    ) -> ModelResult<()> {
        match scope {
            PropertySetScope::Application => self.transact("put property set", |tx| {
                tx.put_property_set(id, set);
                Ok(())
            })?,
            PropertySetScope::Node(name) => {
                let mut node = self.node_ref(name)?.clone();
                node.property_sets.insert(id.to_string(), set);
                node.editable.mark_modified();
                self.transact("put property set", |tx| {
                    tx.put_node(node, std::iter::empty());
                    Ok(())
                })?;
            }
        }
        self.editable.mark_modified();
        Ok(())
    }
}

fn scope_owner(scope: &PropertySetScope) -> String {
    match scope {
        PropertySetScope::Application => "application".to_string(),
        PropertySetScope::Node(node) => format!("node {node}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UnresolvedReference;
    use icegrid_descriptor::{NodeDescriptor, ServerDescriptor};

    fn descriptor() -> ApplicationDescriptor {
        let mut app = ApplicationDescriptor::new("Demo");
        app.variables.insert("port".to_string(), "4061".to_string());
        app.property_sets.insert(
            "base".to_string(),
            PropertySetDescriptor::new().with_property("Ice.Trace.Network", "1"),
        );
        let mut node = NodeDescriptor::default();
        let mut server = ServerDescriptor::new("${node}-srv", "/bin/srv");
        server.communicator.property_set = PropertySetDescriptor::new()
            .with_reference("base")
            .with_property("Port", "${port}");
        node.servers.push(server);
        app.nodes.insert("n1".to_string(), node);
        app
    }

    #[test]
    fn load_marks_new() {
        let app = Application::load(&descriptor(), ModelConfig::default()).unwrap();
        assert!(app.editable().is_new());
        assert!(!app.live.live);
        assert_eq!(app.descriptor(), descriptor());
        assert!(app.server("n1", "n1-srv").is_some());
    }

    #[test]
    fn from_registry_is_live_and_clean() {
        let app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        assert!(!app.editable().is_dirty());
        assert!(app.live.live);
        assert!(!app.has_changes());
    }

    #[test]
    fn create_requires_name() {
        let err = Application::create("", ModelConfig::default()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Validation(ValidationError::EmptyField { field: "name", .. })
        ));
    }

    #[test]
    fn set_variables_rebuilds_servers() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        let mut variables = app.variables().clone();
        variables.insert("port".to_string(), "5000".to_string());
        app.set_variables(variables).unwrap();

        let props = app.server_properties("n1", "n1-srv").unwrap();
        assert!(props.iter().any(|p| p.name == "Port" && p.value == "5000"));
        assert!(app.editable().is_modified());
    }

    #[test]
    fn reserved_application_variable_rejected() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        let mut variables = StringMap::new();
        variables.insert("application".to_string(), "x".to_string());
        assert!(app.set_variables(variables).is_err());
        assert_eq!(app.variables(), &descriptor().variables);
    }

    #[test]
    fn removed_property_set_reported_on_read() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        app.remove_property_set(&PropertySetScope::Application, "base")
            .unwrap();
        assert_eq!(app.editable().removed(EntityKind::PropertySet), vec!["base"]);

        let err = app.server_properties("n1", "n1-srv").unwrap_err();
        assert_eq!(
            err,
            ModelError::UnresolvedReference(UnresolvedReference::PropertySet {
                id: "base".to_string(),
                from: "server n1-srv".to_string(),
            })
        );
    }

    #[test]
    fn cyclic_property_set_rejected() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        let err = app
            .update_property_set(
                &PropertySetScope::Application,
                "base",
                PropertySetDescriptor::new().with_reference("base"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            ModelError::Validation(ValidationError::CyclicPropertySet { .. })
        ));
    }

    #[test]
    fn node_property_set_shadows_application_set() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        app.insert_property_set(
            &PropertySetScope::Node("n1".to_string()),
            "base",
            PropertySetDescriptor::new().with_property("Ice.Trace.Network", "3"),
        )
        .unwrap();

        let props = app.server_properties("n1", "n1-srv").unwrap();
        assert!(props.iter().any(|p| p.name == "Ice.Trace.Network" && p.value == "3"));
        assert!(app.node("n1").unwrap().editable().is_modified());
    }

    #[test]
    fn commit_captures_baseline() {
        let mut app = Application::load(&descriptor(), ModelConfig::default()).unwrap();
        app.set_description("demo");
        app.commit();
        assert!(!app.editable().is_dirty());
        assert_eq!(app.committed_descriptor().description, "demo");
    }

    #[test]
    fn replace_descriptor_keeps_name() {
        let mut app = Application::from_registry(&descriptor(), ModelConfig::default()).unwrap();
        let mut other = descriptor();
        other.name = "Other".to_string();
        assert!(app.replace_descriptor(&other).is_err());

        let mut changed = descriptor();
        changed.description = "changed".to_string();
        app.replace_descriptor(&changed).unwrap();
        assert!(app.has_changes());
        assert_eq!(app.description(), "changed");
    }
}
