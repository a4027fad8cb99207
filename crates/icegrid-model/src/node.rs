//! Deployment nodes
//!
//! A node owns its variables, property sets and server slots. Its scope
//! binds `${node}` and its variables over the application scope. Any change
//! to node settings replaces the whole node, with every server rebuilt under
//! the new scope.

use crate::application::Application;
use crate::catalog::{BuildScope, Catalog};
use crate::editable::{Editable, EntityKind};
use crate::error::{IdentityCollision, ModelError, ModelResult, ValidationError};
use crate::property_set::{reconcile_sets, PropertySet};
use crate::server::Server;
use icegrid_descriptor::{NodeDescriptor, StringMap};
use icegrid_resolver::Resolver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Build the scope of node `name`
pub(crate) fn node_resolver(
    application: &Arc<Resolver>,
    name: &str,
    variables: &StringMap,
) -> ModelResult<Arc<Resolver>> {
    Resolver::child(application)
        .put_literal("node", name)
        .variables(variables)
        .build()
        .map(Arc::new)
        .map_err(|e| ModelError::resolve(e, format!("variables of node {name}")))
}

/// Deployment node
#[derive(Debug, Clone)]
pub struct Node {
    pub(crate) name: String,
    pub(crate) description: String,
    pub(crate) load_factor: String,
    pub(crate) variables: StringMap,
    pub(crate) property_sets: BTreeMap<String, PropertySet>,
    pub(crate) servers: Vec<Server>,
    pub(crate) resolver: Arc<Resolver>,
    pub(crate) editable: Editable,
}

impl Node {
    /// Build a node in committed state
    pub(crate) fn build(
        name: &str,
        descriptor: &NodeDescriptor,
        catalog: &Catalog,
        application: &Arc<Resolver>,
    ) -> ModelResult<Self> {
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "node".to_string(),
                field: "name",
            }
            .into());
        }
        let resolver = node_resolver(application, name, &descriptor.variables)?;
        let scope = BuildScope {
            catalog,
            node: name,
            resolver: &resolver,
        };
        let servers = descriptor
            .entries()
            .into_iter()
            .map(|entry| {
                let mut server = Server::build(entry, scope)?;
                server.editable = Editable::committed();
                server.committed_id = Some(server.id.clone());
                Ok(server)
            })
            .collect::<ModelResult<Vec<_>>>()?;

        Ok(Self {
            name: name.to_string(),
            description: descriptor.description.clone(),
            load_factor: descriptor.load_factor.clone(),
            variables: descriptor.variables.clone(),
            property_sets: descriptor
                .property_sets
                .iter()
                .map(|(id, set)| (id.clone(), PropertySet::committed(set.clone())))
                .collect(),
            servers,
            resolver,
            editable: Editable::committed(),
        })
    }

    /// Track everything in this node as created in this session
    pub(crate) fn mark_all_new(&mut self) {
        self.editable = Editable::new_entity();
        for set in self.property_sets.values_mut() {
            set.editable = Editable::new_entity();
        }
        for server in &mut self.servers {
            server.editable = Editable::new_entity();
            server.committed_id = None;
        }
    }

    /// Rebuild every server under a new application scope or catalog
    ///
    /// Returns the node and the positions of servers whose id changed.
    pub(crate) fn rebuild(
        &self,
        catalog: &Catalog,
        application: &Arc<Resolver>,
    ) -> ModelResult<(Self, Vec<usize>)> {
        let resolver = node_resolver(application, &self.name, &self.variables)?;
        let scope = BuildScope {
            catalog,
            node: &self.name,
            resolver: &resolver,
        };
        let mut changed = Vec::new();
        let mut servers = Vec::with_capacity(self.servers.len());
        for (index, server) in self.servers.iter().enumerate() {
            let rebuilt = server.rebuild(server.entry.clone(), scope)?;
            if rebuilt.id != server.id {
                changed.push(index);
            }
            servers.push(rebuilt);
        }

        let mut node = self.clone();
        node.servers = servers;
        node.resolver = resolver;
        Ok((node, changed))
    }

    /// Build the replacement of this node described by `descriptor`
    ///
    /// Servers whose slot is unchanged keep their tracking; a rebuilt slot
    /// that resolves to the id of an unmatched old server takes over that
    /// server's tracking and is marked modified. Old committed servers left
    /// over are recorded as removed. Returns the node and the positions of
    /// servers that are new or whose id changed.
    pub(crate) fn reconcile(
        &self,
        descriptor: &NodeDescriptor,
        catalog: &Catalog,
        application: &Arc<Resolver>,
    ) -> ModelResult<(Self, Vec<usize>)> {
        let resolver = node_resolver(application, &self.name, &descriptor.variables)?;
        let scope = BuildScope {
            catalog,
            node: &self.name,
            resolver: &resolver,
        };

        let mut editable = self.editable.clone();
        let mut used = vec![false; self.servers.len()];
        let mut servers = Vec::new();
        let mut changed = Vec::new();

        let mut pending = Vec::new();
        for entry in descriptor.entries() {
            let matched = self
                .servers
                .iter()
                .enumerate()
                .position(|(i, s)| !used[i] && s.entry == entry);
            if let Some(i) = matched {
                used[i] = true;
                let rebuilt = self.servers[i].rebuild(entry, scope)?;
                if rebuilt.id != self.servers[i].id {
                    changed.push(servers.len());
                }
                servers.push(rebuilt);
            } else {
                pending.push(servers.len());
                servers.push(Server::build(entry, scope)?);
            }
        }

        for &position in &pending {
            let id = servers[position].id.clone();
            let previous = self
                .servers
                .iter()
                .enumerate()
                .position(|(i, s)| !used[i] && s.id == id);
            match previous {
                Some(i) => {
                    used[i] = true;
                    servers[position].editable = self.servers[i].editable.clone();
                    servers[position].editable.mark_modified();
                    servers[position].committed_id = self.servers[i].committed_id.clone();
                }
                None => changed.push(position),
            }
        }

        for (i, server) in self.servers.iter().enumerate() {
            if !used[i] {
                if let Some(committed) = &server.committed_id {
                    editable.remove_element(EntityKind::Server, committed.clone());
                }
            }
        }

        let property_sets = reconcile_sets(&self.property_sets, &descriptor.property_sets, &mut editable);
        editable.mark_modified();
        changed.sort_unstable();

        Ok((
            Self {
                name: self.name.clone(),
                description: descriptor.description.clone(),
                load_factor: descriptor.load_factor.clone(),
                variables: descriptor.variables.clone(),
                property_sets,
                servers,
                resolver,
                editable,
            },
            changed,
        ))
    }

    /// Node name
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

    /// Load factor
    #[inline]
    #[must_use]
    pub fn load_factor(&self) -> &str {
        &self.load_factor
    }

    /// Node variables as written
    #[inline]
    #[must_use]
    pub fn variables(&self) -> &StringMap {
        &self.variables
    }

    /// Node-level property sets
    #[inline]
    #[must_use]
    pub fn property_sets(&self) -> &BTreeMap<String, PropertySet> {
        &self.property_sets
    }

    /// Servers in slot order
    #[inline]
    #[must_use]
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// Server by resolved id
    #[must_use]
    pub fn server(&self, id: &str) -> Option<&Server> {
        self.servers.iter().find(|s| s.id == id)
    }

    /// Node scope
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Change tracking
    #[inline]
    #[must_use]
    pub fn editable(&self) -> &Editable {
        &self.editable
    }

    /// Descriptor derived from the slots as written
    #[must_use]
    pub fn descriptor(&self) -> NodeDescriptor {
        let mut descriptor = NodeDescriptor {
            variables: self.variables.clone(),
            load_factor: self.load_factor.clone(),
            description: self.description.clone(),
            property_sets: self
                .property_sets
                .iter()
                .map(|(id, set)| (id.clone(), set.descriptor.clone()))
                .collect(),
            ..NodeDescriptor::default()
        };
        descriptor.set_entries(self.servers.iter().map(|s| &s.entry));
        descriptor
    }
}

impl Application {
    /// Nodes by name
    #[inline]
    #[must_use]
    pub fn nodes(&self) -> &BTreeMap<String, Node> {
        &self.nodes
    }

    /// Node by name
    #[must_use]
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.nodes.get(name)
    }

    pub(crate) fn node_ref(&self, name: &str) -> ModelResult<&Node> {
        self.nodes.get(name).ok_or_else(|| {
            ValidationError::UnknownEntity {
                kind: EntityKind::Node,
                id: name.to_string(),
            }
            .into()
        })
    }

    pub(crate) fn build_scope<'a>(&'a self, node: &'a Node) -> BuildScope<'a> {
        BuildScope {
            catalog: &self.catalog,
            node: &node.name,
            resolver: &node.resolver,
        }
    }

    pub(crate) fn mark_nodes_modified(&mut self, names: &[String]) {
        for name in names {
            if let Some(node) = self.nodes.get_mut(name) {
                node.editable.mark_modified();
            }
        }
        self.editable.mark_modified();
    }

    /// Add node `name`
    ///
    /// # Errors
    /// Returns an identity collision if the name is taken or any server
    /// fails to build; nothing is added
    pub fn insert_node(&mut self, name: &str, descriptor: &NodeDescriptor) -> ModelResult<()> {
        if self.nodes.contains_key(name) {
            return Err(IdentityCollision {
                kind: EntityKind::Node,
                id: name.to_string(),
                existing: format!("application {}", self.name),
                conflicting: "new node".to_string(),
            }
            .into());
        }
        let mut node = Node::build(name, descriptor, &self.catalog, &self.resolver)?;
        node.mark_all_new();
        let batch: Vec<usize> = (0..node.servers.len()).collect();

        self.transact("insert node", |tx| {
            tx.put_node(node, batch);
            Ok(())
        })?;
        self.editable.mark_modified();
        tracing::info!(application = %self.name, node = name, "node added");
        Ok(())
    }

    /// Replace node `name` with `descriptor`
    ///
    /// # Errors
    /// Returns the first server or identity failure; the node is unchanged
    pub fn update_node(&mut self, name: &str, descriptor: &NodeDescriptor) -> ModelResult<()> {
        let current = self.node_ref(name)?;
        if current.descriptor() == *descriptor {
            return Ok(());
        }
        let (node, changed) = current.reconcile(descriptor, &self.catalog, &self.resolver)?;

        self.transact("update node", |tx| {
            tx.put_node(node, changed);
            Ok(())
        })?;
        self.editable.mark_modified();
        tracing::info!(application = %self.name, node = name, "node updated");
        Ok(())
    }

    /// Replace the variables of node `name`
    ///
    /// # Errors
    /// Same as [`Application::update_node`]
    pub fn set_node_variables(&mut self, name: &str, variables: StringMap) -> ModelResult<()> {
        let mut descriptor = self.node_ref(name)?.descriptor();
        descriptor.variables = variables;
        self.update_node(name, &descriptor)
    }

    /// Remove node `name` and everything on it
    ///
    /// # Errors
    /// Returns `UnknownEntity` if there is no such node
    pub fn remove_node(&mut self, name: &str) -> ModelResult<()> {
        let removed = self.transact("remove node", |tx| tx.remove_node(name))?;
        if !removed.editable.is_new() {
            self.editable.remove_element(EntityKind::Node, name);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, node = name, "node removed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icegrid_descriptor::{ServerDescriptor, ServerEntry};

    fn app_scope() -> Arc<Resolver> {
        Arc::new(
            Resolver::builder()
                .put_literal("application", "Demo")
                .build()
                .unwrap(),
        )
    }

    fn descriptor() -> NodeDescriptor {
        let mut node = NodeDescriptor::default();
        node.variables.insert("idx".to_string(), "1".to_string());
        node.servers.push(ServerDescriptor::new("a-${idx}", "exe"));
        node.servers.push(ServerDescriptor::new("b-${idx}", "exe"));
        node
    }

    #[test]
    fn build_committed() {
        let node = Node::build("n1", &descriptor(), &Catalog::default(), &app_scope()).unwrap();
        assert_eq!(node.servers().len(), 2);
        assert_eq!(node.servers()[0].id(), "a-1");
        assert_eq!(node.servers()[0].committed_id(), Some("a-1"));
        assert!(!node.editable().is_dirty());
        assert_eq!(node.descriptor(), descriptor());
    }

    #[test]
    fn reserved_variable_rejected() {
        let mut bad = descriptor();
        bad.variables.insert("node".to_string(), "x".to_string());
        let err = Node::build("n1", &bad, &Catalog::default(), &app_scope()).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Validation(ValidationError::ReservedName { .. })
        ));
    }

    #[test]
    fn reconcile_variable_change_keeps_tracking() {
        let node = Node::build("n1", &descriptor(), &Catalog::default(), &app_scope()).unwrap();
        let mut edited = descriptor();
        edited.variables.insert("idx".to_string(), "2".to_string());

        let (rebuilt, changed) = node.reconcile(&edited, &Catalog::default(), &app_scope()).unwrap();
        assert_eq!(changed, vec![0, 1]);
        assert_eq!(rebuilt.servers()[0].id(), "a-2");
        assert_eq!(rebuilt.servers()[0].committed_id(), Some("a-1"));
        assert!(!rebuilt.servers()[0].editable().is_new());
        assert!(rebuilt.editable().is_modified());
    }

    #[test]
    fn reconcile_edited_server_keeps_committed_id() {
        let node = Node::build("n1", &descriptor(), &Catalog::default(), &app_scope()).unwrap();
        let mut edited = descriptor();
        edited.servers[1].exe = "other".to_string();

        let (rebuilt, changed) = node.reconcile(&edited, &Catalog::default(), &app_scope()).unwrap();
        assert!(changed.is_empty());
        let server = rebuilt.server("b-1").unwrap();
        assert!(server.editable().is_modified());
        assert_eq!(server.committed_id(), Some("b-1"));
        assert!(rebuilt.editable().removed(EntityKind::Server).is_empty());
    }

    #[test]
    fn reconcile_records_removed_servers() {
        let node = Node::build("n1", &descriptor(), &Catalog::default(), &app_scope()).unwrap();
        let mut edited = descriptor();
        edited.servers.remove(0);
        edited.servers.push(ServerDescriptor::new("c", "exe"));

        let (rebuilt, changed) = node.reconcile(&edited, &Catalog::default(), &app_scope()).unwrap();
        assert_eq!(changed, vec![1]);
        assert_eq!(rebuilt.editable().removed(EntityKind::Server), vec!["a-1"]);
        assert!(rebuilt.server("c").unwrap().editable().is_new());
        assert!(matches!(rebuilt.servers()[1].entry(), ServerEntry::Plain(_)));
    }
}
