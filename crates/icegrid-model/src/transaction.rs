//! Rebuild-with-rollback
//!
//! Every mutation runs inside [`Application::transact`]. The closure edits
//! the tree through a [`Transaction`], which journals the previous value of
//! each slot it touches. When the closure and the identity check succeed the
//! journal is dropped; otherwise it is replayed in reverse and the
//! application is exactly as it was before the call.

use crate::application::Application;
use crate::editable::EntityKind;
use crate::error::{ModelResult, ValidationError};
use crate::identity;
use crate::node::Node;
use crate::property_set::PropertySet;
use crate::replica_group::ReplicaGroup;
use crate::server::{Server, ServerKey};
use crate::template::Template;
use icegrid_descriptor::{ServerDescriptor, ServiceDescriptor, StringMap};
use icegrid_resolver::Resolver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// One journaled change
#[derive(Debug)]
enum Undo {
    Server {
        key: ServerKey,
        previous: Box<Server>,
    },
    ServerInserted {
        key: ServerKey,
    },
    ServerRemoved {
        key: ServerKey,
        previous: Box<Server>,
    },
    Node {
        name: String,
        previous: Option<Box<Node>>,
    },
    ServerTemplate {
        id: String,
        previous: Option<Template<ServerDescriptor>>,
    },
    ServiceTemplate {
        id: String,
        previous: Option<Template<ServiceDescriptor>>,
    },
    PropertySet {
        id: String,
        previous: Option<PropertySet>,
    },
    ReplicaGroups {
        previous: Vec<ReplicaGroup>,
    },
    Settings {
        description: String,
        variables: StringMap,
        resolver: Arc<Resolver>,
    },
}

/// Journaled view of an application during one operation
#[derive(Debug)]
pub(crate) struct Transaction<'a> {
    app: &'a mut Application,
    journal: Vec<Undo>,
    batch: Vec<ServerKey>,
}

impl<'a> Transaction<'a> {
    fn begin(app: &'a mut Application) -> Self {
        Self {
            app,
            journal: Vec::new(),
            batch: Vec::new(),
        }
    }

    /// Current state, including changes made so far
    #[inline]
    pub(crate) fn app(&self) -> &Application {
        self.app
    }

    fn unknown_server(key: &ServerKey) -> ValidationError {
        ValidationError::UnknownEntity {
            kind: EntityKind::Server,
            id: format!("{}#{}", key.node, key.index),
        }
    }

    fn servers_mut(&mut self, node: &str) -> ModelResult<&mut Vec<Server>> {
        self.app
            .nodes
            .get_mut(node)
            .map(|n| &mut n.servers)
            .ok_or_else(|| {
                ValidationError::UnknownEntity {
                    kind: EntityKind::Node,
                    id: node.to_string(),
                }
                .into()
            })
    }

    /// Put `server` in the slot at `key`
    pub(crate) fn replace_server(&mut self, key: &ServerKey, server: Server) -> ModelResult<()> {
        let servers = self.servers_mut(&key.node)?;
        let slot = servers
            .get_mut(key.index)
            .ok_or_else(|| Self::unknown_server(key))?;
        let id_changed = slot.id != server.id;
        let previous = std::mem::replace(slot, server);
        self.journal.push(Undo::Server {
            key: key.clone(),
            previous: Box::new(previous),
        });
        if id_changed {
            self.batch.push(key.clone());
        }
        Ok(())
    }

    /// Append `server` to `node`
    pub(crate) fn insert_server(&mut self, node: &str, server: Server) -> ModelResult<ServerKey> {
        let servers = self.servers_mut(node)?;
        servers.push(server);
        let key = ServerKey::new(node, servers.len() - 1);
        self.journal.push(Undo::ServerInserted { key: key.clone() });
        self.batch.push(key.clone());
        Ok(key)
    }

    /// Take the server at `key` out of its node
    pub(crate) fn remove_server(&mut self, key: &ServerKey) -> ModelResult<Server> {
        let servers = self.servers_mut(&key.node)?;
        if key.index >= servers.len() {
            return Err(Self::unknown_server(key).into());
        }
        let removed = servers.remove(key.index);
        self.journal.push(Undo::ServerRemoved {
            key: key.clone(),
            previous: Box::new(removed.clone()),
        });
        Ok(removed)
    }

    /// Put `node` in place, registering the servers at `batch` positions last
    pub(crate) fn put_node(&mut self, node: Node, batch: impl IntoIterator<Item = usize>) {
        let name = node.name.clone();
        self.batch
            .extend(batch.into_iter().map(|index| ServerKey::new(name.clone(), index)));
        let previous = self.app.nodes.insert(name.clone(), node).map(Box::new);
        self.journal.push(Undo::Node { name, previous });
    }

    /// Take node `name` out of the application
    pub(crate) fn remove_node(&mut self, name: &str) -> ModelResult<Node> {
        let node = self.app.nodes.remove(name).ok_or_else(|| ValidationError::UnknownEntity {
            kind: EntityKind::Node,
            id: name.to_string(),
        })?;
        self.journal.push(Undo::Node {
            name: name.to_string(),
            previous: Some(Box::new(node.clone())),
        });
        Ok(node)
    }

    pub(crate) fn put_server_template(&mut self, id: &str, template: Template<ServerDescriptor>) {
        let previous = self.app.catalog.server_templates.insert(id.to_string(), template);
        self.journal.push(Undo::ServerTemplate {
            id: id.to_string(),
            previous,
        });
    }

    pub(crate) fn remove_server_template(&mut self, id: &str) -> Option<Template<ServerDescriptor>> {
        let previous = self.app.catalog.server_templates.remove(id);
        self.journal.push(Undo::ServerTemplate {
            id: id.to_string(),
            previous: previous.clone(),
        });
        previous
    }

    pub(crate) fn put_service_template(&mut self, id: &str, template: Template<ServiceDescriptor>) {
        let previous = self.app.catalog.service_templates.insert(id.to_string(), template);
        self.journal.push(Undo::ServiceTemplate {
            id: id.to_string(),
            previous,
        });
    }

    pub(crate) fn remove_service_template(
        &mut self,
        id: &str,
    ) -> Option<Template<ServiceDescriptor>> {
        let previous = self.app.catalog.service_templates.remove(id);
        self.journal.push(Undo::ServiceTemplate {
            id: id.to_string(),
            previous: previous.clone(),
        });
        previous
    }

    /// Put an application-level property set
    pub(crate) fn put_property_set(&mut self, id: &str, set: PropertySet) {
        let previous = self.app.catalog.property_sets.insert(id.to_string(), set);
        self.journal.push(Undo::PropertySet {
            id: id.to_string(),
            previous,
        });
    }

    /// Remove an application-level property set
    pub(crate) fn remove_property_set(&mut self, id: &str) -> Option<PropertySet> {
        let previous = self.app.catalog.property_sets.remove(id);
        self.journal.push(Undo::PropertySet {
            id: id.to_string(),
            previous: previous.clone(),
        });
        previous
    }

    pub(crate) fn set_replica_groups(&mut self, groups: Vec<ReplicaGroup>) {
        let previous = std::mem::replace(&mut self.app.catalog.replica_groups, groups);
        self.journal.push(Undo::ReplicaGroups { previous });
    }

    /// Replace description, variables and scope of the application
    pub(crate) fn set_settings(
        &mut self,
        description: String,
        variables: StringMap,
        resolver: Arc<Resolver>,
    ) {
        let undo = Undo::Settings {
            description: std::mem::replace(&mut self.app.description, description),
            variables: std::mem::replace(&mut self.app.variables, variables),
            resolver: std::mem::replace(&mut self.app.resolver, resolver),
        };
        self.journal.push(undo);
    }

    /// Rebuild every server against the current catalog
    pub(crate) fn rebuild_all_servers(&mut self) -> ModelResult<()> {
        let keys = self.app.server_keys(|_| true);
        for key in &keys {
            let entry = self.app.server_at(key)?.entry.clone();
            let server = self.app.rebuild_server(key, entry, false)?;
            self.replace_server(key, server)?;
        }
        Ok(())
    }

    /// Rebuild every node against the current application scope
    pub(crate) fn rebuild_all_nodes(&mut self) -> ModelResult<()> {
        let names: Vec<String> = self.app.nodes.keys().cloned().collect();
        for name in names {
            let (node, changed) = {
                let current = self.app.node_ref(&name)?;
                current.rebuild(&self.app.catalog, &self.app.resolver)?
            };
            self.put_node(node, changed);
        }
        Ok(())
    }

    fn rollback(self) {
        let Self { app, journal, .. } = self;
        for undo in journal.into_iter().rev() {
            match undo {
                Undo::Server { key, previous } => {
                    if let Some(slot) = app
                        .nodes
                        .get_mut(&key.node)
                        .and_then(|n| n.servers.get_mut(key.index))
                    {
                        *slot = *previous;
                    }
                }
                Undo::ServerInserted { key } => {
                    if let Some(node) = app.nodes.get_mut(&key.node) {
                        if key.index < node.servers.len() {
                            node.servers.remove(key.index);
                        }
                    }
                }
                Undo::ServerRemoved { key, previous } => {
                    if let Some(node) = app.nodes.get_mut(&key.node) {
                        node.servers.insert(key.index, *previous);
                    }
                }
                Undo::Node { name, previous } => match previous {
                    Some(node) => {
                        app.nodes.insert(name, *node);
                    }
                    None => {
                        app.nodes.remove(&name);
                    }
                },
                Undo::ServerTemplate { id, previous } => {
                    restore(&mut app.catalog.server_templates, id, previous);
                }
                Undo::ServiceTemplate { id, previous } => {
                    restore(&mut app.catalog.service_templates, id, previous);
                }
                Undo::PropertySet { id, previous } => {
                    restore(&mut app.catalog.property_sets, id, previous);
                }
                Undo::ReplicaGroups { previous } => app.catalog.replica_groups = previous,
                Undo::Settings {
                    description,
                    variables,
                    resolver,
                } => {
                    app.description = description;
                    app.variables = variables;
                    app.resolver = resolver;
                }
            }
        }
    }
}

fn restore<V>(map: &mut BTreeMap<String, V>, id: String, previous: Option<V>) {
    match previous {
        Some(value) => {
            map.insert(id, value);
        }
        None => {
            map.remove(&id);
        }
    }
}

impl Application {
    /// Run `f` as one all-or-nothing mutation named `op`
    ///
    /// After `f` returns, every resolved id in the application is checked.
    /// On any failure the journal is replayed and the original error is
    /// returned.
    pub(crate) fn transact<T, F>(&mut self, op: &str, f: F) -> ModelResult<T>
    where
        F: FnOnce(&mut Transaction<'_>) -> ModelResult<T>,
    {
        let application = self.name.clone();
        let mut tx = Transaction::begin(self);
        let outcome = f(&mut tx).and_then(|value| {
            identity::check(tx.app(), &tx.batch)?;
            Ok(value)
        });

        match outcome {
            Ok(value) => {
                tracing::debug!(%application, op, changes = tx.journal.len(), "transaction committed");
                Ok(value)
            }
            Err(err) => {
                tracing::warn!(%application, op, changes = tx.journal.len(), error = %err, "transaction rolled back");
                tx.rollback();
                Err(err)
            }
        }
    }
}

