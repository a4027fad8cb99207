//! Servers
//!
//! A server slot on a node is either a plain descriptor or an instance of a
//! server template. Building a slot produces a [`Server`]: the slot as
//! written, its resolved id and descriptor, its adapters and services, and
//! the scope it was resolved with. Servers are replaced wholesale on every
//! rebuild; [`ServerKey`] addresses a slot by node and position.

use crate::adapter::{Adapter, SERVER_ADAPTER_PREFIX};
use crate::application::Application;
use crate::catalog::BuildScope;
use crate::communicator::{communicator_properties, resolve_communicator};
use crate::editable::{Editable, EntityKind};
use crate::error::{IdentityCollision, ModelError, ModelResult, UnresolvedReference, ValidationError};
use crate::property_set::{hidden_properties, PropertySetLookup};
use crate::service::Service;
use icegrid_descriptor::{
    PropertyDescriptor, PropertySetDescriptor, ServerDescriptor, ServerEntry, ServerKind,
    ServiceEntry,
};
use icegrid_resolver::Resolver;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Position of a server slot
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServerKey {
    /// Node name
    pub node: String,
    /// Index in the node's server list
    pub index: usize,
}

impl ServerKey {
    /// Create key
    #[inline]
    #[must_use]
    pub fn new(node: impl Into<String>, index: usize) -> Self {
        Self {
            node: node.into(),
            index,
        }
    }
}

/// Resolved server
#[derive(Debug, Clone)]
pub struct Server {
    pub(crate) entry: ServerEntry,
    pub(crate) id: String,
    pub(crate) resolved: ServerDescriptor,
    pub(crate) adapters: Vec<Adapter>,
    pub(crate) services: Vec<Service>,
    pub(crate) overrides: Vec<PropertySetDescriptor>,
    pub(crate) own: PropertySetDescriptor,
    pub(crate) resolver: Arc<Resolver>,
    pub(crate) editable: Editable,
    pub(crate) committed_id: Option<String>,
}

impl Server {
    /// Resolve a slot; the result is tracked as new
    pub(crate) fn build(entry: ServerEntry, scope: BuildScope<'_>) -> ModelResult<Self> {
        let (raw, instance_scope, overrides, service_overrides) = match &entry {
            ServerEntry::Plain(descriptor) => {
                validate_server_descriptor(descriptor, &format!("server on node {}", scope.node))?;
                (
                    descriptor.clone(),
                    Arc::clone(scope.resolver),
                    Vec::new(),
                    BTreeMap::new(),
                )
            }
            ServerEntry::Instance(instance) => {
                let template = scope
                    .catalog
                    .server_templates
                    .get(&instance.template)
                    .ok_or_else(|| UnresolvedReference::ServerTemplate {
                        id: instance.template.clone(),
                    })?;
                let bound = template.bind(
                    &instance.template,
                    &instance.parameter_values,
                    scope.resolver,
                )?;
                (
                    template.descriptor.descriptor.clone(),
                    Arc::new(bound),
                    vec![instance.property_set.clone()],
                    instance.service_property_sets.clone(),
                )
            }
        };

        let id = instance_scope
            .substitute(&raw.id)
            .map_err(|e| ModelError::resolve(e, format!("server id on node {}", scope.node)))?;
        if id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: format!("server on node {}", scope.node),
                field: "id",
            }
            .into());
        }
        let owner = format!("server {id}");
        tracing::debug!(node = scope.node, server = %id, "building server");

        let resolver = Arc::new(
            Resolver::child(&instance_scope)
                .put_literal("server", id.clone())
                .build()
                .map_err(|e| ModelError::resolve(e, owner.clone()))?,
        );

        let (communicator, adapters) = resolve_communicator(
            &raw.communicator,
            SERVER_ADAPTER_PREFIX,
            &resolver,
            scope.catalog,
            &owner,
        )?;

        let mut names = BTreeSet::new();
        let mut services = Vec::new();
        for slot in raw.services() {
            let service = Service::build(slot, &id, &resolver, scope.catalog, &service_overrides)?;
            if !names.insert(service.name.clone()) {
                return Err(IdentityCollision {
                    kind: EntityKind::Service,
                    id: service.name,
                    existing: owner.clone(),
                    conflicting: owner,
                }
                .into());
            }
            services.push(service);
        }

        let resolved = {
            let sub = |text: &str, field: &str| {
                resolver
                    .substitute(text)
                    .map_err(|e| ModelError::resolve(e, format!("{owner} {field}")))
            };
            let subs = |texts: &[String], field: &str| {
                texts
                    .iter()
                    .map(|t| sub(t, field))
                    .collect::<ModelResult<Vec<_>>>()
            };
            ServerDescriptor {
                id: id.clone(),
                exe: sub(&raw.exe, "exe")?,
                ice_version: sub(&raw.ice_version, "ice version")?,
                pwd: sub(&raw.pwd, "pwd")?,
                options: subs(&raw.options, "options")?,
                envs: subs(&raw.envs, "envs")?,
                activation: sub(&raw.activation, "activation")?,
                activation_timeout: sub(&raw.activation_timeout, "activation timeout")?,
                deactivation_timeout: sub(&raw.deactivation_timeout, "deactivation timeout")?,
                allocatable: raw.allocatable,
                user: sub(&raw.user, "user")?,
                communicator,
                kind: match raw.kind {
                    ServerKind::Plain => ServerKind::Plain,
                    ServerKind::IceBox { .. } => ServerKind::IceBox {
                        services: services
                            .iter()
                            .map(|s| ServiceEntry::Plain(s.resolved.clone()))
                            .collect(),
                    },
                },
            }
        };

        Ok(Self {
            entry,
            id,
            resolved,
            adapters,
            services,
            overrides,
            own: raw.communicator.property_set,
            resolver,
            editable: Editable::new_entity(),
            committed_id: None,
        })
    }

    /// Resolve `entry` in place of `self`, keeping its change tracking
    pub(crate) fn rebuild(&self, entry: ServerEntry, scope: BuildScope<'_>) -> ModelResult<Self> {
        let mut server = Self::build(entry, scope)?;
        server.editable = self.editable.clone();
        server.committed_id = self.committed_id.clone();
        Ok(server)
    }

    /// Resolved id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Slot as written
    #[inline]
    #[must_use]
    pub fn entry(&self) -> &ServerEntry {
        &self.entry
    }

    /// Template id when the server is an instance
    #[inline]
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        self.entry.template()
    }

    /// Resolved descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ServerDescriptor {
        &self.resolved
    }

    /// Server adapters (not including service adapters)
    #[inline]
    #[must_use]
    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    /// Hosted services
    #[inline]
    #[must_use]
    pub fn services(&self) -> &[Service] {
        &self.services
    }

    /// Hosted service by resolved name
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Scope the server was resolved with
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

    /// Id known to the registry at the last commit
    #[inline]
    #[must_use]
    pub fn committed_id(&self) -> Option<&str> {
        self.committed_id.as_deref()
    }

    /// Effective properties of the server communicator
    ///
    /// # Errors
    /// Returns dangling or cyclic property set reference errors
    pub fn properties(&self, lookup: PropertySetLookup<'_>) -> ModelResult<Vec<PropertyDescriptor>> {
        communicator_properties(
            &self.overrides,
            &self.own,
            lookup,
            &self.resolver,
            &format!("server {}", self.id),
        )
    }

    /// Effective properties split into adapter-derived and the rest
    ///
    /// # Errors
    /// Same as [`Server::properties`]
    pub fn split_properties(
        &self,
        lookup: PropertySetLookup<'_>,
    ) -> ModelResult<(Vec<PropertyDescriptor>, Vec<PropertyDescriptor>)> {
        let properties = self.properties(lookup)?;
        let names: Vec<String> = self.adapters.iter().map(|a| a.name().to_string()).collect();
        Ok(hidden_properties(&properties, &names))
    }
}

/// Resolved id of a slot under `scope`, without building the server
pub(crate) fn resolve_entry_id(entry: &ServerEntry, scope: BuildScope<'_>) -> ModelResult<String> {
    let context = || format!("server id on node {}", scope.node);
    match entry {
        ServerEntry::Plain(descriptor) => scope
            .resolver
            .substitute(&descriptor.id)
            .map_err(|e| ModelError::resolve(e, context())),
        ServerEntry::Instance(instance) => {
            let template = scope
                .catalog
                .server_templates
                .get(&instance.template)
                .ok_or_else(|| UnresolvedReference::ServerTemplate {
                    id: instance.template.clone(),
                })?;
            template
                .bind(&instance.template, &instance.parameter_values, scope.resolver)?
                .substitute(&template.descriptor.descriptor.id)
                .map_err(|e| ModelError::resolve(e, context()))
        }
    }
}

/// Required fields of a server descriptor
pub(crate) fn validate_server_descriptor(descriptor: &ServerDescriptor, entity: &str) -> ModelResult<()> {
    if descriptor.id.is_empty() {
        return Err(ValidationError::EmptyField {
            entity: entity.to_string(),
            field: "id",
        }
        .into());
    }
    if descriptor.exe.is_empty() {
        return Err(ValidationError::EmptyField {
            entity: entity.to_string(),
            field: "exe",
        }
        .into());
    }
    Ok(())
}

impl Application {
    /// Keys of servers whose slot matches `filter`, in node then list order
    pub(crate) fn server_keys<F>(&self, filter: F) -> Vec<ServerKey>
    where
        F: Fn(&ServerEntry) -> bool,
    {
        let mut keys = Vec::new();
        for node in self.nodes.values() {
            for (index, server) in node.servers.iter().enumerate() {
                if filter(&server.entry) {
                    keys.push(ServerKey::new(node.name.clone(), index));
                }
            }
        }
        keys
    }

    /// Server at `key`
    ///
    /// # Errors
    /// Returns `UnknownEntity` when the key is stale
    pub fn server_at(&self, key: &ServerKey) -> ModelResult<&Server> {
        self.nodes
            .get(&key.node)
            .and_then(|node| node.servers.get(key.index))
            .ok_or_else(|| {
                ValidationError::UnknownEntity {
                    kind: EntityKind::Server,
                    id: format!("{}#{}", key.node, key.index),
                }
                .into()
            })
    }

    /// Locate server `id` anywhere in the application
    #[must_use]
    pub fn find_server(&self, id: &str) -> Option<ServerKey> {
        self.nodes.values().find_map(|node| {
            let index = node.servers.iter().position(|s| s.id == id)?;
            Some(ServerKey::new(node.name.clone(), index))
        })
    }

    /// Server `id` on node `node`
    #[must_use]
    pub fn server(&self, node: &str, id: &str) -> Option<&Server> {
        self.nodes.get(node)?.server(id)
    }

    fn server_key(&self, node: &str, id: &str) -> ModelResult<ServerKey> {
        let node_ref = self.node_ref(node)?;
        node_ref
            .servers
            .iter()
            .position(|s| s.id == id)
            .map(|index| ServerKey::new(node, index))
            .ok_or_else(|| {
                ValidationError::UnknownEntity {
                    kind: EntityKind::Server,
                    id: id.to_string(),
                }
                .into()
            })
    }

    /// Rebuild the server at `key` from `entry`, keeping its tracking
    pub(crate) fn rebuild_server(
        &self,
        key: &ServerKey,
        entry: ServerEntry,
        mark_modified: bool,
    ) -> ModelResult<Server> {
        let node = self.node_ref(&key.node)?;
        let current = self.server_at(key)?;
        let mut server = current.rebuild(entry, self.build_scope(node))?;
        if mark_modified {
            server.editable.mark_modified();
        }
        Ok(server)
    }

    /// Effective properties of server `id` on `node`
    ///
    /// # Errors
    /// Returns `UnknownEntity` or a property set reference error
    pub fn server_properties(&self, node: &str, id: &str) -> ModelResult<Vec<PropertyDescriptor>> {
        let node_ref = self.node_ref(node)?;
        let key = self.server_key(node, id)?;
        self.server_at(&key)?
            .properties(PropertySetLookup::node(&self.catalog.property_sets, &node_ref.property_sets))
    }

    /// Effective properties of service `service` hosted by server `id`
    ///
    /// # Errors
    /// Returns `UnknownEntity` or a property set reference error
    pub fn service_properties(
        &self,
        node: &str,
        id: &str,
        service: &str,
    ) -> ModelResult<Vec<PropertyDescriptor>> {
        let node_ref = self.node_ref(node)?;
        let server = self.server_at(&self.server_key(node, id)?)?;
        let service = server.service(service).ok_or_else(|| ValidationError::UnknownEntity {
            kind: EntityKind::Service,
            id: service.to_string(),
        })?;
        service.properties(PropertySetLookup::node(&self.catalog.property_sets, &node_ref.property_sets))
    }

    /// Add a server slot to `node`, returning its resolved id
    ///
    /// # Errors
    /// Returns validation, reference or identity errors; nothing is added
    pub fn insert_server(&mut self, node: &str, entry: ServerEntry) -> ModelResult<String> {
        let server = Server::build(entry, self.build_scope(self.node_ref(node)?))?;
        let id = server.id.clone();

        self.transact("insert server", |tx| {
            tx.insert_server(node, server)?;
            Ok(())
        })?;
        self.mark_nodes_modified(&[node.to_string()]);
        tracing::info!(application = %self.name, node, server = %id, "server added");
        Ok(id)
    }

    /// Replace the slot of server `id` on `node`, returning the new resolved id
    ///
    /// # Errors
    /// Returns validation, reference or identity errors; the server is unchanged
    pub fn update_server(&mut self, node: &str, id: &str, entry: ServerEntry) -> ModelResult<String> {
        let key = self.server_key(node, id)?;
        if self.server_at(&key)?.entry == entry {
            return Ok(id.to_string());
        }
        let server = self.rebuild_server(&key, entry, true)?;
        let new_id = server.id.clone();

        self.transact("update server", |tx| tx.replace_server(&key, server))?;
        self.mark_nodes_modified(&[node.to_string()]);
        tracing::info!(application = %self.name, node, server = %new_id, "server updated");
        Ok(new_id)
    }

    /// Remove server `id` from `node`
    ///
    /// # Errors
    /// Returns `UnknownEntity` if there is no such server
    pub fn remove_server(&mut self, node: &str, id: &str) -> ModelResult<()> {
        let key = self.server_key(node, id)?;
        let removed = self.transact("remove server", |tx| tx.remove_server(&key))?;

        if let Some(node_mut) = self.nodes.get_mut(node) {
            if let Some(committed) = removed.committed_id {
                node_mut.editable.remove_element(EntityKind::Server, committed);
            }
            node_mut.editable.mark_modified();
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, node, server = id, "server removed");
        Ok(())
    }

    /// Add a service to plain IceBox server `id`
    ///
    /// # Errors
    /// Returns `ReadOnly` for template instances and non-IceBox servers, or
    /// any rebuild error
    pub fn insert_service(&mut self, node: &str, id: &str, service: ServiceEntry) -> ModelResult<()> {
        self.edit_services(node, id, |services| {
            services.push(service);
            Ok(())
        })
    }

    /// Replace service `name` of plain IceBox server `id`
    ///
    /// # Errors
    /// Same as [`Application::insert_service`], plus `UnknownEntity`
    pub fn update_service(
        &mut self,
        node: &str,
        id: &str,
        name: &str,
        service: ServiceEntry,
    ) -> ModelResult<()> {
        let index = self.service_index(node, id, name)?;
        self.edit_services(node, id, |services| {
            services[index] = service;
            Ok(())
        })
    }

    /// Remove service `name` from plain IceBox server `id`
    ///
    /// # Errors
    /// Same as [`Application::update_service`]
    pub fn remove_service(&mut self, node: &str, id: &str, name: &str) -> ModelResult<()> {
        let index = self.service_index(node, id, name)?;
        self.edit_services(node, id, |services| {
            services.remove(index);
            Ok(())
        })
    }

    fn service_index(&self, node: &str, id: &str, name: &str) -> ModelResult<usize> {
        let server = self.server_at(&self.server_key(node, id)?)?;
        server
            .services
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| {
                ValidationError::UnknownEntity {
                    kind: EntityKind::Service,
                    id: name.to_string(),
                }
                .into()
            })
    }

    fn edit_services<F>(&mut self, node: &str, id: &str, edit: F) -> ModelResult<()>
    where
        F: FnOnce(&mut Vec<ServiceEntry>) -> ModelResult<()>,
    {
        let key = self.server_key(node, id)?;
        let mut entry = self.server_at(&key)?.entry.clone();
        let services = match &mut entry {
            ServerEntry::Instance(_) => {
                return Err(ValidationError::ReadOnly {
                    entity: format!("server {id}"),
                    reason: "services of a template instance come from its template",
                }
                .into());
            }
            ServerEntry::Plain(ServerDescriptor {
                kind: ServerKind::Plain,
                ..
            }) => {
                return Err(ValidationError::ReadOnly {
                    entity: format!("server {id}"),
                    reason: "not an IceBox server",
                }
                .into());
            }
            ServerEntry::Plain(ServerDescriptor {
                kind: ServerKind::IceBox { services },
                ..
            }) => services,
        };
        edit(services)?;
        self.update_server(node, id, entry).map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::template::Template;
    use icegrid_descriptor::{
        AdapterDescriptor, ServerInstanceDescriptor, ServiceDescriptor, TemplateDescriptor,
    };

    fn node_scope() -> Arc<Resolver> {
        Arc::new(
            Resolver::builder()
                .put_literal("application", "Demo")
                .put_literal("node", "n1")
                .put("idx", "1")
                .build()
                .unwrap(),
        )
    }

    fn catalog() -> Catalog {
        let mut catalog = Catalog::default();
        let mut descriptor = ServerDescriptor::new("server-${idx}-${name}", "/bin/${name}");
        descriptor.communicator.adapters.push(AdapterDescriptor::named("Adapter"));
        catalog.server_templates.insert(
            "T".to_string(),
            Template::committed(TemplateDescriptor::new(descriptor).with_parameter("name", None)),
        );
        catalog
    }

    #[test]
    fn plain_server_resolves_against_node() {
        let catalog = Catalog::default();
        let resolver = node_scope();
        let scope = BuildScope {
            catalog: &catalog,
            node: "n1",
            resolver: &resolver,
        };
        let mut descriptor = ServerDescriptor::new("${node}-srv", "/usr/bin/server");
        descriptor.options.push("--id=${server}".to_string());

        let server = Server::build(ServerEntry::Plain(descriptor), scope).unwrap();
        assert_eq!(server.id(), "n1-srv");
        assert_eq!(server.descriptor().options, vec!["--id=n1-srv".to_string()]);
        assert!(server.editable().is_new());
        assert_eq!(server.committed_id(), None);
    }

    #[test]
    fn instance_resolves_through_template() {
        let catalog = catalog();
        let resolver = node_scope();
        let scope = BuildScope {
            catalog: &catalog,
            node: "n1",
            resolver: &resolver,
        };
        let entry = ServerEntry::Instance(ServerInstanceDescriptor::new("T").with_parameter("name", "a"));

        let server = Server::build(entry, scope).unwrap();
        assert_eq!(server.id(), "server-1-a");
        assert_eq!(server.descriptor().exe, "/bin/a");
        assert_eq!(server.adapters()[0].id(), "server-1-a.Adapter");
        assert_eq!(server.template(), Some("T"));
    }

    #[test]
    fn missing_template_reported() {
        let catalog = Catalog::default();
        let resolver = node_scope();
        let scope = BuildScope {
            catalog: &catalog,
            node: "n1",
            resolver: &resolver,
        };
        let err = Server::build(ServerEntry::Instance(ServerInstanceDescriptor::new("Nope")), scope)
            .unwrap_err();
        assert_eq!(
            err,
            ModelError::UnresolvedReference(UnresolvedReference::ServerTemplate {
                id: "Nope".to_string()
            })
        );
    }

    #[test]
    fn duplicate_service_names_rejected() {
        let catalog = Catalog::default();
        let resolver = node_scope();
        let scope = BuildScope {
            catalog: &catalog,
            node: "n1",
            resolver: &resolver,
        };
        let mut descriptor = ServerDescriptor::new("box", "icebox");
        descriptor.kind = ServerKind::IceBox {
            services: vec![
                ServiceEntry::Plain(ServiceDescriptor::new("Hello", "lib:a")),
                ServiceEntry::Plain(ServiceDescriptor::new("Hello", "lib:b")),
            ],
        };
        let err = Server::build(ServerEntry::Plain(descriptor), scope).unwrap_err();
        assert!(err.is_collision());
    }

    #[test]
    fn empty_exe_rejected() {
        assert!(matches!(
            validate_server_descriptor(&ServerDescriptor::new("s", ""), "server"),
            Err(ModelError::Validation(ValidationError::EmptyField { field: "exe", .. }))
        ));
    }
}
