//! Server and service templates
//!
//! A template is never deployed on its own. Instances bind a template id and
//! a parameter map; binding layers the instance values over the template
//! defaults over the enclosing scope.
//!
//! Editing a template rebuilds every instance inside one transaction. Stored
//! parameter maps are pruned to the template's new parameter list.

use crate::application::Application;
use crate::editable::{Editable, EntityKind};
use crate::error::{
    IdentityCollision, ModelError, ModelResult, UnresolvedReference, ValidationError,
};
use crate::server::{validate_server_descriptor, ServerKey};
use crate::service::validate_service_descriptor;
use icegrid_descriptor::{
    ServerDescriptor, ServerEntry, ServerKind, ServerTemplateDescriptor, ServiceDescriptor,
    ServiceEntry, ServiceTemplateDescriptor, StringMap, TemplateDescriptor,
};
use icegrid_resolver::{is_reserved, Resolver};
use std::collections::BTreeSet;
use std::sync::Arc;

/// Template entry in the application catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template<D> {
    pub(crate) descriptor: TemplateDescriptor<D>,
    pub(crate) editable: Editable,
}

impl<D> Template<D> {
    /// Template created in this session
    #[must_use]
    pub fn new(descriptor: TemplateDescriptor<D>) -> Self {
        Self {
            descriptor,
            editable: Editable::new_entity(),
        }
    }

    /// Template loaded in committed state
    #[must_use]
    pub fn committed(descriptor: TemplateDescriptor<D>) -> Self {
        Self {
            descriptor,
            editable: Editable::committed(),
        }
    }

    /// Underlying descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &TemplateDescriptor<D> {
        &self.descriptor
    }

    /// Change tracking
    #[inline]
    #[must_use]
    pub fn editable(&self) -> &Editable {
        &self.editable
    }

    /// Ordered parameter names
    #[inline]
    #[must_use]
    pub fn parameters(&self) -> &[String] {
        &self.descriptor.parameters
    }

    /// Build the instance scope for `values` under `parent`
    ///
    /// # Errors
    /// Returns `UnresolvedReference::Parameter` when a parameter has neither
    /// a value nor a default, or any substitution error in the values
    pub(crate) fn bind(
        &self,
        id: &str,
        values: &StringMap,
        parent: &Arc<Resolver>,
    ) -> ModelResult<Resolver> {
        let values = make_parameter_values(values, &self.descriptor.parameters);
        let defaults = make_parameter_values(
            &self.descriptor.parameter_defaults,
            &self.descriptor.parameters,
        );
        if let Some(parameter) = self
            .descriptor
            .parameters
            .iter()
            .find(|p| !values.contains_key(*p) && !defaults.contains_key(*p))
        {
            return Err(UnresolvedReference::Parameter {
                template: id.to_string(),
                parameter: parameter.clone(),
            }
            .into());
        }

        Resolver::child(parent)
            .parameters(&values, &defaults)
            .build()
            .map_err(|e| ModelError::resolve(e, format!("parameters of template {id}")))
    }
}

/// Keep only bindings for parameters the template declares
#[must_use]
pub fn make_parameter_values(values: &StringMap, parameters: &[String]) -> StringMap {
    values
        .iter()
        .filter(|(name, _)| parameters.contains(name))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Check parameter names and defaults of a template
pub(crate) fn validate_parameters<D>(
    id: &str,
    descriptor: &TemplateDescriptor<D>,
) -> ModelResult<()> {
    let mut seen = BTreeSet::new();
    for parameter in &descriptor.parameters {
        if parameter.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: format!("template {id}"),
                field: "parameter name",
            }
            .into());
        }
        if is_reserved(parameter) {
            return Err(ValidationError::ReservedName {
                name: parameter.clone(),
                context: format!("parameter of template {id}"),
            }
            .into());
        }
        if !seen.insert(parameter.as_str()) {
            return Err(ValidationError::DuplicateParameter {
                template: id.to_string(),
                parameter: parameter.clone(),
            }
            .into());
        }
    }
    if let Some(name) = descriptor
        .parameter_defaults
        .keys()
        .find(|name| !seen.contains(name.as_str()))
    {
        return Err(ValidationError::UnknownParameterDefault {
            template: id.to_string(),
            parameter: name.clone(),
        }
        .into());
    }
    Ok(())
}

fn validate_template_id(id: &str, kind: EntityKind) -> ModelResult<()> {
    if id.is_empty() {
        return Err(ValidationError::EmptyField {
            entity: kind.to_string(),
            field: "id",
        }
        .into());
    }
    Ok(())
}

/// Prune parameter maps of service instances hosted in `services`
///
/// Returns true when anything changed.
fn prune_service_instances(
    services: &mut [ServiceEntry],
    template_id: &str,
    parameters: &[String],
) -> bool {
    let mut changed = false;
    for entry in services {
        if let ServiceEntry::Instance(instance) = entry {
            if instance.template == template_id {
                let pruned = make_parameter_values(&instance.parameter_values, parameters);
                if pruned != instance.parameter_values {
                    instance.parameter_values = pruned;
                    changed = true;
                }
            }
        }
    }
    changed
}

fn hosts_service_template(descriptor: &ServerDescriptor, template_id: &str) -> bool {
    descriptor
        .services()
        .iter()
        .any(|s| s.template() == Some(template_id))
}

impl Application {
    /// Server template by id
    #[must_use]
    pub fn server_template(&self, id: &str) -> Option<&Template<ServerDescriptor>> {
        self.catalog.server_templates.get(id)
    }

    /// Service template by id
    #[must_use]
    pub fn service_template(&self, id: &str) -> Option<&Template<ServiceDescriptor>> {
        self.catalog.service_templates.get(id)
    }

    /// Servers instantiating server template `id`
    #[must_use]
    pub fn server_template_instances(&self, id: &str) -> Vec<ServerKey> {
        self.server_keys(|entry| entry.template() == Some(id))
    }

    /// Servers hosting an instance of service template `id`, directly or
    /// through their server template
    #[must_use]
    pub fn service_template_users(&self, id: &str) -> Vec<ServerKey> {
        self.server_keys(|entry| match entry {
            ServerEntry::Plain(server) => hosts_service_template(server, id),
            ServerEntry::Instance(instance) => self
                .catalog
                .server_templates
                .get(&instance.template)
                .is_some_and(|t| hosts_service_template(&t.descriptor.descriptor, id)),
        })
    }

    /// Add a server template
    ///
    /// # Errors
    /// Returns an identity collision if the id is taken, or a validation error
    pub fn insert_server_template(
        &mut self,
        id: &str,
        descriptor: ServerTemplateDescriptor,
    ) -> ModelResult<()> {
        validate_template_id(id, EntityKind::ServerTemplate)?;
        if self.catalog.server_templates.contains_key(id) {
            return Err(IdentityCollision {
                kind: EntityKind::ServerTemplate,
                id: id.to_string(),
                existing: format!("application {}", self.name),
                conflicting: "new server template".to_string(),
            }
            .into());
        }
        validate_parameters(id, &descriptor)?;
        validate_server_descriptor(&descriptor.descriptor, &format!("server template {id}"))?;

        self.transact("insert server template", |tx| {
            tx.put_server_template(id, Template::new(descriptor));
            Ok(())
        })?;
        self.editable.mark_modified();
        tracing::info!(application = %self.name, template = id, "server template added");
        Ok(())
    }

    /// Replace a server template and rebuild all of its instances
    ///
    /// Fails as a whole if any instance fails to rebuild.
    ///
    /// # Errors
    /// Returns the first instance failure; the model is left unchanged
    pub fn update_server_template(
        &mut self,
        id: &str,
        descriptor: ServerTemplateDescriptor,
    ) -> ModelResult<()> {
        let current = self
            .catalog
            .server_templates
            .get(id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::ServerTemplate,
                id: id.to_string(),
            })?;
        if current.descriptor == descriptor {
            return Ok(());
        }
        validate_parameters(id, &descriptor)?;
        validate_server_descriptor(&descriptor.descriptor, &format!("server template {id}"))?;

        let mut template = current.clone();
        template.descriptor = descriptor;
        template.editable.mark_modified();
        let parameters = template.descriptor.parameters.clone();
        let instances = self.server_template_instances(id);

        let touched = self.transact("update server template", |tx| {
            tx.put_server_template(id, template);
            let mut touched = Vec::new();
            for key in &instances {
                let server = tx.app().server_at(key)?;
                let mut entry = server.entry.clone();
                if let ServerEntry::Instance(instance) = &mut entry {
                    instance.parameter_values =
                        make_parameter_values(&instance.parameter_values, &parameters);
                }
                let entry_changed = entry != server.entry;
                let rebuilt = tx.app().rebuild_server(key, entry, entry_changed)?;
                tx.replace_server(key, rebuilt)?;
                if entry_changed {
                    touched.push(key.node.clone());
                }
            }
            Ok(touched)
        })?;

        self.mark_nodes_modified(&touched);
        self.editable.mark_modified();
        tracing::info!(
            application = %self.name,
            template = id,
            instances = instances.len(),
            "server template updated"
        );
        Ok(())
    }

    /// Remove a server template with no instances
    ///
    /// # Errors
    /// Returns `ValidationError::TemplateInUse` while instances exist
    pub fn remove_server_template(&mut self, id: &str) -> ModelResult<()> {
        let template = self
            .catalog
            .server_templates
            .get(id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::ServerTemplate,
                id: id.to_string(),
            })?;
        let instances = self.server_template_instances(id).len();
        if instances > 0 {
            return Err(ValidationError::TemplateInUse {
                id: id.to_string(),
                instances,
            }
            .into());
        }
        let was_new = template.editable.is_new();

        self.transact("remove server template", |tx| {
            tx.remove_server_template(id);
            Ok(())
        })?;
        if !was_new {
            self.editable.remove_element(EntityKind::ServerTemplate, id);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, template = id, "server template removed");
        Ok(())
    }

    /// Add a service template
    ///
    /// # Errors
    /// Returns an identity collision if the id is taken, or a validation error
    pub fn insert_service_template(
        &mut self,
        id: &str,
        descriptor: ServiceTemplateDescriptor,
    ) -> ModelResult<()> {
        validate_template_id(id, EntityKind::ServiceTemplate)?;
        if self.catalog.service_templates.contains_key(id) {
            return Err(IdentityCollision {
                kind: EntityKind::ServiceTemplate,
                id: id.to_string(),
                existing: format!("application {}", self.name),
                conflicting: "new service template".to_string(),
            }
            .into());
        }
        validate_parameters(id, &descriptor)?;
        validate_service_descriptor(&descriptor.descriptor, &format!("service template {id}"))?;

        self.transact("insert service template", |tx| {
            tx.put_service_template(id, Template::new(descriptor));
            Ok(())
        })?;
        self.editable.mark_modified();
        tracing::info!(application = %self.name, template = id, "service template added");
        Ok(())
    }

    /// Replace a service template and rebuild every server that hosts it
    ///
    /// Servers using the template through a server template are rebuilt too;
    /// parameter maps of affected service instances are pruned.
    ///
    /// # Errors
    /// Returns the first server failure; the model is left unchanged
    pub fn update_service_template(
        &mut self,
        id: &str,
        descriptor: ServiceTemplateDescriptor,
    ) -> ModelResult<()> {
        let current = self
            .catalog
            .service_templates
            .get(id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::ServiceTemplate,
                id: id.to_string(),
            })?;
        if current.descriptor == descriptor {
            return Ok(());
        }
        validate_parameters(id, &descriptor)?;
        validate_service_descriptor(&descriptor.descriptor, &format!("service template {id}"))?;

        let mut template = current.clone();
        template.descriptor = descriptor;
        template.editable.mark_modified();
        let parameters = template.descriptor.parameters.clone();
        let users = self.service_template_users(id);

        // Server templates whose IceBox services bind this template
        let mut pruned_server_templates = Vec::new();
        for (server_template_id, server_template) in &self.catalog.server_templates {
            let mut copy = server_template.clone();
            if let ServerKind::IceBox { services } = &mut copy.descriptor.descriptor.kind {
                if prune_service_instances(services, id, &parameters) {
                    copy.editable.mark_modified();
                    pruned_server_templates.push((server_template_id.clone(), copy));
                }
            }
        }

        let touched = self.transact("update service template", |tx| {
            tx.put_service_template(id, template);
            for (server_template_id, copy) in pruned_server_templates {
                tx.put_server_template(&server_template_id, copy);
            }
            let mut touched = Vec::new();
            for key in &users {
                let server = tx.app().server_at(key)?;
                let mut entry = server.entry.clone();
                if let ServerEntry::Plain(plain) = &mut entry {
                    if let ServerKind::IceBox { services } = &mut plain.kind {
                        prune_service_instances(services, id, &parameters);
                    }
                }
                let entry_changed = entry != server.entry;
                let rebuilt = tx.app().rebuild_server(key, entry, entry_changed)?;
                tx.replace_server(key, rebuilt)?;
                if entry_changed {
                    touched.push(key.node.clone());
                }
            }
            Ok(touched)
        })?;

        self.mark_nodes_modified(&touched);
        self.editable.mark_modified();
        tracing::info!(
            application = %self.name,
            template = id,
            servers = users.len(),
            "service template updated"
        );
        Ok(())
    }

    /// Remove a service template nothing uses
    ///
    /// # Errors
    /// Returns `ValidationError::TemplateInUse` while a server or server
    /// template still binds it
    pub fn remove_service_template(&mut self, id: &str) -> ModelResult<()> {
        let template = self
            .catalog
            .service_templates
            .get(id)
            .ok_or_else(|| ValidationError::UnknownEntity {
                kind: EntityKind::ServiceTemplate,
                id: id.to_string(),
            })?;
        let in_templates = self
            .catalog
            .server_templates
            .values()
            .filter(|t| hosts_service_template(&t.descriptor.descriptor, id))
            .count();
        let in_servers = self
            .server_keys(|entry| match entry {
                ServerEntry::Plain(server) => hosts_service_template(server, id),
                ServerEntry::Instance(_) => false,
            })
            .len();
        let instances = in_templates + in_servers;
        if instances > 0 {
            return Err(ValidationError::TemplateInUse {
                id: id.to_string(),
                instances,
            }
            .into());
        }
        let was_new = template.editable.is_new();

        self.transact("remove service template", |tx| {
            tx.remove_service_template(id);
            Ok(())
        })?;
        if !was_new {
            self.editable.remove_element(EntityKind::ServiceTemplate, id);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, template = id, "service template removed");
        Ok(())
    }
}
