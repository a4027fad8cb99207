//! IceBox services
//!
//! Services live inside IceBox servers. A service slot is either a plain
//! descriptor or an instance of a service template; either way the service
//! resolves under its server's scope with `${service}` bound to its name.

use crate::adapter::{Adapter, SERVICE_ADAPTER_PREFIX};
use crate::catalog::Catalog;
use crate::communicator::{communicator_properties, resolve_communicator};
use crate::error::{ModelError, ModelResult, UnresolvedReference, ValidationError};
use crate::property_set::PropertySetLookup;
use icegrid_descriptor::{
    PropertyDescriptor, PropertySetDescriptor, ServiceDescriptor, ServiceEntry,
};
use icegrid_resolver::Resolver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Resolved IceBox service
#[derive(Debug, Clone)]
pub struct Service {
    pub(crate) entry: ServiceEntry,
    pub(crate) name: String,
    pub(crate) resolved: ServiceDescriptor,
    pub(crate) adapters: Vec<Adapter>,
    pub(crate) overrides: Vec<PropertySetDescriptor>,
    pub(crate) own: PropertySetDescriptor,
    pub(crate) resolver: Arc<Resolver>,
}

impl Service {
    /// Resolve a service slot of server `server_id`
    ///
    /// `server_overrides` are the per-service property sets of a server
    /// instance, keyed by resolved service name.
    pub(crate) fn build(
        entry: &ServiceEntry,
        server_id: &str,
        server_resolver: &Arc<Resolver>,
        catalog: &Catalog,
        server_overrides: &BTreeMap<String, PropertySetDescriptor>,
    ) -> ModelResult<Self> {
        let (raw, scope, instance_override) = match entry {
            ServiceEntry::Plain(descriptor) => {
                validate_service_descriptor(descriptor, &format!("service of server {server_id}"))?;
                (descriptor, Arc::clone(server_resolver), None)
            }
            ServiceEntry::Instance(instance) => {
                let template = catalog
                    .service_templates
                    .get(&instance.template)
                    .ok_or_else(|| UnresolvedReference::ServiceTemplate {
                        id: instance.template.clone(),
                    })?;
                let scope = template.bind(
                    &instance.template,
                    &instance.parameter_values,
                    server_resolver,
                )?;
                (
                    &template.descriptor.descriptor,
                    Arc::new(scope),
                    Some(&instance.property_set),
                )
            }
        };

        let name = scope
            .substitute(&raw.name)
            .map_err(|e| ModelError::resolve(e, format!("service name in server {server_id}")))?;
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: format!("service of server {server_id}"),
                field: "name",
            }
            .into());
        }
        let owner = format!("service {name} of server {server_id}");

        let resolver = Arc::new(
            Resolver::child(&scope)
                .put_literal("service", name.clone())
                .build()
                .map_err(|e| ModelError::resolve(e, owner.clone()))?,
        );
        let entry_point = resolver
            .substitute(&raw.entry)
            .map_err(|e| ModelError::resolve(e, format!("{owner} entry")))?;
        let (communicator, adapters) = resolve_communicator(
            &raw.communicator,
            SERVICE_ADAPTER_PREFIX,
            &resolver,
            catalog,
            &owner,
        )?;

        let overrides = server_overrides
            .get(&name)
            .into_iter()
            .chain(instance_override)
            .cloned()
            .collect();

        Ok(Self {
            entry: entry.clone(),
            resolved: ServiceDescriptor {
                name: name.clone(),
                entry: entry_point,
                communicator,
            },
            name,
            adapters,
            overrides,
            own: raw.communicator.property_set.clone(),
            resolver,
        })
    }

    /// Resolved name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Slot as written
    #[inline]
    #[must_use]
    pub fn entry(&self) -> &ServiceEntry {
        &self.entry
    }

    /// Resolved descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ServiceDescriptor {
        &self.resolved
    }

    /// Resolved adapters
    #[inline]
    #[must_use]
    pub fn adapters(&self) -> &[Adapter] {
        &self.adapters
    }

    /// Scope the service was resolved with
    #[inline]
    #[must_use]
    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Effective properties, following property set references now
    ///
    /// # Errors
    /// Returns dangling or cyclic reference errors
    pub fn properties(&self, lookup: PropertySetLookup<'_>) -> ModelResult<Vec<PropertyDescriptor>> {
        communicator_properties(
            &self.overrides,
            &self.own,
            lookup,
            &self.resolver,
            &format!("service {}", self.name),
        )
    }
}

/// Required fields of a service descriptor
pub(crate) fn validate_service_descriptor(
    descriptor: &ServiceDescriptor,
    entity: &str,
) -> ModelResult<()> {
    if descriptor.name.is_empty() {
        return Err(ValidationError::EmptyField {
            entity: entity.to_string(),
            field: "name",
        }
        .into());
    }
    if descriptor.entry.is_empty() {
        return Err(ValidationError::EmptyField {
            entity: entity.to_string(),
            field: "entry",
        }
        .into());
    }
    Ok(())
}
