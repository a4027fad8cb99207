//! Object adapters
//!
//! An adapter's id defaults to `${server}.<name>` (or
//! `${server}.${service}.<name>` inside a service). Its endpoints, published
//! endpoints and proxy options live in the enclosing communicator's
//! properties as `<name>.Endpoints`, `<name>.PublishedEndpoints` and
//! `<name>.ProxyOptions`.

use crate::catalog::Catalog;
use crate::editable::EntityKind;
use crate::error::{IdentityCollision, ModelError, ModelResult, UnresolvedReference, ValidationError};
use crate::property_set::lookup;
use icegrid_descriptor::{AdapterDescriptor, ObjectDescriptor, PropertyDescriptor};
use icegrid_resolver::Resolver;
use std::collections::BTreeSet;

/// Default id prefix for adapters of a server
pub const SERVER_ADAPTER_PREFIX: &str = "${server}";

/// Default id prefix for adapters of an IceBox service
pub const SERVICE_ADAPTER_PREFIX: &str = "${server}.${service}";

/// Resolved object adapter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Adapter {
    pub(crate) descriptor: AdapterDescriptor,
}

/// Adapter properties taken from the communicator
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AdapterEndpoints {
    /// `<name>.Endpoints`
    pub endpoints: Option<String>,
    /// `<name>.PublishedEndpoints`
    pub published_endpoints: Option<String>,
    /// `<name>.ProxyOptions`
    pub proxy_options: Option<String>,
}

impl Adapter {
    /// Resolve `raw` under `resolver`
    ///
    /// `prefix` is the default id prefix used when `raw.id` is empty.
    pub(crate) fn build(
        raw: &AdapterDescriptor,
        prefix: &str,
        resolver: &Resolver,
        catalog: &Catalog,
        owner: &str,
    ) -> ModelResult<Self> {
        let context = |field: &str| format!("{owner} adapter {} {field}", raw.name);
        let substitute = |text: &str, field: &str| {
            resolver
                .substitute(text)
                .map_err(|e| ModelError::resolve(e, context(field)))
        };

        let name = substitute(&raw.name, "name")?;
        if name.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: format!("{owner} adapter"),
                field: "name",
            }
            .into());
        }

        let id = if raw.id.is_empty() {
            substitute(&format!("{prefix}.{}", raw.name), "id")?
        } else {
            substitute(&raw.id, "id")?
        };

        let replica_group_id = substitute(&raw.replica_group_id, "replica group")?;
        if !replica_group_id.is_empty() && !catalog.has_replica_group(&replica_group_id) {
            return Err(UnresolvedReference::ReplicaGroup {
                id: replica_group_id,
                adapter: id,
            }
            .into());
        }

        let objects = resolve_objects(&raw.objects, resolver, &context("objects"))?;
        let allocatables = resolve_objects(&raw.allocatables, resolver, &context("allocatables"))?;

        Ok(Self {
            descriptor: AdapterDescriptor {
                name,
                description: substitute(&raw.description, "description")?,
                id,
                replica_group_id,
                priority: substitute(&raw.priority, "priority")?,
                server_lifetime: raw.server_lifetime,
                register_process: raw.register_process,
                objects,
                allocatables,
            },
        })
    }

    /// Resolved name
    #[inline]
    #[must_use]
    pub fn name(&self) -> &str {
        &self.descriptor.name
    }

    /// Resolved id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.descriptor.id
    }

    /// Replica group, if the adapter belongs to one
    #[must_use]
    pub fn replica_group_id(&self) -> Option<&str> {
        Some(self.descriptor.replica_group_id.as_str()).filter(|id| !id.is_empty())
    }

    /// Resolved well-known objects
    #[inline]
    #[must_use]
    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.descriptor.objects
    }

    /// Resolved descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &AdapterDescriptor {
        &self.descriptor
    }

    /// Read this adapter's endpoint properties from a communicator's list
    #[must_use]
    pub fn endpoints(&self, properties: &[PropertyDescriptor]) -> AdapterEndpoints {
        let get = |suffix: &str| {
            lookup(properties, &format!("{}.{suffix}", self.name())).map(str::to_string)
        };
        AdapterEndpoints {
            endpoints: get("Endpoints"),
            published_endpoints: get("PublishedEndpoints"),
            proxy_options: get("ProxyOptions"),
        }
    }
}

fn resolve_objects(
    objects: &[ObjectDescriptor],
    resolver: &Resolver,
    context: &str,
) -> ModelResult<Vec<ObjectDescriptor>> {
    objects
        .iter()
        .map(|object| {
            let substitute = |text: &str| {
                resolver
                    .substitute(text)
                    .map_err(|e| ModelError::resolve(e, context.to_string()))
            };
            Ok(ObjectDescriptor {
                id: substitute(&object.id)?,
                type_id: substitute(&object.type_id)?,
                proxy_options: substitute(&object.proxy_options)?,
            })
        })
        .collect()
}

/// Resolve all adapters of one communicator, rejecting duplicate names
pub(crate) fn build_adapters(
    adapters: &[AdapterDescriptor],
    prefix: &str,
    resolver: &Resolver,
    catalog: &Catalog,
    owner: &str,
) -> ModelResult<Vec<Adapter>> {
    let mut names = BTreeSet::new();
    let mut built = Vec::with_capacity(adapters.len());
    for raw in adapters {
        let adapter = Adapter::build(raw, prefix, resolver, catalog, owner)?;
        if !names.insert(adapter.name().to_string()) {
            return Err(IdentityCollision {
                kind: EntityKind::Adapter,
                id: adapter.name().to_string(),
                existing: owner.to_string(),
                conflicting: owner.to_string(),
            }
            .into());
        }
        built.push(adapter);
    }
    Ok(built)
}
