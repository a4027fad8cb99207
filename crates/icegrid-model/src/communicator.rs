//! State shared by servers and services: adapters, properties, logs

use crate::adapter::{build_adapters, Adapter};
use crate::catalog::Catalog;
use crate::error::{ModelError, ModelResult};
use crate::property_set::{effective, PropertySetLookup};
use icegrid_descriptor::{CommunicatorDescriptor, PropertyDescriptor, PropertySetDescriptor};
use icegrid_resolver::Resolver;

/// Resolve a communicator descriptor
///
/// Property references are kept as ids; they are followed when the
/// effective properties are requested.
pub(crate) fn resolve_communicator(
    raw: &CommunicatorDescriptor,
    adapter_prefix: &str,
    resolver: &Resolver,
    catalog: &Catalog,
    owner: &str,
) -> ModelResult<(CommunicatorDescriptor, Vec<Adapter>)> {
    let substitute = |text: &str, field: &str| {
        resolver
            .substitute(text)
            .map_err(|e| ModelError::resolve(e, format!("{owner} {field}")))
    };

    let adapters = build_adapters(&raw.adapters, adapter_prefix, resolver, catalog, owner)?;
    let properties = raw
        .property_set
        .properties
        .iter()
        .map(|p| {
            Ok(PropertyDescriptor::new(
                substitute(&p.name, "property name")?,
                substitute(&p.value, "property value")?,
            ))
        })
        .collect::<ModelResult<Vec<_>>>()?;
    let logs = raw
        .logs
        .iter()
        .map(|log| substitute(log, "log"))
        .collect::<ModelResult<Vec<_>>>()?;

    let resolved = CommunicatorDescriptor {
        adapters: adapters.iter().map(|a| a.descriptor().clone()).collect(),
        property_set: PropertySetDescriptor {
            references: raw.property_set.references.clone(),
            properties,
        },
        logs,
        description: substitute(&raw.description, "description")?,
    };
    Ok((resolved, adapters))
}

/// Effective, substituted properties of a communicator
///
/// Override sets come first, then the communicator's own set; the first
/// occurrence of each name wins.
pub(crate) fn communicator_properties(
    overrides: &[PropertySetDescriptor],
    own: &PropertySetDescriptor,
    lookup: PropertySetLookup<'_>,
    resolver: &Resolver,
    origin: &str,
) -> ModelResult<Vec<PropertyDescriptor>> {
    let mut flat = Vec::new();
    for set in overrides.iter().chain(std::iter::once(own)) {
        flat.extend(lookup.flatten(set, origin)?);
    }
    let substituted = flat
        .iter()
        .map(|p| {
            let name = resolver
                .substitute(&p.name)
                .map_err(|e| ModelError::resolve(e, format!("{origin} property name")))?;
            let value = resolver
                .substitute(&p.value)
                .map_err(|e| ModelError::resolve(e, format!("{origin} property {name}")))?;
            Ok(PropertyDescriptor::new(name, value))
        })
        .collect::<ModelResult<Vec<_>>>()?;
    Ok(effective(&substituted))
}
