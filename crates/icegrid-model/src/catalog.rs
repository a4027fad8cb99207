//! Application-wide lookup tables used while building servers

use crate::property_set::PropertySet;
use crate::replica_group::ReplicaGroup;
use crate::template::Template;
use icegrid_descriptor::{ApplicationDescriptor, ServerDescriptor, ServiceDescriptor};
use icegrid_resolver::Resolver;
use std::collections::BTreeMap;
use std::sync::Arc;

/// Templates, property sets and replica groups of an application
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    pub(crate) server_templates: BTreeMap<String, Template<ServerDescriptor>>,
    pub(crate) service_templates: BTreeMap<String, Template<ServiceDescriptor>>,
    pub(crate) property_sets: BTreeMap<String, PropertySet>,
    pub(crate) replica_groups: Vec<ReplicaGroup>,
}

impl Catalog {
    /// Catalog in committed state; replica groups are resolved separately
    pub(crate) fn committed(descriptor: &ApplicationDescriptor) -> Self {
        Self {
            server_templates: descriptor
                .server_templates
                .iter()
                .map(|(id, t)| (id.clone(), Template::committed(t.clone())))
                .collect(),
            service_templates: descriptor
                .service_templates
                .iter()
                .map(|(id, t)| (id.clone(), Template::committed(t.clone())))
                .collect(),
            property_sets: descriptor
                .property_sets
                .iter()
                .map(|(id, s)| (id.clone(), PropertySet::committed(s.clone())))
                .collect(),
            replica_groups: Vec::new(),
        }
    }

    /// Whether a replica group resolves to `id`
    pub(crate) fn has_replica_group(&self, id: &str) -> bool {
        self.replica_groups.iter().any(|rg| rg.id == id)
    }
}

/// Everything a server needs to resolve itself on a node
#[derive(Debug, Clone, Copy)]
pub(crate) struct BuildScope<'a> {
    pub(crate) catalog: &'a Catalog,
    pub(crate) node: &'a str,
    pub(crate) resolver: &'a Arc<Resolver>,
}
