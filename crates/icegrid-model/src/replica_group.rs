//! Replica groups
//!
//! Replica group ids share one namespace with adapter ids. Adapters refer to
//! groups by id; every group change rebuilds the servers so that references
//! are checked against the new set of groups.

use crate::application::Application;
use crate::editable::{Editable, EntityKind};
use crate::error::{ModelError, ModelResult, ValidationError};
use icegrid_descriptor::{ObjectDescriptor, ReplicaGroupDescriptor};
use icegrid_resolver::Resolver;

/// Replica group entry in the application catalog
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaGroup {
    pub(crate) descriptor: ReplicaGroupDescriptor,
    pub(crate) id: String,
    pub(crate) objects: Vec<ObjectDescriptor>,
    pub(crate) editable: Editable,
}

impl ReplicaGroup {
    /// Group loaded in committed state with an already resolved id
    #[must_use]
    pub fn committed(descriptor: ReplicaGroupDescriptor, id: String) -> Self {
        Self {
            objects: descriptor.objects.clone(),
            descriptor,
            id,
            editable: Editable::committed(),
        }
    }

    /// Resolve a group under the application scope
    pub(crate) fn build(descriptor: ReplicaGroupDescriptor, resolver: &Resolver) -> ModelResult<Self> {
        let context = format!("replica group {}", descriptor.id);
        let id = resolver
            .substitute(&descriptor.id)
            .map_err(|e| ModelError::resolve(e, context.clone()))?;
        if id.is_empty() {
            return Err(ValidationError::EmptyField {
                entity: "replica group".to_string(),
                field: "id",
            }
            .into());
        }
        let objects = descriptor
            .objects
            .iter()
            .map(|object| {
                Ok(ObjectDescriptor {
                    id: resolver
                        .substitute(&object.id)
                        .map_err(|e| ModelError::resolve(e, context.clone()))?,
                    type_id: object.type_id.clone(),
                    proxy_options: object.proxy_options.clone(),
                })
            })
            .collect::<ModelResult<Vec<_>>>()?;
        Ok(Self {
            descriptor,
            id,
            objects,
            editable: Editable::committed(),
        })
    }

    /// Resolved id
    #[inline]
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Underlying descriptor
    #[inline]
    #[must_use]
    pub fn descriptor(&self) -> &ReplicaGroupDescriptor {
        &self.descriptor
    }

    /// Resolved well-known objects
    #[inline]
    #[must_use]
    pub fn objects(&self) -> &[ObjectDescriptor] {
        &self.objects
    }

    /// Change tracking
    #[inline]
    #[must_use]
    pub fn editable(&self) -> &Editable {
        &self.editable
    }
}

impl Application {
    /// Replica group by resolved id
    #[must_use]
    pub fn replica_group(&self, id: &str) -> Option<&ReplicaGroup> {
        self.catalog.replica_groups.iter().find(|rg| rg.id == id)
    }

    /// All replica groups
    #[inline]
    #[must_use]
    pub fn replica_groups(&self) -> &[ReplicaGroup] {
        &self.catalog.replica_groups
    }

    /// Add a replica group
    ///
    /// # Errors
    /// Returns an identity collision if an adapter or group already uses the id
    pub fn insert_replica_group(&mut self, descriptor: ReplicaGroupDescriptor) -> ModelResult<String> {
        let mut group = ReplicaGroup::build(descriptor, &self.resolver)?;
        group.editable.mark_new();
        let id = group.id.clone();

        let mut groups = self.catalog.replica_groups.clone();
        groups.push(group);
        self.transact("insert replica group", |tx| {
            tx.set_replica_groups(groups);
            Ok(())
        })?;
        self.editable.mark_modified();
        tracing::info!(application = %self.name, replica_group = %id, "replica group added");
        Ok(id)
    }

    /// Replace replica group `id`
    ///
    /// All servers are rebuilt; adapters still naming the old id fail the update.
    ///
    /// # Errors
    /// Returns the first rebuild or identity failure; the model is left unchanged
    pub fn update_replica_group(
        &mut self,
        id: &str,
        descriptor: ReplicaGroupDescriptor,
    ) -> ModelResult<()> {
        let index = self.replica_group_index(id)?;
        let current = &self.catalog.replica_groups[index];
        if current.descriptor == descriptor {
            return Ok(());
        }
        let mut group = ReplicaGroup::build(descriptor, &self.resolver)?;
        group.editable = current.editable.clone();
        group.editable.mark_modified();
        let renamed = group.id != current.id;
        let was_new = current.editable.is_new();

        let mut groups = self.catalog.replica_groups.clone();
        groups[index] = group;
        self.transact("update replica group", |tx| {
            tx.set_replica_groups(groups);
            tx.rebuild_all_servers()
        })?;
        if renamed && !was_new {
            self.editable.remove_element(EntityKind::ReplicaGroup, id);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, replica_group = id, "replica group updated");
        Ok(())
    }

    /// Remove replica group `id`
    ///
    /// # Errors
    /// Fails with `UnresolvedReference::ReplicaGroup` while adapters reference it
    pub fn remove_replica_group(&mut self, id: &str) -> ModelResult<()> {
        let index = self.replica_group_index(id)?;
        let was_new = self.catalog.replica_groups[index].editable.is_new();

        let mut groups = self.catalog.replica_groups.clone();
        groups.remove(index);
        self.transact("remove replica group", |tx| {
            tx.set_replica_groups(groups);
            tx.rebuild_all_servers()
        })?;
        if !was_new {
            self.editable.remove_element(EntityKind::ReplicaGroup, id);
        }
        self.editable.mark_modified();
        tracing::info!(application = %self.name, replica_group = id, "replica group removed");
        Ok(())
    }

    fn replica_group_index(&self, id: &str) -> ModelResult<usize> {
        self.catalog
            .replica_groups
            .iter()
            .position(|rg| rg.id == id)
            .ok_or_else(|| {
                ValidationError::UnknownEntity {
                    kind: EntityKind::ReplicaGroup,
                    id: id.to_string(),
                }
                .into()
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use icegrid_descriptor::LoadBalancingPolicy;

    #[test]
    fn build_resolves_id_and_objects() {
        let resolver = Resolver::builder()
            .put_literal("application", "Demo")
            .build()
            .unwrap();
        let mut descriptor = ReplicaGroupDescriptor::new("${application}.RG");
        descriptor.load_balancing = Some(LoadBalancingPolicy::RoundRobin {
            n_replicas: "2".to_string(),
        });
        descriptor.objects.push(ObjectDescriptor {
            id: "${application}/hello".to_string(),
            type_id: "::Demo::Hello".to_string(),
            proxy_options: String::new(),
        });

        let group = ReplicaGroup::build(descriptor, &resolver).unwrap();
        assert_eq!(group.id(), "Demo.RG");
        assert_eq!(group.objects()[0].id, "Demo/hello");
        assert!(!group.editable().is_dirty());
    }

    #[test]
    fn empty_id_rejected() {
        let resolver = Resolver::builder().build().unwrap();
        let err = ReplicaGroup::build(ReplicaGroupDescriptor::new(""), &resolver).unwrap_err();
        assert!(matches!(
            err,
            ModelError::Validation(ValidationError::EmptyField { field: "id", .. })
        ));
    }
}
