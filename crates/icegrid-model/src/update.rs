//! Applying registry updates
//!
//! An update descriptor is merged into the current descriptor and the whole
//! tree is rebuilt from the result. Server removals are matched against the
//! resolved ids of the current tree; added servers replace the slot that
//! resolves to the same id under the updated scope, or are appended.

use crate::application::{application_resolver, Application};
use crate::catalog::{BuildScope, Catalog};
use crate::editable::EntityKind;
use crate::error::{ModelResult, ValidationError};
use crate::node::node_resolver;
use crate::server::resolve_entry_id;
use icegrid_descriptor::{
    ApplicationDescriptor, ApplicationUpdateDescriptor, MapDelta, NodeDescriptor,
    NodeUpdateDescriptor, ServerEntry,
};
use icegrid_resolver::Resolver;
use std::sync::Arc;

impl Application {
    /// Apply an update received from the registry
    ///
    /// The result is committed: the registry already holds it.
    ///
    /// # Errors
    /// Returns `UnknownEntity` for an update addressed to another
    /// application, or the first failure rebuilding the merged tree; the
    /// model is unchanged on error
    pub fn apply_update(&mut self, update: &ApplicationUpdateDescriptor) -> ModelResult<()> {
        if update.name != self.name {
            return Err(ValidationError::UnknownEntity {
                kind: EntityKind::Application,
                id: update.name.clone(),
            }
            .into());
        }
        let merged = self.merge_update(update)?;

        let mut fresh = Self::build(&merged, self.config.clone())?;
        fresh.live = std::mem::take(&mut self.live);
        fresh.live.can_use_update_descriptor = true;
        *self = fresh;
        tracing::info!(
            application = %self.name,
            nodes = update.nodes.len(),
            removed_nodes = update.remove_nodes.len(),
            "registry update applied"
        );
        Ok(())
    }

    fn merge_update(&self, update: &ApplicationUpdateDescriptor) -> ModelResult<ApplicationDescriptor> {
        let mut merged = self.descriptor();

        if let Some(description) = &update.description {
            merged.description.clone_from(description);
        }
        MapDelta::apply(&mut merged.variables, &update.variables, &update.remove_variables);

        for id in &update.remove_property_sets {
            merged.property_sets.remove(id);
        }
        merged
            .property_sets
            .extend(update.property_sets.iter().map(|(k, v)| (k.clone(), v.clone())));

        for id in &update.remove_server_templates {
            merged.server_templates.remove(id);
        }
        merged
            .server_templates
            .extend(update.server_templates.iter().map(|(k, v)| (k.clone(), v.clone())));

        for id in &update.remove_service_templates {
            merged.service_templates.remove(id);
        }
        merged
            .service_templates
            .extend(update.service_templates.iter().map(|(k, v)| (k.clone(), v.clone())));

        for name in &update.remove_nodes {
            merged.nodes.remove(name);
        }

        let resolver = application_resolver(&self.name, &merged.variables, self.config.unresolved)?;

        // Replica groups are matched by resolved id
        let mut groups: Vec<(Option<String>, _)> = self
            .catalog
            .replica_groups
            .iter()
            .filter(|rg| !update.remove_replica_groups.contains(&rg.id))
            .map(|rg| (Some(rg.id.clone()), rg.descriptor.clone()))
            .collect();
        for group in &update.replica_groups {
            let id = resolver.substitute(&group.id).ok();
            match groups.iter_mut().find(|(existing, _)| id.is_some() && *existing == id) {
                Some(slot) => slot.1 = group.clone(),
                None => groups.push((id, group.clone())),
            }
        }
        merged.replica_groups = groups.into_iter().map(|(_, rg)| rg).collect();

        let catalog = Catalog::committed(&merged);
        for node_update in &update.nodes {
            let existing = merged.nodes.get(&node_update.name).filter(|_| {
                !update.remove_nodes.contains(&node_update.name)
                    && self.nodes.contains_key(&node_update.name)
            });
            let node = match existing {
                Some(current) => {
                    self.merge_node(current, node_update, &catalog, &resolver)?
                }
                None => new_node(node_update),
            };
            merged.nodes.insert(node_update.name.clone(), node);
        }
        Ok(merged)
    }

    fn merge_node(
        &self,
        current: &NodeDescriptor,
        update: &NodeUpdateDescriptor,
        catalog: &Catalog,
        application: &Arc<Resolver>,
    ) -> ModelResult<NodeDescriptor> {
        let mut node = current.clone();
        if let Some(description) = &update.description {
            node.description.clone_from(description);
        }
        if let Some(load_factor) = &update.load_factor {
            node.load_factor.clone_from(load_factor);
        }
        MapDelta::apply(&mut node.variables, &update.variables, &update.remove_variables);
        for id in &update.remove_property_sets {
            node.property_sets.remove(id);
        }
        node.property_sets
            .extend(update.property_sets.iter().map(|(k, v)| (k.clone(), v.clone())));

        let mut entries: Vec<ServerEntry> = match self.nodes.get(&update.name) {
            Some(live) => live
                .servers
                .iter()
                .filter(|s| !update.remove_servers.contains(&s.id))
                .map(|s| s.entry.clone())
                .collect(),
            None => node.entries(),
        };

        let resolver = node_resolver(application, &update.name, &node.variables)?;
        let scope = BuildScope {
            catalog,
            node: &update.name,
            resolver: &resolver,
        };
        let mut ids: Vec<Option<String>> = entries
            .iter()
            .map(|entry| resolve_entry_id(entry, scope).ok())
            .collect();

        let added = update
            .server_instances
            .iter()
            .cloned()
            .map(ServerEntry::Instance)
            .chain(update.servers.iter().cloned().map(ServerEntry::Plain));
        for entry in added {
            let id = resolve_entry_id(&entry, scope)?;
            match ids.iter().position(|existing| existing.as_deref() == Some(id.as_str())) {
                Some(index) => entries[index] = entry,
                None => {
                    entries.push(entry);
                    ids.push(Some(id));
                }
            }
        }
        node.set_entries(&entries);
        Ok(node)
    }
}

fn new_node(update: &NodeUpdateDescriptor) -> NodeDescriptor {
    let mut node = NodeDescriptor {
        variables: update.variables.clone(),
        load_factor: update.load_factor.clone().unwrap_or_default(),
        description: update.description.clone().unwrap_or_default(),
        property_sets: update.property_sets.clone(),
        ..NodeDescriptor::default()
    };
    node.server_instances.clone_from(&update.server_instances);
    node.servers.clone_from(&update.servers);
    node
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use icegrid_descriptor::ServerDescriptor;

    fn registered() -> Application {
        let mut app = ApplicationDescriptor::new("Demo");
        let mut node = NodeDescriptor::default();
        node.servers.push(ServerDescriptor::new("a", "exe"));
        node.servers.push(ServerDescriptor::new("b", "exe"));
        app.nodes.insert("n1".to_string(), node);
        Application::from_registry(&app, ModelConfig::default()).unwrap()
    }

    #[test]
    fn wrong_application_rejected() {
        let mut app = registered();
        let err = app
            .apply_update(&ApplicationUpdateDescriptor::new("Other"))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::ModelError::Validation(ValidationError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn same_id_replaces_slot() {
        let mut app = registered();
        let mut update = ApplicationUpdateDescriptor::new("Demo");
        let mut node = NodeUpdateDescriptor::new("n1");
        node.servers.push(ServerDescriptor::new("a", "other"));
        update.nodes.push(node);

        app.apply_update(&update).unwrap();
        let servers = app.node("n1").unwrap().servers();
        assert_eq!(servers.len(), 2);
        assert_eq!(app.server("n1", "a").unwrap().descriptor().exe, "other");
        assert!(!app.has_changes());
    }

    #[test]
    fn removal_then_addition() {
        let mut app = registered();
        let mut update = ApplicationUpdateDescriptor::new("Demo");
        let mut node = NodeUpdateDescriptor::new("n1");
        node.remove_servers.push("b".to_string());
        node.servers.push(ServerDescriptor::new("c", "exe"));
        update.nodes.push(node);

        app.apply_update(&update).unwrap();
        let ids: Vec<_> = app.node("n1").unwrap().servers().iter().map(|s| s.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "c"]);
    }

    #[test]
    fn new_node_from_full_content() {
        let mut app = registered();
        let mut update = ApplicationUpdateDescriptor::new("Demo");
        let mut node = NodeUpdateDescriptor::new("n2");
        node.load_factor = Some("2.0".to_string());
        node.servers.push(ServerDescriptor::new("${node}-x", "exe"));
        update.nodes.push(node);

        app.apply_update(&update).unwrap();
        assert_eq!(app.node("n2").unwrap().load_factor(), "2.0");
        assert!(app.server("n2", "n2-x").is_some());
    }

    #[test]
    fn failed_update_leaves_model() {
        let mut app = registered();
        let before = app.descriptor();
        let mut update = ApplicationUpdateDescriptor::new("Demo");
        let mut node = NodeUpdateDescriptor::new("n2");
        node.servers.push(ServerDescriptor::new("a", "exe"));
        update.nodes.push(node);

        assert!(app.apply_update(&update).unwrap_err().is_collision());
        assert_eq!(app.descriptor(), before);
    }
}
