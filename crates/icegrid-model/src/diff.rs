//! Update descriptor generation
//!
//! Compares the current tree with the descriptor captured at the last
//! commit, using change tracking to pick what to send:
//! - Scalars and variables are compared by value
//! - Catalog entries and servers are sent whole when new or modified
//! - Removals come from the ids recorded by each owner
//!
//! A server whose resolved id changed since the commit is sent as a removal
//! of the old id plus the server under its new id.

use crate::application::Application;
use crate::editable::EntityKind;
use crate::node::Node;
use icegrid_descriptor::{
    ApplicationUpdateDescriptor, MapDelta, NodeDescriptor, NodeUpdateDescriptor, ServerEntry,
};
use std::collections::BTreeSet;

impl Node {
    /// Delta of this node against its committed descriptor
    ///
    /// New nodes carry their full content. Returns `None` when nothing
    /// changed.
    #[must_use]
    pub fn update_descriptor(&self, committed: Option<&NodeDescriptor>) -> Option<NodeUpdateDescriptor> {
        let mut update = NodeUpdateDescriptor::new(&self.name);

        let Some(committed) = committed.filter(|_| !self.editable.is_new()) else {
            update.description = Some(self.description.clone());
            update.variables = self.variables.clone();
            update.property_sets = self
                .property_sets
                .iter()
                .map(|(id, set)| (id.clone(), set.descriptor.clone()))
                .collect();
            for server in &self.servers {
                push_entry(&mut update, &server.entry);
            }
            update.load_factor = Some(self.load_factor.clone());
            return Some(update);
        };

        if self.description != committed.description {
            update.description = Some(self.description.clone());
        }
        if self.load_factor != committed.load_factor {
            update.load_factor = Some(self.load_factor.clone());
        }
        let variables = MapDelta::between(&committed.variables, &self.variables);
        update.variables = variables.changed;
        update.remove_variables = variables.removed;

        update.property_sets = self
            .property_sets
            .iter()
            .filter(|(_, set)| set.editable.is_dirty())
            .map(|(id, set)| (id.clone(), set.descriptor.clone()))
            .collect();
        update.remove_property_sets = self.editable.removed(EntityKind::PropertySet);

        let mut removed: BTreeSet<String> =
            self.editable.removed(EntityKind::Server).into_iter().collect();
        for server in &self.servers {
            let renamed = server
                .committed_id
                .as_deref()
                .filter(|committed_id| *committed_id != server.id);
            if let Some(old) = renamed {
                removed.insert(old.to_string());
            }
            if server.editable.is_new() || server.editable.is_modified() || renamed.is_some() {
                push_entry(&mut update, &server.entry);
            }
        }
        update.remove_servers = removed.into_iter().collect();

        (!update.is_empty()).then_some(update)
    }
}

fn push_entry(update: &mut NodeUpdateDescriptor, entry: &ServerEntry) {
    match entry {
        ServerEntry::Plain(server) => update.servers.push(server.clone()),
        ServerEntry::Instance(instance) => update.server_instances.push(instance.clone()),
    }
}

impl Application {
    /// Minimal delta turning the committed descriptor into the current one
    ///
    /// Returns `None` when nothing changed since the last commit.
    #[must_use]
    pub fn create_update_descriptor(&self) -> Option<ApplicationUpdateDescriptor> {
        let baseline = &self.baseline;
        let mut update = ApplicationUpdateDescriptor::new(&self.name);

        if self.description != baseline.description {
            update.description = Some(self.description.clone());
        }
        let variables = MapDelta::between(&baseline.variables, &self.variables);
        update.variables = variables.changed;
        update.remove_variables = variables.removed;

        update.property_sets = self
            .catalog
            .property_sets
            .iter()
            .filter(|(_, set)| set.editable.is_dirty())
            .map(|(id, set)| (id.clone(), set.descriptor.clone()))
            .collect();
        update.remove_property_sets = self.editable.removed(EntityKind::PropertySet);

        update.replica_groups = self
            .catalog
            .replica_groups
            .iter()
            .filter(|rg| rg.editable.is_dirty())
            .map(|rg| rg.descriptor.clone())
            .collect();
        update.remove_replica_groups = self.editable.removed(EntityKind::ReplicaGroup);

        update.server_templates = self
            .catalog
            .server_templates
            .iter()
            .filter(|(_, t)| t.editable.is_dirty())
            .map(|(id, t)| (id.clone(), t.descriptor.clone()))
            .collect();
        update.remove_server_templates = self.editable.removed(EntityKind::ServerTemplate);

        update.service_templates = self
            .catalog
            .service_templates
            .iter()
            .filter(|(_, t)| t.editable.is_dirty())
            .map(|(id, t)| (id.clone(), t.descriptor.clone()))
            .collect();
        update.remove_service_templates = self.editable.removed(EntityKind::ServiceTemplate);

        update.nodes = self
            .nodes
            .values()
            .filter_map(|node| node.update_descriptor(baseline.nodes.get(&node.name)))
            .collect();
        update.remove_nodes = self.editable.removed(EntityKind::Node);

        (!update.is_empty()).then_some(update)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModelConfig;
    use icegrid_descriptor::{ApplicationDescriptor, ServerDescriptor};

    fn registered() -> Application {
        let mut app = ApplicationDescriptor::new("Demo");
        let mut node = NodeDescriptor::default();
        node.servers.push(ServerDescriptor::new("a", "exe"));
        node.servers.push(ServerDescriptor::new("b", "exe"));
        app.nodes.insert("n1".to_string(), node);
        app.nodes.insert("n2".to_string(), NodeDescriptor::default());
        Application::from_registry(&app, ModelConfig::default()).unwrap()
    }

    #[test]
    fn no_changes_no_delta() {
        assert_eq!(registered().create_update_descriptor(), None);
    }

    #[test]
    fn edited_server_only() {
        let mut app = registered();
        let mut server = ServerDescriptor::new("b", "other");
        server.pwd = "/tmp".to_string();
        app.update_server("n1", "b", ServerEntry::Plain(server.clone()))
            .unwrap();

        let update = app.create_update_descriptor().unwrap();
        assert_eq!(update.nodes.len(), 1);
        let node = &update.nodes[0];
        assert_eq!(node.name, "n1");
        assert_eq!(node.servers, vec![server]);
        assert!(node.remove_servers.is_empty());
        assert!(node.description.is_none());
    }

    #[test]
    fn renamed_server_removes_old_id() {
        let mut app = registered();
        app.update_server("n1", "a", ServerEntry::Plain(ServerDescriptor::new("a2", "exe")))
            .unwrap();

        let update = app.create_update_descriptor().unwrap();
        let node = update.node("n1").unwrap();
        assert_eq!(node.remove_servers, vec!["a".to_string()]);
        assert_eq!(node.servers[0].id, "a2");
    }

    #[test]
    fn removed_node_listed() {
        let mut app = registered();
        app.remove_node("n2").unwrap();
        let update = app.create_update_descriptor().unwrap();
        assert_eq!(update.remove_nodes, vec!["n2".to_string()]);
        assert!(update.nodes.is_empty());
    }

    #[test]
    fn description_change_is_scalar() {
        let mut app = registered();
        app.set_description("changed");
        let update = app.create_update_descriptor().unwrap();
        assert_eq!(update.description.as_deref(), Some("changed"));
        assert!(update.nodes.is_empty());

        app.commit();
        assert_eq!(app.create_update_descriptor(), None);
    }
}
