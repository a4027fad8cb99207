//! Ephemeral drafts
//!
//! A draft is an entity being composed before it is added. Previewing a
//! draft resolves it against a scratch copy of the application, so it is
//! validated like a real insertion but never shows up in the tree, the
//! change tracking or any update descriptor.

use crate::application::{Application, PropertySetScope};
use crate::editable::EntityKind;
use crate::error::{ModelResult, ValidationError};
use icegrid_descriptor::{
    NodeDescriptor, PropertySetDescriptor, ReplicaGroupDescriptor, ServerEntry,
    ServerTemplateDescriptor, ServiceEntry, ServiceTemplateDescriptor,
};

/// Entity under composition
#[derive(Debug, Clone, PartialEq)]
pub enum Draft {
    /// New node
    Node {
        /// Node name
        name: String,
        /// Node content
        descriptor: NodeDescriptor,
    },
    /// New server slot
    Server {
        /// Target node
        node: String,
        /// Slot to add
        entry: ServerEntry,
    },
    /// New service in a plain IceBox server
    Service {
        /// Node of the server
        node: String,
        /// Server id
        server: String,
        /// Service slot to add
        entry: ServiceEntry,
    },
    /// New property set
    PropertySet {
        /// Owning scope
        scope: PropertySetScope,
        /// Set id
        id: String,
        /// Set content
        descriptor: PropertySetDescriptor,
    },
    /// New replica group
    ReplicaGroup(ReplicaGroupDescriptor),
    /// New server template
    ServerTemplate {
        /// Template id
        id: String,
        /// Template content
        descriptor: ServerTemplateDescriptor,
    },
    /// New service template
    ServiceTemplate {
        /// Template id
        id: String,
        /// Template content
        descriptor: ServiceTemplateDescriptor,
    },
}

impl Draft {
    /// Kind of entity the draft creates
    #[must_use]
    pub fn kind(&self) -> EntityKind {
        match self {
            Self::Node { .. } => EntityKind::Node,
            Self::Server { .. } => EntityKind::Server,
            Self::Service { .. } => EntityKind::Service,
            Self::PropertySet { .. } => EntityKind::PropertySet,
            Self::ReplicaGroup(_) => EntityKind::ReplicaGroup,
            Self::ServerTemplate { .. } => EntityKind::ServerTemplate,
            Self::ServiceTemplate { .. } => EntityKind::ServiceTemplate,
        }
    }
}

impl Application {
    /// Resolve `draft` without changing the application
    ///
    /// Returns the identity the entity would get.
    ///
    /// # Errors
    /// Returns whatever adding the draft would fail with
    pub fn preview(&self, draft: &Draft) -> ModelResult<String> {
        let mut scratch = self.clone();
        scratch.apply_draft(draft.clone())
    }

    /// Add the entity described by `draft`, returning its identity
    ///
    /// # Errors
    /// Same as the matching insert operation
    pub fn apply_draft(&mut self, draft: Draft) -> ModelResult<String> {
        match draft {
            Draft::Node { name, descriptor } => {
                self.insert_node(&name, &descriptor)?;
                Ok(name)
            }
            Draft::Server { node, entry } => self.insert_server(&node, entry),
            Draft::Service {
                node,
                server,
                entry,
            } => {
                self.insert_service(&node, &server, entry)?;
                self.server(&node, &server)
                    .and_then(|s| s.services().last())
                    .map(|s| s.name().to_string())
                    .ok_or_else(|| {
                        ValidationError::UnknownEntity {
                            kind: EntityKind::Server,
                            id: server,
                        }
                        .into()
                    })
            }
            Draft::PropertySet {
                scope,
                id,
                descriptor,
            } => {
                self.insert_property_set(&scope, &id, descriptor)?;
                Ok(id)
            }
            Draft::ReplicaGroup(descriptor) => self.insert_replica_group(descriptor),
            Draft::ServerTemplate { id, descriptor } => {
                self.insert_server_template(&id, descriptor)?;
                Ok(id)
            }
            Draft::ServiceTemplate { id, descriptor } => {
                self.insert_service_template(&id, descriptor)?;
                Ok(id)
            }
        }
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
        app.nodes.insert("n1".to_string(), node);
        Application::from_registry(&app, ModelConfig::default()).unwrap()
    }

    #[test]
    fn preview_leaves_no_trace() {
        let app = registered();
        let draft = Draft::Server {
            node: "n1".to_string(),
            entry: ServerEntry::Plain(ServerDescriptor::new("${node}-draft", "exe")),
        };
        assert_eq!(app.preview(&draft).unwrap(), "n1-draft");
        assert!(app.server("n1", "n1-draft").is_none());
        assert_eq!(app.create_update_descriptor(), None);
        assert_eq!(draft.kind(), EntityKind::Server);
    }

    #[test]
    fn preview_reports_collision() {
        let app = registered();
        let draft = Draft::Server {
            node: "n1".to_string(),
            entry: ServerEntry::Plain(ServerDescriptor::new("a", "exe")),
        };
        assert!(app.preview(&draft).unwrap_err().is_collision());
    }

    #[test]
    fn applied_draft_is_tracked() {
        let mut app = registered();
        let draft = Draft::Node {
            name: "n2".to_string(),
            descriptor: NodeDescriptor::default(),
        };
        assert_eq!(app.apply_draft(draft).unwrap(), "n2");
        let update = app.create_update_descriptor().unwrap();
        assert!(update.node("n2").is_some());
    }
}
