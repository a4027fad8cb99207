//! Deployment descriptor value types
//!
//! Plain data exchanged with the registry and the persistence layer. These
//! types carry raw (unsubstituted) text; resolution happens in the model.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Ordered string map used for variables, parameter values and defaults
pub type StringMap = BTreeMap<String, String>;

/// Single `name=value` property
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PropertyDescriptor {
    /// Property name
    pub name: String,
    /// Property value (may contain `${...}` tokens)
    pub value: String,
}

impl PropertyDescriptor {
    /// Create new property
    #[inline]
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Named or anonymous property bag
///
/// `references` name other property sets by id. Order of `properties`
/// is significant: the first occurrence of a name shadows later ones.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PropertySetDescriptor {
    /// Ids of referenced property sets, in lookup order
    pub references: Vec<String>,
    /// Ordered properties
    pub properties: Vec<PropertyDescriptor>,
}

impl PropertySetDescriptor {
    /// Create empty property set
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a property
    #[must_use]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.push(PropertyDescriptor::new(name, value));
        self
    }

    /// Append a reference to another property set
    #[must_use]
    pub fn with_reference(mut self, id: impl Into<String>) -> Self {
        self.references.push(id.into());
        self
    }

    /// First value for `name`, if any
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| p.name == name)
            .map(|p| p.value.as_str())
    }

    /// True when there are neither references nor properties
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.references.is_empty() && self.properties.is_empty()
    }
}

/// Well-known object registered with an adapter or replica group
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectDescriptor {
    /// Object identity
    pub id: String,
    /// Type id
    #[serde(rename = "type")]
    pub type_id: String,
    /// Proxy options
    pub proxy_options: String,
}

/// Object adapter descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdapterDescriptor {
    /// Adapter name, unique within its communicator
    pub name: String,
    /// Description
    pub description: String,
    /// Adapter id; empty means the default id
    pub id: String,
    /// Replica group this adapter belongs to, if any
    pub replica_group_id: String,
    /// Priority within the replica group
    pub priority: String,
    /// Whether the adapter's lifetime is the server's lifetime
    pub server_lifetime: bool,
    /// Whether the adapter registers the process object
    pub register_process: bool,
    /// Well-known objects
    pub objects: Vec<ObjectDescriptor>,
    /// Allocatable objects
    pub allocatables: Vec<ObjectDescriptor>,
}

impl AdapterDescriptor {
    /// Create adapter with the given name and default id
    #[must_use]
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server_lifetime: true,
            ..Self::default()
        }
    }
}

/// State shared by servers and services
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommunicatorDescriptor {
    /// Object adapters
    pub adapters: Vec<AdapterDescriptor>,
    /// Communicator properties
    pub property_set: PropertySetDescriptor,
    /// Log file paths
    pub logs: Vec<String>,
    /// Description
    pub description: String,
}

/// Plain server descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerDescriptor {
    /// Server id (may be an expression)
    pub id: String,
    /// Executable path
    pub exe: String,
    /// Ice version the server is built with
    pub ice_version: String,
    /// Working directory
    pub pwd: String,
    /// Command-line options
    pub options: Vec<String>,
    /// Environment variables (`NAME=value`)
    pub envs: Vec<String>,
    /// Activation mode (`manual`, `on-demand`, `always`, `session`)
    pub activation: String,
    /// Activation timeout in seconds
    pub activation_timeout: String,
    /// Deactivation timeout in seconds
    pub deactivation_timeout: String,
    /// Whether the server can be allocated
    pub allocatable: bool,
    /// User the server runs as
    pub user: String,
    /// Communicator state
    pub communicator: CommunicatorDescriptor,
    /// Plain server or IceBox container
    pub kind: ServerKind,
}

impl ServerDescriptor {
    /// Create plain server with id and executable
    #[must_use]
    pub fn new(id: impl Into<String>, exe: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            exe: exe.into(),
            activation: "manual".to_string(),
            ..Self::default()
        }
    }

    /// Services hosted by this server (empty for plain servers)
    #[must_use]
    pub fn services(&self) -> &[ServiceEntry] {
        match &self.kind {
            ServerKind::Plain => &[],
            ServerKind::IceBox { services } => services,
        }
    }

    /// Whether this is an IceBox server
    #[inline]
    #[must_use]
    pub fn is_icebox(&self) -> bool {
        matches!(self.kind, ServerKind::IceBox { .. })
    }
}

/// Server flavour
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerKind {
    /// Regular server
    #[default]
    Plain,
    /// IceBox container hosting services
    IceBox {
        /// Hosted services
        #[serde(default)]
        services: Vec<ServiceEntry>,
    },
}

/// Plain service descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceDescriptor {
    /// Service name (may be an expression)
    pub name: String,
    /// Entry point
    pub entry: String,
    /// Communicator state
    pub communicator: CommunicatorDescriptor,
}

impl ServiceDescriptor {
    /// Create service with name and entry point
    #[must_use]
    pub fn new(name: impl Into<String>, entry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: entry.into(),
            communicator: CommunicatorDescriptor::default(),
        }
    }
}

/// Template-bound service
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceInstanceDescriptor {
    /// Service template id
    pub template: String,
    /// Parameter bindings
    pub parameter_values: StringMap,
    /// Property overrides for this instance
    pub property_set: PropertySetDescriptor,
}

/// Template-bound server
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerInstanceDescriptor {
    /// Server template id
    pub template: String,
    /// Parameter bindings
    pub parameter_values: StringMap,
    /// Property overrides for the server
    pub property_set: PropertySetDescriptor,
    /// Property overrides per hosted service name
    pub service_property_sets: BTreeMap<String, PropertySetDescriptor>,
}

impl ServerInstanceDescriptor {
    /// Create instance of `template` with no bindings
    #[must_use]
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            ..Self::default()
        }
    }

    /// Bind a parameter
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameter_values.insert(name.into(), value.into());
        self
    }
}

/// Server slot on a node: plain or template-bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "descriptor", rename_all = "kebab-case")]
pub enum ServerEntry {
    /// Plain server
    Plain(ServerDescriptor),
    /// Server template instance
    Instance(ServerInstanceDescriptor),
}

impl ServerEntry {
    /// Template id for instances
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Instance(instance) => Some(&instance.template),
        }
    }
}

/// Service slot in an IceBox server: plain or template-bound
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "descriptor", rename_all = "kebab-case")]
pub enum ServiceEntry {
    /// Plain service
    Plain(ServiceDescriptor),
    /// Service template instance
    Instance(ServiceInstanceDescriptor),
}

impl ServiceEntry {
    /// Template id for instances
    #[must_use]
    pub fn template(&self) -> Option<&str> {
        match self {
            Self::Plain(_) => None,
            Self::Instance(instance) => Some(&instance.template),
        }
    }
}

/// Parameterized descriptor, instantiated by reference
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TemplateDescriptor<D> {
    /// Inner descriptor with `${param}` tokens
    pub descriptor: D,
    /// Ordered parameter names
    #[serde(default)]
    pub parameters: Vec<String>,
    /// Default values by parameter name
    #[serde(default)]
    pub parameter_defaults: StringMap,
}

impl<D> TemplateDescriptor<D> {
    /// Create template without parameters
    #[must_use]
    pub fn new(descriptor: D) -> Self {
        Self {
            descriptor,
            parameters: Vec::new(),
            parameter_defaults: StringMap::new(),
        }
    }

    /// Add a parameter, optionally with a default value
    #[must_use]
    pub fn with_parameter(mut self, name: impl Into<String>, default: Option<&str>) -> Self {
        let name = name.into();
        if let Some(value) = default {
            self.parameter_defaults.insert(name.clone(), value.to_string());
        }
        self.parameters.push(name);
        self
    }
}

/// Server template
pub type ServerTemplateDescriptor = TemplateDescriptor<ServerDescriptor>;

/// Service template
pub type ServiceTemplateDescriptor = TemplateDescriptor<ServiceDescriptor>;

/// Replica group load balancing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum LoadBalancingPolicy {
    /// Random selection
    Random {
        /// Number of replicas returned
        n_replicas: String,
    },
    /// Priority order
    Ordered {
        /// Number of replicas returned
        n_replicas: String,
    },
    /// Round robin
    RoundRobin {
        /// Number of replicas returned
        n_replicas: String,
    },
    /// Least loaded node first
    Adaptive {
        /// Number of replicas returned
        n_replicas: String,
        /// Load sample (`1`, `5` or `15`)
        load_sample: String,
    },
}

/// Replica group descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ReplicaGroupDescriptor {
    /// Replica group id
    pub id: String,
    /// Load balancing policy; `None` means random with one replica
    pub load_balancing: Option<LoadBalancingPolicy>,
    /// Proxy options
    pub proxy_options: String,
    /// Well-known objects
    pub objects: Vec<ObjectDescriptor>,
    /// Description
    pub description: String,
    /// Filter name
    pub filter: String,
}

impl ReplicaGroupDescriptor {
    /// Create replica group with id
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// Node descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeDescriptor {
    /// Node variables
    pub variables: StringMap,
    /// Template-bound servers
    pub server_instances: Vec<ServerInstanceDescriptor>,
    /// Plain servers
    pub servers: Vec<ServerDescriptor>,
    /// Load factor
    pub load_factor: String,
    /// Description
    pub description: String,
    /// Node-level property sets
    pub property_sets: BTreeMap<String, PropertySetDescriptor>,
}

impl NodeDescriptor {
    /// Server slots: instances first, then plain servers, each in list order
    #[must_use]
    pub fn entries(&self) -> Vec<ServerEntry> {
        self.server_instances
            .iter()
            .cloned()
            .map(ServerEntry::Instance)
            .chain(self.servers.iter().cloned().map(ServerEntry::Plain))
            .collect()
    }

    /// Replace server lists from slots, preserving relative order per kind
    pub fn set_entries<'a>(&mut self, entries: impl IntoIterator<Item = &'a ServerEntry>) {
        self.server_instances.clear();
        self.servers.clear();
        for entry in entries {
            match entry {
                ServerEntry::Plain(server) => self.servers.push(server.clone()),
                ServerEntry::Instance(instance) => self.server_instances.push(instance.clone()),
            }
        }
    }
}

/// Application descriptor
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApplicationDescriptor {
    /// Application name
    pub name: String,
    /// Application variables
    pub variables: StringMap,
    /// Replica groups
    pub replica_groups: Vec<ReplicaGroupDescriptor>,
    /// Server templates by id
    pub server_templates: BTreeMap<String, ServerTemplateDescriptor>,
    /// Service templates by id
    pub service_templates: BTreeMap<String, ServiceTemplateDescriptor>,
    /// Nodes by name
    pub nodes: BTreeMap<String, NodeDescriptor>,
    /// Description
    pub description: String,
    /// Application-level property sets
    pub property_sets: BTreeMap<String, PropertySetDescriptor>,
}

impl ApplicationDescriptor {
    /// Create empty application
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Copy with set-like sequences sorted
    ///
    /// Servers, server instances and replica groups have no meaningful order;
    /// sorting them lets two structurally equal applications compare equal.
    #[must_use]
    pub fn normalized(&self) -> Self {
        let mut copy = self.clone();
        copy.replica_groups.sort_by(|a, b| a.id.cmp(&b.id));
        for node in copy.nodes.values_mut() {
            node.servers.sort_by(|a, b| a.id.cmp(&b.id));
            node.server_instances.sort_by(|a, b| {
                (&a.template, &a.parameter_values).cmp(&(&b.template, &b.parameter_values))
            });
        }
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn property_set_first_occurrence() {
        let set = PropertySetDescriptor::new()
            .with_property("Ice.Trace", "1")
            .with_property("Ice.Trace", "2");
        assert_eq!(set.get("Ice.Trace"), Some("1"));
        assert_eq!(set.get("Missing"), None);
        assert!(!set.is_empty());
    }

    #[test]
    fn node_entries_split_and_join() {
        let mut node = NodeDescriptor::default();
        node.servers.push(ServerDescriptor::new("a", "exe"));
        node.server_instances.push(ServerInstanceDescriptor::new("T"));
        node.servers.push(ServerDescriptor::new("b", "exe"));

        let entries = node.entries();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].template(), Some("T"));

        let mut rebuilt = NodeDescriptor::default();
        rebuilt.set_entries(&entries);
        assert_eq!(rebuilt.servers, node.servers);
        assert_eq!(rebuilt.server_instances, node.server_instances);
    }

    #[test]
    fn icebox_services_accessor() {
        let mut server = ServerDescriptor::new("box", "icebox");
        assert!(server.services().is_empty());
        server.kind = ServerKind::IceBox {
            services: vec![ServiceEntry::Plain(ServiceDescriptor::new("Hello", "lib:create"))],
        };
        assert!(server.is_icebox());
        assert_eq!(server.services().len(), 1);
    }

    #[test]
    fn normalized_ignores_server_order() {
        let mut a = ApplicationDescriptor::new("app");
        let mut node = NodeDescriptor::default();
        node.servers.push(ServerDescriptor::new("s2", "exe"));
        node.servers.push(ServerDescriptor::new("s1", "exe"));
        a.nodes.insert("n".to_string(), node.clone());

        let mut b = ApplicationDescriptor::new("app");
        node.servers.reverse();
        b.nodes.insert("n".to_string(), node);

        assert_ne!(a, b);
        assert_eq!(a.normalized(), b.normalized());
    }

    #[test]
    fn server_entry_serde_tagging() {
        let entry = ServerEntry::Instance(ServerInstanceDescriptor::new("T").with_parameter("p", "v"));
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["kind"], "instance");
        assert_eq!(json["descriptor"]["template"], "T");

        let decoded: ServerEntry = serde_json::from_value(json).unwrap();
        assert_eq!(decoded, entry);
    }
}
