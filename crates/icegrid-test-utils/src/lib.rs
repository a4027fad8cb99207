//! Testing utilities for the IceGrid model workspace
//!
//! Shared descriptor fixtures, an in-memory registry and log setup.

#![allow(missing_docs)]

use async_trait::async_trait;
use icegrid_descriptor::{
    AdapterDescriptor, ApplicationDescriptor, ApplicationUpdateDescriptor, NodeDescriptor,
    ObjectDescriptor, PropertySetDescriptor, ReplicaGroupDescriptor, ServerDescriptor,
    ServerInstanceDescriptor, ServiceDescriptor, ServiceInstanceDescriptor, ServerKind,
    ServiceEntry, TemplateDescriptor,
};
use icegrid_model::{RegistryClient, RegistryFailure};
use parking_lot::Mutex;
use std::collections::VecDeque;

/// Route model logs to the test writer; honours `RUST_LOG`
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("icegrid_model=debug")),
        )
        .with_test_writer()
        .try_init();
}

pub fn plain_server(id: &str, exe: &str) -> ServerDescriptor {
    ServerDescriptor::new(id, exe)
}

pub fn server_with_adapter(id: &str, adapter: &str) -> ServerDescriptor {
    let mut server = ServerDescriptor::new(id, "/usr/bin/server");
    server
        .communicator
        .adapters
        .push(AdapterDescriptor::named(adapter));
    server
}

pub fn instance(template: &str, parameters: &[(&str, &str)]) -> ServerInstanceDescriptor {
    parameters
        .iter()
        .fold(ServerInstanceDescriptor::new(template), |acc, (k, v)| acc.with_parameter(*k, *v))
}

pub fn node_with_variables(variables: &[(&str, &str)]) -> NodeDescriptor {
    NodeDescriptor {
        variables: variables
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        ..NodeDescriptor::default()
    }
}

/// Server template `T` with id `server-${idx}-${name}` and one adapter
pub fn indexed_server_template() -> TemplateDescriptor<ServerDescriptor> {
    let mut server = ServerDescriptor::new("server-${idx}-${name}", "/usr/bin/${name}");
    server
        .communicator
        .adapters
        .push(AdapterDescriptor::named("Adapter"));
    TemplateDescriptor::new(server).with_parameter("name", None)
}

/// Application `Demo`: node `n1` (idx=1) with instances of `T` for `a` and `b`
pub fn templated_application() -> ApplicationDescriptor {
    let mut app = ApplicationDescriptor::new("Demo");
    app.server_templates
        .insert("T".to_string(), indexed_server_template());
    let mut node = node_with_variables(&[("idx", "1")]);
    node.server_instances.push(instance("T", &[("name", "a")]));
    node.server_instances.push(instance("T", &[("name", "b")]));
    app.nodes.insert("n1".to_string(), node);
    app
}

/// Service template `Svc` whose name defaults to `Foo`
pub fn named_service_template() -> TemplateDescriptor<ServiceDescriptor> {
    TemplateDescriptor::new(ServiceDescriptor::new("${name}", "lib${name}:create"))
        .with_parameter("name", Some("Foo"))
}

pub fn service_instance(template: &str, parameters: &[(&str, &str)]) -> ServiceEntry {
    ServiceEntry::Instance(ServiceInstanceDescriptor {
        template: template.to_string(),
        parameter_values: parameters
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect(),
        property_set: PropertySetDescriptor::new(),
    })
}

pub fn icebox(id: &str, services: Vec<ServiceEntry>) -> ServerDescriptor {
    let mut server = ServerDescriptor::new(id, "icebox");
    server.kind = ServerKind::IceBox { services };
    server
}

pub fn replica_group(id: &str, objects: &[&str]) -> ReplicaGroupDescriptor {
    let mut group = ReplicaGroupDescriptor::new(id);
    group.objects = objects
        .iter()
        .map(|object| ObjectDescriptor {
            id: (*object).to_string(),
            type_id: "::Ice::Object".to_string(),
            proxy_options: String::new(),
        })
        .collect();
    group
}

/// Call received by [`FakeRegistry`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryCall {
    Add(ApplicationDescriptor),
    Sync {
        descriptor: ApplicationDescriptor,
        restart: bool,
    },
    Update {
        update: ApplicationUpdateDescriptor,
        restart: bool,
    },
}

/// In-memory registry recording every call
#[derive(Debug, Default)]
pub struct FakeRegistry {
    calls: Mutex<Vec<RegistryCall>>,
    failures: Mutex<VecDeque<RegistryFailure>>,
}

impl FakeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call fail with `failure`
    pub fn fail_next(&self, failure: RegistryFailure) {
        self.failures.lock().push_back(failure);
    }

    pub fn calls(&self) -> Vec<RegistryCall> {
        self.calls.lock().clone()
    }

    pub fn last_call(&self) -> Option<RegistryCall> {
        self.calls.lock().last().cloned()
    }

    fn record(&self, call: RegistryCall) -> Result<(), RegistryFailure> {
        self.calls.lock().push(call);
        match self.failures.lock().pop_front() {
            Some(failure) => Err(failure),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RegistryClient for FakeRegistry {
    async fn add_application(&self, descriptor: &ApplicationDescriptor) -> Result<(), RegistryFailure> {
        self.record(RegistryCall::Add(descriptor.clone()))
    }

    async fn sync_application(
        &self,
        descriptor: &ApplicationDescriptor,
        restart: bool,
    ) -> Result<(), RegistryFailure> {
        self.record(RegistryCall::Sync {
            descriptor: descriptor.clone(),
            restart,
        })
    }

    async fn update_application(
        &self,
        update: &ApplicationUpdateDescriptor,
        restart: bool,
    ) -> Result<(), RegistryFailure> {
        self.record(RegistryCall::Update {
            update: update.clone(),
            restart,
        })
    }
}
