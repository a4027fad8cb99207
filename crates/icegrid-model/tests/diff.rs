//! Functional tests for update descriptors.
//!
//! Guarantees exercised here:
//! - An unchanged application produces no delta at all.
//! - A delta mentions only what changed: untouched nodes, servers and
//!   catalog entries never appear.
//! - Applying the delta to the committed descriptor reproduces the current
//!   descriptor, compared in normalized form and by digest.

use icegrid_descriptor::{DescriptorDigest, PropertySetDescriptor};
use icegrid_model::prelude::*;
use icegrid_test_utils::{
    indexed_server_template, instance, plain_server, replica_group, server_with_adapter,
    templated_application,
};
use pretty_assertions::assert_eq;

fn registered() -> Application {
    let mut descriptor = templated_application();
    let mut n2 = NodeDescriptor::default();
    n2.servers.push(plain_server("${node}-worker", "/usr/bin/worker"));
    descriptor.nodes.insert("n2".to_string(), n2);
    descriptor.property_sets.insert(
        "base".to_string(),
        PropertySetDescriptor::new().with_property("Ice.Trace.Network", "1"),
    );
    Application::from_registry(&descriptor, ModelConfig::default()).unwrap()
}

/// Apply `app`'s delta to a fresh copy of its committed descriptor.
fn replay(app: &Application) -> ApplicationDescriptor {
    let mut replica =
        Application::from_registry(app.committed_descriptor(), ModelConfig::default()).unwrap();
    if let Some(update) = app.create_update_descriptor() {
        replica.apply_update(&update).unwrap();
    }
    replica.descriptor()
}

fn assert_round_trip(app: &Application) {
    let replayed = replay(app);
    assert_eq!(replayed.normalized(), app.descriptor().normalized());
    assert_eq!(
        DescriptorDigest::of(&replayed.normalized()).unwrap(),
        app.digest().unwrap()
    );
}

#[test]
fn untouched_application_has_no_delta() {
    let app = registered();
    assert_eq!(app.create_update_descriptor(), None);
    assert!(!app.has_changes());
}

/// Renaming one instance touches exactly one node and one server.
#[test]
fn single_instance_edit_is_minimal() {
    let mut app = registered();
    let new_id = app
        .update_server(
            "n1",
            "server-1-b",
            ServerEntry::Instance(instance("T", &[("name", "c")])),
        )
        .unwrap();
    assert_eq!(new_id, "server-1-c");

    let update = app.create_update_descriptor().unwrap();
    assert_eq!(update.nodes.len(), 1);
    let node = update.node("n1").unwrap();
    assert_eq!(node.remove_servers, vec!["server-1-b".to_string()]);
    assert_eq!(node.server_instances, vec![instance("T", &[("name", "c")])]);
    assert!(node.servers.is_empty());
    assert!(node.variables.is_empty());
    assert!(update.server_templates.is_empty());
    assert!(update.property_sets.is_empty());
    assert!(update.description.is_none());

    assert_round_trip(&app);
}

/// A template body change ships the template only; instances follow it.
#[test]
fn template_body_change_ships_template_only() {
    let mut app = registered();
    let mut template = indexed_server_template();
    template.descriptor.pwd = "/var/${name}".to_string();
    app.update_server_template("T", template.clone()).unwrap();

    let update = app.create_update_descriptor().unwrap();
    assert_eq!(update.server_templates.get("T"), Some(&template));
    assert!(update.nodes.is_empty());
    assert_eq!(app.server("n1", "server-1-a").unwrap().descriptor().pwd, "/var/a");

    assert_round_trip(&app);
}

/// Node variable change that renames servers removes the old ids.
#[test]
fn renaming_variable_change() {
    let mut app = registered();
    let mut variables = app.node("n1").unwrap().variables().clone();
    variables.insert("idx".to_string(), "7".to_string());
    app.set_node_variables("n1", variables).unwrap();

    let update = app.create_update_descriptor().unwrap();
    let node = update.node("n1").unwrap();
    assert_eq!(node.variables.get("idx").map(String::as_str), Some("7"));
    assert_eq!(
        node.remove_servers,
        vec!["server-1-a".to_string(), "server-1-b".to_string()]
    );
    assert_eq!(node.server_instances.len(), 2);
    assert!(update.node("n2").is_none());

    assert_round_trip(&app);
}

/// A mix of edits across the catalog and several nodes replays exactly.
#[test]
fn mixed_edits_round_trip() {
    let mut app = registered();

    let mut variables = app.variables().clone();
    variables.insert("region".to_string(), "eu".to_string());
    app.set_variables(variables).unwrap();
    app.set_description("demo deployment");

    app.remove_property_set(&PropertySetScope::Application, "base")
        .unwrap();
    app.insert_property_set(
        &PropertySetScope::Application,
        "tracing",
        PropertySetDescriptor::new().with_property("Ice.Trace.Protocol", "1"),
    )
    .unwrap();

    app.insert_replica_group(replica_group("${application}.Group", &["hello"]))
        .unwrap();
    app.remove_server("n2", "n2-worker").unwrap();
    app.insert_server("n2", ServerEntry::Plain(plain_server("${node}-${region}", "/bin/x")))
        .unwrap();

    let mut n3 = NodeDescriptor::default();
    n3.load_factor = "2".to_string();
    n3.server_instances.push(instance("T", &[("name", "z")]));
    n3.variables.insert("idx".to_string(), "3".to_string());
    app.insert_node("n3", &n3).unwrap();

    let update = app.create_update_descriptor().unwrap();
    assert_eq!(update.remove_property_sets, vec!["base".to_string()]);
    assert!(update.property_sets.contains_key("tracing"));
    assert_eq!(update.replica_groups.len(), 1);
    assert_eq!(update.node("n3").unwrap().load_factor.as_deref(), Some("2"));
    assert_eq!(update.node("n2").unwrap().remove_servers, vec!["n2-worker".to_string()]);
    assert!(update.node("n1").is_none());

    assert_round_trip(&app);
}

/// Removing and re-adding a node in one session ships both operations.
#[test]
fn node_removed_and_recreated() {
    let mut app = registered();
    app.remove_node("n2").unwrap();
    let mut n2 = NodeDescriptor::default();
    n2.servers.push(plain_server("fresh", "/bin/fresh"));
    app.insert_node("n2", &n2).unwrap();

    let update = app.create_update_descriptor().unwrap();
    assert_eq!(update.remove_nodes, vec!["n2".to_string()]);
    assert_eq!(update.node("n2").unwrap().servers, vec![plain_server("fresh", "/bin/fresh")]);

    assert_round_trip(&app);
}

/// Committing clears the delta.
#[test]
fn commit_resets_delta() {
    let mut app = registered();
    app.remove_server("n1", "server-1-a").unwrap();
    assert!(app.create_update_descriptor().is_some());

    app.commit();
    assert_eq!(app.create_update_descriptor(), None);
    assert_eq!(app.committed_descriptor(), &app.descriptor());
}

/// An application variable that renames a replica group moves its adapters
/// along and ships the old id as removed.
#[test]
fn variable_change_renames_replica_group() {
    let mut descriptor = ApplicationDescriptor::new("Groups");
    descriptor
        .variables
        .insert("rg".to_string(), "A".to_string());
    descriptor.replica_groups.push(replica_group("${rg}", &[]));
    let mut server = server_with_adapter("s", "Ad");
    server.communicator.adapters[0].replica_group_id = "${rg}".to_string();
    let mut node = NodeDescriptor::default();
    node.servers.push(server);
    descriptor.nodes.insert("n1".to_string(), node);
    let mut app = Application::from_registry(&descriptor, ModelConfig::default()).unwrap();

    let mut variables = app.variables().clone();
    variables.insert("rg".to_string(), "B".to_string());
    app.set_variables(variables).unwrap();

    let ids: Vec<&str> = app.replica_groups().iter().map(|rg| rg.id()).collect();
    assert_eq!(ids, vec!["B"]);
    assert_eq!(
        app.server("n1", "s").unwrap().adapters()[0].replica_group_id(),
        Some("B")
    );

    let update = app.create_update_descriptor().unwrap();
    assert_eq!(update.remove_replica_groups, vec!["A".to_string()]);
    assert_eq!(update.replica_groups, vec![replica_group("${rg}", &[])]);

    assert_round_trip(&app);
}
