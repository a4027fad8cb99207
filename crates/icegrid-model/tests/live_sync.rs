//! Functional tests for saving to a registry and following its updates.
//!
//! Guarantees exercised here:
//! - The verb follows the application's history: new applications are added,
//!   edited live ones are updated with a delta, replaced ones are synced.
//! - A failed save keeps every local change so it can be retried.
//! - The echo of our own save is skipped; foreign updates wait while local
//!   changes are pending.

use icegrid_model::prelude::*;
use icegrid_model::{FailureKind, RegistryFailure, SyncConflict, ValidationError};
use icegrid_test_utils::{init_test_logging, instance, templated_application, FakeRegistry, RegistryCall};
use pretty_assertions::assert_eq;

fn live_application() -> Application {
    Application::from_registry(&templated_application(), ModelConfig::default()).unwrap()
}

#[tokio::test]
async fn new_application_is_added_then_updated() {
    init_test_logging();
    let registry = FakeRegistry::new();
    let mut app = Application::load(&templated_application(), ModelConfig::default()).unwrap();

    let verb = app.save_to(&registry).await.unwrap();
    assert_eq!(verb, Some(RegistryVerb::Add));
    assert_eq!(registry.calls(), vec![RegistryCall::Add(templated_application())]);
    assert!(!app.has_changes());

    app.set_description("second save");
    let verb = app.save_to(&registry).await.unwrap();
    assert_eq!(verb, Some(RegistryVerb::Update));
    match registry.last_call() {
        Some(RegistryCall::Update { update, restart }) => {
            assert!(restart);
            assert_eq!(update.description.as_deref(), Some("second save"));
            assert!(update.nodes.is_empty());
        }
        other => panic!("expected an update, got {other:?}"),
    }
}

/// Saving an untouched application sends nothing.
#[tokio::test]
async fn nothing_to_save() {
    let registry = FakeRegistry::new();
    let mut app = live_application();
    assert_eq!(app.save_to(&registry).await.unwrap(), None);
    assert!(registry.calls().is_empty());
}

/// The delta carries only the edited instance.
#[tokio::test]
async fn edit_sends_minimal_delta() {
    let registry = FakeRegistry::new();
    let mut app = live_application();
    app.update_server(
        "n1",
        "server-1-a",
        ServerEntry::Instance(instance("T", &[("name", "c")])),
    )
    .unwrap();

    app.save_to(&registry).await.unwrap();
    let Some(RegistryCall::Update { update, .. }) = registry.last_call() else {
        panic!("expected an update");
    };
    let node = update.node("n1").unwrap();
    assert_eq!(node.remove_servers, vec!["server-1-a".to_string()]);
    assert_eq!(node.server_instances, vec![instance("T", &[("name", "c")])]);
    assert_eq!(app.committed_descriptor(), &app.descriptor());
}

/// A rejected save keeps the edits and a retry sends them again.
#[tokio::test]
async fn failed_save_is_retried() {
    let registry = FakeRegistry::new();
    let mut app = live_application();
    app.remove_server("n1", "server-1-b").unwrap();

    registry.fail_next(RegistryFailure::new(FailureKind::AccessDenied, "held by admin"));
    let err = app.save_to(&registry).await.unwrap_err();
    assert_eq!(
        err,
        ModelError::SyncConflict(SyncConflict {
            verb: RegistryVerb::Update,
            application: "Demo".to_string(),
            failure: RegistryFailure::new(FailureKind::AccessDenied, "held by admin"),
        })
    );
    assert!(app.has_changes());
    assert!(app.server("n1", "server-1-b").is_none());
    assert_eq!(app.live_state().pending_echoes(), 0);

    app.save_to(&registry).await.unwrap();
    assert_eq!(registry.calls().len(), 2);
    assert_eq!(registry.calls()[0], registry.calls()[1]);
    assert!(!app.has_changes());
    assert_eq!(app.live_state().pending_echoes(), 1);
}

/// Replacing the whole tree forces a full sync.
#[tokio::test]
async fn replaced_descriptor_is_synced() {
    let registry = FakeRegistry::new();
    let config = ModelConfig::default().with_restart_on_save(false);
    let mut app = Application::from_registry(&templated_application(), config).unwrap();

    let mut replacement = templated_application();
    replacement.nodes.get_mut("n1").unwrap().server_instances.pop();
    app.replace_descriptor(&replacement).unwrap();

    assert_eq!(app.save_to(&registry).await.unwrap(), Some(RegistryVerb::SyncWithoutRestart));
    assert_eq!(
        registry.last_call(),
        Some(RegistryCall::Sync {
            descriptor: replacement,
            restart: false,
        })
    );

    app.set_description("after sync");
    assert_eq!(app.save_to(&registry).await.unwrap(), Some(RegistryVerb::UpdateWithoutRestart));
}

/// Full descriptors are sent when incremental updates are turned off.
#[tokio::test]
async fn incremental_updates_can_be_disabled() {
    let registry = FakeRegistry::new();
    let config = ModelConfig::default().with_incremental_updates(false);
    let mut app = Application::from_registry(&templated_application(), config).unwrap();
    app.set_description("full");

    assert_eq!(app.save_to(&registry).await.unwrap(), Some(RegistryVerb::Sync));
}

/// Our own save comes back once and is skipped; the next update applies.
#[tokio::test]
async fn own_echo_skipped() {
    let registry = FakeRegistry::new();
    let mut app = live_application();
    app.set_description("mine");
    app.save_to(&registry).await.unwrap();

    let Some(RegistryCall::Update { update, .. }) = registry.last_call() else {
        panic!("expected an update");
    };
    assert_eq!(app.on_registry_update(update).unwrap(), RegistryUpdateOutcome::Skipped);

    let mut foreign = ApplicationUpdateDescriptor::new("Demo");
    foreign.remove_nodes.push("n1".to_string());
    assert_eq!(app.on_registry_update(foreign).unwrap(), RegistryUpdateOutcome::Applied);
    assert!(app.nodes().is_empty());
    assert!(!app.has_changes());
}

/// Updates arriving during a save wait and are superseded by its success.
#[test]
fn updates_during_save_are_deferred() {
    let mut app = live_application();
    app.set_description("local");
    let request = app.begin_save().unwrap().unwrap();
    assert!(app.live_state().save_in_flight());

    // echo of the save in flight
    let echo = ApplicationUpdateDescriptor::new("Demo");
    assert_eq!(app.on_registry_update(echo).unwrap(), RegistryUpdateOutcome::Skipped);

    let mut foreign = ApplicationUpdateDescriptor::new("Demo");
    foreign.variables.insert("zone".to_string(), "b".to_string());
    assert_eq!(app.on_registry_update(foreign).unwrap(), RegistryUpdateOutcome::Deferred);
    assert_eq!(app.live_state().queued_updates(), 1);

    app.complete_save(request.verb, Ok(())).unwrap();
    assert_eq!(app.live_state().queued_updates(), 0);
    assert!(app.variables().get("zone").is_none());
}

/// A failing foreign update leaves the model as it was.
#[test]
fn failing_registry_update_is_rejected() {
    let mut app = live_application();
    let before = app.descriptor();

    let mut bad = ApplicationUpdateDescriptor::new("Demo");
    bad.remove_server_templates.push("T".to_string());
    assert!(app.on_registry_update(bad).is_err());
    assert_eq!(app.descriptor(), before);
}

/// Discarding is refused while a save awaits its outcome, so the saved
/// state and the registry stay in step.
#[test]
fn discard_refused_during_save() {
    let mut app = live_application();
    app.set_description("x");
    let request = app.begin_save().unwrap().unwrap();

    assert_eq!(
        app.discard_changes().unwrap_err(),
        ModelError::Validation(ValidationError::SaveInProgress)
    );
    assert_eq!(app.description(), "x");

    app.complete_save(request.verb, Ok(())).unwrap();
    let mut echo = ApplicationUpdateDescriptor::new("Demo");
    echo.description = Some("x".to_string());
    assert_eq!(app.on_registry_update(echo).unwrap(), RegistryUpdateOutcome::Skipped);

    assert_eq!(app.description(), "x");
    assert_eq!(app.committed_descriptor().description, "x");
    assert!(!app.has_changes());
}
