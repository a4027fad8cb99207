//! Application-wide identity check
//!
//! Three namespaces are checked after every mutation:
//! - Server ids
//! - Adapter ids, shared with replica group ids
//! - Well-known object ids
//!
//! Claims are registered in a fixed order: replica groups, then servers not
//! touched by the current operation, then touched servers in the order they
//! were rebuilt. The first duplicate claim is reported, so a collision always
//! names the entity the operation produced.

use crate::application::Application;
use crate::editable::EntityKind;
use crate::error::{IdentityCollision, ModelResult};
use crate::server::{Server, ServerKey};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Namespace {
    Server,
    Adapter,
    Object,
}

/// Owners of every claimed id
#[derive(Debug, Default)]
pub(crate) struct IdentityIndex {
    claims: BTreeMap<(Namespace, String), String>,
}

impl IdentityIndex {
    fn claim(
        &mut self,
        namespace: Namespace,
        kind: EntityKind,
        id: &str,
        owner: String,
    ) -> ModelResult<()> {
        let key = (namespace, id.to_string());
        if let Some(existing) = self.claims.get(&key) {
            return Err(IdentityCollision {
                kind,
                id: id.to_string(),
                existing: existing.clone(),
                conflicting: owner,
            }
            .into());
        }
        self.claims.insert(key, owner);
        Ok(())
    }

    fn claim_server(&mut self, node: &str, server: &Server) -> ModelResult<()> {
        let owner = format!("server {} on node {node}", server.id);
        self.claim(Namespace::Server, EntityKind::Server, &server.id, owner.clone())?;

        let service_adapters = server
            .services
            .iter()
            .flat_map(|service| service.adapters.iter());
        for adapter in server.adapters.iter().chain(service_adapters) {
            self.claim(
                Namespace::Adapter,
                EntityKind::Adapter,
                adapter.id(),
                format!("adapter {} of {owner}", adapter.name()),
            )?;
            for object in adapter.objects() {
                self.claim(
                    Namespace::Object,
                    EntityKind::Object,
                    &object.id,
                    format!("adapter {} of {owner}", adapter.name()),
                )?;
            }
        }
        Ok(())
    }
}

/// Check the whole application, registering `batch` last
pub(crate) fn check(application: &Application, batch: &[ServerKey]) -> ModelResult<()> {
    let mut index = IdentityIndex::default();

    for group in &application.catalog.replica_groups {
        let owner = format!("replica group {}", group.id);
        index.claim(Namespace::Adapter, EntityKind::ReplicaGroup, &group.id, owner.clone())?;
        for object in &group.objects {
            index.claim(Namespace::Object, EntityKind::Object, &object.id, owner.clone())?;
        }
    }

    let deferred: BTreeSet<&ServerKey> = batch.iter().collect();
    for node in application.nodes.values() {
        for (position, server) in node.servers.iter().enumerate() {
            if !deferred.contains(&ServerKey::new(node.name.clone(), position)) {
                index.claim_server(&node.name, server)?;
            }
        }
    }

    let mut seen = BTreeSet::new();
    for key in batch {
        if !seen.insert(key) {
            continue;
        }
        if let Ok(server) = application.server_at(key) {
            index.claim_server(&key.node, server)?;
        }
    }
    Ok(())
}
