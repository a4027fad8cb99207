//! Per-entity change tracking
//!
//! Every mutable entity carries an [`Editable`]: whether it was created in
//! this session, whether it changed since the last commit, and which
//! children were removed since then.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Display, Formatter};

/// Kinds of entity tracked by the model
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EntityKind {
    /// Application root
    Application,
    /// Deployment node
    Node,
    /// Server (plain or instance)
    Server,
    /// IceBox service
    Service,
    /// Object adapter
    Adapter,
    /// Well-known object
    Object,
    /// Replica group
    ReplicaGroup,
    /// Named property set
    PropertySet,
    /// Server template
    ServerTemplate,
    /// Service template
    ServiceTemplate,
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Application => "application",
            Self::Node => "node",
            Self::Server => "server",
            Self::Service => "service",
            Self::Adapter => "adapter",
            Self::Object => "object",
            Self::ReplicaGroup => "replica group",
            Self::PropertySet => "property set",
            Self::ServerTemplate => "server template",
            Self::ServiceTemplate => "service template",
        };
        f.write_str(name)
    }
}

/// Dirty-state tracker
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Editable {
    is_new: bool,
    is_modified: bool,
    removed: BTreeMap<EntityKind, BTreeSet<String>>,
}

/// Value snapshot of an [`Editable`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditableSnapshot(Editable);

impl Editable {
    /// Tracker for an entity created in this session
    #[inline]
    #[must_use]
    pub fn new_entity() -> Self {
        Self {
            is_new: true,
            ..Self::default()
        }
    }

    /// Tracker for an entity loaded in committed state
    #[inline]
    #[must_use]
    pub fn committed() -> Self {
        Self::default()
    }

    /// Created since the last commit
    #[inline]
    #[must_use]
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Changed since the last commit
    #[inline]
    #[must_use]
    pub fn is_modified(&self) -> bool {
        self.is_modified
    }

    /// New or modified
    #[inline]
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.is_new || self.is_modified || !self.removed.is_empty()
    }

    /// Record a change
    #[inline]
    pub fn mark_modified(&mut self) {
        self.is_modified = true;
    }

    /// Record creation
    #[inline]
    pub fn mark_new(&mut self) {
        self.is_new = true;
    }

    /// Record removal of a committed child
    pub fn remove_element(&mut self, kind: EntityKind, id: impl Into<String>) {
        self.removed.entry(kind).or_default().insert(id.into());
        self.is_modified = true;
    }

    /// Ids of removed children of `kind`, sorted
    #[must_use]
    pub fn removed(&self, kind: EntityKind) -> Vec<String> {
        self.removed
            .get(&kind)
            .map(|ids| ids.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Clear all tracking after a successful synchronization
    pub fn commit(&mut self) {
        self.is_new = false;
        self.is_modified = false;
        self.removed.clear();
    }

    /// Capture current state
    #[inline]
    #[must_use]
    pub fn save(&self) -> EditableSnapshot {
        EditableSnapshot(self.clone())
    }

    /// Restore a captured state
    #[inline]
    pub fn restore(&mut self, snapshot: EditableSnapshot) {
        *self = snapshot.0;
    }
}
