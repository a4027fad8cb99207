//! IceGrid Descriptor Model
//!
//! Editable, fully resolved tree of an IceGrid application.
//!
//! # Core Concepts
//!
//! - [`Application`]: Root of the tree; every mutation is all-or-nothing
//! - [`Node`] / [`Server`] / [`Service`] / [`Adapter`]: Resolved deployment entities
//! - [`Template`]: Server and service templates; edits propagate to every instance
//! - [`Editable`]: Per-entity change tracking since the last commit
//! - [`Application::create_update_descriptor`]: Minimal delta for a live registry
//! - [`RegistryClient`]: Collaborator that receives saves
//!
//! # Example
//!
//! ```rust,ignore
//! use icegrid_model::prelude::*;
//!
//! let mut app = Application::from_registry(&descriptor, ModelConfig::default())?;
//! app.update_server("node1", "server-1", entry)?;
//! if let Some(update) = app.create_update_descriptor() {
//!     println!("{} node(s) changed", update.nodes.len());
//! }
//! app.save_to(&registry).await?;
//! ```

mod adapter;
mod application;
mod catalog;
mod communicator;
mod config;
mod diff;
mod draft;
mod editable;
mod error;
mod identity;
mod live;
mod node;
mod property_set;
mod replica_group;
mod server;
mod service;
mod template;
mod transaction;
mod update;

pub use adapter::{Adapter, AdapterEndpoints, SERVER_ADAPTER_PREFIX, SERVICE_ADAPTER_PREFIX};
pub use application::{Application, PropertySetScope};
pub use config::ModelConfig;
pub use draft::Draft;
pub use editable::{Editable, EditableSnapshot, EntityKind};
pub use error::{
    IdentityCollision, ModelError, ModelResult, SyncConflict, UnresolvedReference, ValidationError,
};
pub use live::{
    FailureKind, LiveState, RegistryClient, RegistryFailure, RegistryUpdateOutcome, RegistryVerb,
    SavePayload, SaveRequest,
};
pub use node::Node;
pub use property_set::{
    effective, hidden_properties, lookup, merge_hidden, PropertySet, PropertySetLookup,
    ADAPTER_PROPERTY_SUFFIXES,
};
pub use replica_group::ReplicaGroup;
pub use server::{Server, ServerKey};
pub use service::Service;
pub use template::{make_parameter_values, Template};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with the descriptor model
    pub use crate::{
        Application, Draft, EntityKind, ModelConfig, ModelError, ModelResult, PropertySetScope,
        RegistryClient, RegistryUpdateOutcome, RegistryVerb, ServerKey,
    };
    pub use icegrid_descriptor::{
        ApplicationDescriptor, ApplicationUpdateDescriptor, NodeDescriptor, ServerDescriptor,
        ServerEntry, ServerInstanceDescriptor,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
