//! IceGrid Descriptor Types
//!
//! Value types exchanged between the descriptor model, the registry and the
//! persistence layer.
//!
//! # Core Concepts
//!
//! - [`ApplicationDescriptor`]: Root of a deployment (nodes, templates, replica groups)
//! - [`ServerEntry`] / [`ServiceEntry`]: Plain or template-bound slots
//! - [`TemplateDescriptor<D>`]: Parameterized descriptor with defaults
//! - [`ApplicationUpdateDescriptor`]: Incremental delta sent to a live registry
//! - [`DescriptorDigest`]: Blake3 fingerprint of a descriptor's canonical form
//!
//! # Example
//!
//! ```rust,ignore
//! use icegrid_descriptor::{ApplicationDescriptor, DescriptorDigest};
//!
//! let app = ApplicationDescriptor::new("Demo");
//! let digest = DescriptorDigest::of(&app.normalized())?;
//! println!("digest: {}", digest.short());
//! ```

mod descriptor;
mod digest;
mod update;

pub use descriptor::{
    AdapterDescriptor, ApplicationDescriptor, CommunicatorDescriptor, LoadBalancingPolicy,
    NodeDescriptor, ObjectDescriptor, PropertyDescriptor, PropertySetDescriptor,
    ReplicaGroupDescriptor, ServerDescriptor, ServerEntry, ServerInstanceDescriptor, ServerKind,
    ServerTemplateDescriptor, ServiceDescriptor, ServiceEntry, ServiceInstanceDescriptor,
    ServiceTemplateDescriptor, StringMap, TemplateDescriptor,
};
pub use digest::{DescriptorDigest, DigestError};
pub use update::{ApplicationUpdateDescriptor, MapDelta, NodeUpdateDescriptor};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
