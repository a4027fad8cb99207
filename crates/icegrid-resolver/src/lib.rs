//! IceGrid Resolver
//!
//! Chained variable and parameter scopes with `${name}` substitution.
//!
//! # Core Concepts
//!
//! - [`Resolver`]: Immutable scope; lookup falls back to parent scopes
//! - [`ResolverBuilder`]: Layers variables, parameter values and defaults
//! - [`UnresolvedPolicy`]: Reject or keep undefined tokens
//!
//! # Example
//!
//! ```rust,ignore
//! use icegrid_resolver::{Resolver, UnresolvedPolicy};
//! use std::sync::Arc;
//!
//! let app = Arc::new(Resolver::builder().put_literal("application", "Demo").build()?);
//! let node = Resolver::child(&app).put_literal("node", "n1").build()?;
//! assert_eq!(node.substitute("${application}-${node}")?, "Demo-n1");
//! ```

mod error;
mod resolver;
mod substitute;

pub use error::ResolveError;
pub use resolver::{is_reserved, Resolver, ResolverBuilder, UnresolvedPolicy, RESERVED_NAMES};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
