//! Domain types shared by the routing core
//!
//! Validated identifiers and the per-request [`RoutingContext`].

pub mod context;
pub mod identifiers;

pub use context::{RoutingContext, RoutingContextBuilder};
pub use identifiers::*;
