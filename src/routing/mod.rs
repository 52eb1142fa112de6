//! Routing resource derivation.
//!
//! Turns flat route definitions (`path`, `method`, `function`, `cors`,
//! `api`) into the tree of path resources, methods and CORS preflight
//! entries that an API declaration in the stack template needs.

mod deriver;
mod types;

pub use deriver::{HTTP_METHODS, canonical_segment, derive};
pub use types::{MethodOptions, RoutingMethod, RoutingResource, RoutingResourceSet};
