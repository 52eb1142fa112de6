//! Routing resource types.

use indexmap::IndexMap;
use serde::Serialize;

/// Everything the template needs to declare an HTTP API surface.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResourceSet {
    /// Path resources, parents before children.
    pub resources: Vec<RoutingResource>,
    /// One entry per (path, verb).
    pub methods: Vec<RoutingMethod>,
    /// One preflight entry per CORS-enabled resource.
    pub method_options: Vec<MethodOptions>,
    /// Method names per API group, in declaration order.
    pub api_dependencies: IndexMap<String, Vec<String>>,
}

/// One path segment resource.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingResource {
    /// Logical name, the concatenated canonical segments.
    pub name: String,
    /// Raw path segment, e.g. `{id}`.
    pub path_part: String,
    /// Parent resource name; `None` for children of the API root.
    pub parent: Option<String>,
    /// Full path up to and including this segment.
    pub path: String,
    /// API group.
    pub api: String,
}

/// One HTTP method bound to a unit.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutingMethod {
    /// Logical name, resource name plus verb.
    pub name: String,
    /// Resource name; `None` for the API root.
    pub resource: Option<String>,
    /// Uppercased verb.
    pub http_method: String,
    /// Full request path.
    pub path: String,
    /// Target unit name.
    pub function: String,
    /// Target unit's full name.
    pub function_full_name: String,
    /// Whether CORS headers are expected.
    pub cors: bool,
    /// API group.
    pub api: String,
}

/// A CORS preflight method for a resource.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MethodOptions {
    /// Logical name, resource name plus `OPTIONS`.
    pub name: String,
    /// Resource name; `None` for the API root.
    pub resource: Option<String>,
    /// Full request path.
    pub path: String,
    /// Verbs allowed by the preflight response, `OPTIONS` last.
    pub allowed_methods: Vec<String>,
    /// `allowed_methods` joined with commas, for header values.
    pub allowed_methods_header: String,
    /// API group.
    pub api: String,
}
