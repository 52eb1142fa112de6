//! Derivation of routing resources from route definitions.

use indexmap::IndexMap;
use indexmap::map::Entry;
use tracing::debug;

use crate::config::{ApiDefinition, DeployableUnit, RouteDefinition};
use crate::error::{ConfigError, Result};

use super::types::{MethodOptions, RoutingMethod, RoutingResource, RoutingResourceSet};

/// HTTP verbs a route may declare.
pub const HTTP_METHODS: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD", "OPTIONS", "ANY"];

/// Verbs an `ANY` route answers in a preflight response.
const ANY_EXPANSION: &[&str] = &["GET", "POST", "PUT", "PATCH", "DELETE", "HEAD"];

/// Name used for methods attached to the API root (`/`).
const ROOT_NAME: &str = "Root";

/// Builds the routing resource set.
///
/// Resources are deduplicated per API group by logical name, so routes
/// sharing a path prefix share its resources. Each CORS-enabled resource
/// gets a single preflight entry listing every CORS verb on it.
///
/// # Errors
///
/// Returns [`ConfigError::ApiGroupUndefined`] for a route naming an
/// undeclared API and [`ConfigError::DuplicateName`] for repeated routes.
/// A validation error is returned for an unknown target unit or verb, for
/// distinct paths whose segments map to the same logical name (`/users`
/// and `/Users`), and for a route without an `api` when no API or several
/// APIs are declared: such a route names no group that could be undefined.
pub fn derive(
    apis: &[ApiDefinition],
    routes: &[RouteDefinition],
    units: &[DeployableUnit],
) -> Result<RoutingResourceSet> {
    let mut resources: IndexMap<(String, String), RoutingResource> = IndexMap::new();
    let mut methods: IndexMap<(String, String), RoutingMethod> = IndexMap::new();
    let mut options: IndexMap<(String, String), OptionsBuilder> = IndexMap::new();
    let mut api_dependencies: IndexMap<String, Vec<String>> =
        apis.iter().map(|a| (a.name.clone(), Vec::new())).collect();

    for (index, route) in routes.iter().enumerate() {
        let api = api_group(apis, route)?;
        let unit = units.iter().find(|u| u.name == route.function).ok_or_else(|| {
            ConfigError::validation(
                format!(
                    "route {} references unknown function '{}'",
                    route.describe(),
                    route.function
                ),
                format!("routes[{index}].function"),
            )
        })?;
        let verb = http_method(route, index)?;

        let segments: Vec<&str> = route.path.split('/').filter(|s| !s.is_empty()).collect();
        let mut parent: Option<String> = None;
        let mut name = String::new();
        for (depth, segment) in segments.iter().enumerate() {
            name.push_str(&canonical_segment(segment));
            let resource_path = format!("/{}", segments[..=depth].join("/"));
            match resources.entry((api.clone(), name.clone())) {
                Entry::Occupied(existing) if existing.get().path != resource_path => {
                    return Err(ConfigError::validation(
                        format!(
                            "paths {} and {} both map to resource '{name}'",
                            existing.get().path,
                            resource_path
                        ),
                        format!("routes[{index}].path"),
                    )
                    .into());
                }
                Entry::Occupied(_) => {}
                Entry::Vacant(slot) => {
                    slot.insert(RoutingResource {
                        name: name.clone(),
                        path_part: (*segment).to_string(),
                        parent: parent.clone(),
                        path: resource_path,
                        api: api.clone(),
                    });
                }
            }
            parent = Some(name.clone());
        }

        let path = format!("/{}", segments.join("/"));
        let base = if name.is_empty() { ROOT_NAME } else { name.as_str() };
        let method_name = format!("{base}{verb}");

        match methods.entry((api.clone(), method_name.clone())) {
            Entry::Occupied(_) => {
                return Err(ConfigError::DuplicateName {
                    resource_type: String::from("route"),
                    name: format!("{verb} {path} ({api})"),
                }
                .into());
            }
            Entry::Vacant(slot) => {
                slot.insert(RoutingMethod {
                    name: method_name.clone(),
                    resource: parent.clone(),
                    http_method: verb.clone(),
                    path: path.clone(),
                    function: unit.name.clone(),
                    function_full_name: unit.full_name.clone(),
                    cors: route.cors,
                    api: api.clone(),
                });
            }
        }

        if route.cors {
            options
                .entry((api.clone(), base.to_string()))
                .or_insert_with(|| OptionsBuilder {
                    name: format!("{base}OPTIONS"),
                    resource: parent.clone(),
                    path: path.clone(),
                    api: api.clone(),
                    verbs: Vec::new(),
                })
                .allow(&verb);
        }

        api_dependencies.entry(api).or_default().push(method_name);
    }

    for builder in options.values() {
        if methods.contains_key(&(builder.api.clone(), builder.name.clone())) {
            return Err(ConfigError::DuplicateName {
                resource_type: String::from("route"),
                name: format!("OPTIONS {} ({})", builder.path, builder.api),
            }
            .into());
        }
    }

    let set = RoutingResourceSet {
        resources: resources.into_values().collect(),
        methods: methods.into_values().collect(),
        method_options: options.into_values().map(OptionsBuilder::build).collect(),
        api_dependencies,
    };

    debug!(
        "Derived {} resources, {} methods, {} preflight methods",
        set.resources.len(),
        set.methods.len(),
        set.method_options.len()
    );
    Ok(set)
}

/// Canonical logical-name fragment for one path segment.
///
/// Literal segments are capitalized with non-alphanumerics removed; path
/// variables (`{id}`, `{proxy+}`) become the variable name plus `Var`.
#[must_use]
pub fn canonical_segment(segment: &str) -> String {
    if let Some(inner) = segment.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let mut name: String = inner.chars().filter(char::is_ascii_alphanumeric).collect();
        name.push_str("Var");
        return name;
    }

    let mut chars = segment.chars().filter(char::is_ascii_alphanumeric);
    chars.next().map_or_else(String::new, |first| {
        first.to_ascii_uppercase().to_string() + &chars.collect::<String>()
    })
}

fn api_group(apis: &[ApiDefinition], route: &RouteDefinition) -> Result<String> {
    match &route.api {
        Some(name) if apis.iter().any(|a| &a.name == name) => Ok(name.clone()),
        Some(name) => Err(ConfigError::ApiGroupUndefined {
            api: name.clone(),
            route: route.describe(),
        }
        .into()),
        None => match apis {
            [only] => Ok(only.name.clone()),
            [] => Err(ConfigError::validation(
                format!("route {} requires an API declaration", route.describe()),
                "apis",
            )
            .into()),
            _ => Err(ConfigError::validation(
                format!(
                    "route {} must name its api (declared: {})",
                    route.describe(),
                    apis.iter().map(|a| a.name.as_str()).collect::<Vec<_>>().join(", ")
                ),
                "routes",
            )
            .into()),
        },
    }
}

fn http_method(route: &RouteDefinition, index: usize) -> Result<String> {
    let verb = route.method.trim().to_ascii_uppercase();
    if !HTTP_METHODS.contains(&verb.as_str()) {
        return Err(ConfigError::validation(
            format!("unsupported HTTP method '{}'", route.method),
            format!("routes[{index}].method"),
        )
        .into());
    }
    if verb == "OPTIONS" && route.cors {
        return Err(ConfigError::validation(
            format!("route {} cannot enable cors on OPTIONS", route.describe()),
            format!("routes[{index}].cors"),
        )
        .into());
    }
    Ok(verb)
}

struct OptionsBuilder {
    name: String,
    resource: Option<String>,
    path: String,
    api: String,
    verbs: Vec<String>,
}

impl OptionsBuilder {
    fn allow(&mut self, verb: &str) {
        let expanded = if verb == "ANY" {
            ANY_EXPANSION
        } else {
            std::slice::from_ref(&verb)
        };
        for v in expanded {
            if !self.verbs.iter().any(|existing| existing == v) {
                self.verbs.push((*v).to_string());
            }
        }
    }

    fn build(mut self) -> MethodOptions {
        self.verbs.push(String::from("OPTIONS"));
        MethodOptions {
            name: self.name,
            resource: self.resource,
            path: self.path,
            allowed_methods_header: self.verbs.join(","),
            allowed_methods: self.verbs,
            api: self.api,
        }
    }
}
