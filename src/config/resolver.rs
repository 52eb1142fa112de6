//! Layered configuration resolution.
//!
//! Resolution runs in a fixed order: locate the document, expand includes,
//! merge the selected layer over `default`, merge CLI overrides, substitute
//! references, normalize deployable units, derive routing resources and
//! validate the result.

use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::error::{ConfigError, Result};
use crate::routing;
use crate::template::RenderOptions;

use super::document::{ConfigDocument, DEFAULT_LAYER, deep_merge};
use super::env::EnvMap;
use super::spec::{
    ApiDefinition, ArtifactLocation, DeployableUnit, ResolvedConfig, RouteDefinition,
    StackSettings,
};
use super::validator::ConfigValidator;
use super::variables::resolve_variables;

/// Configuration file names searched in the config folder.
pub const DEFAULT_CONFIG_FILES: &[&str] = &["config.yml", "config.yaml"];

/// Resolver for layered configuration documents.
#[derive(Debug, Default)]
pub struct ConfigResolver {
    env: EnvMap,
    options: RenderOptions,
}

impl ConfigResolver {
    /// Creates a resolver with the given environment as substitution scope.
    #[must_use]
    pub fn new(env: EnvMap) -> Self {
        Self {
            env,
            options: RenderOptions::default(),
        }
    }

    /// Enables strict reference checking.
    #[must_use]
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.options = RenderOptions::strict(strict);
        self
    }

    /// Resolves the configuration for the selected layer.
    ///
    /// `base_path` is the configuration file or the folder containing it.
    /// `overrides` is a mapping deep-merged over the selected layer before
    /// substitution.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the document is missing or invalid, the
    /// layer does not exist, a reference cannot be resolved in strict mode,
    /// or validation fails.
    pub fn resolve(
        &self,
        base_path: &Path,
        selected_layer: Option<&str>,
        overrides: &Value,
    ) -> Result<ResolvedConfig> {
        let path = find_config_file(base_path)?;
        let document = ConfigDocument::load(&path)?;
        let mut tree = document.merged(selected_layer)?;

        if overrides.as_object().is_some_and(|o| !o.is_empty()) {
            debug!("Applying command-line overrides");
            apply_overrides(&mut tree, overrides.clone(), "")?;
        }

        let tree = resolve_variables(tree, &self.env, self.options)?;
        let base_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("."), Path::to_path_buf);
        let deployment = selected_layer.unwrap_or(DEFAULT_LAYER);

        let config = build_config(tree, deployment, base_dir)?;
        let result = ConfigValidator::new().validate(&config)?;
        for warning in &result.warnings {
            warn!("{warning}");
        }

        info!(
            "Resolved stack {} ({} lambdas, {} routes) for deployment '{}'",
            config.stack_name,
            config.lambdas.len(),
            config.routes.len(),
            config.deployment
        );
        Ok(config)
    }
}

/// Locates the configuration file for a path.
///
/// A file path is returned as is; a folder is searched for
/// [`DEFAULT_CONFIG_FILES`].
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if no configuration file exists.
pub fn find_config_file(base_path: impl AsRef<Path>) -> Result<PathBuf> {
    let base = base_path.as_ref();
    if base.is_file() {
        return Ok(base.to_path_buf());
    }

    for filename in DEFAULT_CONFIG_FILES {
        let config_path = base.join(filename);
        if config_path.is_file() {
            info!("Found configuration file: {}", config_path.display());
            return Ok(config_path);
        }
    }

    Err(ConfigError::NotFound {
        path: base.join(DEFAULT_CONFIG_FILES[0]),
    }
    .into())
}

/// Parses `KEY.PATH=VALUE` assignments into an override mapping.
///
/// Values are read as YAML scalars, so `--set lambdas.f1.memory=512` yields
/// a number. When the target is a sequence, the next key segment selects
/// an entry by its `name` or by index, so the example works for both the
/// list and the mapping form of `lambdas`.
///
/// # Errors
///
/// Returns a validation error for assignments without `=` or with an
/// empty key segment.
pub fn parse_overrides(assignments: &[String]) -> Result<Value> {
    let mut overrides = Value::Object(Map::new());

    for assignment in assignments {
        let (key, raw) = assignment.split_once('=').ok_or_else(|| {
            ConfigError::validation(format!("Invalid override '{assignment}'. Expected KEY=VALUE"), "--set")
        })?;
        if key.split('.').any(str::is_empty) {
            return Err(ConfigError::validation(
                format!("Invalid override key '{key}'"),
                "--set",
            )
            .into());
        }

        let value = if raw.is_empty() {
            Value::String(String::new())
        } else {
            serde_yaml::from_str::<Value>(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
        };

        let nested = key
            .rsplit('.')
            .fold(value, |inner, segment| {
                let mut map = Map::new();
                map.insert(segment.to_string(), inner);
                Value::Object(map)
            });
        deep_merge(&mut overrides, nested);
    }

    Ok(overrides)
}

/// Merges an override mapping into the tree.
///
/// Mappings merge as in layer merging. A mapping applied to a sequence
/// addresses entries by `name` or index instead of replacing the sequence.
fn apply_overrides(base: &mut Value, overlay: Value, path: &str) -> Result<()> {
    match (base, overlay) {
        (Value::Array(items), Value::Object(entries)) => {
            for (key, value) in entries {
                let field = join_key(path, &key);
                let item = match key.parse::<usize>() {
                    Ok(index) => items.get_mut(index),
                    Err(_) => items
                        .iter_mut()
                        .find(|item| item.get("name").and_then(Value::as_str) == Some(key.as_str())),
                }
                .ok_or_else(|| {
                    ConfigError::validation(format!("override '{field}' matches no entry"), "--set")
                })?;
                apply_overrides(item, value, &field)?;
            }
            Ok(())
        }
        (Value::Object(map), Value::Object(entries)) => {
            for (key, value) in entries {
                let field = join_key(path, &key);
                match map.get_mut(&key) {
                    Some(existing) => apply_overrides(existing, value, &field)?,
                    None => {
                        map.insert(key, value);
                    }
                }
            }
            Ok(())
        }
        (slot, value) => {
            *slot = value;
            Ok(())
        }
    }
}

fn join_key(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn build_config(tree: Value, deployment: &str, base_dir: PathBuf) -> Result<ResolvedConfig> {
    let Value::Object(values) = tree else {
        return Err(ConfigError::parse("configuration root must be a mapping", None).into());
    };

    let stack_name = match values.get("stackName") {
        Some(Value::String(name)) if !name.is_empty() => name.clone(),
        _ => {
            return Err(ConfigError::validation("stackName is required", "stackName").into());
        }
    };

    let region = non_empty_str(values.get("region"));
    let artifacts = values.get("artifacts");
    let artifact_bucket = non_empty_str(artifacts.and_then(|a| a.get("bucket")))
        .or_else(|| non_empty_str(values.get("bucket")));
    let artifact_prefix = non_empty_str(artifacts.and_then(|a| a.get("prefix")))
        .map(|p| {
            let trimmed = p.trim_matches('/');
            format!("{trimmed}/")
        })
        .unwrap_or_default();

    let lambdas = normalize_units(values.get("lambdas"), &stack_name)?;
    let apis: Vec<ApiDefinition> = named_entries(values.get("apis"), "apis")?
        .into_iter()
        .enumerate()
        .map(|(i, entry)| from_entry(entry, &format!("apis[{i}]")))
        .collect::<Result<_>>()?;
    let routes = collect_routes(values.get("routes"), &lambdas)?;
    let routing = routing::derive(&apis, &routes, &lambdas)?;
    let stack: StackSettings = match values.get("stack") {
        None | Some(Value::Null) => StackSettings::default(),
        Some(section) => from_entry(section.clone(), "stack")?,
    };

    Ok(ResolvedConfig {
        stack_name,
        region,
        deployment: deployment.to_string(),
        artifact_bucket,
        artifact_prefix,
        lambdas,
        apis,
        routes,
        routing,
        stack,
        values,
        base_dir,
    })
}

/// Normalizes `lambdas` from either list or mapping form into the canonical
/// ordered list, applying defaults and computing full names.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the section or an entry is malformed.
pub fn normalize_units(section: Option<&Value>, stack_name: &str) -> Result<Vec<DeployableUnit>> {
    let mut units = Vec::new();

    for (i, entry) in named_entries(section, "lambdas")?.into_iter().enumerate() {
        let field = format!("lambdas[{i}]");
        let mut unit: DeployableUnit = from_entry(entry, &field)?;
        unit.full_name = format!("{stack_name}-{}", unit.name);

        if let Some(remote) = &unit.remote {
            unit.code = Some(ArtifactLocation {
                bucket: remote.bucket.clone(),
                key: remote.key.clone(),
                hash: None,
            });
        }

        for route in &mut unit.routes {
            if route.function.is_empty() {
                route.function.clone_from(&unit.name);
            } else if route.function != unit.name {
                return Err(ConfigError::validation(
                    format!(
                        "route {} on lambda '{}' targets '{}'",
                        route.describe(),
                        unit.name,
                        route.function
                    ),
                    format!("{field}.routes"),
                )
                .into());
            }
        }

        units.push(unit);
    }

    Ok(units)
}

/// Unit routes in unit order, then top-level routes.
fn collect_routes(section: Option<&Value>, units: &[DeployableUnit]) -> Result<Vec<RouteDefinition>> {
    let mut routes: Vec<RouteDefinition> =
        units.iter().flat_map(|u| u.routes.iter().cloned()).collect();

    match section {
        None | Some(Value::Null) => {}
        Some(Value::Array(items)) => {
            for (i, item) in items.iter().enumerate() {
                routes.push(from_entry(item.clone(), &format!("routes[{i}]"))?);
            }
        }
        Some(_) => {
            return Err(ConfigError::validation("routes must be a list", "routes").into());
        }
    }

    Ok(routes)
}

/// Flattens a list-or-mapping section into entry mappings that carry a
/// `name`. Mapping keys become names; bare strings in list form are names.
fn named_entries(section: Option<&Value>, field: &str) -> Result<Vec<Value>> {
    match section {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::String(name) => Ok(named(name, Map::new())),
                Value::Object(_) => Ok(item.clone()),
                _ => Err(ConfigError::validation(
                    "entries must be mappings",
                    format!("{field}[{i}]"),
                )
                .into()),
            })
            .collect(),
        Some(Value::Object(map)) => map
            .iter()
            .map(|(key, item)| match item {
                Value::Null => Ok(named(key, Map::new())),
                Value::Object(body) => match body.get("name") {
                    Some(Value::String(name)) if name != key => Err(ConfigError::validation(
                        format!("entry '{key}' declares a different name '{name}'"),
                        format!("{field}.{key}.name"),
                    )
                    .into()),
                    _ => Ok(named(key, body.clone())),
                },
                _ => Err(ConfigError::validation(
                    "entries must be mappings",
                    format!("{field}.{key}"),
                )
                .into()),
            })
            .collect(),
        Some(_) => Err(ConfigError::validation(
            format!("{field} must be a list or a mapping"),
            field,
        )
        .into()),
    }
}

fn named(name: &str, body: Map<String, Value>) -> Value {
    let mut entry = Map::with_capacity(body.len() + 1);
    entry.insert(String::from("name"), Value::String(name.to_string()));
    for (key, value) in body {
        if key != "name" {
            entry.insert(key, value);
        }
    }
    Value::Object(entry)
}

fn from_entry<T: DeserializeOwned>(entry: Value, field: &str) -> Result<T> {
    serde_json::from_value(entry).map_err(|e| {
        ConfigError::ParseError {
            message: format!("{field}: {e}"),
            location: Some(field.to_string()),
        }
        .into()
    })
}

fn non_empty_str(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackforgeError;
    use serde_json::json;
    use tempfile::TempDir;

    const EXAMPLE: &str = r"
default:
  stackName: demo
  lambdas:
    - name: f1
      handler: f1.run
      source: ./f1
prod:
  stackName: demo-prod
";

    fn write_config(content: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yml"), content).unwrap();
        dir
    }

    fn resolver() -> ConfigResolver {
        ConfigResolver::new(EnvMap::new())
    }

    fn no_overrides() -> Value {
        json!({})
    }

    #[test]
    fn test_example_layer_merge() {
        let dir = write_config(EXAMPLE);
        let config = resolver()
            .resolve(dir.path(), Some("prod"), &no_overrides())
            .unwrap();

        assert_eq!(config.stack_name, "demo-prod");
        assert_eq!(config.deployment, "prod");
        assert_eq!(config.lambdas.len(), 1);
        let unit = &config.lambdas[0];
        assert_eq!(unit.full_name, "demo-prod-f1");
        assert_eq!(unit.memory, 1024);
        assert_eq!(unit.timeout, 300);
        assert!(unit.environment.is_empty());
        assert_eq!(config.base_dir, dir.path());
    }

    #[test]
    fn test_missing_layer_fails() {
        let dir = write_config(EXAMPLE);
        let err = resolver()
            .resolve(dir.path(), Some("staging"), &no_overrides())
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Config(ConfigError::LayerNotFound { ref layer, .. }) if layer == "staging"
        ));
    }

    #[test]
    fn test_missing_config_file() {
        let dir = TempDir::new().unwrap();
        let err = resolver()
            .resolve(dir.path(), Some("prod"), &no_overrides())
            .unwrap_err();
        assert!(matches!(err, StackforgeError::Config(ConfigError::NotFound { .. })));
    }

    #[test]
    fn test_mapping_form_matches_list_form() {
        let list = write_config(EXAMPLE);
        let map = write_config(
            r"
default:
  stackName: demo
  lambdas:
    f1:
      handler: f1.run
      source: ./f1
prod:
  stackName: demo-prod
",
        );
        let from_list = resolver().resolve(list.path(), Some("prod"), &no_overrides()).unwrap();
        let from_map = resolver().resolve(map.path(), Some("prod"), &no_overrides()).unwrap();
        assert_eq!(from_list.lambdas, from_map.lambdas);
    }

    #[test]
    fn test_references_and_overrides() {
        let dir = write_config(
            r"
default:
  stackName: demo-{{deployment}}
  deployment: dev
  artifacts:
    bucket: '{{stackName}}-artifacts'
    prefix: /builds
  defaults:
    memory: 512
  lambdas:
    - name: f1
      handler: f1.run
      source: ./f1
      memory: '{{defaults.memory}}'
      environment:
        TABLE: '{{stackName}}-table'
",
        );
        let overrides = parse_overrides(&[String::from("deployment=prod")]).unwrap();
        let config = resolver().resolve(dir.path(), None, &overrides).unwrap();

        assert_eq!(config.stack_name, "demo-prod");
        assert_eq!(config.artifact_bucket.as_deref(), Some("demo-prod-artifacts"));
        assert_eq!(config.artifact_prefix, "builds/");
        assert_eq!(config.lambdas[0].memory, 512);
        assert_eq!(config.lambdas[0].environment["TABLE"], json!("demo-prod-table"));
    }

    #[test]
    fn test_override_targets_list_entry_by_name() {
        let dir = write_config(
            r"
default:
  stackName: demo
  lambdas:
    - name: f1
      handler: f1.run
      source: ./f1
    - name: f2
      handler: f2.run
      source: ./f2
",
        );
        let overrides = parse_overrides(&[
            String::from("lambdas.f1.memory=512"),
            String::from("lambdas.1.timeout=60"),
        ])
        .unwrap();
        let config = resolver().resolve(dir.path(), None, &overrides).unwrap();

        assert_eq!(config.lambdas.len(), 2);
        assert_eq!(config.lambdas[0].name, "f1");
        assert_eq!(config.lambdas[0].handler, "f1.run");
        assert_eq!(config.lambdas[0].memory, 512);
        assert_eq!(config.lambdas[1].name, "f2");
        assert_eq!(config.lambdas[1].memory, 1024);
        assert_eq!(config.lambdas[1].timeout, 60);
    }

    #[test]
    fn test_override_on_unknown_list_entry_fails() {
        let dir = write_config(EXAMPLE);
        let overrides = parse_overrides(&[String::from("lambdas.ghost.memory=512")]).unwrap();
        let err = resolver()
            .resolve(dir.path(), Some("prod"), &overrides)
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Config(ConfigError::ValidationError { ref message, .. })
                if message.contains("lambdas.ghost")
        ));
    }

    #[test]
    fn test_legacy_bucket_key() {
        let dir = write_config(
            "default:\n  stackName: demo\n  bucket: legacy\n  lambdas:\n    - name: f1\n      handler: h\n      source: ./f1\n",
        );
        let config = resolver().resolve(dir.path(), None, &no_overrides()).unwrap();
        assert_eq!(config.require_artifact_bucket("create").unwrap(), "legacy");
    }

    #[test]
    fn test_missing_bucket_is_operation_dependent() {
        let dir = write_config(
            "default:\n  stackName: demo\n  lambdas:\n    - name: f1\n      handler: h\n      source: ./f1\n",
        );
        let config = resolver().resolve(dir.path(), None, &no_overrides()).unwrap();
        assert!(config.artifact_bucket.is_none());
        assert!(matches!(
            config.require_artifact_bucket("update").unwrap_err(),
            StackforgeError::Config(ConfigError::MissingBucket { .. })
        ));
    }

    #[test]
    fn test_remote_unit_gets_code_location() {
        let dir = write_config(
            "default:\n  stackName: demo\n  lambdas:\n    - name: f1\n      handler: h\n      remote: s3://shared/f1.zip\n",
        );
        let config = resolver().resolve(dir.path(), None, &no_overrides()).unwrap();
        let code = config.lambdas[0].code.as_ref().unwrap();
        assert_eq!(code.bucket, "shared");
        assert_eq!(code.key, "f1.zip");
    }

    #[test]
    fn test_routes_are_derived() {
        let dir = write_config(
            r"
default:
  stackName: demo
  apis:
    - public
  lambdas:
    users:
      handler: users.handler
      source: ./users
      routes:
        - path: /users
          method: get
          cors: true
  routes:
    - path: /users/{id}
      method: DELETE
      function: users
",
        );
        let config = resolver().resolve(dir.path(), None, &no_overrides()).unwrap();
        assert_eq!(config.routes.len(), 2);
        assert_eq!(config.routes[0].function, "users");
        let methods: Vec<&str> = config.routing.methods.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(methods, vec!["UsersGET", "UsersidVarDELETE"]);
        assert_eq!(config.routing.method_options.len(), 1);
    }

    #[test]
    fn test_route_to_unknown_function_fails() {
        let dir = write_config(
            r"
default:
  stackName: demo
  apis: [public]
  lambdas: []
  routes:
    - path: /x
      method: GET
      function: ghost
",
        );
        assert!(resolver().resolve(dir.path(), None, &no_overrides()).is_err());
    }

    #[test]
    fn test_strict_mode() {
        let dir = write_config("default:\n  stackName: '{{nope}}demo'\n");
        let err = resolver()
            .with_strict(true)
            .resolve(dir.path(), None, &no_overrides())
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Config(ConfigError::UnresolvedReference { .. })
        ));
    }

    #[test]
    fn test_parse_overrides() {
        let overrides = parse_overrides(&[
            String::from("region=eu-west-1"),
            String::from("stack.timeoutMinutes=30"),
            String::from("stack.tags.team=core"),
        ])
        .unwrap();
        assert_eq!(
            overrides,
            json!({"region": "eu-west-1", "stack": {"timeoutMinutes": 30, "tags": {"team": "core"}}})
        );
        assert!(parse_overrides(&[String::from("novalue")]).is_err());
        assert!(parse_overrides(&[String::from("a..b=1")]).is_err());
    }
}
