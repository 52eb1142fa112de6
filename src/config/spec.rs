//! Resolved configuration types.
//!
//! These types describe the configuration after layers are merged,
//! references substituted and deployable units normalized. The template
//! renderer sees them through [`ResolvedConfig::template_data`].

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result, StackforgeError};
use crate::routing::RoutingResourceSet;

/// The fully resolved configuration for one deployment.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConfig {
    /// Name of the remote stack.
    pub stack_name: String,
    /// Region override, if any.
    pub region: Option<String>,
    /// Name of the selected layer.
    pub deployment: String,
    /// Bucket for artifacts and uploaded templates.
    pub artifact_bucket: Option<String>,
    /// Key prefix inside the artifact bucket.
    pub artifact_prefix: String,
    /// Canonical ordered list of deployable units.
    pub lambdas: Vec<DeployableUnit>,
    /// Declared API groups.
    pub apis: Vec<ApiDefinition>,
    /// All routes, top-level and per-unit.
    pub routes: Vec<RouteDefinition>,
    /// Derived routing resources.
    pub routing: RoutingResourceSet,
    /// Stack-level settings.
    pub stack: StackSettings,
    /// The resolved tree, passed through to the template.
    pub values: Map<String, Value>,
    /// Folder containing the configuration file.
    #[serde(skip)]
    pub base_dir: PathBuf,
}

/// A deployable unit (one function).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeployableUnit {
    /// Unit name, unique within the configuration.
    pub name: String,
    /// Entry point.
    #[serde(default)]
    pub handler: String,
    /// Local source path, relative to the config folder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Pre-built artifact reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote: Option<RemoteReference>,
    /// Memory in MB.
    #[serde(default = "default_memory")]
    pub memory: u32,
    /// Timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u32,
    /// Environment variables.
    #[serde(default)]
    pub environment: Map<String, Value>,
    /// `{stackName}-{name}`.
    #[serde(default)]
    pub full_name: String,
    /// Routes served by this unit.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub routes: Vec<RouteDefinition>,
    /// Artifact location, set once packaged.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ArtifactLocation>,
    /// Any other field, passed through to the template.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reference to an artifact already stored remotely (`s3://bucket/key`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(try_from = "String", into = "String")]
pub struct RemoteReference {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
}

/// Where a unit's code lives once packaged.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ArtifactLocation {
    /// Bucket name.
    pub bucket: String,
    /// Object key.
    pub key: String,
    /// Content hash of the source tree, when packaged locally.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hash: Option<String>,
}

/// A declared API group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiDefinition {
    /// Group name.
    pub name: String,
    /// Any other field, passed through to the template.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An HTTP route bound to a unit.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RouteDefinition {
    /// Request path, e.g. `/users/{id}`.
    pub path: String,
    /// HTTP verb or `ANY`.
    pub method: String,
    /// Target unit name. Implied for routes declared on a unit.
    #[serde(default)]
    pub function: String,
    /// Whether CORS preflight is answered for this path.
    #[serde(default)]
    pub cors: bool,
    /// API group; optional when exactly one group is declared.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api: Option<String>,
}

/// Stack-level settings (`stack:` in the configuration).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StackSettings {
    /// Capabilities acknowledged on create and update.
    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<String>,
    /// Stack tags.
    #[serde(default)]
    pub tags: Map<String, Value>,
    /// Stack parameters.
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Template file, relative to the config folder.
    #[serde(default)]
    pub template: Option<String>,
    /// Maximum time to wait for a terminal status.
    #[serde(default)]
    pub timeout_minutes: Option<u32>,
}

impl Default for StackSettings {
    fn default() -> Self {
        Self {
            capabilities: default_capabilities(),
            tags: Map::new(),
            parameters: Map::new(),
            template: None,
            timeout_minutes: None,
        }
    }
}

// Default value functions

/// Default memory for a unit, in MB.
pub const DEFAULT_MEMORY: u32 = 1024;

/// Default timeout for a unit, in seconds.
pub const DEFAULT_TIMEOUT: u32 = 300;

const fn default_memory() -> u32 {
    DEFAULT_MEMORY
}

const fn default_timeout() -> u32 {
    DEFAULT_TIMEOUT
}

fn default_capabilities() -> Vec<String> {
    vec![
        String::from("CAPABILITY_IAM"),
        String::from("CAPABILITY_NAMED_IAM"),
    ]
}

// Remote reference string conversion

impl TryFrom<String> for RemoteReference {
    type Error = String;

    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        Self::parse(&s)
    }
}

impl From<RemoteReference> for String {
    fn from(reference: RemoteReference) -> Self {
        format!("s3://{}/{}", reference.bucket, reference.key)
    }
}

impl RemoteReference {
    /// Parses an `s3://bucket/key` reference.
    ///
    /// # Errors
    ///
    /// Returns an error if the scheme, bucket or key is missing.
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        let rest = s
            .strip_prefix("s3://")
            .ok_or_else(|| format!("Invalid remote reference: {s}. Expected s3://bucket/key"))?;
        let (bucket, key) = rest
            .split_once('/')
            .ok_or_else(|| format!("Invalid remote reference: {s}. Missing object key"))?;
        if bucket.is_empty() || key.is_empty() {
            return Err(format!("Invalid remote reference: {s}. Expected s3://bucket/key"));
        }
        Ok(Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }
}

impl DeployableUnit {
    /// Absolute source path, if the unit is built from local source.
    #[must_use]
    pub fn source_path(&self, base_dir: &Path) -> Option<PathBuf> {
        self.source.as_ref().map(|s| base_dir.join(s))
    }
}

impl RouteDefinition {
    /// Short description used in messages, e.g. `GET /users`.
    #[must_use]
    pub fn describe(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

impl ResolvedConfig {
    /// Looks up a unit by name.
    #[must_use]
    pub fn unit(&self, name: &str) -> Option<&DeployableUnit> {
        self.lambdas.iter().find(|u| u.name == name)
    }

    /// Returns true if any unit is built from local source.
    #[must_use]
    pub fn has_local_sources(&self) -> bool {
        self.lambdas.iter().any(|u| u.source.is_some())
    }

    /// Returns the artifact bucket or fails for the given operation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingBucket`] if no bucket is configured.
    pub fn require_artifact_bucket(&self, operation: &str) -> Result<&str> {
        self.artifact_bucket.as_deref().ok_or_else(|| {
            ConfigError::MissingBucket {
                operation: operation.to_string(),
            }
            .into()
        })
    }

    /// Records the artifact location of each packaged unit.
    pub fn apply_artifacts(&mut self, artifacts: &BTreeMap<String, ArtifactLocation>) {
        for unit in &mut self.lambdas {
            if let Some(location) = artifacts.get(&unit.name) {
                unit.code = Some(location.clone());
            }
        }
    }

    /// Builds the data tree the template is rendered against.
    ///
    /// The pass-through values are overlaid with the resolved forms of
    /// the stack name, region, deployment, artifact bucket, units, APIs,
    /// routes and routing resources.
    ///
    /// # Errors
    ///
    /// Returns an error if a resolved section cannot be serialized.
    pub fn template_data(&self) -> Result<Value> {
        let mut data = self.values.clone();
        let mut set = |key: &str, value: Value| {
            data.insert(key.to_string(), value);
        };

        set("stackName", Value::String(self.stack_name.clone()));
        set("region", self.region.clone().map_or(Value::Null, Value::String));
        set("deployment", Value::String(self.deployment.clone()));
        set(
            "artifactBucket",
            self.artifact_bucket.clone().map_or(Value::Null, Value::String),
        );
        set("artifactPrefix", Value::String(self.artifact_prefix.clone()));
        set("lambdas", to_value(&self.lambdas)?);
        set("apis", to_value(&self.apis)?);
        set("routes", to_value(&self.routes)?);
        set("routing", to_value(&self.routing)?);

        Ok(Value::Object(data))
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    serde_json::to_value(value)
        .map_err(|e| StackforgeError::internal(format!("failed to serialize template data: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_remote_reference_parse() {
        let reference = RemoteReference::parse("s3://my-bucket/builds/f1.zip").unwrap();
        assert_eq!(reference.bucket, "my-bucket");
        assert_eq!(reference.key, "builds/f1.zip");
        assert_eq!(String::from(reference), "s3://my-bucket/builds/f1.zip");
    }

    #[test]
    fn test_remote_reference_invalid() {
        assert!(RemoteReference::parse("my-bucket/f1.zip").is_err());
        assert!(RemoteReference::parse("s3://my-bucket").is_err());
        assert!(RemoteReference::parse("s3:///key").is_err());
    }

    #[test]
    fn test_unit_defaults_and_extra_fields() {
        let unit: DeployableUnit = serde_json::from_value(json!({
            "name": "f1",
            "handler": "f1.run",
            "source": "./f1",
            "runtime": "python3.12"
        }))
        .unwrap();
        assert_eq!(unit.memory, DEFAULT_MEMORY);
        assert_eq!(unit.timeout, DEFAULT_TIMEOUT);
        assert!(unit.environment.is_empty());
        assert_eq!(unit.extra.get("runtime"), Some(&json!("python3.12")));
    }

    #[test]
    fn test_unit_serializes_camel_case() {
        let unit: DeployableUnit = serde_json::from_value(json!({
            "name": "f1",
            "handler": "f1.run",
            "remote": "s3://b/k.zip",
            "fullName": "demo-f1"
        }))
        .unwrap();
        let value = serde_json::to_value(&unit).unwrap();
        assert_eq!(value["fullName"], json!("demo-f1"));
        assert_eq!(value["remote"], json!("s3://b/k.zip"));
        assert!(value.get("source").is_none());
    }

    #[test]
    fn test_stack_settings_default_capabilities() {
        let settings: StackSettings = serde_json::from_value(json!({})).unwrap();
        assert_eq!(settings, StackSettings::default());
        assert!(settings.capabilities.contains(&String::from("CAPABILITY_IAM")));
    }
}
