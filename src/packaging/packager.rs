//! Artifact packager trait and packaging plan.

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::debug;

use crate::config::{ArtifactLocation, ResolvedConfig};
use crate::error::{PackageError, Result};

/// One distinct source path and the units built from it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    /// Canonical source path.
    pub source: PathBuf,
    /// Units sharing this source, in configuration order.
    pub units: Vec<String>,
}

/// A built archive ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Canonical source path.
    pub source: PathBuf,
    /// Units built from this archive.
    pub units: Vec<String>,
    /// Content hash of the source tree.
    pub hash: String,
    /// Local archive file.
    pub archive: PathBuf,
    /// Object key the archive is stored under.
    pub key: String,
}

/// Builds and stores deployable artifacts.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ArtifactPackager: Send + Sync {
    /// Hashes and archives one source path.
    async fn package(&self, request: &PackageRequest) -> Result<Artifact>;

    /// Uploads an archive, skipping objects that already exist.
    async fn upload(&self, artifact: &Artifact) -> Result<ArtifactLocation>;

    /// Stores a rendered template and returns its URL.
    async fn upload_template(&self, key: &str, body: &str) -> Result<String>;
}

impl Artifact {
    /// Label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        self.units.join(",")
    }
}

impl PackageRequest {
    /// Label used in logs and errors.
    #[must_use]
    pub fn label(&self) -> String {
        self.units.join(",")
    }
}

/// Object key of an artifact. Depends only on the content hash.
#[must_use]
pub fn artifact_key(prefix: &str, hash: &str) -> String {
    format!("{prefix}artifacts/{hash}.zip")
}

/// Object key of an uploaded template.
#[must_use]
pub fn template_key(prefix: &str, stack_name: &str, hash: &str, extension: &str) -> String {
    format!("{prefix}templates/{stack_name}/{hash}.{extension}")
}

/// Groups units with local sources by canonical source path.
///
/// Units pointing at the same folder share one request, so each distinct
/// source is hashed, archived and uploaded once.
///
/// # Errors
///
/// Returns [`PackageError::SourceNotFound`] if a source path does not exist.
pub fn plan_packages(config: &ResolvedConfig) -> Result<Vec<PackageRequest>> {
    let mut requests: Vec<PackageRequest> = Vec::new();

    for unit in &config.lambdas {
        let Some(path) = unit.source_path(&config.base_dir) else {
            continue;
        };
        let source = path.canonicalize().map_err(|_| PackageError::SourceNotFound {
            unit: unit.name.clone(),
            path: path.clone(),
        })?;

        if let Some(existing) = requests.iter_mut().find(|r| r.source == source) {
            debug!("Unit {} shares source {}", unit.name, source.display());
            existing.units.push(unit.name.clone());
        } else {
            requests.push(PackageRequest {
                source,
                units: vec![unit.name.clone()],
            });
        }
    }

    Ok(requests)
}

/// Expands per-artifact locations into per-unit locations.
#[must_use]
pub fn unit_locations(
    artifacts: &[Artifact],
    locations: &[ArtifactLocation],
) -> BTreeMap<String, ArtifactLocation> {
    artifacts
        .iter()
        .zip(locations)
        .flat_map(|(artifact, location)| {
            artifact
                .units
                .iter()
                .map(move |unit| (unit.clone(), location.clone()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigResolver, EnvMap};
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_keys() {
        assert_eq!(artifact_key("", "abc"), "artifacts/abc.zip");
        assert_eq!(artifact_key("team/", "abc"), "team/artifacts/abc.zip");
        assert_eq!(
            template_key("team/", "demo", "abc", "yml"),
            "team/templates/demo/abc.yml"
        );
    }

    #[test]
    fn test_identical_sources_share_one_request() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/shared")).unwrap();
        std::fs::write(dir.path().join("src/shared/index.js"), "exports.h = 1").unwrap();
        std::fs::create_dir_all(dir.path().join("other")).unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            r"
default:
  stackName: demo
  lambdas:
    - name: a
      handler: index.a
      source: ./src/shared
    - name: b
      handler: index.b
      source: src/shared/
    - name: c
      handler: index.c
      source: ./other
    - name: d
      handler: index.d
      remote: s3://prebuilt/d.zip
",
        )
        .unwrap();

        let config = ConfigResolver::new(EnvMap::new())
            .resolve(dir.path(), None, &json!({}))
            .unwrap();
        let requests = plan_packages(&config).unwrap();

        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].units, vec!["a", "b"]);
        assert_eq!(requests[1].units, vec!["c"]);
    }

    #[test]
    fn test_missing_source_fails() {
        let dir = TempDir::new().unwrap();
        std::fs::write(
            dir.path().join("config.yml"),
            "default:\n  stackName: demo\n  lambdas:\n    - name: a\n      handler: h\n      source: ./missing\n",
        )
        .unwrap();
        let config = ConfigResolver::new(EnvMap::new())
            .resolve(dir.path(), None, &json!({}))
            .unwrap();
        assert!(plan_packages(&config).is_err());
    }

    #[test]
    fn test_unit_locations_fan_out() {
        let artifact = Artifact {
            source: PathBuf::from("/src"),
            units: vec![String::from("a"), String::from("b")],
            hash: String::from("abc"),
            archive: PathBuf::from("/tmp/abc.zip"),
            key: String::from("artifacts/abc.zip"),
        };
        let location = ArtifactLocation {
            bucket: String::from("bucket"),
            key: String::from("artifacts/abc.zip"),
            hash: Some(String::from("abc")),
        };
        let map = unit_locations(&[artifact], &[location.clone()]);
        assert_eq!(map.len(), 2);
        assert_eq!(map["a"], location);
        assert_eq!(map["b"], location);
    }
}
