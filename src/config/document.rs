//! Layered configuration documents.
//!
//! A document is a YAML mapping with a `default` layer and any number of
//! named layers. Values tagged `!include <path>` are replaced by the parsed
//! content of the referenced file before anything else happens.

use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{ConfigError, Result, StackforgeError};

/// Name of the layer every other layer is merged over.
pub const DEFAULT_LAYER: &str = "default";

/// YAML tag that splices in another file.
const INCLUDE_TAG: &str = "include";

/// A parsed configuration document with all includes expanded.
#[derive(Debug, Clone)]
pub struct ConfigDocument {
    path: PathBuf,
    root: Map<String, Value>,
}

impl ConfigDocument {
    /// Loads a document from disk, expanding `!include` tags.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is missing or unparseable, if an
    /// include fails, or if includes form a cycle.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Loading configuration from: {}", path.display());

        let content = std::fs::read_to_string(path).map_err(|_| ConfigError::NotFound {
            path: path.to_path_buf(),
        })?;

        let mut chain = vec![canonical(path)];
        Self::parse_with_chain(&content, path, &mut chain)
    }

    /// Parses a document from a string. Includes resolve relative to the
    /// directory of `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if the YAML is invalid or an include fails.
    pub fn parse(content: &str, source: impl AsRef<Path>) -> Result<Self> {
        let source = source.as_ref();
        let mut chain = vec![canonical(source)];
        Self::parse_with_chain(content, source, &mut chain)
    }

    fn parse_with_chain(content: &str, source: &Path, chain: &mut Vec<PathBuf>) -> Result<Self> {
        let yaml: serde_yaml::Value = serde_yaml::from_str(content).map_err(|e| {
            ConfigError::parse(
                format!("YAML parse error: {e}"),
                Some(source.display().to_string()),
            )
        })?;

        let expanded = expand_includes(yaml, base_dir(source), chain)?;
        let root = match to_json(expanded, source)? {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            _ => {
                return Err(ConfigError::parse(
                    "configuration root must be a mapping",
                    Some(source.display().to_string()),
                )
                .into());
            }
        };

        debug!("Parsed configuration with {} top-level keys", root.len());
        Ok(Self {
            path: source.to_path_buf(),
            root,
        })
    }

    /// Path the document was loaded from.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of the declared layers other than `default`, in document order.
    #[must_use]
    pub fn layer_names(&self) -> Vec<&str> {
        self.root
            .keys()
            .map(String::as_str)
            .filter(|name| *name != DEFAULT_LAYER)
            .collect()
    }

    /// Returns true if the document declares the layer.
    #[must_use]
    pub fn has_layer(&self, name: &str) -> bool {
        self.root.contains_key(name)
    }

    /// Produces the merged tree for a layer: `default` deep-merged with the
    /// selected layer.
    ///
    /// With no selection, a document holding only `default` resolves to its
    /// defaults; a document with named layers requires a selection.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::LayerNotFound`] for an unknown layer and
    /// [`ConfigError::LayerNotSelected`] when a selection is required.
    pub fn merged(&self, selected: Option<&str>) -> Result<Value> {
        let mut tree = self.layer(DEFAULT_LAYER)?.unwrap_or_else(|| Value::Object(Map::new()));

        let Some(name) = selected else {
            let layers = self.layer_names();
            if layers.is_empty() {
                return Ok(tree);
            }
            return Err(ConfigError::LayerNotSelected {
                available: layers.join(", "),
            }
            .into());
        };

        if name != DEFAULT_LAYER {
            let overlay = self.layer(name)?.ok_or_else(|| ConfigError::LayerNotFound {
                layer: name.to_string(),
                available: self.layer_names().join(", "),
            })?;
            debug!("Merging layer '{name}' over defaults");
            deep_merge(&mut tree, overlay);
        }

        Ok(tree)
    }

    fn layer(&self, name: &str) -> Result<Option<Value>> {
        match self.root.get(name) {
            None => Ok(None),
            Some(Value::Null) => Ok(Some(Value::Object(Map::new()))),
            Some(value @ Value::Object(_)) => Ok(Some(value.clone())),
            Some(_) => Err(ConfigError::validation(
                format!("layer '{name}' must be a mapping"),
                name,
            )
            .into()),
        }
    }
}

/// Deep-merges `overlay` into `base`.
///
/// Mappings merge recursively; sequences and scalars in the overlay replace
/// the base value. Keys keep the position they first appeared at.
pub fn deep_merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(&key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        deep_merge(existing, value);
                    }
                    _ => {
                        base_map.insert(key, value);
                    }
                }
            }
        }
        (base, overlay) => *base = overlay,
    }
}

fn expand_includes(
    value: serde_yaml::Value,
    dir: &Path,
    chain: &mut Vec<PathBuf>,
) -> Result<serde_yaml::Value> {
    use serde_yaml::Value as Yaml;
    use serde_yaml::value::TaggedValue;

    match value {
        Yaml::Tagged(tagged) if tagged.tag == INCLUDE_TAG => {
            let Some(relative) = tagged.value.as_str() else {
                return Err(ConfigError::parse("!include expects a file path", None).into());
            };
            include_file(&dir.join(relative), chain)
        }
        Yaml::Tagged(tagged) => {
            let TaggedValue { tag, value } = *tagged;
            Ok(Yaml::Tagged(Box::new(TaggedValue {
                tag,
                value: expand_includes(value, dir, chain)?,
            })))
        }
        Yaml::Mapping(mapping) => {
            let mut out = serde_yaml::Mapping::with_capacity(mapping.len());
            for (key, value) in mapping {
                out.insert(key, expand_includes(value, dir, chain)?);
            }
            Ok(Yaml::Mapping(out))
        }
        Yaml::Sequence(items) => items
            .into_iter()
            .map(|item| expand_includes(item, dir, chain))
            .collect::<Result<Vec<_>>>()
            .map(Yaml::Sequence),
        scalar => Ok(scalar),
    }
}

fn include_file(path: &Path, chain: &mut Vec<PathBuf>) -> Result<serde_yaml::Value> {
    let key = canonical(path);
    if chain.contains(&key) {
        let mut names: Vec<String> = chain.iter().map(|p| p.display().to_string()).collect();
        names.push(key.display().to_string());
        return Err(ConfigError::CircularInclude {
            chain: names.join(" -> "),
        }
        .into());
    }

    debug!("Including {}", path.display());
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IncludeFailed {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&content).map_err(|e| ConfigError::IncludeFailed {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

    chain.push(key);
    let expanded = expand_includes(parsed, base_dir(path), chain);
    chain.pop();
    expanded
}

fn to_json(value: serde_yaml::Value, source: &Path) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        StackforgeError::from(ConfigError::parse(
            format!("unsupported value: {e}"),
            Some(source.display().to_string()),
        ))
    })
}

fn base_dir(path: &Path) -> &Path {
    path.parent().unwrap_or_else(|| Path::new("."))
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}
