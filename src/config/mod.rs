//! Configuration module for Stackforge.
//!
//! This module handles all configuration-related functionality:
//! - Loading the secrets file and process environment
//! - Parsing layered `config.yml` documents with `!include` expansion
//! - Deep-merging layers and substituting `{{references}}`
//! - Normalizing deployable units and validating the result

mod document;
mod env;
mod resolver;
mod spec;
mod validator;
mod variables;

pub use document::{ConfigDocument, DEFAULT_LAYER, deep_merge};
pub use env::{DEFAULT_ENV_FILE, EnvLoader, EnvMap};
pub use resolver::{
    ConfigResolver, DEFAULT_CONFIG_FILES, find_config_file, normalize_units, parse_overrides,
};
pub use spec::{
    ApiDefinition, ArtifactLocation, DEFAULT_MEMORY, DEFAULT_TIMEOUT, DeployableUnit,
    RemoteReference, ResolvedConfig, RouteDefinition, StackSettings,
};
pub use validator::{ConfigValidator, ValidationError, ValidationResult};
pub use variables::{SUBSTITUTION_PASSES, build_scope, resolve_variables};
