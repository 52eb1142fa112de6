//! Environment loading.
//!
//! The process environment is read into a flat map and overlaid with the
//! `KEY=VALUE` entries of an optional local secrets file. The process
//! environment itself is never modified.

use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info};

use crate::error::{ConfigError, Result};

/// Flat key-value view of the environment.
pub type EnvMap = BTreeMap<String, String>;

/// Default secrets file name, looked up in the config folder.
pub const DEFAULT_ENV_FILE: &str = ".env";

/// Loader for the process environment plus an optional secrets file.
#[derive(Debug, Default)]
pub struct EnvLoader;

impl EnvLoader {
    /// Creates a new environment loader.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Reads the process environment, skipping non-UTF-8 entries.
    #[must_use]
    pub fn process_env(&self) -> EnvMap {
        std::env::vars_os()
            .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
            .collect()
    }

    /// Loads the environment, overlaying the secrets file if it exists.
    ///
    /// Entries from the file win over process variables. A missing file is
    /// not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be parsed.
    pub fn load(&self, env_file: &Path) -> Result<EnvMap> {
        let mut env = self.process_env();

        if !env_file.exists() {
            debug!("Secrets file not found at {}, using process environment only", env_file.display());
            return Ok(env);
        }

        info!("Loading environment from: {}", env_file.display());
        let entries = dotenvy::from_path_iter(env_file).map_err(|e| {
            ConfigError::parse(
                format!("Failed to read secrets file: {e}"),
                Some(env_file.display().to_string()),
            )
        })?;

        let mut loaded = 0usize;
        for entry in entries {
            let (key, value) = entry.map_err(|e| {
                ConfigError::parse(
                    format!("Failed to parse secrets file: {e}"),
                    Some(env_file.display().to_string()),
                )
            })?;
            env.insert(key, value);
            loaded += 1;
        }

        debug!("Loaded {loaded} entries from {}", env_file.display());
        Ok(env)
    }
}
