//! CLI command definitions.
//!
//! This module defines all CLI commands and their arguments using clap.

use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::config::{
    ConfigResolver, DEFAULT_ENV_FILE, EnvLoader, ResolvedConfig, deep_merge, parse_overrides,
};
use crate::deploy::{DeployOptions, Operation};
use crate::error::Result;

/// Stackforge - layered-config `CloudFormation` deployments.
#[derive(Parser, Debug)]
#[command(name = "stackforge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Folder containing `config.yml`, or the configuration file itself.
    #[arg(
        short,
        long,
        global = true,
        env = "STACKFORGE_CONFIG_DIR",
        default_value = "."
    )]
    pub config_dir: PathBuf,

    /// Deployment layer merged over `default`.
    #[arg(short, long, global = true, env = "STACKFORGE_DEPLOYMENT")]
    pub deployment: Option<String>,

    /// AWS region, overriding the configured one.
    #[arg(short, long, global = true)]
    pub region: Option<String>,

    /// AWS profile.
    #[arg(short, long, global = true)]
    pub profile: Option<String>,

    /// Skip confirmation prompts.
    #[arg(short, long, global = true)]
    pub yes: bool,

    /// Keep failed resources instead of rolling back.
    #[arg(long, global = true)]
    pub disable_rollback: bool,

    /// Print stack outputs after converging.
    #[arg(long, global = true)]
    pub show_outputs: bool,

    /// Fail on unresolved references instead of rendering them empty.
    #[arg(long, global = true)]
    pub strict: bool,

    /// Override a configuration value (repeatable).
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub set: Vec<String>,

    /// Enable verbose output.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Output format (text, json).
    #[arg(long, global = true, default_value = "text")]
    pub output: OutputFormat,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create the stack.
    Create,

    /// Update the existing stack.
    Update,

    /// Create the stack if missing, update it otherwise.
    #[command(alias = "deploy")]
    Upsert,

    /// Render the template and validate it remotely.
    Validate,

    /// Render the template locally.
    Compile {
        /// Write the template to a file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Delete the stack.
    Delete,
}

/// Output format options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

impl Commands {
    /// Operation run by the command.
    #[must_use]
    pub const fn operation(&self) -> Operation {
        match self {
            Self::Create => Operation::Create,
            Self::Update => Operation::Update,
            Self::Upsert => Operation::Upsert,
            Self::Validate => Operation::Validate,
            Self::Compile { .. } => Operation::Compile,
            Self::Delete => Operation::Delete,
        }
    }
}

impl Cli {
    /// Folder the configuration and secrets file live in.
    #[must_use]
    pub fn config_folder(&self) -> &Path {
        if self.config_dir.is_file() {
            self.config_dir.parent().unwrap_or_else(|| Path::new("."))
        } else {
            &self.config_dir
        }
    }

    /// Override mapping built from `--set` and `--region`.
    ///
    /// # Errors
    ///
    /// Returns an error if an assignment is malformed.
    pub fn overrides(&self) -> Result<serde_json::Value> {
        let mut overrides = parse_overrides(&self.set)?;
        if let Some(region) = &self.region {
            deep_merge(&mut overrides, json!({ "region": region }));
        }
        Ok(overrides)
    }

    /// Loads the secrets file and resolves the configuration.
    ///
    /// No remote call is made.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration cannot be resolved.
    pub fn resolve_config(&self) -> Result<ResolvedConfig> {
        let env_file = self.config_folder().join(DEFAULT_ENV_FILE);
        let env = EnvLoader::new().load(&env_file)?;
        debug!("Loaded {} environment entries", env.len());

        ConfigResolver::new(env).with_strict(self.strict).resolve(
            &self.config_dir,
            self.deployment.as_deref(),
            &self.overrides()?,
        )
    }

    /// Deployment options derived from the flags.
    #[must_use]
    pub fn deploy_options(&self) -> DeployOptions {
        DeployOptions {
            disable_rollback: self.disable_rollback,
            skip_confirmation: self.yes,
            strict: self.strict,
            ..DeployOptions::default()
        }
    }
}
