//! Validation of resolved configurations.
//!
//! Checks run after substitution and normalization, so every value seen
//! here is final. Errors abort resolution before any remote call; warnings
//! are logged.

use crate::error::{ConfigError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{DeployableUnit, ResolvedConfig};

/// Maximum length of a stack name.
const MAX_STACK_NAME_LEN: usize = 128;

/// Maximum length of a function name.
const MAX_FUNCTION_NAME_LEN: usize = 64;

/// Valid memory range in MB.
const MEMORY_RANGE: std::ops::RangeInclusive<u32> = 128..=10_240;

/// Valid timeout range in seconds.
const TIMEOUT_RANGE: std::ops::RangeInclusive<u32> = 1..=900;

/// Validator for resolved configurations.
#[derive(Debug, Default)]
pub struct ConfigValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl ConfigValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a resolved configuration.
    ///
    /// # Errors
    ///
    /// Returns the first validation error found.
    pub fn validate(&self, config: &ResolvedConfig) -> Result<ValidationResult> {
        let result = self.check(config);

        if let Some(first_error) = result.errors.first() {
            return Err(ConfigError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }
            .into());
        }

        debug!("Configuration validation passed");
        Ok(result)
    }

    /// Collects every error and warning without failing.
    #[must_use]
    pub fn check(&self, config: &ResolvedConfig) -> ValidationResult {
        let mut result = ValidationResult::default();

        Self::validate_stack_name(&config.stack_name, &mut result);
        Self::validate_units(&config.lambdas, &mut result);
        Self::validate_apis(config, &mut result);

        result
    }

    fn validate_stack_name(name: &str, result: &mut ValidationResult) {
        if name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("stackName"),
                message: String::from("Stack name cannot be empty"),
            });
        } else if !is_valid_stack_name(name) {
            result.errors.push(ValidationError {
                field: String::from("stackName"),
                message: format!(
                    "Stack name '{name}' is invalid. Must start with a letter and contain only letters, digits and hyphens (max {MAX_STACK_NAME_LEN})."
                ),
            });
        }
    }

    fn validate_units(units: &[DeployableUnit], result: &mut ValidationResult) {
        if units.is_empty() {
            result.warnings.push(String::from("No lambdas defined in configuration"));
            return;
        }

        let mut seen_names = HashSet::new();

        for (i, unit) in units.iter().enumerate() {
            let prefix = format!("lambdas[{i}]");

            if !seen_names.insert(unit.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate lambda name: {}", unit.name),
                });
            }

            if !is_valid_unit_name(&unit.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Lambda name '{}' is invalid. Must start with a letter and contain only letters, digits, hyphens and underscores.",
                        unit.name
                    ),
                });
            }

            if unit.full_name.len() > MAX_FUNCTION_NAME_LEN {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.fullName"),
                    message: format!(
                        "Function name '{}' exceeds {MAX_FUNCTION_NAME_LEN} characters",
                        unit.full_name
                    ),
                });
            }

            if unit.handler.trim().is_empty() {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.handler"),
                    message: format!("Lambda '{}' has no handler", unit.name),
                });
            }

            match (&unit.source, &unit.remote) {
                (Some(_), Some(_)) => result.errors.push(ValidationError {
                    field: format!("{prefix}.source"),
                    message: format!("Lambda '{}' sets both source and remote", unit.name),
                }),
                (None, None) => result.errors.push(ValidationError {
                    field: format!("{prefix}.source"),
                    message: format!("Lambda '{}' needs either source or remote", unit.name),
                }),
                (Some(source), None) if source.trim().is_empty() => {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.source"),
                        message: format!("Lambda '{}' has an empty source path", unit.name),
                    });
                }
                _ => {}
            }

            if !MEMORY_RANGE.contains(&unit.memory) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.memory"),
                    message: format!(
                        "Memory {} MB is out of range ({}..={})",
                        unit.memory,
                        MEMORY_RANGE.start(),
                        MEMORY_RANGE.end()
                    ),
                });
            }

            if !TIMEOUT_RANGE.contains(&unit.timeout) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.timeout"),
                    message: format!(
                        "Timeout {} s is out of range ({}..={})",
                        unit.timeout,
                        TIMEOUT_RANGE.start(),
                        TIMEOUT_RANGE.end()
                    ),
                });
            }

            for (key, value) in &unit.environment {
                if value.is_object() || value.is_array() {
                    result.errors.push(ValidationError {
                        field: format!("{prefix}.environment.{key}"),
                        message: String::from("Environment values must be scalars"),
                    });
                }
            }
        }
    }

    fn validate_apis(config: &ResolvedConfig, result: &mut ValidationResult) {
        let mut seen_names = HashSet::new();

        for (i, api) in config.apis.iter().enumerate() {
            if api.name.is_empty() {
                result.errors.push(ValidationError {
                    field: format!("apis[{i}].name"),
                    message: String::from("API name cannot be empty"),
                });
            } else if !seen_names.insert(api.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("apis[{i}].name"),
                    message: format!("Duplicate API name: {}", api.name),
                });
            }

            let routed = config
                .routing
                .api_dependencies
                .get(&api.name)
                .is_some_and(|methods| !methods.is_empty());
            if !routed {
                result
                    .warnings
                    .push(format!("API '{}' has no routes", api.name));
            }
        }
    }
}

/// Stack names start with a letter and contain letters, digits and hyphens.
fn is_valid_stack_name(name: &str) -> bool {
    name.len() <= MAX_STACK_NAME_LEN
        && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
}

/// Unit names start with a letter and contain letters, digits, hyphens and
/// underscores.
fn is_valid_unit_name(name: &str) -> bool {
    name.chars().next().is_some_and(|c| c.is_ascii_alphabetic())
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}
