//! Error types for the Stackforge deployment system.
//!
//! This module provides the error hierarchy for every stage of a deployment:
//! configuration resolution, template rendering, artifact packaging, remote
//! stack operations, and the deployment state machine itself.

use std::path::PathBuf;
use thiserror::Error;

/// The main error type for the Stackforge deployment system.
#[derive(Debug, Error)]
pub enum StackforgeError {
    /// Configuration-related errors.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Template compilation and rendering errors.
    #[error("Template error: {0}")]
    Template(#[from] TemplateError),

    /// Artifact packaging errors.
    #[error("Packaging error: {0}")]
    Package(#[from] PackageError),

    /// Remote service errors (`CloudFormation`, S3).
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),

    /// Deployment state machine errors.
    #[error("Deployment error: {0}")]
    Deploy(#[from] DeployError),

    /// IO errors.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The configuration file was not found or is unreadable.
    #[error("Configuration file not found: {path}")]
    NotFound {
        /// Path to the missing file.
        path: PathBuf,
    },

    /// The selected layer does not exist in the document.
    #[error("Deployment '{layer}' not found in configuration (available: {available})")]
    LayerNotFound {
        /// Requested layer name.
        layer: String,
        /// Comma-separated list of declared layers.
        available: String,
    },

    /// No layer was selected although the document declares several.
    #[error("No deployment selected; choose one of: {available}")]
    LayerNotSelected {
        /// Comma-separated list of declared layers.
        available: String,
    },

    /// The configuration file could not be parsed.
    #[error("Failed to parse configuration: {message}")]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Optional source location.
        location: Option<String>,
    },

    /// Validation failed.
    #[error("Configuration validation failed: {message}")]
    ValidationError {
        /// Description of the validation error.
        message: String,
        /// Field that failed validation.
        field: Option<String>,
    },

    /// An included file could not be loaded.
    #[error("Failed to include {path}: {message}")]
    IncludeFailed {
        /// Path of the included file.
        path: PathBuf,
        /// Description of the failure.
        message: String,
    },

    /// Include directives form a cycle.
    #[error("Circular include detected: {chain}")]
    CircularInclude {
        /// The include chain that loops.
        chain: String,
    },

    /// A `{{reference}}` could not be resolved in strict mode.
    #[error("Unresolved reference '{reference}'")]
    UnresolvedReference {
        /// The reference expression.
        reference: String,
    },

    /// A route references an API group that was never declared.
    #[error("Route {route} references undefined API '{api}'")]
    ApiGroupUndefined {
        /// The missing API group name.
        api: String,
        /// Route description (`METHOD path`).
        route: String,
    },

    /// The artifact bucket is required but not configured.
    #[error("Artifact bucket is required for '{operation}' (set artifacts.bucket)")]
    MissingBucket {
        /// Operation that requires the bucket.
        operation: String,
    },

    /// Duplicate resource definition.
    #[error("Duplicate {resource_type} name: {name}")]
    DuplicateName {
        /// Type of resource (lambda, route, ...).
        resource_type: String,
        /// The duplicated name.
        name: String,
    },
}

/// Template compilation and rendering errors.
#[derive(Debug, Error)]
pub enum TemplateError {
    /// The template contains a malformed directive.
    #[error("Template syntax error at line {line}: {message}")]
    Syntax {
        /// Description of the problem.
        message: String,
        /// One-based line number.
        line: usize,
    },

    /// A field lookup failed while rendering in strict mode.
    #[error("Missing field '{path}'")]
    MissingField {
        /// The unresolved path expression.
        path: String,
    },

    /// The renderer failed while evaluating the template.
    #[error("Template runtime error: {message}")]
    Runtime {
        /// Description of the problem.
        message: String,
    },

    /// The rendered output is not a valid stack template document.
    #[error("Rendered template is not valid: {message}")]
    InvalidOutput {
        /// Parser message.
        message: String,
    },
}

/// Artifact packaging errors. These are never retried.
#[derive(Debug, Error)]
pub enum PackageError {
    /// The unit's source path does not exist.
    #[error("Source for '{unit}' not found: {path}")]
    SourceNotFound {
        /// Deployable unit name.
        unit: String,
        /// Missing path.
        path: PathBuf,
    },

    /// Building the archive failed.
    #[error("Failed to package '{unit}': {message}")]
    ArchiveFailed {
        /// Deployable unit name.
        unit: String,
        /// Description of the failure.
        message: String,
    },

    /// The artifact store rejected the upload.
    #[error("Failed to upload {key}: {message}")]
    UploadFailed {
        /// Object key of the artifact.
        key: String,
        /// Description of the failure.
        message: String,
    },
}

/// Remote service errors.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// A transient failure (throttling, network, timeout) worth retrying.
    #[error("{operation} failed transiently: {message}")]
    Transient {
        /// Remote operation name.
        operation: String,
        /// Description of the failure.
        message: String,
    },

    /// A non-retryable failure reported by the service.
    #[error("{operation} failed: {code}: {message}")]
    Service {
        /// Remote operation name.
        operation: String,
        /// Service error code.
        code: String,
        /// Service-provided message.
        message: String,
    },

    /// The update contained no changes.
    #[error("No updates are to be performed")]
    NoChanges,

    /// The stack does not exist.
    #[error("Stack {stack} does not exist")]
    StackNotFound {
        /// Stack name or id.
        stack: String,
    },

    /// Timed out waiting for a terminal stack status.
    #[error("Timeout waiting for stack {stack} (last status: {status})")]
    Timeout {
        /// Stack name or id.
        stack: String,
        /// Last observed status.
        status: String,
    },
}

/// Deployment state machine errors.
#[derive(Debug, Error)]
pub enum DeployError {
    /// The stack reached a failure-class terminal status.
    #[error("Stack {stack} finished in {status}{}", format_events(.events))]
    StackFailed {
        /// Stack name.
        stack: String,
        /// Terminal status.
        status: String,
        /// Failure events observed after the deployment started.
        events: Vec<String>,
    },

    /// Maximum retry attempts exceeded.
    #[error("Maximum retry attempts ({attempts}) exceeded for {operation}: {last_error}")]
    RetriesExhausted {
        /// Number of attempts made.
        attempts: u32,
        /// Operation that failed.
        operation: String,
        /// Last error message.
        last_error: String,
    },

    /// The deployment was aborted before any remote mutation.
    #[error("Deployment aborted: {reason}")]
    Aborted {
        /// Reason for abort.
        reason: String,
    },
}

fn format_events(events: &[String]) -> String {
    if events.is_empty() {
        return String::new();
    }
    let mut out = String::from("; failure events:");
    for event in events {
        out.push_str("\n  - ");
        out.push_str(event);
    }
    out
}

/// Result type alias for Stackforge operations.
pub type Result<T> = std::result::Result<T, StackforgeError>;

impl StackforgeError {
    /// Creates a new internal error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Returns true if this error is retryable.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::Transient { .. }))
    }

    /// Returns true if this error signals an update without changes.
    #[must_use]
    pub const fn is_no_changes(&self) -> bool {
        matches!(self, Self::Remote(RemoteError::NoChanges))
    }

    /// Returns the suggested retry delay in seconds, if applicable.
    #[must_use]
    pub const fn retry_delay_secs(&self) -> Option<u64> {
        match self {
            Self::Remote(RemoteError::Transient { .. }) => Some(1),
            _ => None,
        }
    }
}

impl ConfigError {
    /// Creates a validation error for a specific field.
    #[must_use]
    pub fn validation(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::ValidationError {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Creates a parse error with an optional location.
    #[must_use]
    pub fn parse(message: impl Into<String>, location: Option<String>) -> Self {
        Self::ParseError {
            message: message.into(),
            location,
        }
    }
}

impl TemplateError {
    /// Creates a syntax error at the given line.
    #[must_use]
    pub fn syntax(message: impl Into<String>, line: usize) -> Self {
        Self::Syntax {
            message: message.into(),
            line,
        }
    }

    /// Creates a runtime error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }
}

impl RemoteError {
    /// Creates a transient error.
    #[must_use]
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Creates a service error.
    #[must_use]
    pub fn service(
        operation: impl Into<String>,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Service {
            operation: operation.into(),
            code: code.into(),
            message: message.into(),
        }
    }
}
