//! Deployment records and reports.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;
use uuid::Uuid;

use crate::cloudformation::{StackEvent, StackOutput, TemplateSummary};
use crate::error::{DeployError, Result};

/// A stack operation requested by the operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    /// Create a stack that does not exist yet.
    Create,
    /// Update an existing stack.
    Update,
    /// Create or update, depending on whether the stack exists.
    Upsert,
    /// Render and validate the template remotely.
    Validate,
    /// Render the template locally.
    Compile,
    /// Delete the stack.
    Delete,
}

impl Operation {
    /// Lowercase operation name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Upsert => "upsert",
            Self::Validate => "validate",
            Self::Compile => "compile",
            Self::Delete => "delete",
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// States of the deployment state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeployState {
    /// Nothing done yet.
    Idle,
    /// Building artifacts.
    Packaging,
    /// Uploading artifacts.
    Uploading,
    /// Rendering the template.
    Rendering,
    /// Issuing the create, update or delete call.
    Converging,
    /// Polling for a terminal status.
    Waiting,
    /// The operation finished successfully.
    Succeeded,
    /// The stack reached a failure status.
    Failed,
    /// The update contained no changes.
    NoopNoChanges,
}

impl DeployState {
    /// Returns true for terminal states.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed | Self::NoopNoChanges)
    }
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Bookkeeping for one run of the state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentRecord {
    /// Deployment id.
    pub id: Uuid,
    /// Stack name.
    pub stack_name: String,
    /// Stack id, once known.
    pub stack_id: Option<String>,
    /// Template URL, or the local template path for inline bodies.
    pub template_location: Option<String>,
    /// Combined hash of all packaged artifacts.
    pub artifact_hash: Option<String>,
    /// Start time; failure events before it are ignored.
    pub start_time: DateTime<Utc>,
    /// Requested operation.
    pub operation: Operation,
    /// Current state.
    pub state: DeployState,
    /// Every state visited, in order.
    pub transitions: Vec<DeployState>,
    /// Last remote status observed.
    pub terminal_status: Option<String>,
}

impl DeploymentRecord {
    /// Starts a record in [`DeployState::Idle`].
    #[must_use]
    pub fn new(stack_name: impl Into<String>, operation: Operation) -> Self {
        Self {
            id: Uuid::new_v4(),
            stack_name: stack_name.into(),
            stack_id: None,
            template_location: None,
            artifact_hash: None,
            start_time: Utc::now(),
            operation,
            state: DeployState::Idle,
            transitions: vec![DeployState::Idle],
            terminal_status: None,
        }
    }

    /// Moves to the next state.
    pub fn transition(&mut self, next: DeployState) {
        debug!("{}: {} -> {}", self.stack_name, self.state, next);
        self.state = next;
        self.transitions.push(next);
    }

    /// Idempotency token for one remote mutation of this deployment.
    ///
    /// Retries of the same call reuse the token.
    #[must_use]
    pub fn client_token(&self, call: &str) -> String {
        format!("stackforge-{call}-{}", self.id)
    }

    /// Stack name or id, whichever identifies the stack best.
    #[must_use]
    pub fn stack_ref(&self) -> &str {
        self.stack_id.as_deref().unwrap_or(&self.stack_name)
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Outcome {
    /// The operation completed.
    Succeeded,
    /// Nothing had to change.
    NoChanges,
    /// The stack reached a failure status.
    Failed,
}

/// Result of one run of the state machine.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentReport {
    /// Deployment record.
    pub record: DeploymentRecord,
    /// How the run ended.
    pub outcome: Outcome,
    /// Stack outputs after converging.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StackOutput>,
    /// Failure events, oldest first.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failure_events: Vec<StackEvent>,
    /// Rendered template, for compile runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rendered: Option<String>,
    /// Remote validation result, for validate runs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation: Option<TemplateSummary>,
}

impl DeploymentReport {
    /// Creates a report without outputs.
    #[must_use]
    pub const fn new(record: DeploymentRecord, outcome: Outcome) -> Self {
        Self {
            record,
            outcome,
            outputs: Vec::new(),
            failure_events: Vec::new(),
            rendered: None,
            validation: None,
        }
    }

    /// Returns true unless the stack failed.
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcome != Outcome::Failed
    }

    /// Converts a failed report into an error.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::StackFailed`] with the failure events if the
    /// stack reached a failure status.
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            return Ok(self);
        }
        Err(DeployError::StackFailed {
            stack: self.record.stack_name.clone(),
            status: self
                .record
                .terminal_status
                .clone()
                .unwrap_or_else(|| String::from("UNKNOWN")),
            events: self.failure_events.iter().map(StackEvent::summary).collect(),
        }
        .into())
    }
}
