//! Stack types returned by and sent to the orchestration API.

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Status of `DELETE_COMPLETE`, reported by stacks that were deleted.
pub const DELETE_COMPLETE: &str = "DELETE_COMPLETE";

/// Terminal statuses that mean a rollback finished.
const ROLLBACK_TERMINALS: &[&str] = &[
    "ROLLBACK_COMPLETE",
    "UPDATE_ROLLBACK_COMPLETE",
    "IMPORT_ROLLBACK_COMPLETE",
];

/// Coarse classification of a stack status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    /// An operation is still running.
    InProgress,
    /// The last operation finished successfully.
    Succeeded,
    /// The last operation failed or was rolled back.
    Failed,
    /// The stack no longer exists.
    Deleted,
}

impl StatusClass {
    /// Classifies a raw status string.
    #[must_use]
    pub fn of(status: &str) -> Self {
        if status.ends_with("_IN_PROGRESS") {
            Self::InProgress
        } else if status == DELETE_COMPLETE {
            Self::Deleted
        } else if ROLLBACK_TERMINALS.contains(&status) || status.ends_with("_FAILED") {
            Self::Failed
        } else if status.ends_with("_COMPLETE") {
            Self::Succeeded
        } else {
            Self::Failed
        }
    }

    /// Returns true for terminal classes.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::InProgress)
    }
}

/// A described stack.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackDescription {
    /// Stack id (ARN).
    pub stack_id: String,
    /// Stack name.
    pub stack_name: String,
    /// Raw status.
    pub status: String,
    /// Status reason, if reported.
    pub status_reason: Option<String>,
    /// Stack outputs.
    pub outputs: Vec<StackOutput>,
}

/// One stack output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackOutput {
    /// Output key.
    pub key: String,
    /// Output value.
    pub value: String,
    /// Description, if any.
    pub description: Option<String>,
    /// Export name, if exported.
    pub export_name: Option<String>,
}

/// One stack event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StackEvent {
    /// Event time.
    pub timestamp: DateTime<Utc>,
    /// Logical resource id.
    pub logical_id: String,
    /// Resource type.
    pub resource_type: String,
    /// Resource status.
    pub status: String,
    /// Status reason, if any.
    pub reason: Option<String>,
}

/// Where the stack template comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TemplateSource {
    /// Inline template body.
    Body(String),
    /// URL of an uploaded template.
    Url(String),
}

/// Parameters of a create or update call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackRequest {
    /// Stack name.
    pub stack_name: String,
    /// Template body or URL.
    pub template: TemplateSource,
    /// Parameter key-value pairs.
    pub parameters: Vec<(String, String)>,
    /// Capabilities to acknowledge.
    pub capabilities: Vec<String>,
    /// Tag key-value pairs.
    pub tags: Vec<(String, String)>,
    /// Keep failed resources instead of rolling back.
    pub disable_rollback: bool,
    /// Idempotency token.
    pub client_token: String,
}

/// Result of a remote template validation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSummary {
    /// Template description.
    pub description: Option<String>,
    /// Declared parameter names.
    pub parameters: Vec<String>,
    /// Capabilities the template requires.
    pub capabilities: Vec<String>,
}

impl StackDescription {
    /// Classification of the current status.
    #[must_use]
    pub fn status_class(&self) -> StatusClass {
        StatusClass::of(&self.status)
    }
}

impl StackEvent {
    /// Returns true for failure events.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.status.ends_with("_FAILED")
    }

    /// One-line description used in error reports.
    #[must_use]
    pub fn summary(&self) -> String {
        match &self.reason {
            Some(reason) => format!("{} ({}) {}: {reason}", self.logical_id, self.resource_type, self.status),
            None => format!("{} ({}) {}", self.logical_id, self.resource_type, self.status),
        }
    }
}

/// Failure events that happened at or after `since`, oldest first.
#[must_use]
pub fn failure_events(events: &[StackEvent], since: DateTime<Utc>) -> Vec<StackEvent> {
    let mut failures: Vec<StackEvent> = events
        .iter()
        .filter(|e| e.timestamp >= since && e.is_failure())
        .cloned()
        .collect();
    failures.sort_by_key(|e| e.timestamp);
    failures
}
