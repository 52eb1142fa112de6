//! Extension points of the state machine.

use async_trait::async_trait;

use crate::config::ResolvedConfig;
use crate::error::Result;

use super::record::{DeploymentRecord, DeploymentReport};

/// Hooks run around the converge step.
///
/// Both methods default to no-ops. A hook error aborts the run.
#[async_trait]
pub trait DeployHook: Send + Sync {
    /// Hook name used in logs.
    fn name(&self) -> &str;

    /// Runs before the create or update call.
    async fn before_converge(
        &self,
        _record: &DeploymentRecord,
        _config: &ResolvedConfig,
    ) -> Result<()> {
        Ok(())
    }

    /// Runs once the stack reached a successful terminal state.
    async fn after_converge(&self, _report: &DeploymentReport) -> Result<()> {
        Ok(())
    }
}

/// Interactive confirmation gate for destructive operations.
pub trait Confirmation: Send + Sync {
    /// Asks the operator; returns true to proceed.
    ///
    /// # Errors
    ///
    /// Returns an error if the answer cannot be read.
    fn confirm(&self, prompt: &str) -> Result<bool>;
}

/// Confirmation with a fixed answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoConfirm(pub bool);

impl Confirmation for AutoConfirm {
    fn confirm(&self, _prompt: &str) -> Result<bool> {
        Ok(self.0)
    }
}
