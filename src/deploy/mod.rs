//! Deployment orchestration.
//!
//! This module contains the state machine that packages artifacts, renders
//! the stack template and converges the remote stack, together with its
//! retry policy, records and extension points.

mod deployer;
mod hooks;
mod record;
mod retry;

pub use deployer::{
    DEFAULT_UPLOAD_CONCURRENCY, DeployOptions, Deployer, MAX_INLINE_TEMPLATE_BYTES,
    TEMPLATE_FILES, find_template,
};
pub use hooks::{AutoConfirm, Confirmation, DeployHook};
pub use record::{DeployState, DeploymentRecord, DeploymentReport, Operation, Outcome};
pub use retry::{DEFAULT_MAX_ATTEMPTS, RetryPolicy};
