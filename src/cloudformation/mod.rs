//! Remote stack orchestration.
//!
//! This module provides the [`StackApi`] seam the deployment state machine
//! drives and its `CloudFormation` implementation, plus status and event
//! types with failure classification.

mod api;
mod client;
mod types;

pub use api::StackApi;
pub use client::{CloudFormationApi, refine_error};
pub use types::{
    DELETE_COMPLETE, StackDescription, StackEvent, StackOutput, StackRequest, StatusClass,
    TemplateSource, TemplateSummary, failure_events,
};
