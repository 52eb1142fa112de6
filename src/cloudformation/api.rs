//! Stack API trait definition.
//!
//! This module defines the remote operations the deployment state machine
//! drives. The SDK-backed implementation lives in `client`; tests supply
//! their own.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

use super::types::{StackDescription, StackEvent, StackRequest, TemplateSource, TemplateSummary};

/// Remote stack orchestration operations.
#[async_trait]
pub trait StackApi: Send + Sync {
    /// Describes a stack by name or id.
    ///
    /// Returns `None` if the stack does not exist.
    async fn describe(&self, stack: &str) -> Result<Option<StackDescription>>;

    /// Starts stack creation and returns the stack id.
    async fn create(&self, request: &StackRequest) -> Result<String>;

    /// Starts a stack update and returns the stack id.
    ///
    /// An update without changes fails with `RemoteError::NoChanges`.
    async fn update(&self, request: &StackRequest) -> Result<String>;

    /// Starts stack deletion.
    async fn delete(&self, stack: &str, client_token: &str) -> Result<()>;

    /// Lists events at or after `since`, newest first.
    async fn events_since(&self, stack: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>>;

    /// Validates a template remotely.
    async fn validate_template(&self, template: &TemplateSource) -> Result<TemplateSummary>;
}

#[async_trait]
impl<T: StackApi + ?Sized> StackApi for Box<T> {
    async fn describe(&self, stack: &str) -> Result<Option<StackDescription>> {
        (**self).describe(stack).await
    }

    async fn create(&self, request: &StackRequest) -> Result<String> {
        (**self).create(request).await
    }

    async fn update(&self, request: &StackRequest) -> Result<String> {
        (**self).update(request).await
    }

    async fn delete(&self, stack: &str, client_token: &str) -> Result<()> {
        (**self).delete(stack, client_token).await
    }

    async fn events_since(&self, stack: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>> {
        (**self).events_since(stack, since).await
    }

    async fn validate_template(&self, template: &TemplateSource) -> Result<TemplateSummary> {
        (**self).validate_template(template).await
    }
}
