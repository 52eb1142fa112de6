//! `CloudFormation` implementation of [`StackApi`].

use async_trait::async_trait;
use aws_sdk_cloudformation::Client;
use aws_sdk_cloudformation::error::{ProvideErrorMetadata, SdkError};
use aws_sdk_cloudformation::types::{Capability, Parameter, Tag};
use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::aws::classify_sdk_error;
use crate::error::{RemoteError, Result, StackforgeError};

use super::api::StackApi;
use super::types::{
    StackDescription, StackEvent, StackOutput, StackRequest, TemplateSource, TemplateSummary,
};

/// Message returned by `UpdateStack` when the template and parameters are
/// unchanged.
const NO_UPDATES_MESSAGE: &str = "No updates are to be performed";

/// Prefix of the `ValidationError` message for a stack that does not exist.
const MISSING_STACK_PREFIX: &str = "Stack with id ";

/// `CloudFormation` client.
#[derive(Debug, Clone)]
pub struct CloudFormationApi {
    client: Client,
}

impl CloudFormationApi {
    /// Creates a client from a loaded SDK configuration.
    #[must_use]
    pub fn new(config: &aws_config::SdkConfig) -> Self {
        Self {
            client: Client::new(config),
        }
    }

    /// Creates a client with an existing SDK client.
    #[must_use]
    pub const fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Refines a classified error with `CloudFormation` message conventions.
///
/// Only a `ValidationError` of the form `Stack with id X does not exist`
/// means the stack is missing. Other "does not exist" messages (a template
/// URL, a parameter) stay service errors.
#[must_use]
pub fn refine_error(err: RemoteError, stack: &str) -> RemoteError {
    match err {
        RemoteError::Service { ref message, .. } if message.contains(NO_UPDATES_MESSAGE) => {
            RemoteError::NoChanges
        }
        RemoteError::Service {
            ref code,
            ref message,
            ..
        } if code == "ValidationError"
            && message.starts_with(MISSING_STACK_PREFIX)
            && message.contains("does not exist") =>
        {
            RemoteError::StackNotFound {
                stack: stack.to_string(),
            }
        }
        other => other,
    }
}

fn remote_error<E, R>(operation: &str, stack: &str, err: &SdkError<E, R>) -> StackforgeError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    refine_error(classify_sdk_error(operation, err), stack).into()
}

/// Getters return a value for required members and an `Option` otherwise.
trait Member<'a, T: ?Sized> {
    fn member(self) -> Option<&'a T>;
}

impl<'a, T: ?Sized> Member<'a, T> for &'a T {
    fn member(self) -> Option<&'a T> {
        Some(self)
    }
}

impl<'a, T: ?Sized> Member<'a, T> for Option<&'a T> {
    fn member(self) -> Option<&'a T> {
        self
    }
}

fn to_chrono(ts: &aws_sdk_cloudformation::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

fn parameters(pairs: &[(String, String)]) -> Vec<Parameter> {
    pairs
        .iter()
        .map(|(k, v)| Parameter::builder().parameter_key(k).parameter_value(v).build())
        .collect()
}

fn capabilities(names: &[String]) -> Vec<Capability> {
    names.iter().map(|c| Capability::from(c.as_str())).collect()
}

fn tags(pairs: &[(String, String)], operation: &str) -> Result<Vec<Tag>> {
    pairs
        .iter()
        .map(|(k, v)| {
            // `Tag::build` is infallible in this SDK version.
            let _ = operation;
            Ok(Tag::builder().key(k).value(v).build())
        })
        .collect()
}

fn describe_stack(stack: &aws_sdk_cloudformation::types::Stack) -> StackDescription {
    StackDescription {
        stack_id: stack.stack_id().unwrap_or_default().to_string(),
        stack_name: stack.stack_name().member().unwrap_or_default().to_string(),
        status: stack
            .stack_status()
            .member()
            .map(|s| s.as_str().to_string())
            .unwrap_or_default(),
        status_reason: stack.stack_status_reason().map(str::to_string),
        outputs: stack
            .outputs()
            .iter()
            .map(|o| StackOutput {
                key: o.output_key().unwrap_or_default().to_string(),
                value: o.output_value().unwrap_or_default().to_string(),
                description: o.description().map(str::to_string),
                export_name: o.export_name().map(str::to_string),
            })
            .collect(),
    }
}

#[async_trait]
impl StackApi for CloudFormationApi {
    async fn describe(&self, stack: &str) -> Result<Option<StackDescription>> {
        debug!("Describing stack {stack}");
        let result = self.client.describe_stacks().stack_name(stack).send().await;

        match result {
            Ok(output) => Ok(output.stacks().first().map(describe_stack)),
            Err(sdk_err) => match remote_error("DescribeStacks", stack, &sdk_err) {
                StackforgeError::Remote(RemoteError::StackNotFound { .. }) => Ok(None),
                other => Err(other),
            },
        }
    }

    async fn create(&self, request: &StackRequest) -> Result<String> {
        info!("Creating stack {}", request.stack_name);
        let mut builder = self
            .client
            .create_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(&request.parameters)))
            .set_capabilities(Some(capabilities(&request.capabilities)))
            .set_tags(Some(tags(&request.tags, "CreateStack")?))
            .disable_rollback(request.disable_rollback)
            .client_request_token(&request.client_token);
        builder = match &request.template {
            TemplateSource::Body(body) => builder.template_body(body),
            TemplateSource::Url(url) => builder.template_url(url),
        };

        let output = builder
            .send()
            .await
            .map_err(|e| remote_error("CreateStack", &request.stack_name, &e))?;
        Ok(output.stack_id().unwrap_or(&request.stack_name).to_string())
    }

    async fn update(&self, request: &StackRequest) -> Result<String> {
        info!("Updating stack {}", request.stack_name);
        let mut builder = self
            .client
            .update_stack()
            .stack_name(&request.stack_name)
            .set_parameters(Some(parameters(&request.parameters)))
            .set_capabilities(Some(capabilities(&request.capabilities)))
            .set_tags(Some(tags(&request.tags, "UpdateStack")?))
            .disable_rollback(request.disable_rollback)
            .client_request_token(&request.client_token);
        builder = match &request.template {
            TemplateSource::Body(body) => builder.template_body(body),
            TemplateSource::Url(url) => builder.template_url(url),
        };

        let output = builder
            .send()
            .await
            .map_err(|e| remote_error("UpdateStack", &request.stack_name, &e))?;
        Ok(output.stack_id().unwrap_or(&request.stack_name).to_string())
    }

    async fn delete(&self, stack: &str, client_token: &str) -> Result<()> {
        info!("Deleting stack {stack}");
        self.client
            .delete_stack()
            .stack_name(stack)
            .client_request_token(client_token)
            .send()
            .await
            .map_err(|e| remote_error("DeleteStack", stack, &e))?;
        Ok(())
    }

    async fn events_since(&self, stack: &str, since: DateTime<Utc>) -> Result<Vec<StackEvent>> {
        let mut events = Vec::new();
        let mut next_token: Option<String> = None;

        loop {
            let output = self
                .client
                .describe_stack_events()
                .stack_name(stack)
                .set_next_token(next_token.take())
                .send()
                .await
                .map_err(|e| remote_error("DescribeStackEvents", stack, &e))?;

            for event in output.stack_events() {
                let Some(timestamp) = event.timestamp().member().and_then(to_chrono) else {
                    continue;
                };
                // Newest first: everything after this is older.
                if timestamp < since {
                    return Ok(events);
                }
                events.push(StackEvent {
                    timestamp,
                    logical_id: event.logical_resource_id().unwrap_or_default().to_string(),
                    resource_type: event.resource_type().unwrap_or_default().to_string(),
                    status: event
                        .resource_status()
                        .map(|s| s.as_str().to_string())
                        .unwrap_or_default(),
                    reason: event.resource_status_reason().map(str::to_string),
                });
            }

            match output.next_token() {
                Some(token) => next_token = Some(token.to_string()),
                None => return Ok(events),
            }
        }
    }

    async fn validate_template(&self, template: &TemplateSource) -> Result<TemplateSummary> {
        let builder = self.client.validate_template();
        let builder = match template {
            TemplateSource::Body(body) => builder.template_body(body),
            TemplateSource::Url(url) => builder.template_url(url),
        };

        let output = builder
            .send()
            .await
            .map_err(|e| remote_error("ValidateTemplate", "", &e))?;

        Ok(TemplateSummary {
            description: output.description().map(str::to_string),
            parameters: output
                .parameters()
                .iter()
                .filter_map(|p| p.parameter_key().map(str::to_string))
                .collect(),
            capabilities: output
                .capabilities()
                .iter()
                .map(|c| c.as_str().to_string())
                .collect(),
        })
    }
}
