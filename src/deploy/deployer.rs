//! Deployment state machine.
//!
//! A run moves through `Idle -> Packaging -> Uploading -> Rendering ->
//! Converging -> Waiting` and ends in `Succeeded`, `Failed` or
//! `NoopNoChanges`. Configuration, template and packaging errors abort
//! before any stack mutation.

use std::path::PathBuf;
use std::time::Duration;

use futures::stream::{self, StreamExt, TryStreamExt};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::cloudformation::{
    DELETE_COMPLETE, StackApi, StackDescription, StackRequest, StatusClass, TemplateSource,
    failure_events,
};
use crate::config::{ArtifactLocation, ResolvedConfig};
use crate::error::{ConfigError, DeployError, RemoteError, Result};
use crate::packaging::{Artifact, ArtifactPackager, plan_packages, template_key, unit_locations};
use crate::template::{RenderOptions, Template, content_hash, stringify, validate_rendered};

use super::hooks::{AutoConfirm, Confirmation, DeployHook};
use super::record::{DeployState, DeploymentRecord, DeploymentReport, Operation, Outcome};
use super::retry::RetryPolicy;

/// Template files looked up in the config folder, in order.
pub const TEMPLATE_FILES: &[&str] = &["template.yml", "template.yaml", "template.json"];

/// Largest template body accepted inline by `CloudFormation`.
pub const MAX_INLINE_TEMPLATE_BYTES: usize = 51_200;

/// Default number of concurrent artifact uploads.
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

const DEFAULT_POLL_INTERVAL_SECS: u64 = 5;
const DEFAULT_MAX_WAIT_SECS: u64 = 3600;

/// Options of a deployment run.
#[derive(Debug, Clone)]
pub struct DeployOptions {
    /// Keep failed resources instead of rolling back.
    pub disable_rollback: bool,
    /// Delete without asking.
    pub skip_confirmation: bool,
    /// Fail on unresolved template references.
    pub strict: bool,
    /// Delay between status polls.
    pub poll_interval: Duration,
    /// Maximum time to wait for a terminal status, unless the stack
    /// settings name one.
    pub max_wait: Duration,
    /// Maximum concurrent artifact uploads.
    pub upload_concurrency: usize,
    /// Retry policy for remote calls.
    pub retry: RetryPolicy,
}

impl Default for DeployOptions {
    fn default() -> Self {
        Self {
            disable_rollback: false,
            skip_confirmation: false,
            strict: false,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_wait: Duration::from_secs(DEFAULT_MAX_WAIT_SECS),
            upload_concurrency: DEFAULT_UPLOAD_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// A compiled template and where it came from.
#[derive(Debug)]
struct LoadedTemplate {
    path: PathBuf,
    extension: String,
    template: Template,
}

/// Result of the create or update call.
enum Converged {
    Started,
    NoChanges,
}

/// Locates the template file of a configuration.
///
/// `stack.template` wins over the default file names.
///
/// # Errors
///
/// Returns [`ConfigError::NotFound`] if no template file exists.
pub fn find_template(config: &ResolvedConfig) -> Result<PathBuf> {
    if let Some(template) = &config.stack.template {
        let path = config.base_dir.join(template);
        if path.is_file() {
            return Ok(path);
        }
        return Err(ConfigError::NotFound { path }.into());
    }

    TEMPLATE_FILES
        .iter()
        .map(|name| config.base_dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            ConfigError::NotFound {
                path: config.base_dir.join(TEMPLATE_FILES[0]),
            }
            .into()
        })
}

fn string_pairs(map: &Map<String, Value>) -> Vec<(String, String)> {
    map.iter().map(|(k, v)| (k.clone(), stringify(v))).collect()
}

/// Drives stack operations against a [`StackApi`].
pub struct Deployer<'a> {
    /// Remote stack API.
    api: &'a dyn StackApi,
    /// Artifact packager.
    packager: &'a dyn ArtifactPackager,
    /// Hooks run around the converge step.
    hooks: Vec<Box<dyn DeployHook>>,
    /// Gate for destructive operations.
    confirmation: Box<dyn Confirmation>,
    /// Run options.
    options: DeployOptions,
}

impl<'a> Deployer<'a> {
    /// Creates a deployer. Deletion is refused unless a confirmation gate
    /// is set or confirmation is skipped.
    #[must_use]
    pub fn new(
        api: &'a dyn StackApi,
        packager: &'a dyn ArtifactPackager,
        options: DeployOptions,
    ) -> Self {
        Self {
            api,
            packager,
            hooks: Vec::new(),
            confirmation: Box::new(AutoConfirm(false)),
            options,
        }
    }

    /// Adds a hook.
    #[must_use]
    pub fn with_hook(mut self, hook: Box<dyn DeployHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    /// Sets the confirmation gate.
    #[must_use]
    pub fn with_confirmation(mut self, confirmation: Box<dyn Confirmation>) -> Self {
        self.confirmation = confirmation;
        self
    }

    /// Runs an operation.
    ///
    /// # Errors
    ///
    /// Returns an error if any step fails fatally. A stack that reaches a
    /// failure status is reported as [`Outcome::Failed`], not as an error.
    pub async fn run(
        &self,
        operation: Operation,
        config: ResolvedConfig,
    ) -> Result<DeploymentReport> {
        info!("Running {operation} for stack {}", config.stack_name);
        match operation {
            Operation::Create | Operation::Update | Operation::Upsert => {
                self.deploy(operation, config).await
            }
            Operation::Validate => self.validate(config).await,
            Operation::Compile => self.compile(config).await,
            Operation::Delete => self.delete(&config).await,
        }
    }

    /// Packages, renders and converges the stack.
    ///
    /// # Errors
    ///
    /// Returns an error if a step fails before the stack reaches a terminal
    /// status, retries are exhausted, or waiting times out.
    pub async fn deploy(
        &self,
        operation: Operation,
        mut config: ResolvedConfig,
    ) -> Result<DeploymentReport> {
        let mut record = DeploymentRecord::new(&config.stack_name, operation);
        let loaded = Self::load_template(&config)?;
        if config.has_local_sources() {
            config.require_artifact_bucket(operation.as_str())?;
        }

        self.package(&mut config, &mut record, true).await?;

        record.transition(DeployState::Rendering);
        let rendered = self.render(&loaded, &config)?;
        let template = self
            .template_source(&config, &mut record, &loaded, &rendered, operation)
            .await?;

        record.transition(DeployState::Converging);
        for hook in &self.hooks {
            debug!("Running before_converge hook {}", hook.name());
            hook.before_converge(&record, &config).await?;
        }

        if let Converged::NoChanges = self.converge(&mut record, &config, template).await? {
            info!("Stack {} is up to date", record.stack_name);
            record.transition(DeployState::NoopNoChanges);
            let mut report = DeploymentReport::new(record, Outcome::NoChanges);
            if let Some(description) = self.describe(report.record.stack_ref()).await? {
                report.record.terminal_status = Some(description.status);
                report.outputs = description.outputs;
            }
            self.after_converge(&report).await?;
            return Ok(report);
        }

        let report = self.wait(record, self.max_wait(&config)).await?;
        if report.is_success() {
            self.after_converge(&report).await?;
        }
        Ok(report)
    }

    /// Packages without uploading and renders the template locally.
    ///
    /// # Errors
    ///
    /// Returns an error if packaging or rendering fails.
    pub async fn compile(&self, mut config: ResolvedConfig) -> Result<DeploymentReport> {
        let mut record = DeploymentRecord::new(&config.stack_name, Operation::Compile);
        let loaded = Self::load_template(&config)?;

        self.package(&mut config, &mut record, false).await?;
        record.transition(DeployState::Rendering);
        let rendered = self.render(&loaded, &config)?;

        record.template_location = Some(loaded.path.display().to_string());
        record.transition(DeployState::Succeeded);
        let mut report = DeploymentReport::new(record, Outcome::Succeeded);
        report.rendered = Some(rendered);
        Ok(report)
    }

    /// Renders the template and validates it remotely.
    ///
    /// # Errors
    ///
    /// Returns an error if rendering fails or the template is rejected.
    pub async fn validate(&self, mut config: ResolvedConfig) -> Result<DeploymentReport> {
        let mut record = DeploymentRecord::new(&config.stack_name, Operation::Validate);
        let loaded = Self::load_template(&config)?;

        self.package(&mut config, &mut record, false).await?;
        record.transition(DeployState::Rendering);
        let rendered = self.render(&loaded, &config)?;
        let source = self
            .template_source(&config, &mut record, &loaded, &rendered, Operation::Validate)
            .await?;

        let summary = self
            .options
            .retry
            .run("ValidateTemplate", || self.api.validate_template(&source))
            .await?;
        info!(
            "Template is valid ({} parameters)",
            summary.parameters.len()
        );

        record.transition(DeployState::Succeeded);
        let mut report = DeploymentReport::new(record, Outcome::Succeeded);
        report.validation = Some(summary);
        Ok(report)
    }

    /// Deletes the stack after confirmation and waits until it is gone.
    ///
    /// # Errors
    ///
    /// Returns [`DeployError::Aborted`] if deletion is not confirmed or the
    /// stack is busy, or an error if the delete call fails.
    pub async fn delete(&self, config: &ResolvedConfig) -> Result<DeploymentReport> {
        let mut record = DeploymentRecord::new(&config.stack_name, Operation::Delete);

        let Some(description) = self.describe(&config.stack_name).await? else {
            info!("Stack {} does not exist", config.stack_name);
            record.transition(DeployState::NoopNoChanges);
            return Ok(DeploymentReport::new(record, Outcome::NoChanges));
        };
        if description.status_class() == StatusClass::InProgress {
            return Err(DeployError::Aborted {
                reason: format!(
                    "stack {} is busy ({})",
                    config.stack_name, description.status
                ),
            }
            .into());
        }
        record.stack_id = Some(description.stack_id).filter(|id| !id.is_empty());

        if !self.options.skip_confirmation {
            let prompt = format!(
                "Delete stack {} ({})?",
                config.stack_name, description.status
            );
            if !self.confirmation.confirm(&prompt)? {
                return Err(DeployError::Aborted {
                    reason: String::from("deletion was not confirmed"),
                }
                .into());
            }
        }

        record.transition(DeployState::Converging);
        let token = record.client_token("delete");
        let stack = record.stack_ref().to_string();
        self.options
            .retry
            .run("DeleteStack", || self.api.delete(&stack, &token))
            .await?;

        self.wait(record, self.max_wait(config)).await
    }

    fn load_template(config: &ResolvedConfig) -> Result<LoadedTemplate> {
        let path = find_template(config)?;
        let source = std::fs::read_to_string(&path)?;
        let template = Template::compile(&source)?;
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("yml")
            .to_string();
        debug!("Loaded template {}", path.display());

        Ok(LoadedTemplate {
            path,
            extension,
            template,
        })
    }

    fn render(&self, loaded: &LoadedTemplate, config: &ResolvedConfig) -> Result<String> {
        let data = config.template_data()?;
        let rendered = loaded
            .template
            .render(&data, RenderOptions::strict(self.options.strict))?;
        validate_rendered(&rendered)?;
        debug!("Rendered template ({} bytes)", rendered.len());
        Ok(rendered)
    }

    fn max_wait(&self, config: &ResolvedConfig) -> Duration {
        config
            .stack
            .timeout_minutes
            .map_or(self.options.max_wait, |m| {
                Duration::from_secs(u64::from(m) * 60)
            })
    }

    /// Builds artifacts and records their locations on the units.
    async fn package(
        &self,
        config: &mut ResolvedConfig,
        record: &mut DeploymentRecord,
        upload: bool,
    ) -> Result<()> {
        record.transition(DeployState::Packaging);
        let requests = plan_packages(config)?;

        let mut artifacts = Vec::with_capacity(requests.len());
        for request in &requests {
            let artifact = self.packager.package(request).await?;
            debug!("Packaged {} as {}", artifact.label(), artifact.key);
            artifacts.push(artifact);
        }

        let locations = if upload {
            record.transition(DeployState::Uploading);
            self.upload_all(&artifacts).await?
        } else {
            let bucket = config.artifact_bucket.clone().unwrap_or_default();
            artifacts
                .iter()
                .map(|a| ArtifactLocation {
                    bucket: bucket.clone(),
                    key: a.key.clone(),
                    hash: Some(a.hash.clone()),
                })
                .collect()
        };

        if !artifacts.is_empty() {
            let hashes: Vec<&str> = artifacts.iter().map(|a| a.hash.as_str()).collect();
            record.artifact_hash = Some(content_hash(&hashes.join("\n")));
        }
        config.apply_artifacts(&unit_locations(&artifacts, &locations));
        Ok(())
    }

    /// Uploads artifacts with bounded concurrency, keeping their order.
    async fn upload_all(&self, artifacts: &[Artifact]) -> Result<Vec<ArtifactLocation>> {
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }
        let concurrency = self.options.upload_concurrency.max(1);
        info!(
            "Uploading {} artifacts ({} at a time)",
            artifacts.len(),
            concurrency
        );

        stream::iter(artifacts)
            .map(|artifact| {
                self.options
                    .retry
                    .run("PutObject", move || self.packager.upload(artifact))
            })
            .buffered(concurrency)
            .try_collect()
            .await
    }

    /// Uploads the rendered template when a bucket is configured, otherwise
    /// passes the body inline.
    async fn template_source(
        &self,
        config: &ResolvedConfig,
        record: &mut DeploymentRecord,
        loaded: &LoadedTemplate,
        rendered: &str,
        operation: Operation,
    ) -> Result<TemplateSource> {
        if config.artifact_bucket.is_some() {
            let key = template_key(
                &config.artifact_prefix,
                &config.stack_name,
                &content_hash(rendered),
                &loaded.extension,
            );
            let url = self
                .options
                .retry
                .run("PutObject", || self.packager.upload_template(&key, rendered))
                .await?;
            record.template_location = Some(url.clone());
            return Ok(TemplateSource::Url(url));
        }

        if rendered.len() > MAX_INLINE_TEMPLATE_BYTES {
            return Err(ConfigError::MissingBucket {
                operation: format!(
                    "{operation} (template exceeds {MAX_INLINE_TEMPLATE_BYTES} bytes)"
                ),
            }
            .into());
        }
        record.template_location = Some(loaded.path.display().to_string());
        Ok(TemplateSource::Body(rendered.to_string()))
    }

    /// Issues the create or update call.
    async fn converge(
        &self,
        record: &mut DeploymentRecord,
        config: &ResolvedConfig,
        template: TemplateSource,
    ) -> Result<Converged> {
        let create = match record.operation {
            Operation::Create => true,
            Operation::Update => false,
            _ => self.should_create(record).await?,
        };
        let call = if create { "create" } else { "update" };

        let request = StackRequest {
            stack_name: config.stack_name.clone(),
            template,
            parameters: string_pairs(&config.stack.parameters),
            capabilities: config.stack.capabilities.clone(),
            tags: string_pairs(&config.stack.tags),
            disable_rollback: self.options.disable_rollback,
            client_token: record.client_token(call),
        };

        let result = if create {
            self.options
                .retry
                .run("CreateStack", || self.api.create(&request))
                .await
        } else {
            self.options
                .retry
                .run("UpdateStack", || self.api.update(&request))
                .await
        };

        match result {
            Ok(stack_id) => {
                info!("Started {call} of stack {}", record.stack_name);
                record.stack_id = Some(stack_id).filter(|id| !id.is_empty());
                Ok(Converged::Started)
            }
            Err(err) if err.is_no_changes() => Ok(Converged::NoChanges),
            Err(err) => Err(err),
        }
    }

    /// Decides between create and update. Returns true to create.
    async fn should_create(&self, record: &mut DeploymentRecord) -> Result<bool> {
        let Some(description) = self.describe(&record.stack_name).await? else {
            debug!("Stack {} not found, creating", record.stack_name);
            return Ok(true);
        };

        match description.status_class() {
            StatusClass::Deleted => Ok(true),
            StatusClass::InProgress => Err(DeployError::Aborted {
                reason: format!(
                    "stack {} is busy ({})",
                    record.stack_name, description.status
                ),
            }
            .into()),
            _ if description.status == "ROLLBACK_COMPLETE" => Err(DeployError::Aborted {
                reason: format!(
                    "stack {} is in ROLLBACK_COMPLETE and must be deleted first",
                    record.stack_name
                ),
            }
            .into()),
            _ => {
                record.stack_id = Some(description.stack_id).filter(|id| !id.is_empty());
                Ok(false)
            }
        }
    }

    async fn describe(&self, stack: &str) -> Result<Option<StackDescription>> {
        self.options
            .retry
            .run("DescribeStacks", || self.api.describe(stack))
            .await
    }

    /// Polls until the stack reaches a terminal status.
    async fn wait(
        &self,
        mut record: DeploymentRecord,
        max_wait: Duration,
    ) -> Result<DeploymentReport> {
        record.transition(DeployState::Waiting);
        let started = tokio::time::Instant::now();
        let stack = record.stack_ref().to_string();
        let mut last_status: String;

        loop {
            match self.describe(&stack).await? {
                None if record.operation == Operation::Delete => {
                    record.terminal_status = Some(DELETE_COMPLETE.to_string());
                    record.transition(DeployState::Succeeded);
                    info!("Stack {} deleted", record.stack_name);
                    return Ok(DeploymentReport::new(record, Outcome::Succeeded));
                }
                None => return Err(RemoteError::StackNotFound { stack }.into()),
                Some(description) if description.status_class().is_terminal() => {
                    return Ok(self.finish(record, description).await);
                }
                Some(description) => {
                    debug!("Stack {} is {}", record.stack_name, description.status);
                    last_status = description.status;
                }
            }

            if started.elapsed() >= max_wait {
                return Err(RemoteError::Timeout {
                    stack: record.stack_name,
                    status: last_status,
                }
                .into());
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Records a terminal status, fetching failure events on failure.
    async fn finish(
        &self,
        mut record: DeploymentRecord,
        description: StackDescription,
    ) -> DeploymentReport {
        let succeeded = match description.status_class() {
            StatusClass::Succeeded => record.operation != Operation::Delete,
            StatusClass::Deleted => record.operation == Operation::Delete,
            StatusClass::Failed | StatusClass::InProgress => false,
        };
        record.terminal_status = Some(description.status.clone());

        if succeeded {
            info!(
                "Stack {} finished in {}",
                record.stack_name, description.status
            );
            record.transition(DeployState::Succeeded);
            let mut report = DeploymentReport::new(record, Outcome::Succeeded);
            report.outputs = description.outputs;
            return report;
        }

        warn!(
            "Stack {} finished in {}",
            record.stack_name, description.status
        );
        record.transition(DeployState::Failed);
        let events = match self
            .api
            .events_since(record.stack_ref(), record.start_time)
            .await
        {
            Ok(events) => failure_events(&events, record.start_time),
            Err(err) => {
                warn!("Could not fetch stack events: {err}");
                Vec::new()
            }
        };

        let mut report = DeploymentReport::new(record, Outcome::Failed);
        report.failure_events = events;
        report
    }

    async fn after_converge(&self, report: &DeploymentReport) -> Result<()> {
        for hook in &self.hooks {
            debug!("Running after_converge hook {}", hook.name());
            hook.after_converge(report).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloudformation::{StackEvent, StackOutput, TemplateSummary};
    use crate::config::{ConfigResolver, EnvMap};
    use crate::error::{PackageError, StackforgeError};
    use crate::packaging::MockArtifactPackager;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration as ChronoDuration, Utc};
    use serde_json::json;
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    const TEMPLATE: &str = "AWSTemplateFormatVersion: '2010-09-09'
Resources:
{{#each lambdas}}
  {{name}}Function:
    Type: AWS::Lambda::Function
    Properties:
      FunctionName: {{fullName}}
      Code:
        S3Bucket: {{code.bucket}}
        S3Key: {{code.key}}
{{/each}}
";

    const REMOTE_CONFIG: &str = "default:
  stackName: demo
  lambdas:
    - name: api
      handler: index.handler
      remote: s3://shared/api.zip
";

    /// Scripted stack API. `describe` pops statuses and repeats the last one.
    #[derive(Default)]
    struct FakeApi {
        statuses: Mutex<VecDeque<Option<String>>>,
        no_changes: bool,
        throttle: bool,
        events: Vec<StackEvent>,
        calls: Arc<Mutex<Vec<String>>>,
    }

    impl FakeApi {
        fn with_statuses(statuses: &[Option<&str>]) -> Self {
            Self {
                statuses: Mutex::new(
                    statuses.iter().map(|s| s.map(str::to_string)).collect(),
                ),
                ..Self::default()
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn count(&self, call: &str) -> usize {
            self.calls().iter().filter(|c| *c == call).count()
        }

        fn record(&self, call: &str) {
            self.calls.lock().unwrap().push(call.to_string());
        }

        fn hook(&self, fail_before: bool) -> Box<dyn DeployHook> {
            Box::new(RecordingHook {
                log: Arc::clone(&self.calls),
                fail_before,
            })
        }

        fn throttled(operation: &str) -> StackforgeError {
            RemoteError::transient(operation, "Rate exceeded").into()
        }
    }

    #[async_trait]
    impl StackApi for FakeApi {
        async fn describe(&self, _stack: &str) -> Result<Option<StackDescription>> {
            self.record("describe");
            let status = {
                let mut statuses = self.statuses.lock().unwrap();
                if statuses.len() > 1 {
                    statuses.pop_front().flatten()
                } else {
                    statuses.front().cloned().flatten()
                }
            };
            Ok(status.map(|status| StackDescription {
                stack_id: String::from("arn:aws:cloudformation:eu-west-1:1:stack/demo/1"),
                stack_name: String::from("demo"),
                status,
                status_reason: None,
                outputs: vec![StackOutput {
                    key: String::from("Url"),
                    value: String::from("https://api.example.com"),
                    description: None,
                    export_name: None,
                }],
            }))
        }

        async fn create(&self, _request: &StackRequest) -> Result<String> {
            self.record("create");
            if self.throttle {
                return Err(Self::throttled("CreateStack"));
            }
            Ok(String::from("arn:aws:cloudformation:eu-west-1:1:stack/demo/1"))
        }

        async fn update(&self, _request: &StackRequest) -> Result<String> {
            self.record("update");
            if self.throttle {
                return Err(Self::throttled("UpdateStack"));
            }
            if self.no_changes {
                return Err(RemoteError::NoChanges.into());
            }
            Ok(String::from("arn:aws:cloudformation:eu-west-1:1:stack/demo/1"))
        }

        async fn delete(&self, _stack: &str, _client_token: &str) -> Result<()> {
            self.record("delete");
            Ok(())
        }

        async fn events_since(
            &self,
            _stack: &str,
            _since: DateTime<Utc>,
        ) -> Result<Vec<StackEvent>> {
            self.record("events");
            Ok(self.events.clone())
        }

        async fn validate_template(&self, _template: &TemplateSource) -> Result<TemplateSummary> {
            self.record("validate");
            Ok(TemplateSummary {
                description: Some(String::from("demo stack")),
                ..TemplateSummary::default()
            })
        }
    }

    /// Writes into the API call log so hook order is visible.
    struct RecordingHook {
        log: Arc<Mutex<Vec<String>>>,
        fail_before: bool,
    }

    #[async_trait]
    impl DeployHook for RecordingHook {
        fn name(&self) -> &str {
            "recording"
        }

        async fn before_converge(
            &self,
            record: &DeploymentRecord,
            _config: &ResolvedConfig,
        ) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("before:{:?}", record.state));
            if self.fail_before {
                return Err(DeployError::Aborted {
                    reason: String::from("change window closed"),
                }
                .into());
            }
            Ok(())
        }

        async fn after_converge(&self, report: &DeploymentReport) -> Result<()> {
            self.log
                .lock()
                .unwrap()
                .push(format!("after:{:?}", report.outcome));
            Ok(())
        }
    }

    fn options() -> DeployOptions {
        DeployOptions {
            poll_interval: Duration::ZERO,
            retry: RetryPolicy::immediate(3),
            ..DeployOptions::default()
        }
    }

    fn setup(config: &str) -> (TempDir, ResolvedConfig) {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("config.yml"), config).unwrap();
        std::fs::write(dir.path().join("template.yml"), TEMPLATE).unwrap();
        let resolved = ConfigResolver::new(EnvMap::new())
            .resolve(dir.path(), None, &json!({}))
            .unwrap();
        (dir, resolved)
    }

    fn event(logical_id: &str, status: &str, at: DateTime<Utc>) -> StackEvent {
        StackEvent {
            timestamp: at,
            logical_id: logical_id.to_string(),
            resource_type: String::from("AWS::Lambda::Function"),
            status: status.to_string(),
            reason: Some(String::from("Handler is invalid")),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_missing_stack() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[None, Some("CREATE_IN_PROGRESS"), Some("CREATE_COMPLETE")]);
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(
            report.record.transitions,
            vec![
                DeployState::Idle,
                DeployState::Packaging,
                DeployState::Uploading,
                DeployState::Rendering,
                DeployState::Converging,
                DeployState::Waiting,
                DeployState::Succeeded,
            ]
        );
        assert_eq!(report.record.terminal_status.as_deref(), Some("CREATE_COMPLETE"));
        assert_eq!(report.outputs.len(), 1);
        assert_eq!(api.calls(), vec!["describe", "create", "describe", "describe"]);
    }

    #[tokio::test]
    async fn test_update_without_changes_is_success() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi {
            no_changes: true,
            ..FakeApi::with_statuses(&[Some("UPDATE_COMPLETE")])
        };
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NoChanges);
        assert_eq!(report.record.state, DeployState::NoopNoChanges);
        assert_eq!(api.count("update"), 1);
        assert_eq!(api.count("create"), 0);
        assert!(report.into_result().is_ok());
    }

    #[tokio::test]
    async fn test_failed_stack_reports_failure_events() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let later = Utc::now() + ChronoDuration::hours(1);
        let api = FakeApi {
            events: vec![
                event("demo", "UPDATE_ROLLBACK_COMPLETE", later + ChronoDuration::seconds(30)),
                event("apiFunction", "UPDATE_FAILED", later + ChronoDuration::seconds(10)),
                event("apiFunction", "UPDATE_IN_PROGRESS", later),
                event("old", "CREATE_FAILED", Utc::now() - ChronoDuration::hours(1)),
            ],
            ..FakeApi::with_statuses(&[
                Some("UPDATE_IN_PROGRESS"),
                Some("UPDATE_ROLLBACK_COMPLETE"),
            ])
        };
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Update, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Failed);
        assert_eq!(report.record.state, DeployState::Failed);
        let ids: Vec<&str> = report
            .failure_events
            .iter()
            .map(|e| e.logical_id.as_str())
            .collect();
        assert_eq!(ids, vec!["apiFunction"]);

        let message = report.into_result().unwrap_err().to_string();
        assert!(message.contains("UPDATE_ROLLBACK_COMPLETE"));
        assert!(message.contains("Handler is invalid"));
    }

    #[tokio::test]
    async fn test_throttled_create_exhausts_retries() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi {
            throttle: true,
            ..FakeApi::with_statuses(&[None])
        };
        let packager = MockArtifactPackager::new();

        let err = Deployer::new(&api, &packager, options())
            .run(Operation::Create, config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackforgeError::Deploy(DeployError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(api.count("create"), 3);
    }

    #[tokio::test]
    async fn test_upsert_refuses_rolled_back_stack() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("ROLLBACK_COMPLETE")]);
        let packager = MockArtifactPackager::new();

        let err = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap_err();

        assert!(matches!(err, StackforgeError::Deploy(DeployError::Aborted { .. })));
        assert_eq!(api.calls(), vec!["describe"]);
    }

    #[tokio::test]
    async fn test_wait_times_out() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("UPDATE_COMPLETE"), Some("UPDATE_IN_PROGRESS")]);
        let packager = MockArtifactPackager::new();
        let options = DeployOptions {
            max_wait: Duration::ZERO,
            ..options()
        };

        let err = Deployer::new(&api, &packager, options)
            .run(Operation::Upsert, config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackforgeError::Remote(RemoteError::Timeout { ref status, .. }) if status == "UPDATE_IN_PROGRESS"
        ));
    }

    #[tokio::test]
    async fn test_delete_refused_without_confirmation() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("CREATE_COMPLETE")]);
        let packager = MockArtifactPackager::new();

        let err = Deployer::new(&api, &packager, options())
            .with_confirmation(Box::new(AutoConfirm(false)))
            .run(Operation::Delete, config)
            .await
            .unwrap_err();

        assert!(matches!(err, StackforgeError::Deploy(DeployError::Aborted { .. })));
        assert_eq!(api.count("delete"), 0);
    }

    #[tokio::test]
    async fn test_delete_waits_until_stack_is_gone() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("CREATE_COMPLETE"), Some("DELETE_IN_PROGRESS"), None]);
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .with_confirmation(Box::new(AutoConfirm(true)))
            .run(Operation::Delete, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(report.record.terminal_status.as_deref(), Some(DELETE_COMPLETE));
        assert_eq!(api.count("delete"), 1);
    }

    #[tokio::test]
    async fn test_delete_skips_confirmation_when_requested() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("UPDATE_COMPLETE"), Some("DELETE_COMPLETE")]);
        let packager = MockArtifactPackager::new();
        let options = DeployOptions {
            skip_confirmation: true,
            ..options()
        };

        let report = Deployer::new(&api, &packager, options)
            .run(Operation::Delete, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
    }

    #[tokio::test]
    async fn test_delete_missing_stack_is_noop() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[None]);
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Delete, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NoChanges);
        assert_eq!(api.calls(), vec!["describe"]);
    }

    #[tokio::test]
    async fn test_compile_renders_without_remote_calls() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::default();
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Compile, config)
            .await
            .unwrap();

        let rendered = report.rendered.unwrap();
        assert!(rendered.contains("FunctionName: demo-api"));
        assert!(rendered.contains("S3Bucket: shared"));
        assert!(rendered.contains("S3Key: api.zip"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_validate_checks_template_remotely() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::default();
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Validate, config)
            .await
            .unwrap();

        assert_eq!(
            report.validation.unwrap().description.as_deref(),
            Some("demo stack")
        );
        assert_eq!(api.calls(), vec!["validate"]);
    }

    const LOCAL_CONFIG: &str = "default:
  stackName: demo
  artifacts:
    bucket: art
  lambdas:
    - name: first
      handler: index.one
      source: ./src/shared
    - name: second
      handler: index.two
      source: ./src/shared
";

    fn local_setup(config: &str) -> (TempDir, ResolvedConfig) {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("src/shared")).unwrap();
        std::fs::write(dir.path().join("src/shared/index.js"), "exports.one = 1").unwrap();
        std::fs::write(dir.path().join("config.yml"), config).unwrap();
        std::fs::write(dir.path().join("template.yml"), TEMPLATE).unwrap();
        let resolved = ConfigResolver::new(EnvMap::new())
            .resolve(dir.path(), None, &json!({}))
            .unwrap();
        (dir, resolved)
    }

    #[tokio::test]
    async fn test_shared_source_packaged_and_uploaded_once() {
        let (_dir, config) = local_setup(LOCAL_CONFIG);
        let api = FakeApi::with_statuses(&[None, Some("CREATE_COMPLETE")]);

        let mut packager = MockArtifactPackager::new();
        packager.expect_package().times(1).returning(|request| {
            Ok(Artifact {
                source: request.source.clone(),
                units: request.units.clone(),
                hash: String::from("abc"),
                archive: PathBuf::from("/tmp/abc.zip"),
                key: String::from("artifacts/abc.zip"),
            })
        });
        packager.expect_upload().times(1).returning(|artifact| {
            Ok(ArtifactLocation {
                bucket: String::from("art"),
                key: artifact.key.clone(),
                hash: Some(artifact.hash.clone()),
            })
        });
        packager
            .expect_upload_template()
            .times(1)
            .withf(|key, body| {
                key.starts_with("templates/demo/")
                    && key.ends_with(".yml")
                    && body.matches("S3Key: artifacts/abc.zip").count() == 2
            })
            .returning(|key, _| Ok(format!("https://art.s3.amazonaws.com/{key}")));

        let report = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
        assert!(report.record.artifact_hash.is_some());
        assert!(
            report
                .record
                .template_location
                .unwrap()
                .starts_with("https://art.s3.amazonaws.com/templates/demo/")
        );
    }

    #[tokio::test]
    async fn test_packaging_failure_aborts_before_remote_calls() {
        let (_dir, config) = local_setup(LOCAL_CONFIG);
        let api = FakeApi::default();

        let mut packager = MockArtifactPackager::new();
        packager.expect_package().returning(|request| {
            Err(PackageError::ArchiveFailed {
                unit: request.label(),
                message: String::from("zip exited with status 12"),
            }
            .into())
        });

        let err = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackforgeError::Package(PackageError::ArchiveFailed { .. })
        ));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn test_local_sources_require_bucket() {
        let config = LOCAL_CONFIG.replace("  artifacts:\n    bucket: art\n", "");
        let (_dir, config) = local_setup(&config);
        let api = FakeApi::default();
        let packager = MockArtifactPackager::new();

        let err = Deployer::new(&api, &packager, options())
            .run(Operation::Upsert, config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackforgeError::Config(ConfigError::MissingBucket { .. })
        ));
        assert!(api.calls().is_empty());
    }

    #[test]
    fn test_find_template_prefers_stack_setting() {
        let (dir, mut config) = setup(REMOTE_CONFIG);
        assert_eq!(find_template(&config).unwrap(), dir.path().join("template.yml"));

        std::fs::write(dir.path().join("custom.json"), "{}").unwrap();
        config.stack.template = Some(String::from("custom.json"));
        assert_eq!(find_template(&config).unwrap(), dir.path().join("custom.json"));

        config.stack.template = Some(String::from("missing.yml"));
        assert!(matches!(
            find_template(&config),
            Err(StackforgeError::Config(ConfigError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_hooks_wrap_create() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[None, Some("CREATE_IN_PROGRESS"), Some("CREATE_COMPLETE")]);
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .with_hook(api.hook(false))
            .run(Operation::Upsert, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Succeeded);
        assert_eq!(
            api.calls(),
            vec![
                "before:Converging",
                "describe",
                "create",
                "describe",
                "describe",
                "after:Succeeded",
            ]
        );
    }

    #[tokio::test]
    async fn test_hooks_wrap_update() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[Some("UPDATE_IN_PROGRESS"), Some("UPDATE_COMPLETE")]);
        let packager = MockArtifactPackager::new();

        Deployer::new(&api, &packager, options())
            .with_hook(api.hook(false))
            .run(Operation::Update, config)
            .await
            .unwrap();

        let calls = api.calls();
        assert_eq!(calls.first().map(String::as_str), Some("before:Converging"));
        assert_eq!(calls[1], "update");
        assert_eq!(calls.last().map(String::as_str), Some("after:Succeeded"));
    }

    #[tokio::test]
    async fn test_after_hook_runs_on_no_changes() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi {
            no_changes: true,
            ..FakeApi::with_statuses(&[Some("UPDATE_COMPLETE")])
        };
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .with_hook(api.hook(false))
            .run(Operation::Update, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::NoChanges);
        assert_eq!(
            api.calls(),
            vec!["before:Converging", "update", "describe", "after:NoChanges"]
        );
    }

    #[tokio::test]
    async fn test_after_hook_skipped_on_failed_stack() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[
            Some("UPDATE_IN_PROGRESS"),
            Some("UPDATE_ROLLBACK_COMPLETE"),
        ]);
        let packager = MockArtifactPackager::new();

        let report = Deployer::new(&api, &packager, options())
            .with_hook(api.hook(false))
            .run(Operation::Update, config)
            .await
            .unwrap();

        assert_eq!(report.outcome, Outcome::Failed);
        let calls = api.calls();
        assert_eq!(calls.iter().filter(|c| c.starts_with("before:")).count(), 1);
        assert!(!calls.iter().any(|c| c.starts_with("after:")));
    }

    #[tokio::test]
    async fn test_hook_error_aborts_before_converge() {
        let (_dir, config) = setup(REMOTE_CONFIG);
        let api = FakeApi::with_statuses(&[None]);
        let packager = MockArtifactPackager::new();

        let err = Deployer::new(&api, &packager, options())
            .with_hook(api.hook(true))
            .run(Operation::Upsert, config)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            StackforgeError::Deploy(DeployError::Aborted { ref reason }) if reason == "change window closed"
        ));
        assert_eq!(api.calls(), vec!["before:Converging"]);
    }
}
