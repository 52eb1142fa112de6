//! Stackforge CLI entrypoint.
//!
//! This is the main entrypoint for the stackforge command-line tool.

use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use stackforge::aws::AwsClientConfig;
use stackforge::cli::{Cli, Commands, OutputFormat, OutputFormatter, OutputsHook, StdinConfirmation};
use stackforge::cloudformation::CloudFormationApi;
use stackforge::deploy::{DeploymentReport, Deployer};
use stackforge::error::Result;
use stackforge::packaging::S3Packager;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

/// Main entrypoint.
fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logging
    init_logging(cli.verbose, cli.output);

    // Run async runtime
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create async runtime: {e}");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the logging system. Logs go to stderr so stdout carries
/// templates and reports only.
fn init_logging(verbose: bool, format: OutputFormat) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match format {
        OutputFormat::Json => builder.json().init(),
        OutputFormat::Text => builder.init(),
    }
}

/// Main async entry point.
async fn run(cli: Cli) -> Result<()> {
    let formatter = OutputFormatter::new(cli.output);
    let operation = cli.command.operation();

    // Configuration errors abort before any client is built
    let config = cli.resolve_config()?;

    let aws = AwsClientConfig::new(config.region.clone(), cli.profile.clone())
        .load()
        .await;
    let api = CloudFormationApi::new(&aws);
    let packager = S3Packager::with_client(
        aws_sdk_s3::Client::new(&aws),
        config.artifact_bucket.as_deref(),
        &config.artifact_prefix,
    );

    let mut deployer = Deployer::new(&api, &packager, cli.deploy_options())
        .with_confirmation(Box::new(StdinConfirmation));
    if cli.show_outputs && formatter.format() == OutputFormat::Text {
        deployer = deployer.with_hook(Box::new(OutputsHook::new(formatter)));
    }

    let report = deployer.run(operation, config).await?;

    // A template printed to stdout pushes the report to stderr
    let mut report_to_stdout = true;
    if let Commands::Compile { out } = &cli.command {
        write_template(&report, out.as_deref())?;
        report_to_stdout = out.is_some();
    }
    emit(&formatter.format_report(&report), report_to_stdout)?;

    report.into_result().map(|_| ())
}

/// Writes a compiled template to a file or stdout.
fn write_template(report: &DeploymentReport, out: Option<&Path>) -> Result<()> {
    let Some(rendered) = &report.rendered else {
        return Ok(());
    };

    match out {
        Some(path) => {
            std::fs::write(path, rendered)?;
            info!("Wrote template to {}", path.display());
        }
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(rendered.as_bytes())?;
            stdout.flush()?;
        }
    }
    Ok(())
}

/// Writes the report.
fn emit(text: &str, to_stdout: bool) -> Result<()> {
    debug!("Emitting report ({} bytes)", text.len());
    if to_stdout {
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
    } else {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(text.as_bytes())?;
        stderr.flush()?;
    }
    Ok(())
}
