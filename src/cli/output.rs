//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying
//! information to the user in various formats.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::cloudformation::{StackEvent, StackOutput};
use crate::deploy::{DeploymentReport, Operation, Outcome};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug, Clone, Copy)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Stack output row for table display.
#[derive(Tabled)]
struct OutputRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Export")]
    export: String,
}

/// Failure event row for table display.
#[derive(Tabled)]
struct EventRow {
    #[tabled(rename = "Time")]
    time: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a deployment report for display.
    #[must_use]
    pub fn format_report(&self, report: &DeploymentReport) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Text => Self::format_report_text(report),
        }
    }

    /// Formats a report as text.
    fn format_report_text(report: &DeploymentReport) -> String {
        let record = &report.record;
        let status = record.terminal_status.as_deref().unwrap_or("");
        let mut output = String::new();

        let headline = match (report.outcome, record.operation) {
            (Outcome::NoChanges, Operation::Delete) => {
                format!("{} Stack {} does not exist", "✓".green(), record.stack_name)
            }
            (Outcome::NoChanges, _) => {
                format!("{} Stack {} is up to date", "✓".green(), record.stack_name)
            }
            (Outcome::Succeeded, Operation::Compile) => {
                format!("{} Template rendered for {}", "✓".green(), record.stack_name)
            }
            (Outcome::Succeeded, Operation::Validate) => {
                format!("{} Template is valid", "✓".green())
            }
            (Outcome::Succeeded, operation) => format!(
                "{} {operation} of stack {} complete ({})",
                "✓".green(),
                record.stack_name,
                status.green()
            ),
            (Outcome::Failed, operation) => format!(
                "{} {operation} of stack {} failed ({})",
                "✗".red(),
                record.stack_name,
                status.red()
            ),
        };
        let _ = writeln!(output, "{headline}");

        let _ = writeln!(output, "   Deployment: {}", record.id);
        if let Some(location) = &record.template_location {
            let _ = writeln!(output, "   Template: {location}");
        }
        if let Some(hash) = &record.artifact_hash {
            let _ = writeln!(output, "   Artifacts: {}", &hash[..12.min(hash.len())]);
        }

        if let Some(summary) = &report.validation {
            if let Some(description) = &summary.description {
                let _ = writeln!(output, "   Description: {description}");
            }
            if !summary.parameters.is_empty() {
                let _ = writeln!(output, "   Parameters: {}", summary.parameters.join(", "));
            }
            if !summary.capabilities.is_empty() {
                let _ = writeln!(
                    output,
                    "   Capabilities: {}",
                    summary.capabilities.join(", ")
                );
            }
        }

        if !report.failure_events.is_empty() {
            let _ = write!(output, "\n{} Failure events:\n", "⚠".yellow());
            output.push_str(&Self::format_events(&report.failure_events));
            output.push('\n');
        }

        output
    }

    /// Formats failure events as a table.
    fn format_events(events: &[StackEvent]) -> String {
        let rows: Vec<EventRow> = events
            .iter()
            .map(|e| EventRow {
                time: e.timestamp.format("%H:%M:%S").to_string(),
                resource: format!("{} ({})", e.logical_id, e.resource_type),
                status: e.status.red().to_string(),
                reason: Self::truncate(e.reason.as_deref().unwrap_or(""), 80),
            })
            .collect();
        Table::new(rows).to_string()
    }

    /// Formats stack outputs for display.
    #[must_use]
    pub fn format_outputs(&self, stack_name: &str, outputs: &[StackOutput]) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(outputs).unwrap_or_default(),
            OutputFormat::Text => {
                if outputs.is_empty() {
                    return format!("Stack {stack_name} has no outputs.\n");
                }
                let rows: Vec<OutputRow> = outputs
                    .iter()
                    .map(|o| OutputRow {
                        key: o.key.clone(),
                        value: o.value.clone(),
                        export: o.export_name.clone().unwrap_or_default(),
                    })
                    .collect();

                let mut output = format!("\nOutputs of {stack_name}:\n");
                output.push_str(&Table::new(rows).to_string());
                output.push('\n');
                output
            }
        }
    }

    /// Truncates a string to a maximum number of characters.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.chars().count() <= max_len {
            s.to_string()
        } else {
            let head: String = s.chars().take(max_len.saturating_sub(3)).collect();
            format!("{head}...")
        }
    }
}
