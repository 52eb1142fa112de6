//! Interactive hooks used by the command-line tool.

use async_trait::async_trait;
use std::io::Write;

use crate::deploy::{Confirmation, DeployHook, DeploymentReport};
use crate::error::Result;

use super::output::OutputFormatter;

/// Prints stack outputs once the stack converged.
#[derive(Debug, Clone, Copy)]
pub struct OutputsHook {
    formatter: OutputFormatter,
}

impl OutputsHook {
    /// Creates the hook.
    #[must_use]
    pub const fn new(formatter: OutputFormatter) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl DeployHook for OutputsHook {
    fn name(&self) -> &str {
        "outputs"
    }

    async fn after_converge(&self, report: &DeploymentReport) -> Result<()> {
        let text = self
            .formatter
            .format_outputs(&report.record.stack_name, &report.outputs);
        let mut stdout = std::io::stdout().lock();
        stdout.write_all(text.as_bytes())?;
        stdout.flush()?;
        Ok(())
    }
}

/// Asks on the terminal.
#[derive(Debug, Clone, Copy, Default)]
pub struct StdinConfirmation;

impl Confirmation for StdinConfirmation {
    fn confirm(&self, prompt: &str) -> Result<bool> {
        eprint!("\n{prompt} [y/N]: ");
        std::io::stderr().flush()?;

        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;

        Ok(input.trim().eq_ignore_ascii_case("y"))
    }
}
