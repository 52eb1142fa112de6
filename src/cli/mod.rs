//! CLI module for the Stackforge deployment tool.
//!
//! This module provides the command-line interface for rendering and
//! deploying `CloudFormation` stacks.

mod commands;
mod hooks;
mod output;

pub use commands::{Cli, Commands, OutputFormat};
pub use hooks::{OutputsHook, StdinConfirmation};
pub use output::OutputFormatter;
