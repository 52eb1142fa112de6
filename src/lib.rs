// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![warn(missing_docs)]                // Public items should be documented
#![warn(dead_code)]                   // Unused code is flagged
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![warn(unused_imports)]              // Unused imports are flagged
#![warn(unused_variables)]            // Unused variables are flagged
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy lints (warnings only)
#![warn(clippy::all)]                 // All standard Clippy lints
#![warn(clippy::pedantic)]            // Very strict Clippy lints
#![warn(clippy::nursery)]             // Experimental lints
#![warn(clippy::unwrap_used)]         // unwrap() warning
#![warn(clippy::expect_used)]         // expect() warning
#![warn(clippy::panic)]               // panic!() warning
#![warn(clippy::print_stdout)]        // println!() warning
#![warn(clippy::todo)]                // TODO warning
#![warn(clippy::unimplemented)]       // unimplemented!() warning
#![warn(clippy::unwrap_in_result)]    // unwrap() in Result warning
#![warn(clippy::redundant_clone)]     // Useless clones warning
#![warn(clippy::too_many_arguments)]  // Limit function arguments
#![warn(clippy::cognitive_complexity)] // Limit cognitive complexity
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// ============================================================================
// Crate Documentation
// ============================================================================

//! # Stackforge
//!
//! A layered-configuration deployment tool for AWS `CloudFormation` stacks.
//!
//! ## Overview
//!
//! Stackforge renders a stack template from a layered configuration model
//! and drives `CloudFormation` to converge the stack to it:
//!
//! - Merge a `default` layer with a named deployment layer, splice
//!   `!include` files and substitute `{{references}}`
//! - Normalize deployable units and derive API routing resources
//! - Package unit sources into content-addressed archives in S3
//! - Create, update, validate or delete the stack, waiting for a terminal
//!   status and reporting failure events
//!
//! ## Pipeline
//!
//! 1. **Environment**: process variables and the `.env` secrets file
//! 2. **Configuration**: `config.yml` resolved for the selected layer
//! 3. **Packaging**: one archive per distinct source folder
//! 4. **Rendering**: `template.yml` rendered against the resolved data
//! 5. **Deployment**: the converge state machine
//!
//! ## Modules
//!
//! - [`config`]: Configuration resolution and validation
//! - [`routing`]: Routing resource derivation
//! - [`template`]: Template compilation and rendering
//! - [`packaging`]: Artifact hashing, archiving and upload
//! - [`cloudformation`]: Remote stack API
//! - [`deploy`]: Deployment state machine
//! - [`cli`]: Command-line interface
//!
//! ## Example
//!
//! ```yaml
//! default:
//!   stackName: demo
//!   artifacts:
//!     bucket: demo-artifacts
//!   lambdas:
//!     users:
//!       handler: index.handler
//!       source: ./src/users
//!       routes:
//!         - path: /users/{id}
//!           method: GET
//!   apis:
//!     - name: public
//!
//! prod:
//!   stackName: demo-prod
//!   lambdas:
//!     users:
//!       memory: 2048
//! ```

// ============================================================================
// Modules
// ============================================================================

pub mod aws;
pub mod cli;
pub mod cloudformation;
pub mod config;
pub mod deploy;
pub mod error;
pub mod packaging;
pub mod routing;
pub mod template;

// ============================================================================
// Re-exports
// ============================================================================

pub use aws::AwsClientConfig;
pub use cli::{Cli, Commands, OutputFormatter};
pub use cloudformation::{CloudFormationApi, StackApi};
pub use config::{ConfigResolver, ConfigValidator, EnvLoader, ResolvedConfig};
pub use deploy::{DeployOptions, Deployer, DeploymentReport, Operation, RetryPolicy};
pub use error::{Result, StackforgeError};
pub use packaging::{ArtifactPackager, S3Packager};
pub use routing::RoutingResourceSet;
pub use template::{Template, render};
