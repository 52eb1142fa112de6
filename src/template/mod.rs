//! Template rendering module.
//!
//! Templates are Handlebars documents rendered against the resolved
//! configuration:
//! - `{{path.to.field}}` interpolation, `{{../field}}` and `{{@root.field}}`
//! - `{{#each}}`, `{{#if}}`, `{{#unless}}`, `{{#with}}` blocks with `{{else}}`
//! - `{{hash x}}` (SHA-256 hex) and `{{json x}}` value helpers
//!
//! Output is never HTML-escaped. Unresolved lookups render as empty text
//! unless strict mode is enabled.

mod helpers;
mod registry;

use serde_json::Value;
use tracing::trace;

use crate::error::{Result, TemplateError};

pub use helpers::{content_hash, lookup, stringify};
pub use registry::RenderOptions;

use registry::{TEMPLATE_NAME, render_error, syntax_error};

/// A compiled template.
#[derive(Debug, Clone)]
pub struct Template {
    compiled: handlebars::Template,
    reference: Option<String>,
}

impl Template {
    /// Compiles template text.
    ///
    /// # Errors
    ///
    /// Returns [`TemplateError::Syntax`] for malformed directives.
    pub fn compile(source: &str) -> Result<Self> {
        let compiled = handlebars::Template::compile(source).map_err(|e| syntax_error(&e))?;
        trace!("Compiled template ({} bytes)", source.len());
        Ok(Self {
            compiled,
            reference: single_reference(source).map(str::to_string),
        })
    }

    /// Renders the template to text.
    ///
    /// # Errors
    ///
    /// Returns an error on strict-mode lookup failures or helper failures.
    pub fn render(&self, data: &Value, options: RenderOptions) -> Result<String> {
        let mut handlebars = registry::registry(options);
        handlebars.register_template(TEMPLATE_NAME, self.compiled.clone());
        handlebars
            .render(TEMPLATE_NAME, data)
            .map_err(|e| render_error(&e).into())
    }

    /// Renders the template to a value.
    ///
    /// A template consisting of exactly one `{{path}}` reference evaluates to
    /// the referenced value with its native type (missing values become an
    /// empty string); anything else renders to a string.
    ///
    /// # Errors
    ///
    /// Returns an error on strict-mode lookup failures or helper failures.
    pub fn render_value(&self, data: &Value, options: RenderOptions) -> Result<Value> {
        let Some(path) = &self.reference else {
            return self.render(data, options).map(Value::String);
        };

        match lookup(data, path) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ if options.strict => Err(TemplateError::MissingField { path: path.clone() }.into()),
            _ => Ok(Value::String(String::new())),
        }
    }
}

/// Returns the path of a template that is exactly one `{{path}}` reference.
fn single_reference(source: &str) -> Option<&str> {
    let inner = source
        .strip_prefix("{{")?
        .strip_suffix("}}")?
        .trim();

    let is_path = !inner.is_empty()
        && inner != "else"
        && !inner.starts_with(['#', '/', '!', '>', '^', '{', '&', '~', '.'])
        && inner
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '/' | '[' | ']'));
    is_path.then_some(inner)
}

/// Compiles and renders a template in one step with default options.
///
/// # Errors
///
/// Returns an error if the template is malformed.
pub fn render(source: &str, data: &Value) -> Result<String> {
    Template::compile(source)?.render(data, RenderOptions::default())
}

/// Checks that rendered output parses as a stack template document.
///
/// JSON documents are parsed as JSON, everything else as YAML (short-form
/// intrinsic function tags such as `!Ref` are accepted). The document root
/// must be a mapping.
///
/// # Errors
///
/// Returns [`TemplateError::InvalidOutput`] if the output does not parse.
pub fn validate_rendered(output: &str) -> Result<()> {
    let is_mapping = if output.trim_start().starts_with('{') {
        serde_json::from_str::<Value>(output)
            .map_err(|e| TemplateError::InvalidOutput {
                message: format!("JSON parse error: {e}"),
            })?
            .is_object()
    } else {
        serde_yaml::from_str::<serde_yaml::Value>(output)
            .map_err(|e| TemplateError::InvalidOutput {
                message: format!("YAML parse error: {e}"),
            })?
            .is_mapping()
    };

    if is_mapping {
        Ok(())
    } else {
        Err(TemplateError::InvalidOutput {
            message: String::from("template root must be a mapping"),
        }
        .into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StackforgeError;
    use serde_json::json;

    const STACK_TEMPLATE: &str = r"AWSTemplateFormatVersion: '2010-09-09'
Resources:
  {{#each lambdas}}
  {{name}}Function:
    Type: AWS::Lambda::Function
    Properties:
      FunctionName: {{fullName}}
      Handler: {{handler}}
      MemorySize: {{memory}}
      Code:
        S3Bucket: {{code.bucket}}
        S3Key: {{code.key}}
      Environment:
        Variables: {{json environment}}
  {{/each}}
  Deployment{{hash @root.stackName}}:
    Type: AWS::ApiGateway::Deployment
    Properties:
      RestApiId: !Ref Api
";

    #[test]
    fn test_render_stack_template_round_trip() {
        let data = json!({
            "stackName": "demo",
            "lambdas": [
                {"name": "f1", "fullName": "demo-f1", "handler": "f1.run", "memory": 1024,
                 "code": {"bucket": "b", "key": "k1.zip"}, "environment": {"A": "1"}},
                {"name": "f2", "fullName": "demo-f2", "handler": "f2.run", "memory": 512,
                 "code": {"bucket": "b", "key": "k2.zip"}, "environment": {}}
            ]
        });
        let output = Template::compile(STACK_TEMPLATE)
            .unwrap()
            .render(&data, RenderOptions::default())
            .unwrap();

        validate_rendered(&output).unwrap();

        let parsed: serde_yaml::Value = serde_yaml::from_str(&output).unwrap();
        let resources = parsed["Resources"].as_mapping().unwrap();
        let names: Vec<&str> = resources.keys().filter_map(|k| k.as_str()).collect();
        assert_eq!(names[0], "f1Function");
        assert_eq!(names[1], "f2Function");
        assert!(names[2].starts_with("Deployment"));
        assert_eq!(
            parsed["Resources"]["f1Function"]["Properties"]["MemorySize"].as_u64(),
            Some(1024)
        );
    }

    #[test]
    fn test_render_value_keeps_native_type() {
        let data = json!({"defaults": {"memory": 512, "tags": {"team": "core"}}});
        let template = Template::compile("{{defaults.memory}}").unwrap();
        assert_eq!(
            template.render_value(&data, RenderOptions::default()).unwrap(),
            json!(512)
        );
        let template = Template::compile("{{defaults.tags}}").unwrap();
        assert_eq!(
            template.render_value(&data, RenderOptions::default()).unwrap(),
            json!({"team": "core"})
        );
        let template = Template::compile("mem-{{defaults.memory}}").unwrap();
        assert_eq!(
            template.render_value(&data, RenderOptions::default()).unwrap(),
            json!("mem-512")
        );
    }

    #[test]
    fn test_render_value_missing_is_empty_string() {
        let template = Template::compile("{{nope}}").unwrap();
        assert_eq!(
            template.render_value(&json!({}), RenderOptions::default()).unwrap(),
            json!("")
        );
    }

    #[test]
    fn test_syntax_error_surfaces_as_template_error() {
        let err = render("{{#each items}}", &json!({})).unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Template(TemplateError::Syntax { .. })
        ));
    }

    #[test]
    fn test_validate_rendered_rejects_broken_yaml() {
        assert!(validate_rendered("Resources: [unclosed").is_err());
        assert!(validate_rendered("- just\n- a list\n").is_err());
        assert!(validate_rendered("{\"Resources\": {}}").is_ok());
    }

    #[test]
    fn test_single_reference_detection() {
        assert_eq!(single_reference("{{a.b}}"), Some("a.b"));
        assert_eq!(single_reference("{{ @root.x }}"), Some("@root.x"));
        assert_eq!(single_reference("x{{a}}"), None);
        assert_eq!(single_reference("{{a}}-{{b}}"), None);
        assert_eq!(single_reference("{{hash a}}"), None);
        assert_eq!(single_reference("{{{a}}}"), None);
        assert_eq!(single_reference("plain"), None);
    }

    #[test]
    fn test_standalone_block_lines_are_removed() {
        let data = json!({"items": ["a", "b"]});
        let output = render("list:\n  {{#each items}}\n  - {{this}}\n  {{/each}}\nend\n", &data).unwrap();
        assert_eq!(output, "list:\n  - a\n  - b\nend\n");
    }

    #[test]
    fn test_strict_render_reports_missing_field() {
        let err = Template::compile("{{nope}}")
            .unwrap()
            .render(&json!({}), RenderOptions::strict(true))
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Template(TemplateError::MissingField { .. })
        ));

        let err = Template::compile("{{nope}}")
            .unwrap()
            .render_value(&json!({}), RenderOptions::strict(true))
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::Template(TemplateError::MissingField { ref path }) if path == "nope"
        ));
    }
}
