//! `{{reference}}` substitution over a merged configuration tree.

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::{ConfigError, Result, StackforgeError, TemplateError};
use crate::template::{RenderOptions, Template};

use super::document::deep_merge;
use super::env::EnvMap;

/// Number of substitution passes. Two passes resolve references whose
/// target is itself a reference.
pub const SUBSTITUTION_PASSES: usize = 2;

/// Builds the lookup scope for one pass: environment variables at the top
/// level and under `env`, overlaid by the tree.
#[must_use]
pub fn build_scope(tree: &Value, env: &EnvMap) -> Value {
    let vars: Map<String, Value> = env
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();

    let mut scope = Value::Object(vars.clone());
    if let Value::Object(map) = &mut scope {
        map.insert(String::from("env"), Value::Object(vars));
    }
    deep_merge(&mut scope, tree.clone());
    scope
}

/// Resolves every `{{reference}}` in string values and keys of the tree.
///
/// Runs [`SUBSTITUTION_PASSES`] passes, rebuilding the scope from the
/// partially resolved tree each time. A string that is exactly one
/// reference takes the native type of its target.
///
/// # Errors
///
/// Returns [`ConfigError::UnresolvedReference`] for missing targets in
/// strict mode and template errors for malformed references.
pub fn resolve_variables(tree: Value, env: &EnvMap, options: RenderOptions) -> Result<Value> {
    let mut current = tree;
    for pass in 1..=SUBSTITUTION_PASSES {
        let scope = build_scope(&current, env);
        current = substitute(&current, &scope, options)?;
        trace!("Substitution pass {pass} complete");
    }
    Ok(current)
}

fn substitute(value: &Value, scope: &Value, options: RenderOptions) -> Result<Value> {
    match value {
        Value::String(text) => substitute_str(text, scope, options),
        Value::Array(items) => items
            .iter()
            .map(|item| substitute(item, scope, options))
            .collect::<Result<Vec<_>>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = Map::with_capacity(map.len());
            for (key, item) in map {
                let key = match substitute_str(key, scope, options)? {
                    Value::String(s) => s,
                    other => crate::template::stringify(&other),
                };
                out.insert(key, substitute(item, scope, options)?);
            }
            Ok(Value::Object(out))
        }
        scalar => Ok(scalar.clone()),
    }
}

fn substitute_str(text: &str, scope: &Value, options: RenderOptions) -> Result<Value> {
    if !text.contains("{{") {
        return Ok(Value::String(text.to_string()));
    }
    Template::compile(text)?
        .render_value(scope, options)
        .map_err(unresolved)
}

fn unresolved(err: StackforgeError) -> StackforgeError {
    match err {
        StackforgeError::Template(TemplateError::MissingField { path }) => {
            ConfigError::UnresolvedReference { reference: path }.into()
        }
        other => other,
    }
}
