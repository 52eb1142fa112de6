//! Handlebars registry setup and error mapping.

use handlebars::{Handlebars, RenderError, RenderErrorReason, no_escape};

use crate::error::TemplateError;

use super::helpers::{HashHelper, JsonHelper};

/// Name the compiled template is registered under.
pub const TEMPLATE_NAME: &str = "template";

/// Options controlling rendering behavior.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Fail on unresolved lookups instead of rendering them empty.
    pub strict: bool,
}

impl RenderOptions {
    /// Returns options with strict lookups enabled or disabled.
    #[must_use]
    pub const fn strict(strict: bool) -> Self {
        Self { strict }
    }
}

/// Builds a registry with the value helpers and no HTML escaping.
///
/// Output feeds stack templates, so `{{x}}` and `{{{x}}}` render alike.
#[must_use]
pub fn registry(options: RenderOptions) -> Handlebars<'static> {
    let mut handlebars = Handlebars::new();
    handlebars.set_strict_mode(options.strict);
    handlebars.register_escape_fn(no_escape);
    handlebars.register_helper("hash", Box::new(HashHelper));
    handlebars.register_helper("json", Box::new(JsonHelper));
    handlebars
}

/// Maps a compile error, keeping the line number.
pub fn syntax_error(err: &handlebars::TemplateError) -> TemplateError {
    TemplateError::syntax(err.to_string(), err.pos().map(|(line, _)| line).unwrap_or_default())
}

/// Maps a render error; strict-mode lookups become [`TemplateError::MissingField`].
pub fn render_error(err: &RenderError) -> TemplateError {
    match err.reason() {
        RenderErrorReason::MissingVariable(path) => TemplateError::MissingField {
            path: path.clone().unwrap_or_default(),
        },
        _ => TemplateError::runtime(err.to_string()),
    }
}
