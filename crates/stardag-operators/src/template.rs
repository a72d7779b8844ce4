//! Templates for source locations and insert-select statements.
//!
//! Templates are rendered by minijinja against [`ExecutionContext::template_vars`].
//! Undefined variables are an error rather than an empty string, so a typo in a
//! template cannot silently point a load at the wrong prefix.
//!
//! ```text
//! s3://udacity-dend/log_data/{{ year }}/{{ month }}/{{ ds }}-events.json
//! ```

use minijinja::{Environment, UndefinedBehavior};
use thiserror::Error;

use crate::context::ExecutionContext;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to resolve template '{template}': {message}")]
pub struct TemplateError {
  pub template: String,
  pub message: String,
}

/// Render `template` against the run context.
pub fn resolve(template: &str, ctx: &ExecutionContext) -> Result<String, TemplateError> {
  let mut env = Environment::new();
  env.set_undefined_behavior(UndefinedBehavior::Strict);

  env
    .render_str(template, ctx.template_vars())
    .map_err(|e| TemplateError {
      template: template.to_string(),
      message: e.to_string(),
    })
}
