//! Unrecoverable interpreter errors.
//!
//! Assertion failures and WaitFor timeouts are not errors; they surface
//! as `Ok(false)` from a step. Everything here aborts the current run and
//! travels inside an [`anyhow::Error`], so callers can `downcast_ref` it.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InterpreterError {
    #[error("template did not settle after {depth} substitutions: {template}")]
    TemplateCycle { template: String, depth: usize },

    #[error("malformed placeholder in template: {0}")]
    MalformedTemplate(String),

    #[error("step '{step}' is missing required parameter '{key}'")]
    MissingParam { step: String, key: String },

    #[error("step '{step}' has invalid value '{value}' for parameter '{key}'")]
    InvalidParam {
        step: String,
        key: String,
        value: String,
    },

    #[error("malformed script at step {index}: {message}")]
    MalformedScript { index: usize, message: String },

    #[error("failed to load '{path}': {message}")]
    ImportLoad { path: String, message: String },

    #[error("data source '{name}': {message}")]
    DataSource { name: String, message: String },

    #[error("invalid comparison '{method}': {message}")]
    InvalidMatcher { method: String, message: String },
}

impl InterpreterError {
    pub fn missing_param(step: impl Into<String>, key: impl Into<String>) -> Self {
        Self::MissingParam {
            step: step.into(),
            key: key.into(),
        }
    }

    pub fn invalid_param(
        step: impl Into<String>,
        key: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self::InvalidParam {
            step: step.into(),
            key: key.into(),
            value: value.into(),
        }
    }
}
