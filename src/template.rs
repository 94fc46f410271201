//! `${name}` placeholder resolution.
//!
//! Placeholders are resolved innermost first, so `${${key}}` looks up the
//! variable whose name is the value of `key`. A substituted value that
//! itself contains placeholders is resolved again on the next pass, up to
//! [`MAX_DEPTH`] passes. Unknown names resolve to the empty string.

use crate::error::InterpreterError;
use indexmap::IndexMap;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Maximum number of substitution passes before a template is treated as
/// cyclic.
pub const MAX_DEPTH: usize = 32;

/// A read-only variable scope.
pub trait Variables {
    fn var(&self, name: &str) -> Option<&str>;
}

impl Variables for HashMap<String, String> {
    fn var(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

impl Variables for IndexMap<String, String> {
    fn var(&self, name: &str) -> Option<&str> {
        self.get(name).map(String::as_str)
    }
}

static PLACEHOLDER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([^$\{\}]*)\}")
        .expect("failed to compile placeholder regex")
});

/// Resolve every `${name}` in `template` against `vars`.
pub fn resolve<V: Variables + ?Sized>(
    template: &str,
    vars: &V,
) -> Result<String, InterpreterError> {
    if !template.contains("${") {
        return Ok(template.to_string());
    }

    let mut current = template.to_string();
    for _ in 0..MAX_DEPTH {
        if !PLACEHOLDER_RE.is_match(&current) {
            return settle(template, current);
        }
        current = PLACEHOLDER_RE
            .replace_all(&current, |caps: &regex::Captures| {
                vars.var(caps[1].trim()).unwrap_or("").to_string()
            })
            .into_owned();
    }

    if PLACEHOLDER_RE.is_match(&current) {
        return Err(InterpreterError::TemplateCycle {
            template: template.to_string(),
            depth: MAX_DEPTH,
        });
    }
    settle(template, current)
}

fn settle(template: &str, resolved: String) -> Result<String, InterpreterError> {
    if resolved.contains("${") {
        return Err(InterpreterError::MalformedTemplate(template.to_string()));
    }
    Ok(resolved)
}
