//! CEL-based expression evaluation for skip conditions and the
//! `Expression` getter.
//!
//! Variables are strings in the run scope; values that read as integers,
//! decimals or booleans are exposed to CEL with that type so
//! `_index > 2` compares numerically.

use crate::data::InputData;
use anyhow::{anyhow, Result};
use cel::{Context, Program};
use serde_json::Value;
use tracing::debug;

/// Evaluate a CEL expression string against a variable row.
///
/// Non-boolean results are coerced: non-zero/non-empty → true.
pub fn evaluate_test(expr: &str, vars: &InputData) -> Result<bool> {
    let program = compile(expr)?;
    let context = build_context(vars)?;
    let result = program
        .execute(&context)
        .map_err(|e| anyhow!("CEL execution error: {e}"))?;

    Ok(cel_value_is_truthy(&result))
}

/// Resolve a CEL expression to a `serde_json::Value`.
pub fn resolve_value(expr: &str, vars: &InputData) -> Result<Value> {
    let program = compile(expr)?;
    let context = build_context(vars)?;
    let result = program
        .execute(&context)
        .map_err(|e| anyhow!("CEL execution error: {e}"))?;

    cel_to_json(&result)
}

/// Interpret a resolved flag: empty and `false` are false, `true` is
/// true (case-insensitive), anything else is evaluated as CEL.
pub fn evaluate_flag(text: &str, vars: &InputData) -> Result<bool> {
    let trimmed = text.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("false") {
        return Ok(false);
    }
    if trimmed.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    evaluate_test(trimmed, vars)
}

fn compile(expr: &str) -> Result<Program> {
    debug!("Compiling CEL expression: {expr}");
    Program::compile(expr).map_err(|e| anyhow!("CEL compile error for '{expr}': {e}"))
}

fn typed_value(raw: &str) -> Value {
    if let Ok(i) = raw.parse::<i64>() {
        return Value::from(i);
    }
    if raw.contains('.') {
        if let Ok(f) = raw.parse::<f64>() {
            if f.is_finite() {
                return Value::from(f);
            }
        }
    }
    match raw {
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}

fn build_context<'a>(vars: &InputData) -> Result<Context<'a>> {
    let mut context = Context::default();

    for (key, raw) in &vars.vars {
        context
            .add_variable(key.as_str(), typed_value(raw))
            .map_err(|e| {
                anyhow!("Failed to add variable '{key}' to CEL context: {e}")
            })?;
    }

    Ok(context)
}

fn cel_value_is_truthy(value: &cel::Value) -> bool {
    match value {
        cel::Value::Bool(b) => *b,
        cel::Value::Int(i) => *i != 0,
        cel::Value::UInt(u) => *u != 0,
        cel::Value::Float(f) => *f != 0.0,
        cel::Value::String(s) => !s.is_empty(),
        cel::Value::Null => false,
        cel::Value::List(list) => !list.is_empty(),
        cel::Value::Map(map) => !map.map.is_empty(),
        _ => true,
    }
}

fn cel_to_json(value: &cel::Value) -> Result<Value> {
    value
        .json()
        .map_err(|e| anyhow!("Failed to convert CEL value to JSON: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_vars(pairs: &[(&str, &str)]) -> InputData {
        pairs.iter().copied().collect()
    }

    #[test]
    fn test_numeric_strings_compare_as_numbers() {
        let vars = make_vars(&[("_index", "3")]);
        assert!(evaluate_test("_index > 2", &vars).unwrap());
        assert!(!evaluate_test("_index < 2", &vars).unwrap());
    }

    #[test]
    fn test_logical_operators() {
        let vars = make_vars(&[("x", "10"), ("y", "20")]);
        assert!(evaluate_test("x == 10 && y == 20", &vars).unwrap());
        assert!(evaluate_test("x == 10 || y == 99", &vars).unwrap());
        assert!(!evaluate_test("x == 99 && y == 20", &vars).unwrap());
    }

    #[test]
    fn test_string_functions() {
        let vars = make_vars(&[("name", "hello_world")]);
        assert!(evaluate_test("name.contains(\"hello\")", &vars).unwrap());
        assert!(evaluate_test("name.startsWith(\"hello\")", &vars).unwrap());
        assert!(evaluate_test("name.endsWith(\"world\")", &vars).unwrap());
    }

    #[test]
    fn test_boolean_strings() {
        let vars = make_vars(&[("ready", "true")]);
        assert!(evaluate_test("ready", &vars).unwrap());
        assert!(evaluate_test("ready == true", &vars).unwrap());
    }

    #[test]
    fn test_flag_literals_skip_evaluation() {
        let vars = InputData::new();
        assert!(evaluate_flag("TRUE", &vars).unwrap());
        assert!(!evaluate_flag("  false ", &vars).unwrap());
        assert!(!evaluate_flag("", &vars).unwrap());
    }

    #[test]
    fn test_flag_expression() {
        let vars = make_vars(&[("env", "prod")]);
        assert!(evaluate_flag("env == \"prod\"", &vars).unwrap());
        assert!(!evaluate_flag("env == \"dev\"", &vars).unwrap());
    }

    #[test]
    fn test_resolve_value() {
        let vars = make_vars(&[("x", "10")]);
        let v = resolve_value("x > 5 ? \"big\" : \"small\"", &vars).unwrap();
        assert_eq!(v, json!("big"));
    }

    #[test]
    fn test_size_of_string_variable() {
        let vars = make_vars(&[("s", "abc")]);
        assert!(evaluate_test("size(s) == 3", &vars).unwrap());
    }

    #[test]
    fn test_compile_error() {
        let result = evaluate_test("invalid %%% expr", &InputData::new());
        assert!(result.is_err());
    }
}
