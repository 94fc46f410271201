//! Value producers wrapped by Assert/Verify/Store/Print/WaitFor/If/Retry.

use crate::actuator::value_to_string;
use crate::config::ShellConfig;
use crate::error::InterpreterError;
use crate::expression;
use crate::model::Step;
use crate::run::{BoxFuture, TestRun};
use crate::template::Variables;
use anyhow::{Context, Result};
use regex::Regex;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::Instant;
use tracing::{debug, info};

/// Prefix on an expected value requesting a regular-expression match.
pub const REGEXP_PREFIX: &str = "regexp:";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Getter {
    /// Value of the variable named by `variable`.
    Variable,
    /// Exit status of the shell command in `cmd`.
    Cmd,
    ElementVisible,
    ElementEnable,
    ElementPresent,
    Text,
    ElementAttribute,
    CssValue,
    Title,
    CurrentUrl,
    DocumentReady,
    /// Result of the script in `script`.
    Eval,
    /// CEL expression in `expression`, evaluated over the run variables.
    Expression,
    /// True when every child condition holds, each polled like WaitFor.
    ComplexCondition(Vec<Getter>),
}

impl Getter {
    pub const ALL_NAMES: [&'static str; 14] = [
        "Variable",
        "Cmd",
        "ElementVisible",
        "ElementEnable",
        "ElementPresent",
        "Text",
        "ElementAttribute",
        "CssValue",
        "Title",
        "CurrentUrl",
        "DocumentReady",
        "Eval",
        "Expression",
        "ComplexCondition",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Getter::Variable => "Variable",
            Getter::Cmd => "Cmd",
            Getter::ElementVisible => "ElementVisible",
            Getter::ElementEnable => "ElementEnable",
            Getter::ElementPresent => "ElementPresent",
            Getter::Text => "Text",
            Getter::ElementAttribute => "ElementAttribute",
            Getter::CssValue => "CssValue",
            Getter::Title => "Title",
            Getter::CurrentUrl => "CurrentUrl",
            Getter::DocumentReady => "DocumentReady",
            Getter::Eval => "Eval",
            Getter::Expression => "Expression",
            Getter::ComplexCondition(_) => "ComplexCondition",
        }
    }

    /// Look a getter up by name. `ComplexCondition` comes back with no
    /// children.
    pub fn from_name(name: &str) -> Option<Getter> {
        let getter = match name {
            "Variable" => Getter::Variable,
            "Cmd" => Getter::Cmd,
            "ElementVisible" => Getter::ElementVisible,
            "ElementEnable" => Getter::ElementEnable,
            "ElementPresent" => Getter::ElementPresent,
            "Text" => Getter::Text,
            "ElementAttribute" => Getter::ElementAttribute,
            "CssValue" => Getter::CssValue,
            "Title" => Getter::Title,
            "CurrentUrl" => Getter::CurrentUrl,
            "DocumentReady" => Getter::DocumentReady,
            "Eval" => Getter::Eval,
            "Expression" => Getter::Expression,
            "ComplexCondition" => Getter::ComplexCondition(Vec::new()),
            _ => return None,
        };
        Some(getter)
    }

    /// Parameter holding the expected value. `None` means the getter
    /// itself yields `"true"`/`"false"`.
    pub fn cmp_param_name(&self) -> Option<&'static str> {
        match self {
            Getter::Variable
            | Getter::Cmd
            | Getter::ElementAttribute
            | Getter::CssValue
            | Getter::Eval => Some("value"),
            Getter::Text => Some("text"),
            Getter::Title => Some("title"),
            Getter::CurrentUrl => Some("url"),
            Getter::ElementVisible
            | Getter::ElementEnable
            | Getter::ElementPresent
            | Getter::DocumentReady
            | Getter::Expression
            | Getter::ComplexCondition(_) => None,
        }
    }

    pub fn get<'a>(&'a self, step: &'a Step, run: &'a mut TestRun) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let actuator = run.actuator();
            let value = match self {
                Getter::Variable => {
                    let name = run.string(step, "variable")?;
                    run.var(&name).unwrap_or_default().to_string()
                }
                Getter::Cmd => {
                    let cmd = run.string(step, "cmd")?;
                    let shell = run.config().shell.clone();
                    run_command(&cmd, &shell).await?
                }
                Getter::ElementVisible => {
                    let locator = run.locator(step, "locator")?;
                    match actuator.find_elements(&locator).await?.first() {
                        Some(element) => {
                            (element.is_displayed().await? && element.rect().await?.has_area())
                                .to_string()
                        }
                        None => false.to_string(),
                    }
                }
                Getter::ElementEnable => {
                    let locator = run.locator(step, "locator")?;
                    match actuator.find_elements(&locator).await?.first() {
                        Some(element) => element.is_enabled().await?.to_string(),
                        None => false.to_string(),
                    }
                }
                Getter::ElementPresent => {
                    let locator = run.locator(step, "locator")?;
                    (!actuator.find_elements(&locator).await?.is_empty()).to_string()
                }
                Getter::Text => {
                    let locator = run.locator(step, "locator")?;
                    actuator.find_element(&locator).await?.text().await?
                }
                Getter::ElementAttribute => {
                    let locator = run.locator(step, "locator")?;
                    let attribute = run.string(step, "attributeName")?;
                    actuator
                        .find_element(&locator)
                        .await?
                        .attribute(&attribute)
                        .await?
                        .unwrap_or_default()
                }
                Getter::CssValue => {
                    let locator = run.locator(step, "locator")?;
                    let property = run.string(step, "propertyName")?;
                    actuator
                        .find_element(&locator)
                        .await?
                        .css_value(&property)
                        .await?
                }
                Getter::Title => {
                    value_to_string(&actuator.execute_script("return document.title;").await?)
                }
                Getter::CurrentUrl => {
                    value_to_string(&actuator.execute_script("return document.URL;").await?)
                }
                Getter::DocumentReady => {
                    let state = actuator.execute_script("return document.readyState;").await?;
                    (value_to_string(&state) == "complete").to_string()
                }
                Getter::Eval => {
                    let script = run.string(step, "script")?;
                    value_to_string(&actuator.execute_script(&script).await?)
                }
                Getter::Expression => {
                    let expr = run.string(step, "expression")?;
                    value_to_string(&expression::resolve_value(&expr, &run.vars())?)
                }
                Getter::ComplexCondition(children) => {
                    let mut all = true;
                    for child in children {
                        if !poll_until(child, step, run, false).await? {
                            all = false;
                            break;
                        }
                    }
                    all.to_string()
                }
            };
            debug!("{} -> '{}'", self.name(), value);
            Ok(value)
        })
    }

    /// Compare `get` with the expected value, or read the result as a
    /// boolean when there is no expected-value parameter.
    pub async fn test(&self, step: &Step, run: &mut TestRun) -> Result<bool> {
        let actual = self.get(step, run).await?;
        let Some(key) = self.cmp_param_name() else {
            return Ok(actual.trim().eq_ignore_ascii_case("true"));
        };
        let expected = run.string(step, key)?;
        let matched = matches_expected(&actual, &expected, step)?;
        if matched {
            debug!("actual '{}' matches expected '{}'", actual, expected);
        } else {
            info!("actual '{}' does not match expected '{}'", actual, expected);
            run.set_failure_detail(format!("expected '{expected}' but was '{actual}'"));
        }
        Ok(matched)
    }
}

fn matches_expected(actual: &str, expected: &str, step: &Step) -> Result<bool> {
    match expected.strip_prefix(REGEXP_PREFIX) {
        Some(pattern) => {
            let re = Regex::new(pattern).map_err(|_| {
                InterpreterError::invalid_param(step.label(), "expected", expected)
            })?;
            Ok(re.is_match(actual))
        }
        None => Ok(actual == expected),
    }
}

async fn run_command(cmd: &str, shell: &ShellConfig) -> Result<String> {
    debug!("Running command: {} {} {}", shell.program, shell.flag, cmd);
    let output = Command::new(&shell.program)
        .arg(&shell.flag)
        .arg(cmd)
        .output()
        .await
        .context(format!("Failed to run command: {cmd}"))?;
    debug!(
        "Command exited with {:?}; stdout: {}",
        output.status.code(),
        String::from_utf8_lossy(&output.stdout).trim()
    );
    Ok(output.status.code().unwrap_or(-1).to_string())
}

fn duration_param(step: &Step, run: &TestRun, key: &str, default: Duration) -> Result<Duration> {
    if !step.contains_param(key) {
        return Ok(default);
    }
    let millis: u64 = run.number(step, key)?;
    Ok(Duration::from_millis(millis))
}

/// Poll `getter.test` every `interval` until it holds (inverted when
/// `negated`) or `maxWait` elapses. A timeout is `Ok(false)`.
pub(crate) async fn poll_until(
    getter: &Getter,
    step: &Step,
    run: &mut TestRun,
    negated: bool,
) -> Result<bool> {
    let defaults = run.config().wait_for.clone();
    let max_wait = duration_param(step, run, "maxWait", defaults.max_wait())?;
    let interval = duration_param(step, run, "interval", defaults.interval())?;
    let deadline = Instant::now() + max_wait;
    let mut polls = 0u32;

    loop {
        polls += 1;
        if getter.test(step, run).await? != negated {
            debug!("{} held after {} poll(s)", getter.name(), polls);
            return Ok(true);
        }
        let now = Instant::now();
        if now >= deadline || run.is_stopped() {
            info!(
                "{} still false after {} poll(s) ({} ms)",
                getter.name(),
                polls,
                max_wait.as_millis()
            );
            return Ok(false);
        }
        tokio::time::sleep(interval.min(deadline - now)).await;
    }
}
