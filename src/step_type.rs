//! Step behaviors.
//!
//! A closed set of variants: plain actions, getter-wrapping steps and the
//! flow-control steps that own a sub-step window.

use crate::error::InterpreterError;
use crate::flow;
use crate::getter::{self, Getter};
use crate::model::Step;
use crate::run::TestRun;
use crate::script::Script;
use crate::actuator::value_to_string;
use anyhow::Result;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepType {
    /// Navigate to `url`.
    Get,
    ClickElement,
    /// Clear `locator` and type `text`.
    SetElementText,
    ClearElement,
    /// Run `script`, storing the result in `variable` when given.
    ExecuteScript,
    /// Sleep `waitTime` milliseconds.
    Pause,
    SetVariable,
    /// Load the script at `path` (relative to `baseDir`) and run it with
    /// the caller's variables.
    Include,
    Assert(Getter),
    Verify(Getter),
    Store(Getter),
    Print(Getter),
    WaitFor(Getter),
    If(Getter),
    Retry(Getter),
    Loop,
}

const ACTIONS: [(&str, StepType); 9] = [
    ("get", StepType::Get),
    ("clickElement", StepType::ClickElement),
    ("setElementText", StepType::SetElementText),
    ("clearElement", StepType::ClearElement),
    ("executeScript", StepType::ExecuteScript),
    ("pause", StepType::Pause),
    ("setVariable", StepType::SetVariable),
    ("include", StepType::Include),
    ("loop", StepType::Loop),
];

const WRAPPERS: [(&str, fn(Getter) -> StepType); 7] = [
    ("assert", StepType::Assert),
    ("verify", StepType::Verify),
    ("store", StepType::Store),
    ("print", StepType::Print),
    ("waitFor", StepType::WaitFor),
    ("if", StepType::If),
    ("retry", StepType::Retry),
];

impl StepType {
    /// Externally visible name: the action name, or the wrapper name
    /// followed by the getter name (`assertVariable`).
    pub fn type_name(&self) -> String {
        if let Some(getter) = self.getter() {
            return format!("{}{}", self.wrapper_name().unwrap_or_default(), getter.name());
        }
        ACTIONS
            .iter()
            .find(|(_, t)| t == self)
            .map(|(name, _)| name.to_string())
            .unwrap_or_default()
    }

    pub fn from_name(name: &str) -> Option<StepType> {
        if let Some((_, t)) = ACTIONS.iter().find(|(n, _)| *n == name) {
            return Some(t.clone());
        }
        WRAPPERS.iter().find_map(|(prefix, wrap)| {
            name.strip_prefix(prefix)
                .and_then(Getter::from_name)
                .map(wrap)
        })
    }

    pub fn getter(&self) -> Option<&Getter> {
        match self {
            StepType::Assert(g)
            | StepType::Verify(g)
            | StepType::Store(g)
            | StepType::Print(g)
            | StepType::WaitFor(g)
            | StepType::If(g)
            | StepType::Retry(g) => Some(g),
            _ => None,
        }
    }

    fn wrapper_name(&self) -> Option<&'static str> {
        let name = match self {
            StepType::Assert(_) => "assert",
            StepType::Verify(_) => "verify",
            StepType::Store(_) => "store",
            StepType::Print(_) => "print",
            StepType::WaitFor(_) => "waitFor",
            StepType::If(_) => "if",
            StepType::Retry(_) => "retry",
            _ => return None,
        };
        Some(name)
    }

    /// Owns a sub-step window.
    pub fn is_flow(&self) -> bool {
        matches!(self, StepType::If(_) | StepType::Retry(_) | StepType::Loop)
    }

    /// Reports itself through an "End ..." entry after its body instead of
    /// an entry before it.
    pub fn defers_report(&self) -> bool {
        self.is_flow() || matches!(self, StepType::Include)
    }

    pub fn is_verify(&self) -> bool {
        matches!(self, StepType::Verify(_))
    }

    /// `false` is a recoverable failure; `Err` aborts the run.
    pub async fn run(&self, step: &Step, run: &mut TestRun) -> Result<bool> {
        match self {
            StepType::Get => {
                let url = run.string(step, "url")?;
                url::Url::parse(&url)
                    .map_err(|_| InterpreterError::invalid_param(step.label(), "url", url.clone()))?;
                run.actuator().navigate(&url).await?;
                Ok(true)
            }
            StepType::ClickElement => {
                let locator = run.locator(step, "locator")?;
                run.actuator().find_element(&locator).await?.click().await?;
                Ok(true)
            }
            StepType::SetElementText => {
                let locator = run.locator(step, "locator")?;
                let text = run.string(step, "text")?;
                let element = run.actuator().find_element(&locator).await?;
                element.clear().await?;
                element.send_keys(&text).await?;
                Ok(true)
            }
            StepType::ClearElement => {
                let locator = run.locator(step, "locator")?;
                run.actuator().find_element(&locator).await?.clear().await?;
                Ok(true)
            }
            StepType::ExecuteScript => {
                let script = run.string(step, "script")?;
                let value = run.actuator().execute_script(&script).await?;
                if step.contains_param("variable") {
                    let name = run.string(step, "variable")?;
                    run.put_vars(name, value_to_string(&value));
                }
                Ok(true)
            }
            StepType::Pause => {
                let millis: u64 = run.number(step, "waitTime")?;
                tokio::time::sleep(Duration::from_millis(millis)).await;
                Ok(true)
            }
            StepType::SetVariable => {
                let name = run.string(step, "variable")?;
                let value = run.string(step, "value")?;
                run.put_vars(name, value);
                Ok(true)
            }
            StepType::Include => include(step, run).await,
            StepType::Assert(g) | StepType::Verify(g) => getter_test(g, step, run).await,
            StepType::Store(g) => {
                let value = g.get(step, run).await?;
                let name = run.string(step, "variable")?;
                debug!("Storing '{}' into '{}'", value, name);
                run.put_vars(name, value);
                Ok(true)
            }
            StepType::Print(g) => {
                let mut value = g.get(step, run).await?;
                if step.is_negated() {
                    value = match value.as_str() {
                        "true" => "false".to_string(),
                        "false" => "true".to_string(),
                        _ => value,
                    };
                }
                run.info(&value)?;
                Ok(true)
            }
            StepType::WaitFor(g) => getter::poll_until(g, step, run, step.is_negated()).await,
            StepType::If(g) => flow::run_if(g, step, run).await,
            StepType::Retry(g) => flow::run_retry(g, step, run).await,
            StepType::Loop => flow::run_loop(step, run).await,
        }
    }
}

/// Getter outcome with the step's negation applied.
pub(crate) async fn getter_test(getter: &Getter, step: &Step, run: &mut TestRun) -> Result<bool> {
    Ok(getter.test(step, run).await? != step.is_negated())
}

async fn include(step: &Step, run: &mut TestRun) -> Result<bool> {
    let path = run.string(step, "path")?;
    let base_dir = run.string_or(step, "baseDir", "")?;
    let loader = run.script_loader().ok_or_else(|| InterpreterError::ImportLoad {
        path: path.clone(),
        message: "no script loader configured".to_string(),
    })?;
    let steps = loader
        .load(&path, &base_dir)
        .await
        .map_err(|e| InterpreterError::ImportLoad {
            path: path.clone(),
            message: format!("{e:#}"),
        })?;
    let script = Script::new(steps)?;
    debug!("Including {} step(s) from {}", script.len(), path);
    let success = run.run_included(&script).await?;
    run.start_test("End Include")?;
    Ok(success)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_getter_use_names() {
        assert_eq!(StepType::Assert(Getter::Variable).type_name(), "assertVariable");
        assert_eq!(
            StepType::WaitFor(Getter::DocumentReady).type_name(),
            "waitForDocumentReady"
        );
        assert_eq!(StepType::If(Getter::ElementVisible).type_name(), "ifElementVisible");
        assert_eq!(StepType::Loop.type_name(), "loop");
        assert_eq!(StepType::SetElementText.type_name(), "setElementText");
    }

    #[test]
    fn test_registry_round_trip() {
        let mut types: Vec<StepType> = ACTIONS.iter().map(|(_, t)| t.clone()).collect();
        for (_, wrap) in WRAPPERS {
            for name in Getter::ALL_NAMES {
                if let Some(g) = Getter::from_name(name) {
                    types.push(wrap(g));
                }
            }
        }
        for t in types {
            assert_eq!(StepType::from_name(&t.type_name()), Some(t.clone()), "{t:?}");
        }
    }

    #[test]
    fn test_unknown_names() {
        assert_eq!(StepType::from_name("assertNothing"), None);
        assert_eq!(StepType::from_name("dance"), None);
        assert_eq!(StepType::from_name(""), None);
    }

    #[test]
    fn test_flow_classification() {
        assert!(StepType::Loop.is_flow());
        assert!(StepType::Retry(Getter::Variable).is_flow());
        assert!(!StepType::WaitFor(Getter::Variable).is_flow());
        assert!(StepType::Include.defers_report());
        assert!(!StepType::Include.is_flow());
        assert!(StepType::Verify(Getter::Title).is_verify());
    }

    mod actions {
        use super::*;
        use crate::data::InputData;
        use crate::listener::RecordingListener;
        use crate::model::Locator;
        use crate::run::RunEnv;
        use crate::template::Variables;
        use crate::testing::{FakeActuator, FakeElement};
        use serde_json::json;
        use std::sync::Arc;

        fn run_on(actuator: Arc<FakeActuator>, steps: Vec<Step>) -> (TestRun, Arc<RecordingListener>) {
            let listener = Arc::new(RecordingListener::new());
            let env = RunEnv::new(actuator, listener.clone());
            let input: InputData = [("site", "http://x"), ("name", "ann")].into_iter().collect();
            (TestRun::new("actions", &Script::new(steps).unwrap(), input, env), listener)
        }

        #[tokio::test]
        async fn test_element_actions() {
            let field = Locator::id("name");
            let button = Locator::css("#save");
            let prefilled = FakeElement::visible("old");
            let actuator = Arc::new(
                FakeActuator::default()
                    .with_element(field.clone(), prefilled)
                    .with_element(button.clone(), FakeElement::visible("Save")),
            );
            let steps = vec![
                Step::builder(StepType::Get).put("url", "${site}/form").build().unwrap(),
                Step::builder(StepType::SetElementText)
                    .locator("locator", field.clone())
                    .put("text", "${name}")
                    .build()
                    .unwrap(),
                Step::builder(StepType::ClickElement)
                    .locator("locator", button.clone())
                    .build()
                    .unwrap(),
            ];
            let (mut run, _) = run_on(actuator.clone(), steps);

            assert!(run.finish().await.unwrap());
            assert_eq!(
                *actuator.navigations.lock().unwrap(),
                vec!["http://x/form".to_string()]
            );
            assert_eq!(actuator.element(&field).unwrap().text, "ann");
            assert_eq!(actuator.element(&button).unwrap().clicks, 1);
        }

        #[tokio::test]
        async fn test_bad_url_is_an_error() {
            let step = Step::builder(StepType::Get).put("url", "not a url").build().unwrap();
            let (mut run, _) = run_on(Arc::new(FakeActuator::default()), vec![step]);
            let err = run.finish().await.unwrap_err();
            assert!(matches!(
                err.downcast_ref::<InterpreterError>(),
                Some(InterpreterError::InvalidParam { .. })
            ));
        }

        #[tokio::test]
        async fn test_execute_script_stores_result() {
            let actuator = Arc::new(
                FakeActuator::default().with_script("return 6 * 7;", vec![json!(42)]),
            );
            let step = Step::builder(StepType::ExecuteScript)
                .put("script", "return 6 * 7;")
                .put("variable", "answer")
                .build()
                .unwrap();
            let (mut run, _) = run_on(actuator, vec![step]);
            assert!(run.finish().await.unwrap());
            assert_eq!(run.var("answer"), Some("42"));
        }

        #[tokio::test]
        async fn test_negated_print_inverts_boolean() {
            let actuator = Arc::new(FakeActuator::default());
            let step = Step::builder(StepType::Print(Getter::ElementPresent))
                .locator("locator", Locator::id("gone"))
                .negated(true)
                .build()
                .unwrap();
            let (mut run, listener) = run_on(actuator, vec![step]);
            assert!(run.finish().await.unwrap());
            assert_eq!(listener.last_result().unwrap().steps[0].logs, vec!["true".to_string()]);
        }

        #[tokio::test]
        async fn test_pause_waits() {
            let step = Step::builder(StepType::Pause).put("waitTime", "20").build().unwrap();
            let (mut run, _) = run_on(Arc::new(FakeActuator::default()), vec![step]);
            let started = std::time::Instant::now();
            assert!(run.finish().await.unwrap());
            assert!(started.elapsed() >= Duration::from_millis(20));
        }
    }
}
