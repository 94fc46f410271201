//! Composable predicates deciding whether an advice applies to a step.
//!
//! A pointcut only answers "does this apply"; the run performs whatever
//! the matching advice asks for.

use crate::data::InputData;
use crate::error::InterpreterError;
use crate::model::{Locator, LocatorType, Step};
use crate::run::{BoxFuture, TestRun};
use crate::step_type::StepType;
use crate::template;
use anyhow::Result;
use async_trait::async_trait;
use indexmap::IndexMap;
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Method {
    Equals,
    StartsWith,
    EndsWith,
    Contains,
    Matches,
}

/// A target value plus comparison method. The method name may carry a
/// leading `!` to invert the result.
#[derive(Debug, Clone)]
pub struct StringMatcher {
    target: String,
    method: Method,
    negated: bool,
    regex: Option<Regex>,
}

impl StringMatcher {
    pub fn new(target: impl Into<String>, method: &str) -> Result<Self, InterpreterError> {
        let target = target.into();
        let (negated, name) = match method.trim().strip_prefix('!') {
            Some(rest) => (true, rest.trim()),
            None => (false, method.trim()),
        };
        let method_kind = match name {
            "equals" | "" => Method::Equals,
            "startsWith" => Method::StartsWith,
            "endsWith" => Method::EndsWith,
            "contains" => Method::Contains,
            "matches" => Method::Matches,
            other => {
                return Err(InterpreterError::InvalidMatcher {
                    method: method.to_string(),
                    message: format!("unknown comparison '{other}'"),
                })
            }
        };
        let regex = match method_kind {
            Method::Matches => Some(Regex::new(&format!("^(?:{target})$")).map_err(|e| {
                InterpreterError::InvalidMatcher {
                    method: method.to_string(),
                    message: e.to_string(),
                }
            })?),
            _ => None,
        };
        Ok(Self {
            target,
            method: method_kind,
            negated,
            regex,
        })
    }

    pub fn is_match(&self, actual: &str) -> bool {
        let target = self.target.as_str();
        let matched = match self.method {
            Method::Equals => actual == target,
            Method::StartsWith => actual.starts_with(target),
            Method::EndsWith => actual.ends_with(target),
            Method::Contains => actual.contains(target),
            Method::Matches => self.regex.as_ref().is_some_and(|re| re.is_match(actual)),
        };
        matched != self.negated
    }
}

/// One-shot comparison of `actual` against `target` with `method`.
pub fn compare(actual: &str, target: &str, method: &str) -> Result<bool, InterpreterError> {
    Ok(StringMatcher::new(target, method)?.is_match(actual))
}

/// Loads the pointcut an [`ImportFilter`] stands for.
#[async_trait]
pub trait PointcutLoader: Send + Sync {
    async fn load(&self, path: &str, base_dir: &str) -> Result<Pointcut>;
}

#[derive(Debug, Clone)]
pub struct LocatorFilter {
    pub key: String,
    pub kind: LocatorType,
    pub matcher: StringMatcher,
}

impl LocatorFilter {
    pub fn new(key: impl Into<String>, target: &Locator, method: &str) -> Result<Self, InterpreterError> {
        Ok(Self {
            key: key.into(),
            kind: target.kind,
            matcher: StringMatcher::new(target.value.clone(), method)?,
        })
    }
}

#[derive(Debug, Clone)]
pub struct StringParamFilter {
    pub key: String,
    pub matcher: StringMatcher,
}

impl StringParamFilter {
    pub fn new(key: impl Into<String>, target: impl Into<String>, method: &str) -> Result<Self, InterpreterError> {
        Ok(Self {
            key: key.into(),
            matcher: StringMatcher::new(target, method)?,
        })
    }
}

/// Proxy for a pointcut kept in another file. The loader is consulted on
/// every evaluation; `path` and `base_dir` are templates.
#[derive(Clone)]
pub struct ImportFilter {
    pub path: String,
    pub base_dir: String,
    pub loader: Arc<dyn PointcutLoader>,
}

impl fmt::Debug for ImportFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImportFilter")
            .field("path", &self.path)
            .field("base_dir", &self.base_dir)
            .finish_non_exhaustive()
    }
}

/// A Verify step used as a condition.
#[derive(Debug, Clone)]
pub struct VerifyFilter {
    step: Step,
}

impl VerifyFilter {
    pub fn new(
        step_type: StepType,
        string_params: IndexMap<String, String>,
        locator_params: IndexMap<String, Locator>,
    ) -> Result<Self, InterpreterError> {
        if !step_type.is_verify() {
            return Err(InterpreterError::invalid_param(
                "verify filter",
                "type",
                step_type.type_name(),
            ));
        }
        let mut builder = Step::builder(step_type);
        for (key, value) in string_params {
            builder = builder.put(key, value);
        }
        for (key, locator) in locator_params {
            builder = builder.locator(key, locator);
        }
        Ok(Self {
            step: builder.build()?,
        })
    }

    pub fn step(&self) -> &Step {
        &self.step
    }
}

#[derive(Debug, Clone)]
pub enum Pointcut {
    /// Matches every step.
    Any,
    /// Matches the step's type name.
    Type(StringMatcher),
    Locator(LocatorFilter),
    StringParam(StringParamFilter),
    /// Matches the resolved skip flag.
    Skip(bool),
    Negated(bool),
    Import(ImportFilter),
    Verify(VerifyFilter),
    And(Box<Pointcut>, Box<Pointcut>),
    Or(Box<Pointcut>, Box<Pointcut>),
    Not(Box<Pointcut>),
}

impl Pointcut {
    pub fn type_filter(target: impl Into<String>, method: &str) -> Result<Self, InterpreterError> {
        Ok(Pointcut::Type(StringMatcher::new(target, method)?))
    }

    pub fn and(self, other: Pointcut) -> Pointcut {
        match self {
            Pointcut::Any => other,
            this => Pointcut::And(Box::new(this), Box::new(other)),
        }
    }

    pub fn or(self, other: Pointcut) -> Pointcut {
        Pointcut::Or(Box::new(self), Box::new(other))
    }

    pub fn negate(self) -> Pointcut {
        Pointcut::Not(Box::new(self))
    }

    /// AND of every pointcut; `Any` for none.
    pub fn all(pointcuts: impl IntoIterator<Item = Pointcut>) -> Pointcut {
        pointcuts.into_iter().fold(Pointcut::Any, Pointcut::and)
    }

    pub fn is_handle<'a>(
        &'a self,
        run: &'a mut TestRun,
        step: &'a Step,
        vars: &'a InputData,
    ) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            match self {
                Pointcut::Any => Ok(true),
                Pointcut::Type(matcher) => Ok(matcher.is_match(&step.step_type().type_name())),
                Pointcut::Locator(filter) => {
                    let Some(locator) = step.locator(&filter.key) else {
                        return Ok(false);
                    };
                    if locator.kind != filter.kind {
                        return Ok(false);
                    }
                    let value = template::resolve(&locator.value, vars)?;
                    Ok(filter.matcher.is_match(&value))
                }
                Pointcut::StringParam(filter) => {
                    let Some(raw) = step.param(&filter.key) else {
                        return Ok(false);
                    };
                    let value = template::resolve(raw, vars)?;
                    Ok(filter.matcher.is_match(&value))
                }
                Pointcut::Skip(target) => Ok(step.resolve_skip(vars)? == *target),
                Pointcut::Negated(target) => Ok(step.is_negated() == *target),
                Pointcut::Import(filter) => {
                    let path = template::resolve(&filter.path, vars)?;
                    let base_dir = template::resolve(&filter.base_dir, vars)?;
                    debug!("Loading pointcut from {} ({})", path, base_dir);
                    let loaded = filter.loader.load(&path, &base_dir).await.map_err(|e| {
                        InterpreterError::ImportLoad {
                            path: path.clone(),
                            message: format!("{e:#}"),
                        }
                    })?;
                    loaded.is_handle(run, step, vars).await
                }
                Pointcut::Verify(filter) => run.evaluate_step(filter.step()).await,
                Pointcut::And(left, right) => {
                    if !left.is_handle(run, step, vars).await? {
                        return Ok(false);
                    }
                    right.is_handle(run, step, vars).await
                }
                Pointcut::Or(left, right) => {
                    if left.is_handle(run, step, vars).await? {
                        return Ok(true);
                    }
                    right.is_handle(run, step, vars).await
                }
                Pointcut::Not(inner) => Ok(!inner.is_handle(run, step, vars).await?),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::getter::Getter;
    use crate::listener::RecordingListener;
    use crate::run::RunEnv;
    use crate::script::Script;
    use crate::testing::FakeActuator;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_run(input: InputData) -> TestRun {
        let env = RunEnv::new(
            Arc::new(FakeActuator::default()),
            Arc::new(RecordingListener::new()),
        );
        TestRun::new("pointcut", &Script::new(vec![]).unwrap(), input, env)
    }

    fn click(locator: Locator) -> Step {
        Step::builder(StepType::ClickElement)
            .locator("locator", locator)
            .build()
            .unwrap()
    }

    struct Counting {
        loads: AtomicUsize,
        result: Pointcut,
    }

    #[async_trait]
    impl PointcutLoader for Counting {
        async fn load(&self, _path: &str, _base_dir: &str) -> Result<Pointcut> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            Ok(self.result.clone())
        }
    }

    struct Failing;

    #[async_trait]
    impl PointcutLoader for Failing {
        async fn load(&self, path: &str, _base_dir: &str) -> Result<Pointcut> {
            anyhow::bail!("no such file: {path}")
        }
    }

    #[test]
    fn test_comparison_methods() {
        assert!(compare("X", "X", "equals").unwrap());
        assert!(!compare("X", "Y", "equals").unwrap());
        assert!(compare("abcd", "bc", "contains").unwrap());
        assert!(compare("abcd", "ab", "startsWith").unwrap());
        assert!(compare("abcd", "cd", "endsWith").unwrap());
        assert!(compare("order-12", "order-\\d+", "matches").unwrap());
        assert!(!compare("xorder-12", "order-\\d+", "matches").unwrap());
    }

    #[test]
    fn test_bang_inverts_every_method() {
        let cases = [("X", "X"), ("X", "Y"), ("abcd", "bc"), ("abcd", "zz")];
        for method in ["equals", "startsWith", "endsWith", "contains", "matches"] {
            for (actual, target) in cases {
                assert_eq!(
                    compare(actual, target, &format!("!{method}")).unwrap(),
                    !compare(actual, target, method).unwrap(),
                    "{method} {actual} {target}"
                );
            }
        }
    }

    #[test]
    fn test_bad_matchers_are_rejected() {
        assert!(matches!(
            StringMatcher::new("x", "resembles"),
            Err(InterpreterError::InvalidMatcher { .. })
        ));
        assert!(matches!(
            StringMatcher::new("(", "matches"),
            Err(InterpreterError::InvalidMatcher { .. })
        ));
    }

    #[tokio::test]
    async fn test_leaf_filters() {
        let mut run = test_run([("id", "go")].into_iter().collect());
        let vars = run.vars();
        let step = Step::builder(StepType::SetElementText)
            .locator("locator", Locator::id("${id}-button"))
            .put("text", "${id}")
            .negated(true)
            .skip("false")
            .build()
            .unwrap();

        let type_filter = Pointcut::type_filter("setElement", "startsWith").unwrap();
        assert!(type_filter.is_handle(&mut run, &step, &vars).await.unwrap());

        let locator =
            Pointcut::Locator(LocatorFilter::new("locator", &Locator::id("go-button"), "equals").unwrap());
        assert!(locator.is_handle(&mut run, &step, &vars).await.unwrap());
        let wrong_kind =
            Pointcut::Locator(LocatorFilter::new("locator", &Locator::css("go-button"), "equals").unwrap());
        assert!(!wrong_kind.is_handle(&mut run, &step, &vars).await.unwrap());

        let param = Pointcut::StringParam(StringParamFilter::new("text", "go", "equals").unwrap());
        assert!(param.is_handle(&mut run, &step, &vars).await.unwrap());
        let absent = Pointcut::StringParam(StringParamFilter::new("url", "", "!equals").unwrap());
        assert!(!absent.is_handle(&mut run, &step, &vars).await.unwrap());

        assert!(Pointcut::Negated(true).is_handle(&mut run, &step, &vars).await.unwrap());
        assert!(Pointcut::Skip(false).is_handle(&mut run, &step, &vars).await.unwrap());
        assert!(!Pointcut::Skip(true).is_handle(&mut run, &step, &vars).await.unwrap());
    }

    #[tokio::test]
    async fn test_and_short_circuits() {
        let mut run = test_run(InputData::new());
        let vars = run.vars();
        let step = click(Locator::css("#a"));
        let loader = Arc::new(Counting {
            loads: AtomicUsize::new(0),
            result: Pointcut::Any,
        });
        let import = Pointcut::Import(ImportFilter {
            path: "p.json".to_string(),
            base_dir: String::new(),
            loader: loader.clone(),
        });

        let failing_first = Pointcut::Negated(true).and(import.clone());
        assert!(!failing_first.is_handle(&mut run, &step, &vars).await.unwrap());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        let passing_first = Pointcut::Negated(false).or(import.clone());
        assert!(passing_first.is_handle(&mut run, &step, &vars).await.unwrap());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 0);

        assert!(Pointcut::Any.and(import).is_handle(&mut run, &step, &vars).await.unwrap());
        assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_all_and_not() {
        let mut run = test_run(InputData::new());
        let vars = run.vars();
        let step = click(Locator::css("#a"));

        assert!(Pointcut::all(vec![]).is_handle(&mut run, &step, &vars).await.unwrap());
        let both = Pointcut::all(vec![
            Pointcut::type_filter("clickElement", "equals").unwrap(),
            Pointcut::Negated(false),
        ]);
        assert!(both.is_handle(&mut run, &step, &vars).await.unwrap());
        assert!(!both.negate().is_handle(&mut run, &step, &vars).await.unwrap());
    }

    #[tokio::test]
    async fn test_import_failure_is_import_load_error() {
        let mut run = test_run([("dir", "/tmp/cuts")].into_iter().collect());
        let vars = run.vars();
        let import = Pointcut::Import(ImportFilter {
            path: "${dir}/missing.json".to_string(),
            base_dir: "${dir}".to_string(),
            loader: Arc::new(Failing),
        });
        let err = import
            .is_handle(&mut run, &click(Locator::css("#a")), &vars)
            .await
            .unwrap_err();
        match err.downcast_ref::<InterpreterError>() {
            Some(InterpreterError::ImportLoad { path, .. }) => {
                assert_eq!(path, "/tmp/cuts/missing.json")
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_verify_filter_runs_condition() {
        let mut run = test_run([("env", "staging")].into_iter().collect());
        let vars = run.vars();
        let step = click(Locator::css("#a"));
        let verify = |expected: &str| {
            let params: IndexMap<String, String> = [
                ("variable".to_string(), "env".to_string()),
                ("value".to_string(), expected.to_string()),
            ]
            .into_iter()
            .collect();
            Pointcut::Verify(
                VerifyFilter::new(StepType::Verify(Getter::Variable), params, IndexMap::new()).unwrap(),
            )
        };

        assert!(verify("staging").is_handle(&mut run, &step, &vars).await.unwrap());
        assert!(!verify("prod").is_handle(&mut run, &step, &vars).await.unwrap());
        assert!(run.is_success());
    }

    #[test]
    fn test_verify_filter_requires_verify_step() {
        let err = VerifyFilter::new(
            StepType::Assert(Getter::Variable),
            IndexMap::new(),
            IndexMap::new(),
        )
        .unwrap_err();
        assert!(matches!(err, InterpreterError::InvalidParam { .. }));
    }
}
