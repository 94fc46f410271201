//! The execution context for one (test case, data row) run.
//!
//! A run walks a flat step array with a program counter. Flow-control
//! steps own the window of steps directly after them and move the cursor
//! through it themselves; advice, includes and verify conditions run as
//! bounded sub-programs on the same context.

use crate::actuator::Actuator;
use crate::aspect::{Advice, Aspect};
use crate::config::EngineConfig;
use crate::data::InputData;
use crate::error::InterpreterError;
use crate::listener::ResultListener;
use crate::model::{Locator, Step};
use crate::script::{Script, ScriptLoader};
use crate::template::{self, Variables};
use anyhow::{anyhow, bail, Result};
use indexmap::IndexMap;
use std::borrow::Cow;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Maximum nesting of sub-programs (includes, advice, verify conditions).
pub const MAX_PROGRAM_DEPTH: usize = 32;

/// Collaborators shared by every run of a suite.
#[derive(Clone)]
pub struct RunEnv {
    pub actuator: Arc<dyn Actuator>,
    pub listener: Arc<dyn ResultListener>,
    pub script_loader: Option<Arc<dyn ScriptLoader>>,
    pub config: Arc<EngineConfig>,
}

impl RunEnv {
    pub fn new(actuator: Arc<dyn Actuator>, listener: Arc<dyn ResultListener>) -> Self {
        Self {
            actuator,
            listener,
            script_loader: None,
            config: Arc::new(EngineConfig::default()),
        }
    }

    pub fn with_script_loader(mut self, loader: Arc<dyn ScriptLoader>) -> Self {
        self.script_loader = Some(loader);
        self
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = Arc::new(config);
        self
    }
}

impl fmt::Debug for RunEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunEnv")
            .field("script_loader", &self.script_loader.is_some())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Cloneable handle on a run's stop flag, usable from any thread.
#[derive(Debug, Clone, Default)]
pub struct StopHandle(Arc<AtomicBool>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Ready,
    Running,
    Completed,
    Stopped,
    Errored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgramMode {
    /// Reported and intercepted like the caller's own steps.
    Include,
    /// Reported, never intercepted.
    Advice,
    /// Neither reported nor intercepted; only the outcome matters.
    Verify,
}

struct SavedFrame {
    steps: Arc<[Step]>,
    step_index: isize,
    quiet: bool,
    intercept: bool,
    test_open: bool,
    failure_detail: Option<String>,
}

pub struct TestRun {
    name: String,
    case_name: String,
    steps: Arc<[Step]>,
    step_index: isize,
    input: InputData,
    overlay: IndexMap<String, String>,
    stop: StopHandle,
    state: RunState,
    success: bool,
    test_open: bool,
    quiet: bool,
    intercept: bool,
    program_depth: usize,
    failure_detail: Option<String>,
    aspect: Arc<Aspect>,
    env: RunEnv,
}

impl fmt::Debug for TestRun {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestRun")
            .field("name", &self.name)
            .field("step_index", &self.step_index)
            .field("steps", &self.steps.len())
            .field("state", &self.state)
            .field("success", &self.success)
            .finish_non_exhaustive()
    }
}

impl TestRun {
    pub fn new(name: impl Into<String>, script: &Script, input: InputData, env: RunEnv) -> Self {
        let name = name.into();
        Self {
            case_name: name.clone(),
            name,
            steps: script.arc(),
            step_index: -1,
            input,
            overlay: IndexMap::new(),
            stop: StopHandle::default(),
            state: RunState::Ready,
            success: true,
            test_open: false,
            quiet: false,
            intercept: true,
            program_depth: 0,
            failure_detail: None,
            aspect: Arc::new(Aspect::default()),
            env,
        }
    }

    pub fn with_case_name(mut self, case_name: impl Into<String>) -> Self {
        self.case_name = case_name.into();
        self
    }

    pub fn with_aspect(mut self, aspect: Arc<Aspect>) -> Self {
        self.aspect = aspect;
        self
    }

    /// Share a stop flag with other runs.
    pub fn with_stop_handle(mut self, stop: StopHandle) -> Self {
        self.stop = stop;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Aggregate outcome so far: false once any reported step failed.
    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn config(&self) -> &EngineConfig {
        &self.env.config
    }

    pub fn actuator(&self) -> Arc<dyn Actuator> {
        Arc::clone(&self.env.actuator)
    }

    pub fn script_loader(&self) -> Option<Arc<dyn ScriptLoader>> {
        self.env.script_loader.clone()
    }

    // Cursor

    /// Index of the current step; `None` before the first step.
    pub fn step_index(&self) -> Option<usize> {
        usize::try_from(self.step_index).ok()
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn current_step(&self) -> Option<&Step> {
        self.step_index().and_then(|i| self.steps.get(i))
    }

    pub fn has_next(&self) -> bool {
        self.step_index + 1 < self.steps.len() as isize
    }

    pub fn to_next_step_index(&mut self) {
        self.step_index += 1;
    }

    pub fn forward_step_index(&mut self, count: usize) {
        self.step_index += count as isize;
    }

    pub fn back_step_index(&mut self, count: usize) {
        self.step_index -= count as isize;
    }

    fn window_end(&self, count: usize) -> Result<isize> {
        let end = self.step_index + count as isize;
        if end >= self.steps.len() as isize {
            return Err(InterpreterError::MalformedScript {
                index: self.step_index().unwrap_or_default(),
                message: format!("window of {count} step(s) runs past the end of the script"),
            }
            .into());
        }
        Ok(end)
    }

    // Variables

    /// Snapshot of the effective scope: the row overlaid by runtime
    /// variables.
    pub fn vars(&self) -> InputData {
        let overlay = InputData {
            row_number: self.input.row_number,
            last_row: self.input.last_row,
            vars: self.overlay.clone(),
        };
        self.input.add(&overlay)
    }

    pub fn input(&self) -> &InputData {
        &self.input
    }

    pub fn put_vars(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        debug!("{} = '{}'", name, value);
        self.overlay.insert(name, value);
    }

    pub fn remove_vars(&mut self, name: &str) {
        self.overlay.shift_remove(name);
    }

    // Stop

    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_stopped()
    }

    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    // Parameters

    /// A string parameter with its placeholders resolved.
    pub fn string(&self, step: &Step, key: &str) -> Result<String> {
        let raw = step
            .param(key)
            .ok_or_else(|| InterpreterError::missing_param(step.label(), key))?;
        Ok(template::resolve(raw, self)?)
    }

    pub fn string_or(&self, step: &Step, key: &str, default: &str) -> Result<String> {
        match step.param(key) {
            Some(raw) => Ok(template::resolve(raw, self)?),
            None => Ok(default.to_string()),
        }
    }

    pub fn locator(&self, step: &Step, key: &str) -> Result<Locator> {
        let locator = step
            .locator(key)
            .ok_or_else(|| InterpreterError::missing_param(step.label(), key))?;
        Ok(locator.resolve(self)?)
    }

    pub fn number<T: FromStr>(&self, step: &Step, key: &str) -> Result<T> {
        let text = self.string(step, key)?;
        text.trim()
            .parse::<T>()
            .map_err(|_| InterpreterError::invalid_param(step.label(), key, text).into())
    }

    // Reporting

    pub fn start_test(&mut self, name: &str) -> Result<()> {
        self.test_open = true;
        self.failure_detail = None;
        if self.quiet {
            return Ok(());
        }
        debug!("start: {}", name);
        self.env.listener.start_test(name)
    }

    pub fn info(&self, message: &str) -> Result<()> {
        if self.quiet {
            return Ok(());
        }
        debug!("info: {}", message);
        self.env.listener.info(message)
    }

    /// Message attached to the next reported failure.
    pub fn set_failure_detail(&mut self, detail: impl Into<String>) {
        self.failure_detail = Some(detail.into());
    }

    pub fn process_test_success(&mut self) -> Result<()> {
        if !std::mem::take(&mut self.test_open) || self.quiet {
            return Ok(());
        }
        self.env.listener.end_test()
    }

    pub fn process_test_failure(&mut self, label: &str) -> Result<()> {
        let was_open = std::mem::take(&mut self.test_open);
        let message = self
            .failure_detail
            .take()
            .unwrap_or_else(|| format!("{label} failed"));
        if self.quiet {
            return Ok(());
        }
        self.success = false;
        warn!("failure: {}", message);
        self.env.listener.add_failure(&message)?;
        if was_open {
            self.env.listener.end_test()?;
        }
        Ok(())
    }

    pub fn process_test_error(&mut self, err: &anyhow::Error) -> Result<()> {
        self.success = false;
        let was_open = std::mem::take(&mut self.test_open);
        self.env.listener.add_error(err)?;
        if was_open {
            self.env.listener.end_test()?;
        }
        Ok(())
    }

    pub fn skip_test(&mut self, label: &str) -> Result<()> {
        self.start_test(label)?;
        self.test_open = false;
        if self.quiet {
            return Ok(());
        }
        debug!("skip: {}", label);
        self.env.listener.skip_test()
    }

    // Execution

    /// Execute the whole script, reporting to the listener. Returns the
    /// aggregate outcome; an unrecoverable error is reported, the suite is
    /// closed and the error is returned.
    #[instrument(skip(self), fields(run = %self.name))]
    pub async fn finish(&mut self) -> Result<bool> {
        if self.state != RunState::Ready {
            bail!("run '{}' has already been executed", self.name);
        }
        let started = Instant::now();
        let listener = Arc::clone(&self.env.listener);
        if !listener.open_test_suite(&self.case_name, &self.name, &self.input)? {
            info!("Run {} declined by listener", self.name);
            self.state = RunState::Stopped;
            return Ok(true);
        }

        info!("Starting run {} ({} step(s))", self.name, self.steps.len());
        self.state = RunState::Running;
        let outcome = match self.run_all().await {
            Ok(success) => {
                self.state = if self.is_stopped() {
                    RunState::Stopped
                } else {
                    RunState::Completed
                };
                Ok(success && self.success)
            }
            Err(err) => {
                error!("Run {} aborted: {:#}", self.name, err);
                self.state = RunState::Errored;
                self.process_test_error(&err)?;
                Err(err)
            }
        };
        listener.close_test_suite()?;

        info!(
            "Run finished: {} ({} ms) - {:?}, success: {}",
            self.name,
            started.elapsed().as_millis(),
            self.state,
            self.success
        );
        outcome
    }

    async fn run_all(&mut self) -> Result<bool> {
        let mut success = true;
        while self.has_next() {
            if self.is_stopped() {
                info!("Run {} stopped", self.name);
                break;
            }
            self.to_next_step_index();
            let ok = self.run_current().await?;
            success &= ok;
            if !ok && !self.config().continue_on_failure {
                debug!("Stopping after failed step");
                break;
            }
        }
        Ok(success)
    }

    /// Run the `count` steps after the cursor. A nested flow step consumes
    /// its own window, so `count` is the flattened size of the body.
    pub(crate) async fn run_sub_steps(&mut self, count: usize) -> Result<bool> {
        let end = self.window_end(count)?;
        let mut success = true;
        while self.step_index < end {
            if self.is_stopped() {
                self.step_index = end;
                break;
            }
            self.to_next_step_index();
            let ok = self.run_current().await?;
            success &= ok;
            if !ok && !self.config().continue_on_failure {
                let remaining = (end - self.step_index) as usize;
                self.skip_sub_steps(remaining)?;
                break;
            }
        }
        Ok(success)
    }

    /// Walk the `count` steps after the cursor, reporting each as skipped.
    pub(crate) fn skip_sub_steps(&mut self, count: usize) -> Result<()> {
        let end = self.window_end(count)?;
        let steps = Arc::clone(&self.steps);
        while self.step_index < end {
            self.to_next_step_index();
            let label = steps[self.step_index as usize].label();
            self.skip_test(&label)?;
        }
        Ok(())
    }

    /// Run the step under the cursor with its advice applied.
    pub(crate) fn run_current(&mut self) -> BoxFuture<'_, Result<bool>> {
        Box::pin(async move {
            let steps = Arc::clone(&self.steps);
            let step = self
                .step_index()
                .and_then(|i| steps.get(i))
                .ok_or_else(|| anyhow!("no step at index {}", self.step_index))?;
            let label = step.label();

            let advices = if self.intercept {
                self.matching_advices(step).await?
            } else {
                Vec::new()
            };

            let skipped = advices.iter().any(|a| matches!(a, Advice::Skip))
                || step.resolve_skip(&self.vars())?;
            if skipped {
                self.skip_test(&label)?;
                if step.step_type().is_flow() {
                    self.skip_sub_steps(step.sub_step())?;
                }
                return Ok(true);
            }

            for advice in &advices {
                if let Advice::Before(script) = advice {
                    self.run_program(script.arc(), ProgramMode::Advice).await?;
                }
            }

            let replacement = advices.iter().find_map(|a| match a {
                Advice::Replace(script) => Some(script.arc()),
                _ => None,
            });
            let success = match replacement {
                Some(program) => {
                    debug!("Replacing {}", label);
                    let ok = self.run_program(program, ProgramMode::Advice).await?;
                    if step.step_type().is_flow() {
                        self.skip_sub_steps(step.sub_step())?;
                    }
                    ok
                }
                None => {
                    let negate = advices.iter().filter(|a| matches!(a, Advice::Negate)).count() % 2 == 1;
                    let step: Cow<'_, Step> = if negate {
                        Cow::Owned(step.with_negated(!step.is_negated()))
                    } else {
                        Cow::Borrowed(step)
                    };
                    if !step.step_type().defers_report() {
                        self.start_test(&label)?;
                    }
                    let ok = step.step_type().run(&step, self).await?;
                    if self.test_open {
                        if ok {
                            self.process_test_success()?;
                        } else {
                            self.process_test_failure(&label)?;
                        }
                    }
                    ok
                }
            };

            if !success {
                for advice in &advices {
                    if let Advice::Failure(script) = advice {
                        self.run_program(script.arc(), ProgramMode::Advice).await?;
                    }
                }
            }
            for advice in &advices {
                if let Advice::After(script) = advice {
                    self.run_program(script.arc(), ProgramMode::Advice).await?;
                }
            }
            Ok(success)
        })
    }

    async fn matching_advices(&mut self, step: &Step) -> Result<Vec<Advice>> {
        let aspect = Arc::clone(&self.aspect);
        if aspect.is_empty() {
            return Ok(Vec::new());
        }
        let vars = self.vars();
        let mut found = Vec::new();
        for interceptor in aspect.interceptors() {
            if interceptor.pointcut.is_handle(self, step, &vars).await? {
                debug!("{:?} applies to {}", interceptor.advice, step.label());
                found.push(interceptor.advice.clone());
            }
        }
        Ok(found)
    }

    /// Run `steps` as a nested program on this context, then restore the
    /// cursor and reporting state, whatever the outcome.
    async fn run_program(&mut self, steps: Arc<[Step]>, mode: ProgramMode) -> Result<bool> {
        if self.program_depth >= MAX_PROGRAM_DEPTH {
            bail!(
                "sub-programs nested deeper than {} levels in run '{}'",
                MAX_PROGRAM_DEPTH,
                self.name
            );
        }
        let saved = SavedFrame {
            steps: std::mem::replace(&mut self.steps, steps),
            step_index: self.step_index,
            quiet: self.quiet,
            intercept: self.intercept,
            test_open: std::mem::take(&mut self.test_open),
            failure_detail: self.failure_detail.take(),
        };
        self.step_index = -1;
        self.program_depth += 1;
        match mode {
            ProgramMode::Include => {}
            ProgramMode::Advice => self.intercept = false,
            ProgramMode::Verify => {
                self.intercept = false;
                self.quiet = true;
            }
        }

        let outcome = self.run_all().await;

        self.program_depth -= 1;
        self.steps = saved.steps;
        self.step_index = saved.step_index;
        self.quiet = saved.quiet;
        self.intercept = saved.intercept;
        self.test_open = saved.test_open;
        self.failure_detail = saved.failure_detail;
        outcome
    }

    pub(crate) async fn run_included(&mut self, script: &Script) -> Result<bool> {
        self.run_program(script.arc(), ProgramMode::Include).await
    }

    /// Run `step` as a one-step program without reporting it, returning
    /// its outcome.
    pub async fn evaluate_step(&mut self, step: &Step) -> Result<bool> {
        self.run_program(Arc::from(vec![step.clone()]), ProgramMode::Verify)
            .await
    }
}

impl Variables for TestRun {
    fn var(&self, name: &str) -> Option<&str> {
        self.overlay
            .get(name)
            .map(String::as_str)
            .or_else(|| self.input.get(name))
    }
}
