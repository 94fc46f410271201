//! Result listener contract and the built-in listeners.

use crate::data::InputData;
use anyhow::Result;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tracing::{error, info, warn};

/// Receives run progress. Calls are synchronous; an error returned from
/// any method aborts the run.
pub trait ResultListener: Send + Sync {
    /// Returns `false` to decline the run.
    fn open_test_suite(&self, test_case: &str, run_name: &str, vars: &InputData) -> Result<bool>;

    fn start_test(&self, name: &str) -> Result<()>;

    fn add_error(&self, error: &anyhow::Error) -> Result<()>;

    fn add_failure(&self, message: &str) -> Result<()>;

    fn end_test(&self) -> Result<()>;

    /// Close the current test as skipped.
    fn skip_test(&self) -> Result<()> {
        self.info("skipped")?;
        self.end_test()
    }

    fn close_test_suite(&self) -> Result<()>;

    fn info(&self, message: &str) -> Result<()>;

    fn step_no(&self) -> usize;
}

/// Listener that only logs through `tracing`.
#[derive(Debug, Default)]
pub struct TracingListener {
    step_no: Mutex<usize>,
}

impl TracingListener {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ResultListener for TracingListener {
    fn open_test_suite(&self, test_case: &str, run_name: &str, _vars: &InputData) -> Result<bool> {
        *lock(&self.step_no) = 0;
        info!("Opening test suite {} ({})", run_name, test_case);
        Ok(true)
    }

    fn start_test(&self, name: &str) -> Result<()> {
        let mut no = lock(&self.step_no);
        *no += 1;
        info!("  {}. {}", *no, name);
        Ok(())
    }

    fn add_error(&self, error: &anyhow::Error) -> Result<()> {
        error!("     Error: {:#}", error);
        Ok(())
    }

    fn add_failure(&self, message: &str) -> Result<()> {
        warn!("     Failure: {}", message);
        Ok(())
    }

    fn end_test(&self) -> Result<()> {
        Ok(())
    }

    fn close_test_suite(&self) -> Result<()> {
        info!("Closing test suite");
        Ok(())
    }

    fn info(&self, message: &str) -> Result<()> {
        info!("     {}", message);
        Ok(())
    }

    fn step_no(&self) -> usize {
        *lock(&self.step_no)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Passed,
    Failed,
    Errored,
    Skipped,
}

/// One reported step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub no: usize,
    pub name: String,
    pub status: StepStatus,
    pub message: Option<String>,
    pub logs: Vec<String>,
    pub duration_ms: u64,
}

/// One reported run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub test_case: String,
    pub name: String,
    pub vars: IndexMap<String, String>,
    pub success: bool,
    pub error: Option<String>,
    pub steps: Vec<StepResult>,
    pub logs: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl TestResult {
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name.as_str()).collect()
    }
}

#[derive(Debug, Default)]
struct Recorder {
    results: Vec<TestResult>,
    current: Option<(TestResult, Instant)>,
    step: Option<(StepResult, Instant)>,
    step_no: usize,
}

/// In-memory listener recording every event as [`TestResult`]s.
#[derive(Debug, Default)]
pub struct RecordingListener {
    inner: Mutex<Recorder>,
}

impl RecordingListener {
    pub fn new() -> Self {
        Self::default()
    }

    /// Completed runs, in the order they were closed.
    pub fn results(&self) -> Vec<TestResult> {
        lock(&self.inner).results.clone()
    }

    pub fn last_result(&self) -> Option<TestResult> {
        lock(&self.inner).results.last().cloned()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Recorder {
    fn finish_step(&mut self) {
        if let Some((mut step, started)) = self.step.take() {
            step.duration_ms = started.elapsed().as_millis() as u64;
            if let Some((result, _)) = self.current.as_mut() {
                result.steps.push(step);
            }
        }
    }

    fn mark(&mut self, status: StepStatus, message: Option<String>) {
        if let Some((step, _)) = self.step.as_mut() {
            step.status = status;
            if message.is_some() {
                step.message = message;
            }
        }
    }
}

impl ResultListener for RecordingListener {
    fn open_test_suite(&self, test_case: &str, run_name: &str, vars: &InputData) -> Result<bool> {
        let mut rec = lock(&self.inner);
        rec.step_no = 0;
        rec.step = None;
        rec.current = Some((
            TestResult {
                test_case: test_case.to_string(),
                name: run_name.to_string(),
                vars: vars.vars.clone(),
                success: true,
                error: None,
                steps: Vec::new(),
                logs: Vec::new(),
                started_at: Utc::now(),
                duration_ms: 0,
            },
            Instant::now(),
        ));
        Ok(true)
    }

    fn start_test(&self, name: &str) -> Result<()> {
        let mut rec = lock(&self.inner);
        rec.finish_step();
        rec.step_no += 1;
        let no = rec.step_no;
        rec.step = Some((
            StepResult {
                no,
                name: name.to_string(),
                status: StepStatus::Passed,
                message: None,
                logs: Vec::new(),
                duration_ms: 0,
            },
            Instant::now(),
        ));
        Ok(())
    }

    fn add_error(&self, error: &anyhow::Error) -> Result<()> {
        let mut rec = lock(&self.inner);
        let message = format!("{error:#}");
        rec.mark(StepStatus::Errored, Some(message.clone()));
        if let Some((result, _)) = rec.current.as_mut() {
            result.error = Some(message);
            result.success = false;
        }
        Ok(())
    }

    fn add_failure(&self, message: &str) -> Result<()> {
        let mut rec = lock(&self.inner);
        rec.mark(StepStatus::Failed, Some(message.to_string()));
        if let Some((result, _)) = rec.current.as_mut() {
            result.success = false;
        }
        Ok(())
    }

    fn end_test(&self) -> Result<()> {
        lock(&self.inner).finish_step();
        Ok(())
    }

    fn skip_test(&self) -> Result<()> {
        let mut rec = lock(&self.inner);
        rec.mark(StepStatus::Skipped, None);
        rec.finish_step();
        Ok(())
    }

    fn close_test_suite(&self) -> Result<()> {
        let mut rec = lock(&self.inner);
        rec.finish_step();
        if let Some((mut result, started)) = rec.current.take() {
            result.duration_ms = started.elapsed().as_millis() as u64;
            rec.results.push(result);
        }
        Ok(())
    }

    fn info(&self, message: &str) -> Result<()> {
        let mut rec = lock(&self.inner);
        if let Some((step, _)) = rec.step.as_mut() {
            step.logs.push(message.to_string());
        } else if let Some((result, _)) = rec.current.as_mut() {
            result.logs.push(message.to_string());
        }
        Ok(())
    }

    fn step_no(&self) -> usize {
        lock(&self.inner).step_no
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_listener_collects_steps() {
        let listener = RecordingListener::new();
        let vars: InputData = [("a", "1")].into_iter().collect();
        assert!(listener.open_test_suite("case", "case_1", &vars).unwrap());

        listener.start_test("get url=http://x").unwrap();
        listener.end_test().unwrap();
        listener.start_test("assertTitle title=Home").unwrap();
        listener.add_failure("expected 'Home' but was 'Away'").unwrap();
        listener.end_test().unwrap();
        listener.start_test("clickElement").unwrap();
        listener.skip_test().unwrap();
        listener.info("End If").unwrap();
        assert_eq!(listener.step_no(), 3);
        listener.close_test_suite().unwrap();

        let result = listener.last_result().unwrap();
        assert!(!result.success);
        assert_eq!(result.vars.get("a").map(String::as_str), Some("1"));
        let statuses: Vec<StepStatus> = result.steps.iter().map(|s| s.status).collect();
        assert_eq!(
            statuses,
            vec![StepStatus::Passed, StepStatus::Failed, StepStatus::Skipped]
        );
        assert_eq!(result.logs, vec!["End If".to_string()]);
    }

    #[test]
    fn test_error_marks_result() {
        let listener = RecordingListener::new();
        listener
            .open_test_suite("case", "case_1", &InputData::new())
            .unwrap();
        listener.start_test("get").unwrap();
        listener
            .add_error(&anyhow::anyhow!("connection refused"))
            .unwrap();
        listener.end_test().unwrap();
        listener.close_test_suite().unwrap();

        let result = listener.last_result().unwrap();
        assert_eq!(result.steps[0].status, StepStatus::Errored);
        assert_eq!(result.error.as_deref(), Some("connection refused"));
    }

    #[test]
    fn test_tracing_listener_numbers_steps() {
        let listener = TracingListener::new();
        assert!(listener
            .open_test_suite("case", "case_1", &InputData::new())
            .unwrap());
        listener.start_test("get").unwrap();
        listener.end_test().unwrap();
        listener.start_test("click").unwrap();
        listener.skip_test().unwrap();
        assert_eq!(listener.step_no(), 2);

        listener
            .open_test_suite("case", "case_2", &InputData::new())
            .unwrap();
        assert_eq!(listener.step_no(), 0);
    }

    #[test]
    fn test_result_serializes() {
        let listener = RecordingListener::new();
        listener
            .open_test_suite("case", "case_1", &InputData::new())
            .unwrap();
        listener.start_test("get").unwrap();
        listener.end_test().unwrap();
        listener.close_test_suite().unwrap();

        let json = serde_json::to_value(listener.results()).unwrap();
        assert_eq!(json[0]["steps"][0]["status"], "passed");
    }
}
