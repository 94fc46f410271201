//! Suite execution

use crate::data::{self, DataSource, InputData};
use crate::run::{BoxFuture, RunEnv, StopHandle, TestRun};
use crate::script::{Suite, TestCase};
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// Suite runner trait
#[async_trait]
pub trait ScriptRunner: Send + Sync {
    /// Execute every case of a suite
    async fn run(&self, suite: &Suite) -> Result<SuiteResult>;
}

/// Outcome of one (test case, data row) run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub case: String,
    pub run_name: String,
    pub row_number: usize,
    pub success: bool,
    pub error: Option<String>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub success: bool,
    pub runs: Vec<RunResult>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

impl SuiteResult {
    pub fn failed_runs(&self) -> impl Iterator<Item = &RunResult> {
        self.runs.iter().filter(|r| !r.success)
    }
}

/// Default suite runner: one run per (case, row), in order.
#[derive(Debug, Clone)]
pub struct DefaultScriptRunner {
    env: RunEnv,
    stop: StopHandle,
}

impl DefaultScriptRunner {
    pub fn new(env: RunEnv) -> Self {
        Self {
            env,
            stop: StopHandle::default(),
        }
    }

    /// Stops the current run and every run after it.
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    fn slugify(name: &str) -> String {
        let mut slug = String::new();
        for ch in name.chars() {
            if ch.is_ascii_alphanumeric() {
                slug.push(ch.to_ascii_lowercase());
            } else if (ch.is_whitespace() || matches!(ch, '-' | '_')) && !slug.ends_with('_') {
                slug.push('_');
            }
        }
        slug.trim_matches('_').to_string()
    }

    /// `<case slug>_<row number>`, e.g. `login_flow_2`.
    pub fn run_name(case: &str, row: &InputData) -> String {
        let slug = Self::slugify(case);
        let slug = if slug.is_empty() { "case".to_string() } else { slug };
        format!("{}_{}", slug, row.row_number)
    }

    async fn run_row(&self, case: &TestCase, row: InputData) -> (RunResult, InputData) {
        let run_name = Self::run_name(&case.name, &row);
        let row_number = row.row_number;
        let started = Instant::now();
        let mut run = TestRun::new(run_name.clone(), &case.script, row, self.env.clone())
            .with_case_name(case.name.clone())
            .with_aspect(case.aspect.clone())
            .with_stop_handle(self.stop.clone());

        let (success, error) = match run.finish().await {
            Ok(success) => (success, None),
            Err(err) => (false, Some(format!("{err:#}"))),
        };
        let result = RunResult {
            case: case.name.clone(),
            run_name,
            row_number,
            success,
            error,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        (result, run.vars())
    }

    /// Run every row of `case`, each successful row followed by the case's
    /// chain. A chained case stops at its first failed row.
    fn run_case<'a>(
        &'a self,
        case: &'a TestCase,
        shared: &'a [DataSource],
        seed: InputData,
        chained: bool,
        runs: &'a mut Vec<RunResult>,
    ) -> BoxFuture<'a, bool> {
        Box::pin(async move {
            let rows = match Self::rows_for(case, shared, &seed) {
                Ok(rows) => rows,
                Err(err) => {
                    error!("Failed to load data for {}: {:#}", case.name, err);
                    runs.push(RunResult {
                        case: case.name.clone(),
                        run_name: Self::run_name(&case.name, &seed),
                        row_number: 0,
                        success: false,
                        error: Some(format!("{err:#}")),
                        duration_ms: 0,
                    });
                    return false;
                }
            };

            let mut success = true;
            for row in rows {
                if self.stop.is_stopped() {
                    info!("Stopped before {} row {}", case.name, row.row_number);
                    break;
                }
                let last = row.last_row;
                let (result, vars) = self.run_row(case, row).await;
                let ok = result.success;
                debug!("{} finished: {}", result.run_name, ok);
                runs.push(result);
                success &= ok;

                if ok {
                    for link in &case.chains {
                        if !self.run_case(link, &[], vars.clone(), true, runs).await {
                            warn!("Chain after {} ended at {}", case.name, link.name);
                            success = false;
                            break;
                        }
                    }
                } else if chained {
                    break;
                }
                if last {
                    break;
                }
            }
            success
        })
    }

    fn rows_for(case: &TestCase, shared: &[DataSource], seed: &InputData) -> Result<Vec<InputData>> {
        let scope = data::reduce_share_input(shared, seed)?;
        let scope = data::reduce_share_input(&case.shared_sources, &scope)?;
        data::combine_rows(&scope, case.data_source.as_ref())
    }
}

#[async_trait]
impl ScriptRunner for DefaultScriptRunner {
    #[instrument(skip(self, suite), fields(name = %suite.name))]
    async fn run(&self, suite: &Suite) -> Result<SuiteResult> {
        let start_time = Instant::now();
        let timestamp = Utc::now();
        let mut runs = Vec::new();
        let mut suite_success = true;

        info!("Starting suite: {} ({} case(s))", suite.name, suite.cases.len());

        for (case_idx, case) in suite.cases.iter().enumerate() {
            if self.stop.is_stopped() {
                info!("Suite stopped");
                break;
            }
            info!(
                "Running case {}/{}: {}",
                case_idx + 1,
                suite.cases.len(),
                case.name
            );
            let ok = self
                .run_case(case, &suite.shared_sources, InputData::new(), false, &mut runs)
                .await;
            suite_success &= ok;
        }

        let result = SuiteResult {
            name: suite.name.clone(),
            success: suite_success,
            runs,
            duration_ms: start_time.elapsed().as_millis() as u64,
            timestamp,
        };

        info!(
            "Suite finished: {} ({} ms) - Success: {}",
            suite.name, result.duration_ms, result.success
        );

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_names() {
        let row = InputData::new().with_row(2, false);
        assert_eq!(DefaultScriptRunner::run_name("Login Flow", &row), "login_flow_2");
        assert_eq!(DefaultScriptRunner::run_name("--", &row), "case_2");
        assert_eq!(DefaultScriptRunner::slugify("a - b__c"), "a_b_c");
    }
}
