//! If, Loop and Retry: flow-control built on the run's sub-step windows.
//!
//! Each variant reports through an "End ..." entry opened after its window;
//! the caller closes that entry with the returned outcome.

use crate::getter::Getter;
use crate::model::Step;
use crate::run::TestRun;
use crate::step_type::getter_test;
use anyhow::Result;
use tracing::debug;

/// Variable holding the 1-based iteration number inside a Loop window.
pub const LOOP_INDEX: &str = "_index";

pub(crate) async fn run_if(getter: &Getter, step: &Step, run: &mut TestRun) -> Result<bool> {
    let window = step.sub_step();
    let taken = getter_test(getter, step, run).await?;
    debug!("If condition {}: {} step(s)", taken, window);

    let success = if taken {
        run.run_sub_steps(window).await?
    } else {
        run.skip_sub_steps(window)?;
        true
    };
    run.start_test("End If")?;
    Ok(success)
}

pub(crate) async fn run_loop(step: &Step, run: &mut TestRun) -> Result<bool> {
    let window = step.sub_step();
    let count: usize = run.number(step, "count")?;
    let mut success = true;

    if count == 0 {
        run.skip_sub_steps(window)?;
    } else {
        for index in 1..=count {
            debug!("Loop iteration {}/{}", index, count);
            run.put_vars(LOOP_INDEX, index.to_string());
            let ok = match run.run_sub_steps(window).await {
                Ok(ok) => ok,
                Err(e) => {
                    run.remove_vars(LOOP_INDEX);
                    return Err(e);
                }
            };
            success &= ok;
            if (!ok && !run.config().continue_on_failure) || run.is_stopped() {
                break;
            }
            if index < count {
                run.back_step_index(window);
            }
        }
        run.remove_vars(LOOP_INDEX);
    }

    run.start_test("End Loop")?;
    if !success {
        run.set_failure_detail("loop body failed");
    }
    Ok(success)
}

/// Run the window until the condition holds, the run is stopped or
/// `maxRetry` attempts are used up, then walk it once more as skipped.
pub(crate) async fn run_retry(getter: &Getter, step: &Step, run: &mut TestRun) -> Result<bool> {
    let window = step.sub_step();
    let max_retry: Option<usize> = if step.contains_param("maxRetry") {
        Some(run.number(step, "maxRetry")?)
    } else {
        None
    };

    let mut attempts = 0usize;
    let met = loop {
        tokio::task::yield_now().await;
        if run.is_stopped() {
            break false;
        }
        if getter_test(getter, step, run).await? {
            break true;
        }
        if max_retry.is_some_and(|max| attempts >= max) {
            break false;
        }
        attempts += 1;
        debug!("Retry attempt {}", attempts);
        run.run_sub_steps(window).await?;
        run.back_step_index(window);
    };

    run.skip_sub_steps(window)?;
    run.start_test("End Retry")?;
    if !met {
        run.set_failure_detail(format!(
            "condition not met after {attempts} attempt(s)"
        ));
    }
    Ok(met)
}
