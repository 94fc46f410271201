//! Interpreter core for Selenium Builder style scripts.
//!
//! A script is a flat list of steps; flow-control steps (If, Loop, Retry)
//! own the window of steps that follows them. Runs execute one script
//! against one data row through an [`Actuator`], reporting to a
//! [`ResultListener`]. Aspects built from [`Pointcut`]s can skip, replace
//! or wrap matching steps.

pub mod actuator;
pub mod aspect;
pub mod config;
pub mod data;
pub mod error;
pub mod expression;
mod flow;
pub mod getter;
pub mod listener;
pub mod logging;
pub mod model;
pub mod pointcut;
pub mod run;
pub mod runner;
pub mod script;
pub mod step_type;
pub mod template;

#[cfg(test)]
mod testing;

pub use actuator::{Actuator, ElementHandle, Rect};
pub use aspect::{Advice, Aspect, Interceptor};
pub use config::*;
pub use data::{DataSource, DataSourceLoader, InputData};
pub use error::InterpreterError;
pub use flow::LOOP_INDEX;
pub use getter::Getter;
pub use listener::*;
pub use model::*;
pub use pointcut::{Pointcut, PointcutLoader, StringMatcher};
pub use run::{RunEnv, RunState, StopHandle, TestRun};
pub use runner::*;
pub use script::{Script, ScriptLoader, Suite, TestCase};
pub use step_type::StepType;
pub use template::Variables;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
