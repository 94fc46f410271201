//! Flattened scripts, test cases and suites.

use crate::aspect::Aspect;
use crate::data::DataSource;
use crate::error::InterpreterError;
use crate::model::Step;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// An immutable, validated flat step list.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    steps: Arc<[Step]>,
}

impl Script {
    /// Flatten nested sub-steps and check every window.
    ///
    /// Steps built with nested sub-steps are spliced in after their parent,
    /// whose `subStep` becomes the flattened body size. Steps that already
    /// carry a `subStep` count are taken as flat.
    pub fn new(steps: Vec<Step>) -> Result<Self, InterpreterError> {
        let mut flat = Vec::with_capacity(steps.len());
        for step in steps {
            flatten(step, &mut flat);
        }
        validate(&flat)?;
        Ok(Self {
            steps: flat.into(),
        })
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub(crate) fn arc(&self) -> Arc<[Step]> {
        Arc::clone(&self.steps)
    }
}

fn flatten(mut step: Step, out: &mut Vec<Step>) {
    let children = step.take_sub_steps();
    if children.is_empty() {
        out.push(step);
        return;
    }
    let at = out.len();
    out.push(step);
    for child in children {
        flatten(child, out);
    }
    let size = out.len() - at - 1;
    out[at].set_sub_step(size);
}

fn validate(steps: &[Step]) -> Result<(), InterpreterError> {
    // Window end (inclusive) of every open enclosing window.
    let mut open: Vec<usize> = Vec::new();
    for (index, step) in steps.iter().enumerate() {
        while open.last().is_some_and(|&end| end < index) {
            open.pop();
        }
        let size = step.sub_step();
        if size == 0 {
            continue;
        }
        if !step.step_type().is_flow() {
            return Err(InterpreterError::MalformedScript {
                index,
                message: format!(
                    "{} cannot own a window of {} step(s)",
                    step.step_type().type_name(),
                    size
                ),
            });
        }
        let end = index + size;
        if end >= steps.len() {
            return Err(InterpreterError::MalformedScript {
                index,
                message: format!(
                    "window of {} step(s) runs past the end of the script ({} steps)",
                    size,
                    steps.len()
                ),
            });
        }
        if let Some(&parent_end) = open.last() {
            if end > parent_end {
                return Err(InterpreterError::MalformedScript {
                    index,
                    message: format!(
                        "window ends at step {end} outside its enclosing window ending at step {parent_end}"
                    ),
                });
            }
        }
        open.push(end);
    }
    Ok(())
}

/// Loads the steps of an included script.
#[async_trait]
pub trait ScriptLoader: Send + Sync {
    async fn load(&self, path: &str, base_dir: &str) -> Result<Vec<Step>>;
}

/// A script bound to its data and aspect.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub name: String,
    pub script: Script,
    pub data_source: Option<DataSource>,
    pub shared_sources: Vec<DataSource>,
    pub aspect: Arc<Aspect>,
    /// Cases run after each successful row of this one, seeded with its
    /// final variables.
    pub chains: Vec<TestCase>,
}

impl TestCase {
    pub fn new(name: impl Into<String>, script: Script) -> Self {
        Self {
            name: name.into(),
            script,
            data_source: None,
            shared_sources: Vec::new(),
            aspect: Arc::new(Aspect::default()),
            chains: Vec::new(),
        }
    }

    pub fn with_data_source(mut self, source: DataSource) -> Self {
        self.data_source = Some(source);
        self
    }

    pub fn with_shared_source(mut self, source: DataSource) -> Self {
        self.shared_sources.push(source);
        self
    }

    pub fn with_aspect(mut self, aspect: Aspect) -> Self {
        self.aspect = Arc::new(aspect);
        self
    }

    pub fn chain(mut self, case: TestCase) -> Self {
        self.chains.push(case);
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct Suite {
    pub name: String,
    pub cases: Vec<TestCase>,
    /// Sources applied to every case before its own.
    pub shared_sources: Vec<DataSource>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }

    pub fn with_shared_source(mut self, source: DataSource) -> Self {
        self.shared_sources.push(source);
        self
    }
}
