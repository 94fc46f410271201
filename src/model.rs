//! Steps, locators and the step builder.

use crate::data::InputData;
use crate::error::InterpreterError;
use crate::expression;
use crate::step_type::StepType;
use crate::template::{self, Variables};
use anyhow::Result;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Parameter holding the flattened size of a flow-control step's window.
pub const SUB_STEP_PARAM: &str = "subStep";

/// WebDriver element location strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocatorType {
    #[serde(rename = "id")]
    Id,
    #[serde(rename = "name")]
    Name,
    #[serde(rename = "link text")]
    LinkText,
    #[serde(rename = "css selector")]
    CssSelector,
    #[serde(rename = "xpath")]
    XPath,
}

impl LocatorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            LocatorType::Id => "id",
            LocatorType::Name => "name",
            LocatorType::LinkText => "link text",
            LocatorType::CssSelector => "css selector",
            LocatorType::XPath => "xpath",
        }
    }
}

impl fmt::Display for LocatorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LocatorType {
    type Err = InterpreterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "id" => Ok(LocatorType::Id),
            "name" => Ok(LocatorType::Name),
            "link" | "link text" => Ok(LocatorType::LinkText),
            "css" | "css selector" => Ok(LocatorType::CssSelector),
            "xpath" => Ok(LocatorType::XPath),
            other => Err(InterpreterError::invalid_param("locator", "type", other)),
        }
    }
}

/// A (type, value) element locator. The value is a template.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Locator {
    #[serde(rename = "type")]
    pub kind: LocatorType,
    pub value: String,
}

impl Locator {
    pub fn new(kind: LocatorType, value: impl Into<String>) -> Self {
        Self {
            kind,
            value: value.into(),
        }
    }

    pub fn css(value: impl Into<String>) -> Self {
        Self::new(LocatorType::CssSelector, value)
    }

    pub fn id(value: impl Into<String>) -> Self {
        Self::new(LocatorType::Id, value)
    }

    pub fn xpath(value: impl Into<String>) -> Self {
        Self::new(LocatorType::XPath, value)
    }

    /// Copy with the value resolved against `vars`.
    pub fn resolve<V: Variables + ?Sized>(&self, vars: &V) -> Result<Locator, InterpreterError> {
        Ok(Locator {
            kind: self.kind,
            value: template::resolve(&self.value, vars)?,
        })
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind, self.value)
    }
}

/// One immutable script instruction.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    name: Option<String>,
    step_type: StepType,
    string_params: IndexMap<String, String>,
    locator_params: IndexMap<String, Locator>,
    negated: bool,
    skip: String,
    sub_step: usize,
    sub_steps: Vec<Step>,
}

impl Step {
    pub fn builder(step_type: StepType) -> StepBuilder {
        StepBuilder::new(step_type)
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn step_type(&self) -> &StepType {
        &self.step_type
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.string_params.get(key).map(String::as_str)
    }

    pub fn contains_param(&self, key: &str) -> bool {
        self.string_params.contains_key(key)
    }

    pub fn string_params(&self) -> &IndexMap<String, String> {
        &self.string_params
    }

    pub fn locator(&self, key: &str) -> Option<&Locator> {
        self.locator_params.get(key)
    }

    pub fn locator_params(&self) -> &IndexMap<String, Locator> {
        &self.locator_params
    }

    pub fn is_negated(&self) -> bool {
        self.negated
    }

    /// Unresolved skip-condition template.
    pub fn skip(&self) -> &str {
        &self.skip
    }

    /// Flattened size of this step's window; 0 for ordinary steps.
    pub fn sub_step(&self) -> usize {
        self.sub_step
    }

    /// Nested steps awaiting flattening. Empty once part of a script.
    pub fn sub_steps(&self) -> &[Step] {
        &self.sub_steps
    }

    /// The step's name, or its type and parameters when unnamed.
    pub fn label(&self) -> String {
        match &self.name {
            Some(name) => name.clone(),
            None => self.to_string(),
        }
    }

    /// Evaluate the skip condition: `true`/`false` literals directly,
    /// anything else as an expression over `vars`.
    pub fn resolve_skip(&self, vars: &InputData) -> Result<bool> {
        let text = template::resolve(&self.skip, vars)?;
        expression::evaluate_flag(&text, vars)
    }

    pub fn with_param(&self, key: impl Into<String>, value: impl Into<String>) -> Step {
        let mut copy = self.clone();
        copy.string_params.insert(key.into(), value.into());
        copy
    }

    pub fn with_negated(&self, negated: bool) -> Step {
        let mut copy = self.clone();
        copy.negated = negated;
        copy
    }

    pub(crate) fn take_sub_steps(&mut self) -> Vec<Step> {
        std::mem::take(&mut self.sub_steps)
    }

    pub(crate) fn set_sub_step(&mut self, count: usize) {
        self.sub_step = count;
        self.string_params
            .insert(SUB_STEP_PARAM.to_string(), count.to_string());
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        f.write_str(&self.step_type.type_name())?;
        for (key, value) in &self.string_params {
            if key != SUB_STEP_PARAM {
                write!(f, " {key}={value}")?;
            }
        }
        for (key, locator) in &self.locator_params {
            write!(f, " {key}={locator}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StepBuilder {
    name: Option<String>,
    step_type: StepType,
    string_params: IndexMap<String, String>,
    locator_params: IndexMap<String, Locator>,
    negated: bool,
    skip: String,
    sub_steps: Vec<Step>,
}

impl StepBuilder {
    pub fn new(step_type: StepType) -> Self {
        Self {
            name: None,
            step_type,
            string_params: IndexMap::new(),
            locator_params: IndexMap::new(),
            negated: false,
            skip: "false".to_string(),
            sub_steps: Vec::new(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn put(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.string_params.insert(key.into(), value.into());
        self
    }

    pub fn locator(mut self, key: impl Into<String>, locator: Locator) -> Self {
        self.locator_params.insert(key.into(), locator);
        self
    }

    pub fn negated(mut self, negated: bool) -> Self {
        self.negated = negated;
        self
    }

    pub fn skip(mut self, skip: impl Into<String>) -> Self {
        self.skip = skip.into();
        self
    }

    /// Nest a step in this step's window; flattened by `Script::new`.
    pub fn sub_step(mut self, step: Step) -> Self {
        self.sub_steps.push(step);
        self
    }

    pub fn build(self) -> Result<Step, InterpreterError> {
        let sub_step = match self.string_params.get(SUB_STEP_PARAM) {
            Some(raw) => raw.trim().parse::<usize>().map_err(|_| {
                InterpreterError::invalid_param(
                    self.step_type.type_name(),
                    SUB_STEP_PARAM,
                    raw.clone(),
                )
            })?,
            None => 0,
        };
        Ok(Step {
            name: self.name,
            step_type: self.step_type,
            string_params: self.string_params,
            locator_params: self.locator_params,
            negated: self.negated,
            skip: self.skip,
            sub_step,
            sub_steps: self.sub_steps,
        })
    }
}
