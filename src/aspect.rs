//! Advice woven around steps that match a pointcut.

use crate::pointcut::Pointcut;
use crate::script::Script;

/// What happens to a matching step.
#[derive(Debug, Clone)]
pub enum Advice {
    /// Report the step as skipped without running it.
    Skip,
    /// Flip the step's negation flag.
    Negate,
    /// Run these steps instead of the step.
    Replace(Script),
    Before(Script),
    After(Script),
    /// Run these steps when the step fails.
    Failure(Script),
}

#[derive(Debug, Clone)]
pub struct Interceptor {
    pub pointcut: Pointcut,
    pub advice: Advice,
}

impl Interceptor {
    pub fn new(pointcut: Pointcut, advice: Advice) -> Self {
        Self { pointcut, advice }
    }
}

/// Ordered interceptors; every matching one applies.
#[derive(Debug, Clone, Default)]
pub struct Aspect {
    interceptors: Vec<Interceptor>,
}

impl Aspect {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, pointcut: Pointcut, advice: Advice) -> Self {
        self.interceptors.push(Interceptor::new(pointcut, advice));
        self
    }

    pub fn interceptors(&self) -> &[Interceptor] {
        &self.interceptors
    }

    pub fn is_empty(&self) -> bool {
        self.interceptors.is_empty()
    }
}
