/// SAGA
///
/// Ordered steps, each with a compensating action. Steps run in order; on
/// the first failure every step that already completed is compensated in
/// reverse order. A compensation that fails leaves the external world in a
/// state nobody owns, which the caller must surface for manual resolution.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SagaError {
    #[error("{0}")]
    Failed(String),
}

impl SagaError {
    pub fn new(err: impl std::fmt::Display) -> Self {
        SagaError::Failed(err.to_string())
    }
}

#[async_trait]
pub trait SagaStep<C>: Send + Sync
where
    C: Send,
{
    fn name(&self) -> &'static str;

    async fn execute(&self, ctx: &mut C) -> Result<(), SagaError>;

    /// Undo a successful `execute`. Must tolerate being the only record of
    /// what happened: everything it needs lives in `ctx`.
    async fn compensate(&self, ctx: &mut C) -> Result<(), SagaError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SagaOutcome {
    Completed,
    /// A step failed and every completed step was undone
    RolledBack { failed_step: &'static str, error: SagaError },
    /// A step failed and at least one compensation failed too
    CompensationFailed {
        failed_step: &'static str,
        error: SagaError,
        compensation_step: &'static str,
        compensation_error: SagaError,
    },
}

impl SagaOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, SagaOutcome::Completed)
    }
}

pub struct Saga<C> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<C>>>,
}

impl<C: Send> Saga<C> {
    pub fn new(name: &'static str) -> Self {
        Saga {
            name,
            steps: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl SagaStep<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub async fn run(&self, ctx: &mut C) -> SagaOutcome {
        for (index, step) in self.steps.iter().enumerate() {
            let err = match step.execute(ctx).await {
                Ok(()) => continue,
                Err(err) => err,
            };
            warn!(saga = self.name, step = step.name(), error = %err, "saga step failed, compensating");

            let mut first_failure = None;
            for done in self.steps[..index].iter().rev() {
                if let Err(comp_err) = done.compensate(ctx).await {
                    error!(saga = self.name, step = done.name(), error = %comp_err, "compensation failed");
                    if first_failure.is_none() {
                        first_failure = Some((done.name(), comp_err));
                    }
                }
            }

            return match first_failure {
                None => SagaOutcome::RolledBack {
                    failed_step: step.name(),
                    error: err,
                },
                Some((compensation_step, compensation_error)) => SagaOutcome::CompensationFailed {
                    failed_step: step.name(),
                    error: err,
                    compensation_step,
                    compensation_error,
                },
            };
        }
        info!(saga = self.name, steps = self.steps.len(), "saga completed");
        SagaOutcome::Completed
    }
}
