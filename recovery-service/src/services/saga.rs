//! In-process saga executor.
//!
//! Forward actions run strictly in registration order. On the first failure
//! every step that already succeeded is compensated once, newest first, and
//! the failing step's own error is handed back to the caller.

use async_trait::async_trait;
use std::fmt;
use thiserror::Error;

use crate::services::metrics;

/// One unit of work paired with its undo action.
#[async_trait]
pub trait SagaStep<C: Send + Sync>: Send + Sync {
    type Error: fmt::Display + Send;

    fn name(&self) -> &'static str;

    async fn forward(&self, ctx: &mut C) -> Result<(), Self::Error>;

    /// Undo `forward`. Must tolerate partially-applied state.
    async fn compensate(&self, ctx: &C) -> Result<(), Self::Error>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SagaState {
    Pending,
    Running,
    Completed,
    RolledBack,
}

#[derive(Debug, Error)]
#[error("saga {saga_id} has already started")]
pub struct SagaSealed {
    pub saga_id: String,
}

#[derive(Debug, Error)]
pub enum SagaError<E> {
    #[error(transparent)]
    Sealed(#[from] SagaSealed),

    #[error("step {step} failed: {error}")]
    StepFailed { step: &'static str, error: E },
}

pub struct Saga<S> {
    id: String,
    workflow: &'static str,
    steps: Vec<S>,
    state: SagaState,
    completed: usize,
    compensation_failures: usize,
}

impl<S> Saga<S> {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            workflow: "saga",
            steps: Vec::new(),
            state: SagaState::Pending,
            completed: 0,
            compensation_failures: 0,
        }
    }

    /// Label used for this run's metrics.
    pub fn for_workflow(mut self, workflow: &'static str) -> Self {
        self.workflow = workflow;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn add_step(&mut self, step: S) -> Result<(), SagaSealed> {
        if self.state != SagaState::Pending {
            return Err(SagaSealed {
                saga_id: self.id.clone(),
            });
        }
        self.steps.push(step);
        Ok(())
    }

    pub fn state(&self) -> SagaState {
        self.state
    }

    /// Number of forward actions that succeeded.
    pub fn completed(&self) -> usize {
        self.completed
    }

    pub fn compensation_failures(&self) -> usize {
        self.compensation_failures
    }

    pub async fn execute<C>(&mut self, ctx: &mut C) -> Result<(), SagaError<S::Error>>
    where
        C: Send + Sync,
        S: SagaStep<C>,
    {
        if self.state != SagaState::Pending {
            return Err(SagaSealed {
                saga_id: self.id.clone(),
            }
            .into());
        }
        self.state = SagaState::Running;

        tracing::info!(saga_id = %self.id, steps = self.steps.len(), "Saga started");

        let mut failure = None;
        for step in &self.steps {
            tracing::debug!(saga_id = %self.id, step = step.name(), "Running saga step");
            match step.forward(ctx).await {
                Ok(()) => self.completed += 1,
                Err(error) => {
                    tracing::warn!(
                        saga_id = %self.id,
                        step = step.name(),
                        error = %error,
                        "Saga step failed, compensating"
                    );
                    failure = Some((step.name(), error));
                    break;
                }
            }
        }

        let Some((step, error)) = failure else {
            self.state = SagaState::Completed;
            metrics::record_saga_run(self.workflow, "completed");
            tracing::info!(saga_id = %self.id, "Saga completed");
            return Ok(());
        };

        let ctx: &C = ctx;
        for done in self.steps[..self.completed].iter().rev() {
            if let Err(e) = done.compensate(ctx).await {
                self.compensation_failures += 1;
                metrics::record_compensation_failure(self.workflow, done.name());
                tracing::error!(
                    saga_id = %self.id,
                    step = done.name(),
                    error = %e,
                    "Compensation failed"
                );
            }
        }

        self.state = SagaState::RolledBack;
        metrics::record_saga_run(self.workflow, "rolled_back");
        tracing::warn!(
            saga_id = %self.id,
            failed_step = step,
            compensated = self.completed,
            compensation_failures = self.compensation_failures,
            "Saga rolled back"
        );

        Err(SagaError::StepFailed { step, error })
    }
}
