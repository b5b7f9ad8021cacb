//! Error Types
//!
//! Errors are split by the layer that raises them:
//!
//! - [`CommandError`]: raised by a single command while validating or executing
//! - [`StoreError`]: raised by the entity store
//! - [`EngineError`]: everything the engine surfaces to its callers

use thiserror::Error;

use crate::model::Id;

/// Failure of a single command invocation.
///
/// These are local to one step: the runner records them on the failing
/// execution step and stops that execution only.
#[derive(Debug, Error)]
pub enum CommandError {
    /// A required parameter was absent when the command looked it up.
    #[error("parameter '{parameter}' is required by command '{command}' but was not supplied")]
    MissingParameter { parameter: String, command: String },

    /// A parameter was supplied but its value cannot be used.
    #[error("parameter '{parameter}' of command '{command}' is invalid: {reason}")]
    InvalidParameter {
        parameter: String,
        command: String,
        reason: String,
    },

    /// The command's side effect failed.
    #[error("command '{command}' failed: {source}")]
    Execution {
        command: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl CommandError {
    pub fn missing(parameter: impl Into<String>, command: impl Into<String>) -> Self {
        Self::MissingParameter {
            parameter: parameter.into(),
            command: command.into(),
        }
    }

    pub fn invalid(
        parameter: impl Into<String>,
        command: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            parameter: parameter.into(),
            command: command.into(),
            reason: reason.into(),
        }
    }

    pub fn execution(
        command: impl Into<String>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        Self::Execution {
            command: command.into(),
            source: source.into(),
        }
    }

    /// True for precondition failures that fire before any side effect.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::MissingParameter { .. } | Self::InvalidParameter { .. }
        )
    }
}

/// Failure reported by a [`Store`](crate::store::Store) implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: Id },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store lock poisoned")]
    Poisoned,
}

/// Errors surfaced by the execution engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// The step's type is not in the command registry.
    #[error("unknown command type '{0}'")]
    UnknownCommandType(String),

    #[error(transparent)]
    Command(#[from] CommandError),

    /// The step's stored parameter blob could not be decoded.
    #[error("step {step_id} has unreadable parameter data: {reason}")]
    InvalidStepData { step_id: Id, reason: String },

    /// Evaluating one schedule during a scheduler tick failed.
    #[error("schedule {schedule_id} could not be evaluated: {reason}")]
    SchedulingTick { schedule_id: Id, reason: String },

    /// The worker pool is saturated and the submission policy rejects.
    #[error("all {pool_size} workers are busy; submission rejected")]
    ConcurrencyExhausted { pool_size: usize },

    /// The job exists but cannot be triggered.
    #[error("job {job_id} cannot be triggered: {reason}")]
    JobUnavailable { job_id: Id, reason: String },

    /// A cancellation was requested for an execution that already ended.
    #[error("execution {0} has already finished")]
    ExecutionFinished(Id),

    #[error(transparent)]
    Store(#[from] StoreError),
}
