//! Execution Records
//!
//! Run records created by the engine. An execution points at a frozen
//! snapshot job; each of its steps gets one [`JobExecutionStep`] row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Id;

/// Status of a whole execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Waiting for a free worker
    Queued,
    /// A worker is walking the steps
    Running,
    /// Every step completed
    Completed,
    /// A step failed, or the worker gave up
    Failed,
    /// Stopped at a step boundary after a cancellation request
    Cancelled,
}

impl ExecutionStatus {
    /// Terminal states are final.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of one step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StepStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl StepStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a failed execution failed.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionErrorType {
    /// A step could not start: unknown type, bad data, missing parameter
    Validation,
    /// A command's side effect failed
    Command,
    /// The worker itself failed
    Other,
}

/// What caused an execution to be created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Manual { user_id: Id },
    Scheduled { schedule_id: Id },
}

/// One run instance of a job.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobExecution {
    pub id: Id,
    /// The live job this execution was triggered for
    pub job_id: Id,
    /// The frozen copy whose steps this execution runs
    pub snapshot_job_id: Id,
    pub status: ExecutionStatus,
    pub queued_on: DateTime<Utc>,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub cancelled_on: Option<DateTime<Utc>>,
    pub cancelled_by_user_id: Option<Id>,
    pub trigger_schedule_id: Option<Id>,
    pub trigger_user_id: Option<Id>,
    pub error_type: Option<ExecutionErrorType>,
    pub error_message: Option<String>,
}

impl JobExecution {
    /// Creates a queued execution for a snapshot.
    pub fn queued(job_id: Id, snapshot_job_id: Id, trigger: Trigger) -> Self {
        let (trigger_schedule_id, trigger_user_id) = match trigger {
            Trigger::Manual { user_id } => (None, Some(user_id)),
            Trigger::Scheduled { schedule_id } => (Some(schedule_id), None),
        };

        Self {
            id: 0,
            job_id,
            snapshot_job_id,
            status: ExecutionStatus::Queued,
            queued_on: Utc::now(),
            started_on: None,
            completed_on: None,
            cancelled_on: None,
            cancelled_by_user_id: None,
            trigger_schedule_id,
            trigger_user_id,
            error_type: None,
            error_message: None,
        }
    }

    pub fn cancellation_requested(&self) -> bool {
        self.cancelled_on.is_some()
    }
}

/// The run record of one snapshot step within an execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct JobExecutionStep {
    pub id: Id,
    pub execution_id: Id,
    pub snapshot_step_id: Id,
    pub status: StepStatus,
    pub started_on: Option<DateTime<Utc>>,
    pub completed_on: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl JobExecutionStep {
    pub fn new(execution_id: Id, snapshot_step_id: Id, status: StepStatus) -> Self {
        Self {
            id: 0,
            execution_id,
            snapshot_step_id,
            status,
            started_on: None,
            completed_on: None,
            error: None,
        }
    }

    /// Run time in milliseconds, once the step has both timestamps.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_on, self.completed_on) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}
